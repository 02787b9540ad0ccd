//! Folder <-> tar stream.
//!
//! Entry names are relative to the folder, so unpacking into any directory
//! recreates the folder's contents there.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use tracing::debug;

use sbox_core::{SboxError, SboxResult};

/// Archive `folder` into `tar_path`; returns the archive size in bytes.
pub fn pack_folder(folder: &Path, tar_path: &Path) -> SboxResult<u64> {
    if !folder.is_dir() {
        return Err(SboxError::Archive(format!(
            "not a directory: {}",
            folder.display()
        )));
    }

    let file = File::create(tar_path)?;
    let mut builder = tar::Builder::new(BufWriter::new(file));
    builder.follow_symlinks(false);
    builder
        .append_dir_all(".", folder)
        .map_err(|e| SboxError::Archive(format!("packing {}: {e}", folder.display())))?;

    let mut out = builder
        .into_inner()
        .map_err(|e| SboxError::Archive(format!("finishing {}: {e}", tar_path.display())))?;
    out.flush()?;
    out.get_ref().sync_all()?;

    let size = fs::metadata(tar_path)?.len();
    debug!(folder = %folder.display(), bytes = size, "folder archived");
    Ok(size)
}

/// Extract `tar_path` into `dest`, creating it if needed.
pub fn unpack_archive(tar_path: &Path, dest: &Path) -> SboxResult<()> {
    fs::create_dir_all(dest)?;
    let mut archive = tar::Archive::new(BufReader::new(File::open(tar_path)?));
    archive
        .unpack(dest)
        .map_err(|e| SboxError::Archive(format!("extracting into {}: {e}", dest.display())))?;
    debug!(dest = %dest.display(), "archive extracted");
    Ok(())
}

/// Total size of the regular files under `folder`. Symlinks are not followed.
pub fn folder_size(folder: &Path) -> SboxResult<u64> {
    let mut total = 0;
    let mut stack = vec![folder.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let meta = entry.metadata()?;
            if meta.is_dir() {
                stack.push(entry.path());
            } else if meta.is_file() {
                total += meta.len();
            }
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("docs/notes")).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        fs::write(root.join("docs/b.txt"), vec![b'b'; 300]).unwrap();
        fs::write(root.join("docs/notes/c.txt"), b"").unwrap();
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        sample_tree(&src);

        let tar_path = tmp.path().join("src.tar");
        let size = pack_folder(&src, &tar_path).unwrap();
        assert!(size > 0);

        let dest = tmp.path().join("out");
        unpack_archive(&tar_path, &dest).unwrap();
        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dest.join("docs/b.txt")).unwrap().len(), 300);
        assert!(dest.join("docs/notes/c.txt").exists());
    }

    #[test]
    fn test_folder_size_sums_files() {
        let tmp = tempfile::tempdir().unwrap();
        sample_tree(tmp.path());
        assert_eq!(folder_size(tmp.path()).unwrap(), 305);
    }

    #[test]
    fn test_pack_rejects_file_source() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("plain");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            pack_folder(&file, &tmp.path().join("x.tar")),
            Err(SboxError::Archive(_))
        ));
    }
}
