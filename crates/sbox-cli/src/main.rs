//! sbox: SecureBox folder sealing CLI
//!
//!   lock <folder> <output> [password]   - archive + encrypt a folder into <output>.bin
//!   unlock <data_file> [password]        - decrypt into a workspace, re-seal on Enter
//!   verify <data_file>                   - check the artifact against its .sha256
//!   status <data_file>                   - show state, checkpoint and sidecars
//!   config show                          - print the effective configuration

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use sbox_core::config::SboxConfig;
use sbox_core::types::{artifact_path, ArtifactPaths};
use sbox_seal::archive::folder_size;
use sbox_seal::{
    verify_artifact, CheckpointStore, HostSnapshot, LockSession, ProgressEvent, ProgressFn,
    StateStore, Tuning, UnlockSession,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sbox",
    version,
    about = "SecureBox: seal folders into encrypted, verifiable artifacts"
)]
struct Cli {
    /// Path to the sbox.toml configuration file
    #[arg(long, short = 'c', env = "SBOX_CONFIG", default_value = "sbox.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "SBOX_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "SBOX_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Archive and encrypt a folder
    Lock {
        /// Folder to seal
        folder: PathBuf,
        /// Output artifact (".bin" is appended when missing)
        output: PathBuf,
        /// Password (prompted for when omitted)
        password: Option<String>,
        /// Continue an interrupted run from its checkpoint
        #[arg(long)]
        resume: bool,
        /// Worker thread count (overrides tuning)
        #[arg(long, conflicts_with = "no_threading")]
        threads: Option<usize>,
        /// Encrypt on a single thread
        #[arg(long)]
        no_threading: bool,
    },

    /// Decrypt an artifact into a workspace
    ///
    /// Without --dest the folder opens in a temporary workspace and is sealed
    /// back onto the artifact when you press Enter.
    Unlock {
        /// Sealed artifact
        data_file: PathBuf,
        /// Password (prompted for when omitted)
        password: Option<String>,
        /// Extract into this directory and leave it there
        #[arg(long)]
        dest: Option<PathBuf>,
    },

    /// Verify an artifact against its digest sidecar
    Verify {
        data_file: PathBuf,
    },

    /// Show the backup state of an artifact
    Status {
        data_file: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = SboxConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.logging.format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(level, &format);
    debug!(config = %cli.config.display(), "configuration loaded");

    match &cli.command {
        Commands::Lock {
            folder,
            output,
            password,
            resume,
            threads,
            no_threading,
        } => cmd_lock(
            &config,
            folder,
            output,
            password.as_deref(),
            *resume,
            *threads,
            *no_threading,
        ),
        Commands::Unlock {
            data_file,
            password,
            dest,
        } => cmd_unlock(&config, data_file, password.as_deref(), dest.as_deref()),
        Commands::Verify { data_file } => cmd_verify(data_file),
        Commands::Status { data_file } => cmd_status(data_file),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────────

fn read_password(given: Option<&str>, confirm: bool) -> Result<SecretString> {
    let pw = match given {
        Some(pw) => pw.to_string(),
        None => {
            let pw = rpassword::prompt_password("Password: ").context("reading password")?;
            if confirm {
                let again =
                    rpassword::prompt_password("Confirm password: ").context("reading password")?;
                if again != pw {
                    bail!("passwords do not match");
                }
            }
            pw
        }
    };
    if pw.is_empty() {
        bail!("empty password");
    }
    Ok(SecretString::from(pw))
}

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
        )
        .expect("static progress template")
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Drive a progress bar from pipeline events.
fn progress_callback(pb: ProgressBar) -> ProgressFn {
    Box::new(move |event: &ProgressEvent| match event {
        ProgressEvent::Started { total_bytes, .. } => pb.set_length(*total_bytes),
        ProgressEvent::Resumed {
            bytes_written,
            chunk_index,
        } => {
            pb.set_position(*bytes_written);
            pb.set_message(format!("resumed at chunk {chunk_index}"));
        }
        ProgressEvent::ChunkWritten {
            bytes_done,
            total_bytes,
            ..
        } => {
            pb.set_length(*total_bytes);
            pb.set_position(*bytes_done);
        }
        ProgressEvent::CheckpointSaved { chunk_index, .. } => {
            pb.set_message(format!("checkpoint @ {chunk_index}"));
        }
        ProgressEvent::Finished { chunks, .. } => {
            pb.set_message(format!("{chunks} chunks"));
        }
    })
}

fn resolve_tuning(
    config: &SboxConfig,
    folder: &Path,
    threads: Option<usize>,
    no_threading: bool,
) -> Result<Tuning> {
    let bytes = folder_size(folder).with_context(|| format!("sizing {}", folder.display()))?;
    let tuning = Tuning::resolve(&config.tuning, bytes, &HostSnapshot::probe());
    let tuning = match (threads, no_threading) {
        (_, true) => tuning.single_threaded(),
        (Some(n), false) => tuning.with_threads(n),
        (None, false) => tuning,
    };
    info!(
        folder_bytes = bytes,
        chunk_size = tuning.chunk_size,
        workers = tuning.max_workers,
        "tuning"
    );
    Ok(tuning)
}

// ── `sbox lock` ───────────────────────────────────────────────────────────────

fn cmd_lock(
    config: &SboxConfig,
    folder: &Path,
    output: &Path,
    password: Option<&str>,
    resume: bool,
    threads: Option<usize>,
    no_threading: bool,
) -> Result<()> {
    if !folder.is_dir() {
        bail!("{} is not a directory", folder.display());
    }
    let target = artifact_path(output);
    let password = read_password(password, true)?;
    let tuning = resolve_tuning(config, folder, threads, no_threading)?;

    let pb = make_progress_bar("lock");
    let progress = progress_callback(pb.clone());
    let report = LockSession::new(folder, &target, password, tuning)
        .with_crypto(config.crypto.clone())
        .with_checkpoint_interval(config.checkpoint.interval_chunks)
        .run(resume, Some(&progress));
    pb.finish_and_clear();
    let report = report.with_context(|| format!("locking {}", folder.display()))?;

    println!(
        "sealed {} -> {} ({}{})",
        folder.display(),
        report.target.display(),
        fmt_bytes(report.artifact_bytes),
        if report.resumed { ", resumed" } else { "" }
    );
    println!("sha256 {}", report.digest);
    Ok(())
}

// ── `sbox unlock` ─────────────────────────────────────────────────────────────

fn cmd_unlock(
    config: &SboxConfig,
    data_file: &Path,
    password: Option<&str>,
    dest: Option<&Path>,
) -> Result<()> {
    let artifact = artifact_path(data_file);
    if !artifact.exists() {
        bail!("{} not found", artifact.display());
    }
    let password = read_password(password, false)?;

    let pb = make_progress_bar("unlock");
    let progress = progress_callback(pb.clone());
    let unlocked = UnlockSession::new(&artifact, password)
        .with_crypto(config.crypto.clone())
        .with_checkpoint_interval(config.checkpoint.interval_chunks)
        .open(dest, Some(&progress));
    pb.finish_and_clear();
    let unlocked = unlocked.with_context(|| format!("unlocking {}", artifact.display()))?;

    println!("unlocked into {}", unlocked.path().display());
    if dest.is_some() {
        return unlocked.close().context("closing workspace");
    }

    println!("Press Enter to seal the folder again...");
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("waiting for Enter")?;

    let tuning = resolve_tuning(config, unlocked.path(), None, false)?;
    let pb = make_progress_bar("reseal");
    let progress = progress_callback(pb.clone());
    let report = unlocked.reseal(tuning, Some(&progress));
    pb.finish_and_clear();
    let report = report.with_context(|| format!("re-sealing {}", artifact.display()))?;
    unlocked.close().context("removing workspace")?;

    println!(
        "sealed {} ({}), sha256 {}",
        report.target.display(),
        fmt_bytes(report.artifact_bytes),
        report.digest
    );
    Ok(())
}

// ── `sbox verify` / `sbox status` ─────────────────────────────────────────────

fn cmd_verify(data_file: &Path) -> Result<()> {
    let artifact = artifact_path(data_file);
    let report =
        verify_artifact(&artifact).with_context(|| format!("verifying {}", artifact.display()))?;
    println!("ok      {}", artifact.display());
    println!("sha256  {}", report.digest);
    match report.state {
        Some(state) => println!("state   {}", state.status),
        None => println!("state   (none)"),
    }
    Ok(())
}

fn cmd_status(data_file: &Path) -> Result<()> {
    let artifact = artifact_path(data_file);
    let paths = ArtifactPaths::for_target(&artifact);

    println!("artifact    {}", artifact.display());
    for (label, path) in [
        ("data", &paths.target),
        ("sha256", &paths.sha256),
        ("state", &paths.state),
        ("checkpoint", &paths.checkpoint),
        ("partial", &paths.partial),
        ("staged tar", &paths.staging_tar),
    ] {
        let shown = match std::fs::metadata(path) {
            Ok(m) => fmt_bytes(m.len()),
            Err(_) => "-".into(),
        };
        println!("  {label:<11} {shown}");
    }

    match StateStore::for_target(&artifact).load() {
        Some(state) => {
            println!("status      {} (at {})", state.status, state.timestamp);
            if let Some(p) = state.progress {
                println!(
                    "  progress  chunk {} / {} written",
                    p.chunk_index,
                    fmt_bytes(p.bytes_written)
                );
            }
        }
        None => println!("status      unknown (no state file)"),
    }

    if let Some(cp) = CheckpointStore::for_target(&artifact).load() {
        println!(
            "checkpoint  chunk {} at {} of input (sbox lock --resume continues it)",
            cp.chunk_index,
            fmt_bytes(cp.bytes_written)
        );
    }
    Ok(())
}

// ── `sbox config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &SboxConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_lock() {
        let cli = Cli::try_parse_from([
            "sbox", "lock", "docs", "backup", "hunter2", "--resume", "--threads", "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Lock {
                folder,
                output,
                password,
                resume,
                threads,
                no_threading,
            } => {
                assert_eq!(folder, PathBuf::from("docs"));
                assert_eq!(output, PathBuf::from("backup"));
                assert_eq!(password.as_deref(), Some("hunter2"));
                assert!(resume);
                assert_eq!(threads, Some(3));
                assert!(!no_threading);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_threads_conflict_with_no_threading() {
        let result = Cli::try_parse_from([
            "sbox",
            "lock",
            "docs",
            "backup",
            "--threads",
            "2",
            "--no-threading",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_password_argument_rejected() {
        let err = read_password(Some(""), true).unwrap_err();
        assert!(err.to_string().contains("empty password"));
        assert!(read_password(Some("hunter2"), false).is_ok());
    }

    #[test]
    fn test_fmt_bytes() {
        assert_eq!(fmt_bytes(512), "512 B");
        assert_eq!(fmt_bytes(2048), "2.0 KB");
        assert_eq!(fmt_bytes(5 * 1024 * 1024), "5.0 MB");
    }
}
