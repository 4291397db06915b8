use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use ibackup::{Backup, BackupConfig};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the log subscriber. `--debug` wins over `RUST_LOG`.
pub fn initialize_logging_from_args(matches: &clap::ArgMatches) {
    let filter = if matches.is_present("debug") {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

pub fn load_config(matches: &clap::ArgMatches) -> Result<BackupConfig> {
    match matches.value_of("config") {
        Some(path) => {
            debug!(path, "loading config");
            Ok(BackupConfig::from_file(path)?)
        }
        None => Ok(BackupConfig::default()),
    }
}

pub fn backup_path<'a>(matches: &'a clap::ArgMatches) -> Result<&'a Path> {
    matches
        .value_of("path")
        .map(Path::new)
        .ok_or_else(|| Error::CliInputError("--path is required for this command.".to_string()))
}

/// Open the backup at `--path` and, if it is encrypted, unlock it.
pub fn open_backup(matches: &clap::ArgMatches) -> Result<Backup> {
    let path = backup_path(matches)?;
    let mut backup = Backup::open(path, load_config(matches)?)?;
    if backup.is_encrypted() {
        let password = match matches.value_of("password") {
            Some(p) => p.to_string(),
            None => rpassword::prompt_password("Enter backup passcode: ")?,
        };
        backup.unlock(&password)?;
    }
    Ok(backup)
}

/// The user's home directory, from the environment.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

pub fn format_size(size: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if size < 1024 {
        return format!("{} B", size);
    }
    let mut value = size as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}
