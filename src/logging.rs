use chrono::Local;
use env_logger::{Builder, Env, Target};
use log::LevelFilter;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::settings::LoggingSettings;

/// Crates whose debug/info output drowns ours.
const NOISY_MODULES: &[&str] = &["reqwest", "hyper", "hyper_util", "rustls", "h2", "xcap"];

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    File {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("logger already initialized")]
    AlreadyInitialized(#[from] log::SetLoggerError),
}

/// `<dir>/snapsolve_YYYYMMDD.log`
pub fn log_file_path(dir: &Path) -> PathBuf {
    dir.join(format!("snapsolve_{}.log", Local::now().format("%Y%m%d")))
}

/// Install the global logger. `RUST_LOG` overrides the configured level.
pub fn init(settings: &LoggingSettings) -> Result<(), LoggingError> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(settings.level.as_str()));
    for module in NOISY_MODULES {
        builder.filter_module(module, LevelFilter::Warn);
    }
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} - {} - {} - {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            record.target(),
            record.level(),
            record.args()
        )
    });

    if settings.save_to_file {
        let path = log_file_path(&settings.directory);
        let file = fs::create_dir_all(&settings.directory)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path))
            .map_err(|source| LoggingError::File {
                path: path.clone(),
                source,
            })?;
        builder.target(Target::Pipe(Box::new(file)));
        eprintln!("Logging to {}", path.display());
    }

    builder.try_init()?;
    log::info!("Logging configured successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_is_dated() {
        let path = log_file_path(Path::new("logs"));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("snapsolve_"));
        assert!(name.ends_with(".log"));
        assert_eq!(name.len(), "snapsolve_YYYYMMDD.log".len());
    }
}
