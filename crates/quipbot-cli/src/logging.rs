//! Daily log files plus stderr, with age-based cleanup.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub const LOG_RETENTION_DAYS: u64 = 7;
const LOG_PREFIX: &str = "quipbot";
const SECS_PER_DAY: u64 = 24 * 60 * 60;

pub struct LogManager {
    log_dir: PathBuf,
}

impl LogManager {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    pub fn get_current_log_path(&self) -> PathBuf {
        let today = chrono::Local::now().format("%Y-%m-%d");
        self.log_dir.join(format!("{}.{}.log", LOG_PREFIX, today))
    }

    pub fn cleanup_old_logs(&self) -> Result<usize> {
        self.cleanup_logs_older_than(LOG_RETENTION_DAYS)
    }

    /// Deletes quipbot log files last modified more than `days` ago.
    pub fn cleanup_logs_older_than(&self, days: u64) -> Result<usize> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut deleted_count = 0;
        for path in self.get_log_files()? {
            let modified = fs::metadata(&path)?.modified()?;
            if modified >= cutoff {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => deleted_count += 1,
                Err(e) => eprintln!("Failed to delete old log {}: {}", path.display(), e),
            }
        }
        if deleted_count > 0 {
            tracing::info!("Cleaned up {} old log file(s)", deleted_count);
        }
        Ok(deleted_count)
    }

    /// Newest first.
    pub fn get_log_files(&self) -> Result<Vec<PathBuf>> {
        if !self.log_dir.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.log_dir)? {
            let path = entry?.path();
            if path.is_file() && is_log_file_name(&path) {
                files.push(path);
            }
        }
        files.sort();
        files.reverse();
        Ok(files)
    }

    pub fn get_log_size(&self) -> Result<u64> {
        Ok(self
            .get_log_files()?
            .iter()
            .filter_map(|file| fs::metadata(file).ok())
            .map(|metadata| metadata.len())
            .sum())
    }

    pub fn format_size(bytes: u64) -> String {
        const KB: u64 = 1024;
        const MB: u64 = KB * 1024;
        const GB: u64 = MB * 1024;
        if bytes >= GB {
            format!("{:.2} GB", bytes as f64 / GB as f64)
        } else if bytes >= MB {
            format!("{:.2} MB", bytes as f64 / MB as f64)
        } else if bytes >= KB {
            format!("{:.2} KB", bytes as f64 / KB as f64)
        } else {
            format!("{} B", bytes)
        }
    }
}

fn is_log_file_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|name| name.starts_with(LOG_PREFIX) && name.ends_with(".log"))
        .unwrap_or(false)
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info")))
}

pub struct LoggingGuard {
    _guard: WorkerGuard,
}

pub fn init_logging(log_dir: &Path, log_level: &str) -> Result<LoggingGuard> {
    fs::create_dir_all(log_dir)?;
    let manager = LogManager::new(log_dir.to_path_buf());
    manager.cleanup_old_logs()?;
    let log_path = manager.get_current_log_path();

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(env_filter(log_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .with_target(true)
        .with_filter(env_filter(log_level));

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()?;

    Ok(LoggingGuard { _guard: guard })
}
