use crate::config::{ensure_logs_dir, get_logs_dir};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    fmt::{self},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;
const MAX_LOG_BACKUPS: u32 = 5;

type LogResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub component: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

static LOGGER_INITIALIZED: std::sync::Once = std::sync::Once::new();

// Keep the guard alive for the lifetime of the program
static FILE_APPENDER_GUARD: LazyLock<Mutex<Option<tracing_appender::non_blocking::WorkerGuard>>> =
    LazyLock::new(|| Mutex::new(None));

// Uploads run on many tasks; one writer at a time per process
static COMPONENT_LOG_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

pub fn init_logging() -> LogResult<()> {
    ensure_logs_dir()?;
    let logs_dir = get_logs_dir()?;

    LOGGER_INITIALIZED.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // stdout is reserved for the CLI's JSON output
        let console_layer = fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .with_filter(env_filter.clone());

        let file_appender = tracing_appender::rolling::never(&logs_dir, "app.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if let Ok(mut guard_mutex) = FILE_APPENDER_GUARD.lock() {
            *guard_mutex = Some(guard);
        }

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_filter(env_filter);

        // try_init: a host application may already own the global subscriber
        let _ = tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init();
    });

    Ok(())
}

/// JSON-lines log for one component, e.g. `~/.verifydesk/logs/upload-queue.log`
pub struct ComponentLog {
    path: PathBuf,
}

impl ComponentLog {
    pub fn for_component(component: &str) -> LogResult<Self> {
        ensure_logs_dir()?;
        Ok(Self::at(get_logs_dir()?.join(format!("{}.log", component))))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &LogEntry) -> LogResult<()> {
        let _guard = COMPONENT_LOG_LOCK
            .lock()
            .map_err(|e| format!("log lock poisoned: {}", e))?;

        if self.needs_rotation()? {
            self.rotate()?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", serde_json::to_string(entry)?)?;
        file.flush()?;
        Ok(())
    }

    /// Newest first, at most `max_lines` when given
    pub fn read_recent(&self, max_lines: Option<usize>) -> LogResult<Vec<LogEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(&self.path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            // unparseable lines are skipped
            if let Ok(entry) = serde_json::from_str::<LogEntry>(&line?) {
                entries.push(entry);
            }
        }

        entries.reverse();
        if let Some(max) = max_lines {
            entries.truncate(max);
        }
        Ok(entries)
    }

    fn needs_rotation(&self) -> LogResult<bool> {
        if !self.path.exists() {
            return Ok(false);
        }
        Ok(std::fs::metadata(&self.path)?.len() > MAX_LOG_SIZE)
    }

    /// `x.log` becomes `x.log.1`, older backups shift up, the oldest is overwritten
    fn rotate(&self) -> LogResult<()> {
        for i in (1..MAX_LOG_BACKUPS).rev() {
            let current = self.backup(i);
            if current.exists() {
                std::fs::rename(&current, self.backup(i + 1))?;
            }
        }
        if self.path.exists() {
            std::fs::rename(&self.path, self.backup(1))?;
        }
        Ok(())
    }

    fn backup(&self, index: u32) -> PathBuf {
        self.path.with_extension(format!("log.{}", index))
    }
}

pub fn log_component_event(
    component: &str,
    level: LogLevel,
    message: &str,
    details: Option<serde_json::Value>,
) -> LogResult<()> {
    match level {
        LogLevel::Error => error!(component = component, "{}", message),
        LogLevel::Warn => warn!(component = component, "{}", message),
        LogLevel::Debug => debug!(component = component, "{}", message),
        LogLevel::Info => info!(component = component, "{}", message),
    }

    ComponentLog::for_component(component)?.append(&LogEntry {
        timestamp: Utc::now().to_rfc3339(),
        level,
        component: component.to_string(),
        message: message.to_string(),
        details,
    })
}

pub fn read_component_logs(component: &str, max_lines: Option<usize>) -> LogResult<Vec<LogEntry>> {
    ComponentLog::for_component(component)?.read_recent(max_lines)
}

pub fn log_debug(component: &str, message: &str) -> LogResult<()> {
    log_component_event(component, LogLevel::Debug, message, None)
}

pub fn log_info(component: &str, message: &str) -> LogResult<()> {
    log_component_event(component, LogLevel::Info, message, None)
}

pub fn log_warn(component: &str, message: &str) -> LogResult<()> {
    log_component_event(component, LogLevel::Warn, message, None)
}

pub fn log_error(component: &str, message: &str) -> LogResult<()> {
    log_component_event(component, LogLevel::Error, message, None)
}

pub fn log_with_details(
    component: &str,
    level: LogLevel,
    message: &str,
    details: serde_json::Value,
) -> LogResult<()> {
    log_component_event(component, level, message, Some(details))
}
