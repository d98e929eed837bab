use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::RwLock,
};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub const DEFAULT_LOG_FILE: &str = "logs/scisift.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
        }
    }
}

/** \brief 事件日志的去向；默认关闭。 */
struct Sink {
    enabled: bool,
    path: PathBuf,
}

static SINK: Lazy<RwLock<Sink>> = Lazy::new(|| {
    RwLock::new(Sink {
        enabled: false,
        path: PathBuf::from(DEFAULT_LOG_FILE),
    })
});

/**
 * \brief 开关事件日志并设置写入文件。
 */
pub fn configure(enabled: bool, path: impl Into<PathBuf>) {
    if let Ok(mut sink) = SINK.write() {
        sink.enabled = enabled;
        sink.path = path.into();
    }
}

pub fn is_enabled() -> bool {
    SINK.read().map(|s| s.enabled).unwrap_or(false)
}

/**
 * \brief 记录常规事件（如 `gateway.explain`、`server.profile`）。
 */
pub fn log_event(category: &str, message: &str) {
    record(Level::Info, category, message);
}

pub fn log_error(category: &str, message: &str) {
    record(Level::Error, category, message);
}

fn record(level: Level, category: &str, message: &str) {
    let path = match SINK.read() {
        Ok(sink) if sink.enabled => sink.path.clone(),
        _ => return,
    };
    let written = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(anyhow::Error::from)
        .and_then(|ts| append(&path, &format_line(&ts, level, category, message)));
    if let Err(err) = written {
        tracing::warn!("telemetry write to {:?} failed: {}", path, err);
    }
}

/** \brief 单行格式；消息中的换行被折叠，保证一条事件占一行。 */
fn format_line(timestamp: &str, level: Level, category: &str, message: &str) -> String {
    let flat = message.lines().collect::<Vec<_>>().join(" | ");
    format!("{} [{}] {} - {}", timestamp, level.as_str(), category, flat)
}

fn append(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    Ok(())
}
