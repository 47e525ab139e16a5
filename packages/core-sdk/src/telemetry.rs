use std::{fs::OpenOptions, io::Write, path::PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

static TELEMETRY_ENABLED: Lazy<std::sync::RwLock<bool>> =
    Lazy::new(|| std::sync::RwLock::new(false));

const LOG_FILE: &str = "watchbridge.log";

/** \brief 日志级别。 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
        }
    }
}

/**
 * \brief 打开或关闭诊断日志；关闭时所有记录调用均为空操作。
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/** \brief 记录常规事件。 */
pub fn log_event(category: &str, message: &str) {
    record(Level::Info, category, message);
}

/** \brief 记录失败，内容不含密钥。 */
pub fn log_error(category: &str, message: &str) {
    record(Level::Error, category, message);
}

/**
 * \brief 日志文件位置：WATCHBRIDGE_LOG_DIR 下的 watchbridge.log，缺省目录为 logs。
 */
pub fn log_path() -> PathBuf {
    std::env::var("WATCHBRIDGE_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("logs"))
        .join(LOG_FILE)
}

/**
 * \brief 遮盖密钥，仅保留末四位，用于日志与状态输出。
 */
pub fn mask_secret(secret: &str) -> String {
    let count = secret.chars().count();
    if count <= 4 {
        return "*".repeat(count);
    }
    let tail: String = secret.chars().skip(count - 4).collect();
    format!("{}{}", "*".repeat(count - 4), tail)
}

/**
 * \brief 单行日志格式：时间戳、级别、类别、消息；消息中的换行被压平。
 */
pub fn format_line(timestamp: &str, level: Level, category: &str, message: &str) -> String {
    let flat = message.replace(['\r', '\n'], " ");
    format!(
        "{} level={} category={} {}",
        timestamp,
        level.as_str(),
        category,
        flat
    )
}

fn record(level: Level, category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = append(level, category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

fn append(level: Level, category: &str, message: &str) -> Result<()> {
    let path = log_path();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
    writeln!(file, "{}", format_line(&timestamp, level, category, message))?;
    Ok(())
}
