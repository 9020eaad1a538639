//! Structured logging for NutrIA
//!
//! Writes logs to ~/.nutria/logs/ with categories:
//! - CHAT: Assistant turns and tool dispatch
//! - SYNC: Drive backup lifecycle
//! - AUTH: Identity configuration and login
//! - STORE: Local document store events
//! - ERROR: Errors and fallbacks

use chrono::{Local, Utc};
use once_cell::sync::Lazy;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

/// Log categories for structured logging
#[derive(Debug, Clone, Copy)]
pub enum LogCategory {
    Chat,
    Sync,
    Auth,
    Store,
    Error,
}

impl LogCategory {
    fn as_str(&self) -> &'static str {
        match self {
            LogCategory::Chat => "CHAT",
            LogCategory::Sync => "SYNC",
            LogCategory::Auth => "AUTH",
            LogCategory::Store => "STORE",
            LogCategory::Error => "ERROR",
        }
    }
}

static LOG_FILE: Lazy<Mutex<Option<PathBuf>>> = Lazy::new(|| Mutex::new(None));

fn get_log_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".nutria/logs")
}

fn get_log_file_path() -> PathBuf {
    let today = Local::now().format("%Y-%m-%d").to_string();
    get_log_dir().join(format!("nutria-{}.log", today))
}

/// Initialize the logging system, creating the log directory if needed.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = get_log_dir();

    if !log_dir.exists() {
        fs::create_dir_all(&log_dir)?;
    }

    let log_path = get_log_file_path();
    *LOG_FILE.lock().unwrap() = Some(log_path.clone());

    log(LogCategory::Store, "NutrIA logging initialized");

    Ok(())
}

/// Log a message with a category tag.
pub fn log(category: LogCategory, message: &str) {
    let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    let log_line = format!("[{}] [{}] {}\n", timestamp, category.as_str(), message);

    // Always print to console (for dev)
    print!("{}", log_line);

    let log_path = get_log_file_path();
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(&log_path) {
        let _ = file.write_all(log_line.as_bytes());
    }
}

pub fn log_chat(message: &str) {
    log(LogCategory::Chat, message);
}

pub fn log_sync(message: &str) {
    log(LogCategory::Sync, message);
}

pub fn log_auth(message: &str) {
    log(LogCategory::Auth, message);
}

pub fn log_store(message: &str) {
    log(LogCategory::Store, message);
}

pub fn log_error(message: &str) {
    log(LogCategory::Error, message);
}

/// Clean up old log files (keep last 7 days)
pub fn cleanup_old_logs() -> Result<usize, Box<dyn std::error::Error>> {
    let log_dir = get_log_dir();
    let mut deleted = 0;

    if !log_dir.exists() {
        return Ok(0);
    }

    let cutoff = Utc::now() - chrono::Duration::days(7);

    for entry in fs::read_dir(&log_dir)? {
        let entry = entry?;
        let path = entry.path();

        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                let modified_time: chrono::DateTime<Utc> = modified.into();
                if modified_time < cutoff {
                    if fs::remove_file(&path).is_ok() {
                        deleted += 1;
                    }
                }
            }
        }
    }

    Ok(deleted)
}
