//! Logging configuration for the coin gateway
//!
//! Uses log4rs with appenders:
//! 1. ConsoleAppender - stdout output
//! 2. RollingFileAppender - log files with rotation
//! 3. ActivityAppender - keeps recent daemon lifecycle messages in memory

use anyhow::anyhow;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use serde::Serialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

/// Entries kept in the activity log
pub const ACTIVITY_CAPACITY: usize = 256;

/// Only records from these targets reach the activity log
const ACTIVITY_TARGET: &str = concat!(env!("CARGO_CRATE_NAME"), "::daemon");

// ============================================================================
// Activity Log
// ============================================================================

/// One activity log line
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    /// Seconds since epoch
    pub timestamp: u64,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Bounded ring buffer of recent activity
#[derive(Debug)]
pub struct ActivityLog {
    capacity: usize,
    entries: Mutex<VecDeque<ActivityEntry>>,
}

impl ActivityLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Append `entry`, dropping the oldest ones past capacity
    ///
    /// A zero-capacity log keeps nothing.
    pub fn push(&self, entry: ActivityEntry) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<ActivityEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

static ACTIVITY: OnceLock<ActivityLog> = OnceLock::new();

/// Process-wide activity log fed by [`ActivityAppender`]
pub fn activity_log() -> &'static ActivityLog {
    ACTIVITY.get_or_init(|| ActivityLog::new(ACTIVITY_CAPACITY))
}

// ============================================================================
// Activity Appender
// ============================================================================

/// Custom log4rs appender copying daemon lifecycle records into the activity log
#[derive(Debug)]
pub struct ActivityAppender {
    log: &'static ActivityLog,
}

impl ActivityAppender {
    pub fn new(log: &'static ActivityLog) -> Self {
        Self { log }
    }
}

impl log4rs::append::Append for ActivityAppender {
    fn append(&self, record: &log::Record) -> anyhow::Result<()> {
        if !record.target().starts_with(ACTIVITY_TARGET) {
            return Ok(());
        }

        // Only keep info, warn, error (skip debug/trace)
        let level = match record.level() {
            log::Level::Error => "error",
            log::Level::Warn => "warn",
            log::Level::Info => "info",
            _ => return Ok(()),
        };

        self.log.push(ActivityEntry {
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            level: level.to_string(),
            target: record.target().to_string(),
            message: format!("{}", record.args()),
        });

        Ok(())
    }

    fn flush(&self) {}
}

// ============================================================================
// Logger Initialization
// ============================================================================

/// Initialize log4rs with console, rolling file and activity appenders
///
/// # Log File Configuration
/// - File: `{log_dir}/coin-gateway.1.log`
/// - Max size: 20 MB per file
/// - Max count: 10 files (rotation)
/// - Pattern: `{timestamp} [{level}] {target} - {message}`
pub fn init_logger(log_dir: &Path, level: LevelFilter) -> anyhow::Result<log4rs::Handle> {
    // Console appender
    let console = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S)} [{l}] {t} - {m}{n}",
        )))
        .build();

    std::fs::create_dir_all(log_dir)?;

    let log_file = log_dir.join("coin-gateway.1.log");
    let log_pattern = log_dir.join("coin-gateway.{}.log");
    let log_pattern = log_pattern
        .to_str()
        .ok_or_else(|| anyhow!("log directory is not valid UTF-8: {}", log_dir.display()))?;

    // Rolling file appender (20MB per file, 10 files max)
    let roller = FixedWindowRoller::builder().base(1).build(log_pattern, 10)?;
    let trigger = SizeTrigger::new(20 * 1024 * 1024); // 20 MB
    let policy = CompoundPolicy::new(Box::new(trigger), Box::new(roller));

    let logfile = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S)} [{l}] {t} - {m}{n}",
        )))
        .build(log_file, Box::new(policy))?;

    let activity = ActivityAppender::new(activity_log());

    let config = Config::builder()
        .appender(Appender::builder().build("console", Box::new(console)))
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .appender(Appender::builder().build("activity", Box::new(activity)))
        .build(
            Root::builder()
                .appender("console")
                .appender("logfile")
                .appender("activity")
                .build(level),
        )?;

    Ok(log4rs::init_config(config)?)
}
