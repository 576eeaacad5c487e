use chrono::Local;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

// Oldest entries are dropped past this point; container output can be chatty.
const MAX_ENTRIES: usize = 10_000;

static LOGS: Lazy<Mutex<VecDeque<String>>> = Lazy::new(|| Mutex::new(VecDeque::new()));

static LOG_LEVEL: Lazy<Mutex<LogLevel>> = Lazy::new(|| Mutex::new(LogLevel::Info));

// Library users get the `log` facade only; the CLI turns console echo on.
static CONSOLE_OUTPUT: AtomicBool = AtomicBool::new(false);

static CONSOLE_STDERR_ONLY: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Debug => "🔍",
            LogLevel::Info => "ℹ️",
            LogLevel::Warning => "⚠️",
            LogLevel::Error => "❌",
        }
    }

    fn as_log_level(&self) -> log::Level {
        match self {
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Info => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

pub fn set_log_level(level: LogLevel) {
    if let Ok(mut current_level) = LOG_LEVEL.lock() {
        *current_level = level;
    }
}

pub fn get_log_level() -> LogLevel {
    if let Ok(level) = LOG_LEVEL.lock() {
        *level
    } else {
        LogLevel::Info
    }
}

/// Echo entries at or above the current level to stdout/stderr.
pub fn set_console_output(enabled: bool) {
    CONSOLE_OUTPUT.store(enabled, Ordering::Relaxed);
}

/// Send every echoed entry to stderr, leaving stdout to the caller's output.
pub fn set_console_stderr_only(enabled: bool) {
    CONSOLE_STDERR_ONLY.store(enabled, Ordering::Relaxed);
}

pub fn is_console_stderr_only() -> bool {
    CONSOLE_STDERR_ONLY.load(Ordering::Relaxed)
}

fn console_stream(level: LogLevel, stderr_only: bool) -> ConsoleStream {
    match level {
        LogLevel::Error | LogLevel::Warning => ConsoleStream::Stderr,
        _ if stderr_only => ConsoleStream::Stderr,
        _ => ConsoleStream::Stdout,
    }
}

fn record(level: LogLevel, target: &str, message: &str) {
    log::log!(target: target, level.as_log_level(), "{}", message);

    let current_level = get_log_level();
    if level < current_level {
        return;
    }

    let timestamp = Local::now().format("%H:%M:%S").to_string();
    let formatted = format!("[{}] {} {}", timestamp, level.prefix(), message);

    if let Ok(mut logs) = LOGS.lock() {
        if logs.len() == MAX_ENTRIES {
            logs.pop_front();
        }
        logs.push_back(formatted.clone());
    }

    if CONSOLE_OUTPUT.load(Ordering::Relaxed) {
        match console_stream(level, is_console_stderr_only()) {
            ConsoleStream::Stderr => eprintln!("{}", formatted),
            ConsoleStream::Stdout => println!("{}", formatted),
        }
    }
}

/// Log a message with timestamp and level.
pub fn log(level: LogLevel, message: &str) {
    record(level, "cosmos_testbed", message);
}

/// Record one line of container output, tagged with a short container id.
pub fn container_output(container_id: &str, line: &str) {
    let short_id: String = container_id.chars().take(12).collect();
    let line = line.trim_end_matches(['\r', '\n']);
    record(
        LogLevel::Debug,
        "cosmos_testbed::container",
        &format!("[{}] {}", short_id, line),
    );
}

pub fn get_logs() -> Vec<String> {
    if let Ok(logs) = LOGS.lock() {
        logs.iter().cloned().collect()
    } else {
        let timestamp = Local::now().format("%H:%M:%S").to_string();
        vec![format!("[{}] ❌ Error accessing logs", timestamp)]
    }
}

pub fn clear_logs() {
    if let Ok(mut logs) = LOGS.lock() {
        logs.clear();
    }
}

pub fn debug(message: &str) {
    log(LogLevel::Debug, message);
}

pub fn info(message: &str) {
    log(LogLevel::Info, message);
}

pub fn warning(message: &str) {
    log(LogLevel::Warning, message);
}

pub fn error(message: &str) {
    log(LogLevel::Error, message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_stream_selection() {
        assert_eq!(console_stream(LogLevel::Info, false), ConsoleStream::Stdout);
        assert_eq!(console_stream(LogLevel::Debug, false), ConsoleStream::Stdout);
        assert_eq!(console_stream(LogLevel::Warning, false), ConsoleStream::Stderr);
        assert_eq!(console_stream(LogLevel::Info, true), ConsoleStream::Stderr);
        assert_eq!(console_stream(LogLevel::Debug, true), ConsoleStream::Stderr);
        assert_eq!(console_stream(LogLevel::Error, true), ConsoleStream::Stderr);
    }

    // The buffer and level are process-wide, so everything runs in one test.
    #[test]
    fn test_level_filter_and_container_output() {
        set_log_level(LogLevel::Info);
        clear_logs();

        debug("hidden");
        info("visible");
        container_output("0123456789abcdef0123", "Started\r\n");
        assert_eq!(get_logs().len(), 1);
        assert!(get_logs()[0].ends_with("visible"));

        set_log_level(LogLevel::Debug);
        container_output("0123456789abcdef0123", "Started\r\n");
        let logs = get_logs();
        assert_eq!(logs.len(), 2);
        assert!(logs[1].ends_with("[0123456789ab] Started"));

        clear_logs();
        assert!(get_logs().is_empty());
        set_log_level(LogLevel::Info);
    }
}
