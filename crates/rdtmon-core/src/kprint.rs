//! printk-style leveled logging for rdtmon
//!
//! Every line goes to stderr under the stderr lock, prefixed with
//! `rdtmon:` and the level tag, so lines from hooks running on different
//! cpus never interleave.
//!
//! # Environment Variables
//!
//! - `RDTMON_LOG_LEVEL=<level>` - off, error, warn, info, debug, trace (or 0-5)
//! - `RDTMON_FLUSH_EPRINT=1` - flush stderr after each line
//!
//! # Usage
//!
//! ```ignore
//! use rdtmon_core::{kdebug, kinfo, kwarn};
//!
//! kinfo!("pool ready: {} RMIDs", n);
//! kdebug!("assigned RMID {}", rmid);
//! kwarn!("config rejected: {}", err);
//! ```
//!
//! Tests can divert output into memory with `start_capture` /
//! `take_captured` and assert on what a hook logged.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::env::{env_get_bool, env_get_opt};

/// Log levels, most severe first
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Parse a level name or digit; `None` for anything else
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "off" | "0" => Some(LogLevel::Off),
            "error" | "1" => Some(LogLevel::Error),
            "warn" | "2" => Some(LogLevel::Warn),
            "info" | "3" => Some(LogLevel::Info),
            "debug" | "4" => Some(LogLevel::Debug),
            "trace" | "5" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN] ",
            LogLevel::Info => "[INFO] ",
            LogLevel::Debug => "[DEBUG]",
            LogLevel::Trace => "[TRACE]",
        }
    }
}

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Captured lines while a capture is active
static CAPTURE: Mutex<Option<Vec<String>>> = Mutex::new(None);

/// Read `RDTMON_LOG_LEVEL` / `RDTMON_FLUSH_EPRINT`
///
/// Runs once; called lazily by the first log line.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }

    FLUSH_ENABLED.store(env_get_bool("FLUSH_EPRINT", false), Ordering::Relaxed);

    if let Some(level) = env_get_opt::<String>("LOG_LEVEL").and_then(|s| LogLevel::parse(&s)) {
        LOG_LEVEL.store(level as u8, Ordering::Relaxed);
    }
}

#[inline]
pub fn log_level() -> LogLevel {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    LogLevel::from_u8(LOG_LEVEL.load(Ordering::Relaxed))
}

/// Override the level; wins over the environment
pub fn set_log_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn set_flush_enabled(enabled: bool) {
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
pub fn level_enabled(level: LogLevel) -> bool {
    level != LogLevel::Off && level as u8 <= log_level() as u8
}

/// Divert log lines into memory instead of stderr
pub fn start_capture() {
    let mut capture = CAPTURE.lock().unwrap_or_else(|e| e.into_inner());
    capture.get_or_insert_with(Vec::new);
}

/// Return captured lines and stop capturing
pub fn take_captured() -> Vec<String> {
    let mut capture = CAPTURE.lock().unwrap_or_else(|e| e.into_inner());
    capture.take().unwrap_or_default()
}

#[doc(hidden)]
pub fn _klog_impl(level: LogLevel, args: std::fmt::Arguments<'_>) {
    if !level_enabled(level) {
        return;
    }

    {
        let mut capture = CAPTURE.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(lines) = capture.as_mut() {
            lines.push(format!("rdtmon: {} {}", level.tag(), args));
            return;
        }
    }

    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = writeln!(handle, "rdtmon: {} {}", level.tag(), args);
    if FLUSH_ENABLED.load(Ordering::Relaxed) {
        let _ = handle.flush();
    }
}

// ============================================================================
// Public Macros
// ============================================================================

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Error,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Warn,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Info,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Debug,
            format_args!($($arg)*)
        );
    }};
}

/// Per-event tracing (assignments, releases); very chatty
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::kprint::_klog_impl(
            $crate::kprint::LogLevel::Trace,
            format_args!($($arg)*)
        );
    }};
}
