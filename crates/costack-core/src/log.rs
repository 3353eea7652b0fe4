//! Leveled debug logging for the runtime
//!
//! Thread-safe stderr logging, cheap to disable. The scheduler's
//! resume/yield/timer traces go through `cotrace!` and are off unless the
//! `debug_log` config flag (or `CO_LOG_LEVEL=5`) turns them on.
//!
//! # Environment
//!
//! - `CO_LOG_LEVEL=<n>` - 0=off, 1=error, 2=warn, 3=info, 4=debug, 5=trace

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log levels, lowest to highest verbosity.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl Level {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Level::Off,
            1 => Level::Error,
            2 => Level::Warn,
            3 => Level::Info,
            4 => Level::Debug,
            _ => Level::Trace,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            Level::Off => "",
            Level::Error => "[ERROR]",
            Level::Warn => "[WARN] ",
            Level::Info => "[INFO] ",
            Level::Debug => "[DEBUG]",
            Level::Trace => "[TRACE]",
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(Level::Warn as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize the level from the environment. Idempotent; called on first
/// log, or explicitly by the config layer before raising the level.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    let level: u8 = crate::env::env_get("CO_LOG_LEVEL", Level::Warn as u8);
    LOG_LEVEL.store(Level::from_u8(level) as u8, Ordering::Relaxed);
}

pub fn set_level(level: Level) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Raise (never lower) the level to `Trace`. Used by the `debug_log` flag.
pub fn enable_trace() {
    init();
    let _ = LOG_LEVEL.fetch_max(Level::Trace as u8, Ordering::Relaxed);
}

#[inline]
pub fn enabled(level: Level) -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

/// Write one record to stderr. Not meant to be called directly; use the
/// macros.
pub fn write(level: Level, args: core::fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut out = stderr.lock();
    let _ = writeln!(out, "{} {}", level.prefix(), args);
}

#[macro_export]
macro_rules! coerror {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::Level::Error) {
            $crate::log::write($crate::log::Level::Error, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! cowarn {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::Level::Warn) {
            $crate::log::write($crate::log::Level::Warn, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! coinfo {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::Level::Info) {
            $crate::log::write($crate::log::Level::Info, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! codebug {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::Level::Debug) {
            $crate::log::write($crate::log::Level::Debug, format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! cotrace {
    ($($arg:tt)*) => {
        if $crate::log::enabled($crate::log::Level::Trace) {
            $crate::log::write($crate::log::Level::Trace, format_args!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_roundtrip() {
        assert_eq!(Level::from_u8(0), Level::Off);
        assert_eq!(Level::from_u8(3), Level::Info);
        assert_eq!(Level::from_u8(200), Level::Trace);
    }

    #[test]
    fn test_enable_trace_only_raises() {
        set_level(Level::Error);
        enable_trace();
        assert!(enabled(Level::Trace));
        // fetch_max: another enable_trace keeps it at trace
        enable_trace();
        assert!(enabled(Level::Trace));
    }
}
