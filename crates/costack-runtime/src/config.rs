//! Runtime configuration
//!
//! Library defaults with environment overrides, applied once at fleet init.
//!
//! # Environment variables
//!
//! - `CO_SCHED_NUM` - number of schedulers; 0 or more than the CPU count is
//!   clamped to the CPU count
//! - `CO_STACK_SIZE` - shared-stack size per slot in bytes; 0 means 1 MiB
//! - `CO_STACK_SLOTS` - shared-stack slots per scheduler (default 8)
//! - `CO_DEBUG_LOG` - trace resume/yield/timer events
//! - `CO_DISABLE_EXIT` - make `exit()` a no-op (host manages the lifecycle)

use costack_core::env::{env_get, env_get_bool};
use costack_core::error::{SchedError, SchedResult};

/// Default shared-stack size per slot.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Default shared-stack slots per scheduler.
pub const DEFAULT_STACK_SLOTS: usize = 8;

/// Hard cap on slots per scheduler.
pub const MAX_STACK_SLOTS: usize = 64;

/// Number of CPUs, used as the scheduler-count default and cap.
pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Fleet configuration with builder-style setters.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of scheduler threads
    pub sched_num: usize,
    /// Shared-stack size per slot, in bytes
    pub stack_size: usize,
    /// Shared-stack slots per scheduler
    pub stack_slots: usize,
    /// Trace resume/yield/timer events
    pub debug_log: bool,
    /// Make `exit()` a no-op
    pub disable_exit: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

impl Config {
    /// Library defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Config {
            sched_num: env_get("CO_SCHED_NUM", 0usize),
            stack_size: env_get("CO_STACK_SIZE", DEFAULT_STACK_SIZE),
            stack_slots: env_get("CO_STACK_SLOTS", DEFAULT_STACK_SLOTS),
            debug_log: env_get_bool("CO_DEBUG_LOG", false),
            disable_exit: env_get_bool("CO_DISABLE_EXIT", false),
        }
        .normalized()
    }

    /// Plain library defaults, no environment involved.
    pub fn new() -> Self {
        Config {
            sched_num: cpu_count(),
            stack_size: DEFAULT_STACK_SIZE,
            stack_slots: DEFAULT_STACK_SLOTS,
            debug_log: false,
            disable_exit: false,
        }
    }

    // Builder setters

    pub fn sched_num(mut self, n: usize) -> Self {
        self.sched_num = n;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn stack_slots(mut self, n: usize) -> Self {
        self.stack_slots = n;
        self
    }

    pub fn debug_log(mut self, enable: bool) -> Self {
        self.debug_log = enable;
        self
    }

    pub fn disable_exit(mut self, disable: bool) -> Self {
        self.disable_exit = disable;
        self
    }

    /// Replace out-of-range values with their documented substitutes:
    /// scheduler count clamped to `[1, cpu_count]`, zero stack size becomes
    /// the 1 MiB default.
    pub fn normalized(mut self) -> Self {
        let cpus = cpu_count();
        if self.sched_num == 0 || self.sched_num > cpus {
            self.sched_num = cpus;
        }
        if self.stack_size == 0 {
            self.stack_size = DEFAULT_STACK_SIZE;
        }
        self
    }

    /// Validate values that have no substitute.
    pub fn validate(&self) -> SchedResult<()> {
        if self.sched_num == 0 {
            return Err(SchedError::InvalidConfig("sched_num must be > 0"));
        }
        if self.stack_slots == 0 {
            return Err(SchedError::InvalidConfig("stack_slots must be > 0"));
        }
        if self.stack_slots > MAX_STACK_SLOTS {
            return Err(SchedError::InvalidConfig("stack_slots must be <= 64"));
        }
        if self.stack_size < 16 * 1024 {
            return Err(SchedError::InvalidConfig("stack_size must be >= 16KB"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::new();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.sched_num, cpu_count());
        assert_eq!(cfg.stack_size, DEFAULT_STACK_SIZE);
    }

    #[test]
    fn test_normalize_clamps_sched_num() {
        let cfg = Config::new().sched_num(0).normalized();
        assert_eq!(cfg.sched_num, cpu_count());

        let cfg = Config::new().sched_num(100_000).normalized();
        assert_eq!(cfg.sched_num, cpu_count());
    }

    #[test]
    fn test_normalize_replaces_zero_stack() {
        let cfg = Config::new().stack_size(0).normalized();
        assert_eq!(cfg.stack_size, DEFAULT_STACK_SIZE);
    }

    #[test]
    fn test_validate_rejects_bad_slots() {
        assert!(Config::new().stack_slots(0).validate().is_err());
        assert!(Config::new().stack_slots(65).validate().is_err());
        assert!(Config::new().stack_slots(2).validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let cfg = Config::new().sched_num(2).stack_slots(4).debug_log(true);
        assert_eq!(cfg.sched_num, 2);
        assert_eq!(cfg.stack_slots, 4);
        assert!(cfg.debug_log);
    }
}
