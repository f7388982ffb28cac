//! Startup-time configuration, frozen once per process via
//! `lazy_static`. Mirrors how `reverie-ptrace`'s tracer
//! binary reads its own `RUST_LOG`-style knobs once at start and
//! never re-reads the environment afterwards.

use lazy_static::lazy_static;
use std::env;

use crate::consts::{
    INTERCEPT_ALL_OBJS, INTERCEPT_DEBUG_DUMP, INTERCEPT_LOG, INTERCEPT_LOG_TRUNC,
};

#[derive(Debug)]
pub struct Config {
    /// Patch every loaded object, including libc/libpthread/the vdso,
    /// instead of only the main executable.
    pub all_objs: bool,
    /// Dump the planned patch set (object, address, class) to stderr
    /// before activation, for offline inspection.
    pub debug_dump: bool,
    /// Path to append a line-per-syscall event log to. `None` disables
    /// the log.
    pub log_path: Option<String>,
    /// Truncate `log_path` at startup instead of appending.
    pub log_trunc: bool,
}

fn env_flag(name: &str) -> bool {
    match env::var(name) {
        Ok(v) => v != "0" && !v.is_empty(),
        Err(_) => false,
    }
}

impl Config {
    fn from_env() -> Self {
        Config {
            all_objs: env_flag(INTERCEPT_ALL_OBJS),
            debug_dump: env_flag(INTERCEPT_DEBUG_DUMP),
            log_path: env::var(INTERCEPT_LOG).ok(),
            log_trunc: env_flag(INTERCEPT_LOG_TRUNC),
        }
    }
}

lazy_static! {
    pub static ref CONFIG: Config = Config::from_env();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_flag_rejects_zero_and_empty() {
        env::set_var("SYSGATE_TEST_FLAG_A", "0");
        assert!(!env_flag("SYSGATE_TEST_FLAG_A"));
        env::set_var("SYSGATE_TEST_FLAG_B", "");
        assert!(!env_flag("SYSGATE_TEST_FLAG_B"));
        env::set_var("SYSGATE_TEST_FLAG_C", "1");
        assert!(env_flag("SYSGATE_TEST_FLAG_C"));
        env::remove_var("SYSGATE_TEST_FLAG_A");
        env::remove_var("SYSGATE_TEST_FLAG_B");
        env::remove_var("SYSGATE_TEST_FLAG_C");
    }
}
