//! Startup-time logging, grounded in reverie's `strace::setup_logger`.
//! This is the "normal" half of the two-tier design: it runs before
//! any patch is active, so a buffered, allocating `fern` dispatch is
//! safe. Once patches are live, runtime diagnostics from inside
//! `intercept_hook_point` go through `hook_support::logger` instead,
//! which never allocates.

use std::io;

use chrono::Local;
use colored::Colorize;
use log::LevelFilter;

const LEVEL_ENV: &str = "SYSGATE_LOG";

fn level_from_env() -> LevelFilter {
    match std::env::var(LEVEL_ENV).as_deref() {
        Ok("off") => LevelFilter::Off,
        Ok("error") => LevelFilter::Error,
        Ok("warn") => LevelFilter::Warn,
        Ok("info") => LevelFilter::Info,
        Ok("debug") => LevelFilter::Debug,
        Ok("trace") => LevelFilter::Trace,
        _ => LevelFilter::Warn,
    }
}

fn colorize(level: log::Level, s: &str) -> String {
    match level {
        log::Level::Error => s.red().to_string(),
        log::Level::Warn => s.yellow().to_string(),
        log::Level::Info => s.green().to_string(),
        log::Level::Debug => s.blue().to_string(),
        log::Level::Trace => s.normal().to_string(),
    }
}

/// Installs the process-wide `log` backend. Safe to call once, from
/// the `.init_array` constructor, before any object has been scanned.
pub fn init() -> io::Result<()> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                Local::now().format("%H:%M:%S%.3f"),
                colorize(record.level(), record.level().as_str()),
                message
            ))
        })
        .level(level_from_env())
        .chain(std::io::stderr())
        .apply()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("logger already set: {}", e)))
}
