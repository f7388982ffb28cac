/// Signal-safe logger for hook implementors (`demos/*` and any third
/// party `intercept_hook_point`).
///
/// Logging from inside a hook runs at roughly the same level as a signal
/// handler: the dispatcher reached it from a patched `ecall` site, so
/// allocation must be reduced to the minimum (ideally none) and the
/// implementation must be reentrant-safe. We use a global static ring
/// buffer to avoid allocation, and a CAS spinlock (which the same thread
/// may re-enter, see `spinlock`) to keep concurrent hook invocations from
/// interleaving their output.
///
/// Enabled by setting `SYSGATE_HOOK_LOG=error|warn|info|debug|trace`
/// before the target process starts.

use log::{Log, Level, Metadata, Record, SetLoggerError};
use core::fmt::{Arguments, Error, Write};
use core::sync::atomic::{AtomicUsize, Ordering};

use nr::nr::SYS_WRITE;
use nr::raw::untraced_syscall;
use crate::spinlock::{SpinLock, SPINLOCK_INIT};

const RING_BUFF_SIZE: usize = 16384;
struct RingBuffer {
    bytes: [u8; RING_BUFF_SIZE],
    size: isize,
    begin: isize,
    end: isize,
    is_empty: bool,
    rawfd: i32,
}
static mut RING_BUFFER: RingBuffer = RingBuffer {
    bytes: [0; RING_BUFF_SIZE],
    size: RING_BUFF_SIZE as isize,
    begin: 0,
    end: 0,
    is_empty: true,
    rawfd: 2,
};

struct RingBufferLogger {}
static LOGGER: RingBufferLogger = RingBufferLogger {};
static LOGGER_LOCK: SpinLock = SPINLOCK_INIT;

// 0 means "disabled"; otherwise a `log::Level as usize`.
static LOG_LEVEL: AtomicUsize = AtomicUsize::new(0);

fn enter_critical_section() {
    LOGGER_LOCK.lock();
}

fn leave_critical_section() {
    LOGGER_LOCK.unlock();
}

fn update_buffer(rb: &mut RingBuffer, buffer: *const u8, n: isize, update_begin: bool) {
    let ptr_begin = unsafe { rb.bytes.as_ptr().offset(rb.begin) };
    let ptr_end   = unsafe { rb.bytes.as_ptr().offset(rb.end)   };
    let ptr_min   = rb.bytes.as_ptr();
    let ptr_max   = unsafe { rb.bytes.as_ptr().offset(rb.size)};
    debug_assert!(ptr_begin >= ptr_min);
    debug_assert!(ptr_end   <  ptr_max);
    assert!(n <= rb.size);

    if n == 0 { return; }

    rb.is_empty = false;

    if rb.end + n < rb.size {
        unsafe {
            core::ptr::copy_nonoverlapping(
                buffer,
                ptr_end as *mut u8,
                n as usize);
        };
        if update_begin {
            rb.begin = rb.end;
        }
        rb.end += n;
    } else {
        let i = rb.size - rb.end;
        let j = n - i;
        unsafe {
            core::ptr::copy_nonoverlapping(
                buffer,
                ptr_end as *mut u8,
                i as usize);
            core::ptr::copy_nonoverlapping(
                buffer.offset(i),
                ptr_min as *mut u8,
                j as usize);
        }
        if update_begin {
            rb.begin = rb.end;
        }
        rb.end = j;
    }
}

/// last index of `needle` in `haystack`, without relying on the
/// unstable `core::slice::memchr` internals.
fn memrchr(needle: u8, haystack: &[u8]) -> Option<usize> {
    haystack.iter().rposition(|&b| b == needle)
}

#[macro_export(local_inner_macros)]
macro_rules! logmsg {
    ($($arg:tt)*) => ({
        $crate::logger::rb_eprintln(core::format_args!($($arg)*));
    })
}

fn ll_write(rawfd: i32, buffer: *const u8, size: usize)
{
    unsafe {
        untraced_syscall(SYS_WRITE, rawfd as i64, buffer as i64, size as i64, 0, 0, 0)
    };
}

fn log_enabled(level: Level) -> bool {
    let configured = LOG_LEVEL.load(Ordering::Relaxed);
    configured != 0 && configured >= level as usize
}

static LOG_LEVEL_STR: &[&str] = &[ "", "ERROR", "WARN", "INFO", "DEBUG", "TRACE" ];
fn log_level_str(level: Level) -> &'static str {
    let i = level as usize;
    LOG_LEVEL_STR[i % 6]
}

impl Log for RingBufferLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        log_enabled(metadata.level())
    }
    fn log(&self, record: &Record) {
        enter_critical_section();
        if self.enabled(record.metadata()) {
            logmsg!(
                "[{:<5}] {}",
                log_level_str(record.level()),
                record.args());
        }
        leave_critical_section();
    }
    fn flush(&self) {
        enter_critical_section();
        unsafe {
            flush_buffer(&mut RING_BUFFER, &ll_write)
        };
        leave_critical_section();
    }
}

fn ring_buffer_write<F>(rb: &mut RingBuffer, s: &str, flush: F)
where
    F: Fn(i32, *const u8, usize),
{
    match memrchr(b'\n', s.as_bytes()) {
        None => update_buffer(rb, s.as_ptr(), s.len() as isize, false),
        Some(i) => {
            let i = 1 + i;
            let j = s.len() - i;
            let first = s.as_ptr();
            let second = unsafe { first.offset(i as isize) };
            update_buffer(rb, first, i as isize, false);
            flush_buffer(rb, &flush);
            update_buffer(rb, second, j as isize, false);
        }
    }
}

fn flush_buffer<F>(rb: &mut RingBuffer, flush: F)
where
    F: Fn(i32, *const u8, usize),
{
    if rb.is_empty { return; }
    unsafe {
        if rb.end > rb.begin {
            flush(rb.rawfd, rb.bytes.as_ptr().offset(rb.begin), (rb.end - rb.begin) as usize);
        } else {
            let i = rb.size - rb.end;
            let j = rb.size - (rb.begin - rb.end) - i;
            flush(rb.rawfd, rb.bytes.as_ptr().offset(rb.begin), i as usize);
            flush(rb.rawfd, rb.bytes.as_ptr(), j as usize);
        }
    };
    rb.end = rb.begin;
    rb.is_empty = true;
}

fn level_from_env() -> Option<Level> {
    match std::env::var("SYSGATE_HOOK_LOG").ok()?.as_str() {
        "error" => Some(Level::Error),
        "warn" => Some(Level::Warn),
        "info" => Some(Level::Info),
        "debug" => Some(Level::Debug),
        "trace" => Some(Level::Trace),
        _ => None,
    }
}

pub fn init() -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    if let Some(lvl) = level_from_env() {
        LOG_LEVEL.store(lvl as usize, Ordering::Relaxed);
        log::set_max_level(lvl.to_level_filter());
    }
    Ok(())
}

impl Write for RingBuffer {
    fn write_str(&mut self, s: &str) -> Result<(), Error> {
        ring_buffer_write(self, s, ll_write);
        Ok(())
    }
}

/// Caller (`Log::log`) already holds `LOGGER_LOCK` when this runs.
pub fn rb_eprintln(args: Arguments) {
    unsafe {
        rb_print_to(args, &mut RING_BUFFER);
        RING_BUFFER.write_str("\n").expect("write failed");
    }
}

fn rb_print_to(args: Arguments, file: &mut RingBuffer)
{
    core::fmt::write(file, args).expect("write failed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memrchr_finds_last_newline() {
        assert_eq!(memrchr(b'\n', b"a\nb\nc"), Some(3));
        assert_eq!(memrchr(b'\n', b"abc"), None);
    }
}
