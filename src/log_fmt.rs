//! Per-syscall event log. Distinct from `hook_support`'s
//! signal-safe ring buffer: this log is written from the startup-time
//! half of the library (object scanning, patch planning), where a
//! normal buffered `std::fs::File` is safe to use, and is meant to be
//! read back by a human with `addr2line` rather than watched live.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use crate::config::CONFIG;
use crate::descriptor::ObjectDescriptor;

pub struct EventLog {
    file: Option<std::fs::File>,
}

impl EventLog {
    pub fn disabled() -> Self {
        EventLog { file: None }
    }

    /// Opens `CONFIG.log_path` if set, truncating it first when
    /// `CONFIG.log_trunc` is set, and writes the header line the
    /// offline `addr2line`-based decoder keys off of.
    pub fn open_from_config() -> io::Result<Self> {
        let path = match &CONFIG.log_path {
            Some(p) => p,
            None => return Ok(EventLog { file: None }),
        };
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(!CONFIG.log_trunc)
            .truncate(CONFIG.log_trunc)
            .open(Path::new(path))?;
        writeln!(file, "# sysgate-log v1 pid={}", std::process::id())?;
        Ok(EventLog { file: Some(file) })
    }

    pub fn log_plan(&mut self, obj: &ObjectDescriptor) -> io::Result<()> {
        let file = match &mut self.file {
            Some(f) => f,
            None => return Ok(()),
        };
        for patch in &obj.patches {
            writeln!(
                file,
                "plan obj={:?} addr={:#x} class={:?} size={} syscall={}",
                obj.path, patch.syscall_addr, patch.class, patch.patch_size_bytes, patch.syscall_num
            )?;
        }
        Ok(())
    }

    pub fn log_dispatch(&mut self, addr: u64, syscall_num: i64, ret: i64) -> io::Result<()> {
        let file = match &mut self.file {
            Some(f) => f,
            None => return Ok(()),
        };
        writeln!(file, "call addr={:#x} nr={} ret={}", addr, syscall_num, ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn writes_header_line_when_no_path_configured() {
        // CONFIG.log_path is None unless INTERCEPT_LOG is set in the
        // test process's environment, so this just checks the no-op
        // path doesn't error.
        let log = EventLog { file: None };
        assert!(log.file.is_none());
    }

    #[test]
    fn header_format_includes_pid() {
        let dir = std::env::temp_dir().join(format!("sysgate-log-test-{}", std::process::id()));
        let mut file = std::fs::File::create(&dir).unwrap();
        writeln!(file, "# sysgate-log v1 pid={}", std::process::id()).unwrap();
        drop(file);
        let mut contents = String::new();
        std::fs::File::open(&dir)
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents.starts_with("# sysgate-log v1 pid="));
        std::fs::remove_file(&dir).unwrap();
    }
}
