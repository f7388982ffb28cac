//! C1: object enumerator.
//!
//! Walks `/proc/self/maps` (`procmaps.rs`), groups mappings by backing
//! file, and resolves each distinct executable object's text segment
//! bounds by parsing its ELF program headers with `goblin`. The vdso
//! has no backing file, so grouping by file already drops it; it is
//! never a patch candidate, `INTERCEPT_ALL_OBJS` or not.
//!
//! With no override, only `libc` and `libpthread` are included —
//! patching the full object set risks the dispatcher recursing into
//! its own support code. `libc` not appearing in the enumerated set
//! at all is fatal: the library has nothing left to do.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use goblin::elf::Elf;
use goblin::elf::program_header::PT_LOAD;
use log::{debug, warn};

use crate::config::CONFIG;
use crate::descriptor::ObjectDescriptor;
use crate::procmaps::{decode_self_maps, ProcMapsEntry};

/// The path component after the last `/`, truncated at the first `-`
/// or `.`, e.g. `/lib/libc.so.6` -> `libc`, `/lib/libpthread-2.31.so`
/// -> `libpthread`.
fn short_name(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    let cut = name.find(['-', '.']).unwrap_or(name.len());
    Some(&name[..cut])
}

/// The `.so` this very function is linked into. `nr::raw::untraced_syscall`
/// (and, transitively, the hand-written `asm/no_intercept.S` leaf) live
/// here; if the scanner ever patched this object, the dispatcher could
/// end up calling into its own gateway while trying to issue the real
/// syscall for a previous dispatch, recursing forever. Always excluded,
/// `INTERCEPT_ALL_OBJS` or not.
fn self_object_path() -> Option<PathBuf> {
    let addr = self_object_path as usize as *mut libc::c_void;
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    if unsafe { libc::dladdr(addr, &mut info) } == 0 || info.dli_fname.is_null() {
        return None;
    }
    let cstr = unsafe { std::ffi::CStr::from_ptr(info.dli_fname) };
    cstr.to_str().ok().map(PathBuf::from)
}

/// Included by default, with no `INTERCEPT_ALL_OBJS` override: the
/// two objects that issue essentially every syscall a target program
/// makes, directly or via its C library wrappers.
fn is_default_includable(path: &Path) -> bool {
    matches!(short_name(path), Some("libc") | Some("libpthread"))
}

/// ELF `e_type == ET_DYN` objects are loaded at a kernel-chosen base;
/// their in-file virtual addresses must be offset by the lowest
/// `PT_LOAD` segment's mapped address to get runtime addresses.
fn text_bounds_from_elf(bytes: &[u8], map_base: u64) -> Option<(u64, u64)> {
    let elf = Elf::parse(bytes).ok()?;
    let is_pie = elf.header.e_type == goblin::elf::header::ET_DYN;
    let lowest_vaddr = elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD)
        .map(|ph| ph.p_vaddr)
        .min()?;
    let load_bias = if is_pie {
        map_base.wrapping_sub(lowest_vaddr)
    } else {
        0
    };

    let mut start = u64::MAX;
    let mut end = 0u64;
    for ph in elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == PT_LOAD && (ph.p_flags & goblin::elf::program_header::PF_X) != 0)
    {
        let s = ph.p_vaddr.wrapping_add(load_bias);
        let e = s + ph.p_memsz;
        start = start.min(s);
        end = end.max(e);
    }
    if start == u64::MAX {
        None
    } else {
        Some((start, end))
    }
}

fn group_by_file(entries: &[ProcMapsEntry]) -> BTreeMap<PathBuf, Vec<&ProcMapsEntry>> {
    let mut groups: BTreeMap<PathBuf, Vec<&ProcMapsEntry>> = BTreeMap::new();
    for e in entries {
        if let Some(path) = e.filename() {
            if path.is_absolute() {
                groups.entry(path.clone()).or_default().push(e);
            }
        }
    }
    groups
}

fn build_file_backed_objects(entries: &[ProcMapsEntry]) -> (Vec<ObjectDescriptor>, bool) {
    let self_path = self_object_path();
    let mut objs = Vec::new();
    let mut found_libc = false;
    for (path, mappings) in group_by_file(entries) {
        if self_path.as_deref() == Some(path.as_path()) {
            debug!("object {:?}: skipped (this is sysgate's own shared object)", path);
            continue;
        }
        if short_name(&path) == Some("libc") {
            found_libc = true;
        }
        if !CONFIG.all_objs && !is_default_includable(&path) {
            debug!("object {:?}: skipped (not libc/libpthread, set INTERCEPT_ALL_OBJS=1 to include)", path);
            continue;
        }
        let base = mappings.iter().map(|m| m.base()).min().unwrap();
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                warn!("object {:?}: could not read for ELF parsing: {}", path, e);
                continue;
            }
        };
        match text_bounds_from_elf(&bytes, base) {
            Some((text_start, text_end)) => {
                objs.push(ObjectDescriptor::new(base, path, text_start, text_end));
            }
            None => warn!("object {:?}: no executable PT_LOAD segment found", path),
        }
    }
    (objs, found_libc)
}

/// Enumerate every distinct loaded object worth scanning. Returns
/// objects sorted by base address.
///
/// The vdso (identified via `AT_SYSINFO_EHDR`, see `auxv::vdso_base`)
/// is never a candidate: it has no backing file, so `group_by_file`
/// already drops it, and `INTERCEPT_ALL_OBJS` does not override that —
/// there is no on-disk path for the dispatcher's own post-mortem
/// tooling (`addr2line`) to resolve a vdso address against.
pub fn enumerate_objects() -> std::io::Result<Vec<ObjectDescriptor>> {
    let entries = decode_self_maps()?;
    let (mut objs, found_libc) = build_file_backed_objects(&entries);
    if !found_libc {
        eprintln!("sysgate: libc not found in address space, this library serves no purpose");
        std::process::abort();
    }
    objs.sort_by_key(|o| o.base);
    Ok(objs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enumerate_finds_at_least_the_main_executable() {
        let objs = enumerate_objects().expect("enumerate_objects");
        assert!(!objs.is_empty());
        assert!(objs.iter().any(|o| o.text_end > o.text_start));
    }

    #[test]
    fn default_includable_matches_libc_and_libpthread_by_short_name() {
        assert!(is_default_includable(Path::new("/lib/riscv64-linux-gnu/libc.so.6")));
        assert!(is_default_includable(Path::new("/lib/libpthread-2.31.so")));
        assert!(!is_default_includable(Path::new("/lib/ld-linux-riscv64-lp64d.so.1")));
        assert!(!is_default_includable(Path::new("/usr/bin/sysgate-demo")));
    }

    #[test]
    fn short_name_truncates_at_dash_or_dot() {
        assert_eq!(short_name(Path::new("/lib/libc.so.6")), Some("libc"));
        assert_eq!(short_name(Path::new("/lib/libpthread-2.31.so")), Some("libpthread"));
    }
}
