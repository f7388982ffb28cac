//! `sysgate`: `LD_PRELOAD`-based syscall interception for riscv64
//! Linux via in-process hot-patching.
//!
//! Loading this library into a process runs the whole pipeline once,
//! from the `.init_array` constructor below, before the target's own
//! `main` ever executes:
//!
//!   1. `object` enumerates every loaded ELF object worth patching.
//!   2. `scanner` disassembles each object's text and finds `ecall`
//!      sites.
//!   3. `planner` assigns each site a patch class and a footprint,
//!      refusing any site whose footprint would silently destroy a
//!      following instruction it can't prove is dead
//!      (`planner::collateral_is_safe`) — `reloc`'s scratch buffer is
//!      built for the day a planner relocates such instructions
//!      instead of refusing them, but nothing calls into it yet — and
//!      flags any site whose `ra` is still live past the `ecall` so
//!      `activate` knows to prepend a guard that stashes it first.
//!   4. `activate` writes the patch bytes and flushes the icache.
//!   5. `dispatch` registers the finished patch set so `entry.S` can
//!      find it by return address once the first patched `ecall`
//!      site fires.
#![allow(clippy::too_many_arguments)]

pub mod activate;
pub mod auxv;
pub mod config;
pub mod consts;
pub mod decode;
pub mod descriptor;
pub mod dispatch;
pub mod entry;
pub mod hook;
pub mod log_fmt;
pub mod logging;
pub mod magic;
pub mod object;
pub mod planner;
pub mod procmaps;
pub mod reloc;
pub mod scanner;

use log::info;

use descriptor::ObjectDescriptor;

fn read_object_text(obj: &ObjectDescriptor) -> std::io::Result<Vec<u8>> {
    // The running process's own mapping, not the on-disk file: PIE
    // relocations and any loader fixups are already applied here,
    // which the scanner's addresses must match.
    let len = (obj.text_end - obj.text_start) as usize;
    let slice = unsafe { std::slice::from_raw_parts(obj.text_start as *const u8, len) };
    Ok(slice.to_vec())
}

/// Startup is all-or-nothing: either every selected site is patched
/// or the process exits. A partially-patched process would leave
/// otherwise-identical call sites in an inconsistent intercept state,
/// so every error here is surfaced to `sysgate_ctor` to abort on
/// rather than skipped past.
fn run_pipeline() -> std::io::Result<()> {
    logging::init().ok();
    info!("sysgate: starting object enumeration");

    let mut objects = object::enumerate_objects()?;
    let dispatch_entry = entry::dispatch_entry_addr();
    let mut log = log_fmt::EventLog::open_from_config()?;

    for obj in objects.iter_mut() {
        let text = read_object_text(obj)?;
        let jump_targets = scanner::scan_object(obj, &text);
        planner::plan_object(obj, &jump_targets);

        if config::CONFIG.debug_dump {
            for patch in &obj.patches {
                info!(
                    "sysgate: plan {:?} addr={:#x} class={:?} size={}",
                    obj.path, patch.syscall_addr, patch.class, patch.patch_size_bytes
                );
            }
        }
        log.log_plan(obj)?;

        activate::activate_object(obj, dispatch_entry)?;
        dispatch::register_patches(std::mem::take(&mut obj.patches));
    }

    info!("sysgate: pipeline complete");
    Ok(())
}

#[no_mangle]
extern "C" fn sysgate_ctor() {
    if let Err(e) = run_pipeline() {
        eprintln!("sysgate: fatal startup error, aborting: {}", e);
        std::process::abort();
    }
}

#[link_section = ".init_array"]
#[used]
static INITIALIZER: extern "C" fn() = sysgate_ctor;
