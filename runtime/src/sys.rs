// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The thin OS layer: CPU pinning, real-time priority, cache geometry.
//!
//! All of it is best-effort. Where the platform (or the user's privileges)
//! won't cooperate, the pool runs unpinned at default priority and the
//! cache probe falls back to a common line size — slower, never wrong.

use std::io;

/// Number of worker threads to use when the pool size is not overridden.
#[must_use]
pub fn hardware_concurrency() -> usize {
    num_cpus::get()
}

/// Pins the calling thread to `cpu`.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> io::Result<()> {
    // Safety: zeroing a cpu_set_t and setting one bit through the libc
    // macros is exactly their documented use.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        let rc = libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu: usize) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "thread affinity is not available on this platform",
    ))
}

/// Requests the maximum `SCHED_FIFO` priority for the calling thread.
///
/// Returns the granted priority.
#[cfg(target_os = "linux")]
pub fn raise_priority() -> io::Result<i32> {
    // Safety: plain libc calls with a parameter struct initialized right
    // here.
    unsafe {
        let policy = libc::SCHED_FIFO;
        let priority = libc::sched_get_priority_max(policy);
        if priority < 0 {
            return Err(io::Error::last_os_error());
        }
        let param = libc::sched_param {
            sched_priority: priority,
        };
        let rc = libc::pthread_setschedparam(libc::pthread_self(), policy, &param);
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(priority)
    }
}

#[cfg(not(target_os = "linux"))]
pub fn raise_priority() -> io::Result<i32> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "real-time scheduling is not available on this platform",
    ))
}

/// The line size a work's cost estimate is measured against; probes the L1
/// data cache and falls back to 64 bytes.
#[must_use]
pub fn cache_line_size() -> usize {
    probe_cache_line_size().unwrap_or(64)
}

#[cfg(target_os = "linux")]
fn probe_cache_line_size() -> Option<usize> {
    // Safety: sysconf takes a name constant and returns -1 for unsupported
    // queries; no pointers involved.
    let line = unsafe { libc::sysconf(libc::_SC_LEVEL1_DCACHE_LINESIZE) };
    usize::try_from(line).ok().filter(|line| *line > 0)
}

#[cfg(not(target_os = "linux"))]
fn probe_cache_line_size() -> Option<usize> {
    None
}
