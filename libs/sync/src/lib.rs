// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Synchronization primitives for the evaluation runtime.
//!
//! The locks in this crate record *who* holds them: every worker thread of
//! the runtime registers a small stable id, and [`HolderLock::release`]
//! refuses to unlock on behalf of anyone but the holder. Guarded regions in
//! the scheduler are short (deque cursors, continuation lists), so the
//! default variant spins; a mutex-backed variant exists for regions that may
//! be contended for longer.

mod lock;
mod locked;
pub mod loom;
pub mod registry;
mod spin_wait;

pub use lock::{HolderLock, MutexLock, SpinLock};
pub use locked::{Locked, LockedGuard};
pub use registry::WorkerId;
pub use spin_wait::SpinWait;
