// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Mutator / GC-thread handshake.
//!
//! The mutator signals `gc_start` and parks until `copy_done`; the GC thread
//! performs root gathering, copy, and remembered-set maintenance under the
//! assumption that the mutator is idle, then sweeps dead regions
//! concurrently while publishing its progress through an atomic cursor the
//! mutator's bump allocator busy-waits against.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};

use crate::vm::Vm;

/// Raw VM pointer handed to the GC thread. The thread dereferences it only
/// while the mutator is parked in [`GcSync::request_gc_and_wait`], which is
/// what makes the access exclusive.
pub(crate) struct VmPtr(pub *mut Vm);

unsafe impl Send for VmPtr {}

#[derive(Default)]
struct Phase {
    gc_start: bool,
    copy_done: bool,
    stop: bool,
}

pub(crate) struct GcSync {
    phase: Mutex<Phase>,
    cvar: Condvar,
    /// Address up to which the concurrent sweep has destructed dead objects.
    /// `usize::MAX` when no sweep is running.
    dealloc_progress: AtomicUsize,
    sweep_active: AtomicBool,
}

impl GcSync {
    pub(crate) fn new() -> Self {
        Self {
            phase: Mutex::new(Phase::default()),
            cvar: Condvar::new(),
            dealloc_progress: AtomicUsize::new(usize::MAX),
            sweep_active: AtomicBool::new(false),
        }
    }

    /// Mutator side: request a minor collection and park until the copy
    /// phase has completed.
    pub(crate) fn request_gc_and_wait(&self) {
        let mut phase = self.phase.lock();
        phase.gc_start = true;
        self.cvar.notify_all();
        while !phase.copy_done {
            self.cvar.wait(&mut phase);
        }
        phase.copy_done = false;
    }

    /// GC-thread side: park until a collection is requested. Returns `false`
    /// when the heap is shutting down.
    pub(crate) fn wait_for_request(&self) -> bool {
        let mut phase = self.phase.lock();
        while !phase.gc_start && !phase.stop {
            self.cvar.wait(&mut phase);
        }
        if phase.stop {
            return false;
        }
        phase.gc_start = false;
        true
    }

    pub(crate) fn publish_copy_done(&self) {
        let mut phase = self.phase.lock();
        phase.copy_done = true;
        self.cvar.notify_all();
    }

    pub(crate) fn request_stop(&self) {
        let mut phase = self.phase.lock();
        phase.stop = true;
        self.cvar.notify_all();
    }

    pub(crate) fn begin_sweep(&self, start: *mut u8) {
        self.dealloc_progress.store(start as usize, Ordering::Release);
        self.sweep_active.store(true, Ordering::Release);
    }

    pub(crate) fn publish_sweep_progress(&self, cursor: *mut u8) {
        self.dealloc_progress.store(cursor as usize, Ordering::Release);
    }

    pub(crate) fn finish_sweep(&self) {
        self.dealloc_progress.store(usize::MAX, Ordering::Release);
        self.sweep_active.store(false, Ordering::Release);
    }

    /// Mutator side: never hand out nursery memory the sweep has not passed
    /// yet. The overlap is rare, so a spin is enough.
    pub(crate) fn wait_for_sweep_progress(&self, alloc_end: *mut u8) {
        while self.sweep_active.load(Ordering::Acquire) {
            let progress = self.dealloc_progress.load(Ordering::Acquire);
            if progress >= alloc_end as usize {
                break;
            }
            std::hint::spin_loop();
        }
    }

    pub(crate) fn wait_sweep_done(&self) {
        while self.sweep_active.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
    }
}
