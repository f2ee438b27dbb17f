//! The allocator and scheduler as one critical region.
//!
//! Every mutating operation runs under a single lock with interrupts masked.
//! A timer tick that arrives while the region is held is not run on top of
//! the interrupted operation; it is counted and replayed once the region is
//! released.

use core::sync::atomic::{AtomicU32, Ordering};

use alloc::vec::Vec;
use spin::Mutex;

use crate::allocator::{Handle, Heap, HeapStats};
use crate::config::SchedulerConfig;
use crate::context::ContextSwitch;
use crate::error::{HeapError, ProcessError};
use crate::interrupts::without_interrupts;
use crate::proc::{Pid, Priority, Process};
use crate::scheduler::{ProcessStats, Scheduler};

/// Allocator and scheduler state guarded together
pub struct Core<'a, S> {
    pub heap: Heap<'a>,
    pub scheduler: Scheduler<S>,
}

impl<'a, S: ContextSwitch> Core<'a, S> {
    pub const fn new(switch: S, config: SchedulerConfig) -> Self {
        Self {
            heap: Heap::new(),
            scheduler: Scheduler::new(switch, config),
        }
    }

    pub fn create_process(
        &mut self,
        name: &str,
        entry: usize,
        priority: Priority,
        privileged: bool,
    ) -> Result<Pid, ProcessError> {
        self.scheduler
            .create_process(&mut self.heap, name, entry, priority, privileged)
    }

    pub fn terminate_process(&mut self, pid: Pid) {
        self.scheduler.terminate_process(&mut self.heap, pid);
    }
}

pub struct Kernel<'a, S> {
    core: Mutex<Core<'a, S>>,
    pending_ticks: AtomicU32,
}

impl<'a, S: ContextSwitch> Kernel<'a, S> {
    pub const fn new(switch: S, config: SchedulerConfig) -> Self {
        Self {
            core: Mutex::new(Core::new(switch, config)),
            pending_ticks: AtomicU32::new(0),
        }
    }

    /// Bring up the allocator on `arena`, then the process table.
    /// The allocator must exist first since the kernel process needs a stack.
    pub fn boot(&self, arena: &'a mut [u8]) -> Result<Pid, BootError> {
        self.with(|core| {
            core.heap.init(arena).map_err(BootError::Heap)?;
            core.scheduler
                .init_process_table(&mut core.heap)
                .map_err(BootError::Process)
        })
    }

    /// Run `f` inside the critical region
    pub fn with<R>(&self, f: impl FnOnce(&mut Core<'a, S>) -> R) -> R {
        let result = without_interrupts(|| {
            let mut core = self.core.lock();
            f(&mut core)
        });
        self.replay_pending_ticks();
        result
    }

    /// Entry point for the timer collaborator, once per timer period.
    ///
    /// Returns `false` when the tick was deferred because the region is held.
    pub fn timer_interrupt(&self) -> bool {
        match self.core.try_lock() {
            Some(mut core) => {
                core.scheduler.tick();
                true
            }
            None => {
                self.pending_ticks.fetch_add(1, Ordering::AcqRel);
                false
            }
        }
    }

    /// Ticks waiting for the region to be released
    pub fn pending_ticks(&self) -> u32 {
        self.pending_ticks.load(Ordering::Acquire)
    }

    pub fn allocate(&self, size: usize) -> Result<Handle, HeapError> {
        self.with(|core| core.heap.allocate(size))
    }

    pub fn deallocate(&self, handle: Handle) -> Result<(), HeapError> {
        self.with(|core| core.heap.deallocate(handle))
    }

    pub fn zero_allocate(&self, count: usize, element_size: usize) -> Result<Handle, HeapError> {
        self.with(|core| core.heap.zero_allocate(count, element_size))
    }

    pub fn reallocate(&self, handle: Option<Handle>, new_size: usize) -> Result<Option<Handle>, HeapError> {
        self.with(|core| core.heap.reallocate(handle, new_size))
    }

    pub fn heap_stats(&self) -> HeapStats {
        self.with(|core| core.heap.stats())
    }

    pub fn create_process(
        &self,
        name: &str,
        entry: usize,
        priority: Priority,
        privileged: bool,
    ) -> Result<Pid, ProcessError> {
        self.with(|core| core.create_process(name, entry, priority, privileged))
    }

    pub fn terminate_process(&self, pid: Pid) {
        self.with(|core| core.terminate_process(pid));
    }

    pub fn yield_now(&self) {
        self.with(|core| core.scheduler.yield_now());
    }

    pub fn suspend(&self, pid: Pid) -> Result<(), ProcessError> {
        self.with(|core| core.scheduler.suspend(pid))
    }

    pub fn resume(&self, pid: Pid) -> Result<(), ProcessError> {
        self.with(|core| core.scheduler.resume(pid))
    }

    pub fn current_process(&self) -> Option<Process> {
        self.with(|core| core.scheduler.get_current_process().cloned())
    }

    pub fn process_list(&self) -> Vec<Process> {
        self.with(|core| {
            core.scheduler
                .get_all_processes()
                .into_iter()
                .cloned()
                .collect()
        })
    }

    pub fn process_stats(&self) -> ProcessStats {
        self.with(|core| core.scheduler.stats())
    }

    fn replay_pending_ticks(&self) {
        while self.pending_ticks.load(Ordering::Acquire) > 0 {
            let Some(mut core) = self.core.try_lock() else {
                return;
            };
            let ticks = self.pending_ticks.swap(0, Ordering::AcqRel);
            for _ in 0..ticks {
                core.scheduler.tick();
            }
        }
    }
}

/// Failure while bringing up the core
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootError {
    Heap(HeapError),
    Process(ProcessError),
}

impl core::fmt::Display for BootError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BootError::Heap(err) => write!(f, "heap: {}", err),
            BootError::Process(err) => write!(f, "process table: {}", err),
        }
    }
}
