//! Kernel core: a first-fit arena allocator and a priority scheduler whose
//! processes take their stacks from that arena.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod allocator;
pub mod config;
pub mod context;
pub mod error;
pub mod interrupts;
pub mod kernel;
pub mod proc;
pub mod scheduler;

pub use allocator::{BlockInfo, Handle, Heap, HeapStats};
pub use config::SchedulerConfig;
pub use context::{Context, ContextSwitch, NoopSwitch};
pub use error::{HeapError, ProcessError};
pub use kernel::{BootError, Core, Kernel};
pub use proc::{KERNEL_PID, Pid, Priority, Process, ProcessState};
pub use scheduler::{ProcessStats, Scheduler};
