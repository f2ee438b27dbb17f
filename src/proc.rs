use alloc::{string::String, vec::Vec};

use crate::allocator::Handle;
use crate::config::{MAX_PROCESSES, PROCESS_NAME_LENGTH};
use crate::context::Context;

/// Process ID type
pub type Pid = usize;

/// PID of the permanent kernel process
pub const KERNEL_PID: Pid = 0;

/// Table slot reserved for the kernel process
pub const KERNEL_SLOT: usize = 0;

/// Scheduling priority; a lower level runs first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    /// System processes
    Highest = 0,
    /// Important processes
    High = 1,
    /// Ordinary user processes
    Normal = 2,
    /// Background work
    Low = 3,
}

impl Priority {
    pub const LEVELS: usize = 4;

    pub const fn level(self) -> usize {
        self as usize
    }

    pub const fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Priority::Highest),
            1 => Some(Priority::High),
            2 => Some(Priority::Normal),
            3 => Some(Priority::Low),
            _ => None,
        }
    }
}

/// Process states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process is queued and waiting for the CPU
    Ready,
    /// Process owns the CPU
    Running,
    /// Process is suspended until resumed
    Waiting,
    /// Process has been terminated
    Terminated,
}

/// Process control block
#[derive(Clone, Debug)]
pub struct Process {
    /// Process ID
    pub pid: Pid,
    /// Creating process, `None` for the kernel process
    pub parent_pid: Option<Pid>,
    /// Display name
    pub name: String,
    pub priority: Priority,
    /// System-owned process rather than a user process
    pub privileged: bool,
    pub state: ProcessState,
    /// Ticks the process may run before it is preempted
    pub time_slice: u64,
    /// Stack allocation owned by this process
    pub stack: Option<Handle>,
    /// Program entry point
    pub entry: usize,
    /// Saved CPU state while switched out
    pub context: Context,
    /// Tick at which the process last got the CPU
    pub last_scheduled: u64,
    /// Ticks spent running
    pub cpu_time: u64,
    /// Tick at which the process was created
    pub created_at: u64,
}

impl Process {
    /// Create a ready process descriptor
    pub fn new(
        pid: Pid,
        parent_pid: Option<Pid>,
        name: &str,
        entry: usize,
        priority: Priority,
        privileged: bool,
        time_slice: u64,
    ) -> Self {
        Self {
            pid,
            parent_pid,
            name: truncate_name(name),
            priority,
            privileged,
            state: ProcessState::Ready,
            time_slice,
            stack: None,
            entry,
            context: Context::default(),
            last_scheduled: 0,
            cpu_time: 0,
            created_at: 0,
        }
    }

    /// Check if process is running
    pub fn is_running(&self) -> bool {
        self.state == ProcessState::Running
    }

    /// Check if process can be picked by the scheduler
    pub fn is_runnable(&self) -> bool {
        matches!(self.state, ProcessState::Ready | ProcessState::Running)
    }
}

fn truncate_name(name: &str) -> String {
    let mut end = name.len().min(PROCESS_NAME_LENGTH);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

/// Fixed-capacity table of live processes
pub struct ProcessTable {
    /// Array of processes; `None` marks a reusable slot
    processes: [Option<Process>; MAX_PROCESSES + 1],
    /// Next PID to allocate
    next_pid: Pid,
}

impl ProcessTable {
    /// Create a new empty process table
    pub const fn new() -> Self {
        Self {
            processes: [const { None }; MAX_PROCESSES + 1],
            next_pid: KERNEL_PID + 1,
        }
    }

    /// Allocate a new PID
    pub fn alloc_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    /// Find a free process slot, never the kernel's
    pub fn find_free_slot(&self) -> Option<usize> {
        self.processes
            .iter()
            .enumerate()
            .skip(KERNEL_SLOT + 1)
            .find_map(|(slot, p)| p.is_none().then_some(slot))
    }

    /// Place `process` into `slot`
    pub fn install(&mut self, slot: usize, process: Process) {
        self.processes[slot] = Some(process);
    }

    /// Drop the process with `pid`, freeing its slot
    pub fn release(&mut self, pid: Pid) -> Option<Process> {
        let slot = self
            .processes
            .iter()
            .position(|p| p.as_ref().is_some_and(|proc| proc.pid == pid))?;
        self.processes[slot].take()
    }

    /// Get a process by PID
    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.processes.iter().flatten().find(|proc| proc.pid == pid)
    }

    /// Get a mutable process by PID
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.processes.iter_mut().flatten().find(|proc| proc.pid == pid)
    }

    /// Number of occupied slots
    pub fn len(&self) -> usize {
        self.processes.iter().flatten().count()
    }

    /// Get all processes, ordered by PID
    pub fn get_all_processes(&self) -> Vec<&Process> {
        let mut processes: Vec<_> = self.processes.iter().flatten().collect();
        processes.sort_by_key(|p| p.pid);
        processes
    }

    /// Get all children of a process
    pub fn get_children(&self, parent_pid: Pid) -> Vec<Pid> {
        let mut children: Vec<_> = self
            .processes
            .iter()
            .flatten()
            .filter(|p| p.parent_pid == Some(parent_pid))
            .map(|p| p.pid)
            .collect();
        children.sort_unstable();
        children
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_truncated_on_char_boundaries() {
        let long = "a".repeat(40);
        let p = Process::new(1, None, &long, 0, Priority::Normal, false, 25);
        assert_eq!(p.name.len(), PROCESS_NAME_LENGTH);

        let wide = "é".repeat(20);
        let p = Process::new(2, None, &wide, 0, Priority::Normal, false, 25);
        assert_eq!(p.name.len(), 30);
        assert!(p.name.chars().all(|c| c == 'é'));
    }

    #[test]
    fn priority_levels_round_trip() {
        for level in 0..Priority::LEVELS as u8 {
            let priority = Priority::from_level(level).unwrap();
            assert_eq!(priority.level(), level as usize);
        }
        assert_eq!(Priority::from_level(4), None);
        assert!(Priority::Highest < Priority::Low);
    }

    #[test]
    fn released_slots_are_reused_but_pids_are_not() {
        let mut table = ProcessTable::new();
        let first = table.alloc_pid();
        let slot = table.find_free_slot().unwrap();
        table.install(slot, Process::new(first, None, "a", 0, Priority::Normal, false, 25));

        assert!(table.release(first).is_some());
        assert!(table.get(first).is_none());
        assert_eq!(table.find_free_slot(), Some(slot));
        assert_ne!(table.alloc_pid(), first);
    }

    #[test]
    fn kernel_slot_is_never_handed_out() {
        let mut table = ProcessTable::new();
        assert_eq!(table.find_free_slot(), Some(KERNEL_SLOT + 1));

        for _ in 0..MAX_PROCESSES {
            let pid = table.alloc_pid();
            let slot = table.find_free_slot().unwrap();
            assert_ne!(slot, KERNEL_SLOT);
            table.install(slot, Process::new(pid, None, "u", 0, Priority::Low, false, 10));
        }
        assert_eq!(table.find_free_slot(), None);
        assert_eq!(table.len(), MAX_PROCESSES);
    }

    #[test]
    fn children_are_listed_by_parent() {
        let mut table = ProcessTable::new();
        for (slot, (pid, parent)) in [(1, None), (2, Some(1)), (3, Some(1)), (4, Some(2))]
            .into_iter()
            .enumerate()
        {
            table.install(slot, Process::new(pid, parent, "p", 0, Priority::Low, false, 10));
        }
        assert_eq!(table.get_children(1), [2, 3]);
        assert_eq!(table.get_children(2), [4]);
        assert!(table.get_children(4).is_empty());
        assert_eq!(table.len(), 4);
    }
}
