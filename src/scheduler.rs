use alloc::{collections::VecDeque, vec::Vec};

use const_default::ConstDefault;
use log::{debug, info, warn};

use crate::allocator::Heap;
use crate::config::SchedulerConfig;
use crate::context::{Context, ContextSwitch};
use crate::error::ProcessError;
use crate::proc::{KERNEL_PID, KERNEL_SLOT, Pid, Priority, Process, ProcessState, ProcessTable};

/// Process accounting, maintained as processes come and go
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ConstDefault)]
pub struct ProcessStats {
    /// Processes ever created, kernel included
    pub total_processes: usize,
    /// Processes currently live
    pub active_processes: usize,
    pub privileged_processes: usize,
    pub user_processes: usize,
    pub context_switches: u64,
    /// Ticks charged to processes as they were switched out
    pub total_cpu_time: u64,
}

/// Priority scheduler with per-priority FIFO queues.
///
/// A process is in a ready queue exactly while its state is `Ready`. The
/// running process is switched out only from `tick`, `yield_now`, `suspend`
/// or `terminate_process`.
pub struct Scheduler<S> {
    table: ProcessTable,
    ready: [VecDeque<Pid>; Priority::LEVELS],
    current: Option<Pid>,
    now: u64,
    switch: S,
    config: SchedulerConfig,
    stats: ProcessStats,
    initialized: bool,
}

impl<S: ContextSwitch> Scheduler<S> {
    pub const fn new(switch: S, config: SchedulerConfig) -> Self {
        Self {
            table: ProcessTable::new(),
            ready: [const { VecDeque::new() }; Priority::LEVELS],
            current: None,
            now: 0,
            switch,
            config,
            stats: ProcessStats::DEFAULT,
            initialized: false,
        }
    }

    /// Create the permanent kernel process and make it the running process
    pub fn init_process_table(&mut self, heap: &mut Heap<'_>) -> Result<Pid, ProcessError> {
        if self.initialized {
            return Err(ProcessError::AlreadyInitialized);
        }

        let mut kernel = Process::new(
            KERNEL_PID,
            None,
            "kernel_daemon",
            0,
            Priority::Highest,
            true,
            self.time_slice(Priority::Highest),
        );
        let stack = heap.allocate(self.config.stack_size)?;
        kernel.stack = Some(stack);
        kernel.context = Context::new_at(0, stack_top(heap, stack));
        kernel.state = ProcessState::Running;
        kernel.last_scheduled = self.now;
        kernel.created_at = self.now;

        self.table.install(KERNEL_SLOT, kernel);
        self.current = Some(KERNEL_PID);
        self.stats = ProcessStats {
            total_processes: 1,
            active_processes: 1,
            privileged_processes: 1,
            ..ProcessStats::DEFAULT
        };
        self.initialized = true;

        debug!("sched: kernel process running");
        Ok(KERNEL_PID)
    }

    /// Create a ready process whose parent is the running process.
    ///
    /// The stack comes from `heap`; if it cannot be allocated the claimed
    /// slot stays free and no PID is consumed.
    pub fn create_process(
        &mut self,
        heap: &mut Heap<'_>,
        name: &str,
        entry: usize,
        priority: Priority,
        privileged: bool,
    ) -> Result<Pid, ProcessError> {
        if !self.initialized {
            return Err(ProcessError::NotInitialized);
        }
        let slot = self.table.find_free_slot().ok_or(ProcessError::TableFull)?;
        let stack = heap.allocate(self.config.stack_size).map_err(|err| {
            warn!("sched: no stack for {}: {}", name, err);
            ProcessError::from(err)
        })?;

        let pid = self.table.alloc_pid();
        let mut process = Process::new(
            pid,
            self.current,
            name,
            entry,
            priority,
            privileged,
            self.time_slice(priority),
        );
        process.stack = Some(stack);
        process.context = Context::new_at(entry, stack_top(heap, stack));
        process.created_at = self.now;
        self.table.install(slot, process);
        self.add_to_ready_queue(pid, priority);

        self.stats.total_processes += 1;
        self.stats.active_processes += 1;
        if privileged {
            self.stats.privileged_processes += 1;
        } else {
            self.stats.user_processes += 1;
        }

        debug!("sched: created pid {} ({}) at {:?}", pid, name, priority);
        Ok(pid)
    }

    /// Terminate `pid` and give its stack back to `heap`.
    ///
    /// The kernel process and unknown PIDs are ignored.
    pub fn terminate_process(&mut self, heap: &mut Heap<'_>, pid: Pid) {
        if pid == KERNEL_PID {
            return;
        }
        let Some(process) = self.table.get_mut(pid) else {
            return;
        };
        if process.state == ProcessState::Terminated {
            return;
        }

        process.state = ProcessState::Terminated;
        let stack = process.stack.take();
        let privileged = process.privileged;
        self.remove_from_ready_queue(pid);

        if let Some(stack) = stack {
            if let Err(err) = heap.deallocate(stack) {
                warn!("sched: stack of pid {} not released: {}", pid, err);
            }
        }

        self.stats.active_processes -= 1;
        if privileged {
            self.stats.privileged_processes -= 1;
        } else {
            self.stats.user_processes -= 1;
        }

        if self.current == Some(pid) {
            self.reschedule();
            if self.current == Some(pid) {
                self.go_idle(pid);
            }
        }

        self.table.release(pid);
        debug!("sched: terminated pid {}", pid);
    }

    /// Give up the rest of the running process's time slice
    pub fn yield_now(&mut self) {
        self.preempt_current();
        self.reschedule();
    }

    /// Move a running or ready process to `Waiting`
    pub fn suspend(&mut self, pid: Pid) -> Result<(), ProcessError> {
        let process = self.table.get_mut(pid).ok_or(ProcessError::InvalidPid)?;
        if !process.is_runnable() {
            return Err(ProcessError::InvalidState);
        }
        process.state = ProcessState::Waiting;
        self.remove_from_ready_queue(pid);

        if self.current == Some(pid) {
            self.reschedule();
            if self.current == Some(pid) {
                self.go_idle(pid);
            }
        }
        Ok(())
    }

    /// Move a waiting process back into the ready queue
    pub fn resume(&mut self, pid: Pid) -> Result<(), ProcessError> {
        let process = self.table.get_mut(pid).ok_or(ProcessError::InvalidPid)?;
        if process.state != ProcessState::Waiting {
            return Err(ProcessError::InvalidState);
        }
        process.state = ProcessState::Ready;
        let priority = process.priority;
        self.add_to_ready_queue(pid, priority);
        Ok(())
    }

    /// Advance the clock by one timer period and preempt the running process
    /// once its slice is used up. With nothing running, dispatch the next
    /// ready process.
    pub fn tick(&mut self) {
        self.now += 1;

        let Some(pid) = self.current else {
            self.reschedule();
            return;
        };
        let expired = self.table.get(pid).is_some_and(|p| {
            p.is_running() && self.now - p.last_scheduled >= p.time_slice
        });
        if expired {
            self.preempt_current();
            self.reschedule();
        }
    }

    pub fn get_current_process(&self) -> Option<&Process> {
        self.current.and_then(|pid| self.table.get(pid))
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.current
    }

    pub fn find_process(&self, pid: Pid) -> Option<&Process> {
        self.table.get(pid)
    }

    /// Live processes ordered by PID
    pub fn get_all_processes(&self) -> Vec<&Process> {
        self.table.get_all_processes()
    }

    pub fn children(&self, pid: Pid) -> Vec<Pid> {
        self.table.get_children(pid)
    }

    pub fn process_count(&self) -> usize {
        self.table.len()
    }

    /// Ready PIDs in the order they would be dispatched
    pub fn ready_queue(&self) -> Vec<Pid> {
        self.ready.iter().flatten().copied().collect()
    }

    pub fn stats(&self) -> ProcessStats {
        self.stats
    }

    /// Ticks since boot
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn switcher(&self) -> &S {
        &self.switch
    }

    /// Log the process table
    pub fn dump(&self) {
        let stats = self.stats;
        info!(
            "sched: {} live ({} privileged, {} user), {} switches, {} cpu ticks",
            stats.active_processes,
            stats.privileged_processes,
            stats.user_processes,
            stats.context_switches,
            stats.total_cpu_time
        );
        for p in self.table.get_all_processes() {
            info!(
                "  {:>4} {:<31} {:?} {:?} cpu={}",
                p.pid, p.name, p.state, p.priority, p.cpu_time
            );
        }
    }

    fn time_slice(&self, priority: Priority) -> u64 {
        self.config.time_slices[priority.level()]
    }

    /// Put the running process back in the ready queue
    fn preempt_current(&mut self) {
        let Some(pid) = self.current else {
            return;
        };
        let Some(process) = self.table.get_mut(pid) else {
            return;
        };
        if process.state == ProcessState::Running {
            process.state = ProcessState::Ready;
            let priority = process.priority;
            self.add_to_ready_queue(pid, priority);
        }
    }

    /// Insert after the last queued process of equal or higher priority
    fn add_to_ready_queue(&mut self, pid: Pid, priority: Priority) {
        self.ready[priority.level()].push_back(pid);
    }

    fn remove_from_ready_queue(&mut self, pid: Pid) {
        for queue in &mut self.ready {
            queue.retain(|&queued| queued != pid);
        }
    }

    fn pop_ready(&mut self) -> Option<Pid> {
        self.ready.iter_mut().find_map(VecDeque::pop_front)
    }

    /// Hand the CPU to the head of the ready queue
    fn reschedule(&mut self) {
        let Some(next) = self.pop_ready() else {
            return;
        };
        if let Some(prev) = self.current {
            self.switch_out(prev);
        }

        let now = self.now;
        let Some(process) = self.table.get_mut(next) else {
            return;
        };
        process.state = ProcessState::Running;
        process.last_scheduled = now;
        self.current = Some(next);
        self.switch.load(&process.context);
        self.stats.context_switches += 1;
    }

    /// Capture the outgoing process and charge it for the ticks it ran
    fn switch_out(&mut self, pid: Pid) {
        let now = self.now;
        if let Some(process) = self.table.get_mut(pid) {
            self.switch.save(&mut process.context);
            let ran = now.saturating_sub(process.last_scheduled);
            process.cpu_time += ran;
            self.stats.total_cpu_time += ran;
        }
    }

    /// Nothing is ready to replace `pid`, leave the CPU without a process
    fn go_idle(&mut self, pid: Pid) {
        self.switch_out(pid);
        self.current = None;
        debug!("sched: idle");
    }
}

fn stack_top(heap: &Heap<'_>, stack: crate::allocator::Handle) -> usize {
    match (heap.address(stack), heap.capacity(stack)) {
        (Some(base), Some(size)) => base + size,
        _ => 0,
    }
}
