//! Execution context capture.
//!
//! The scheduler decides when a process is switched out and in; how the CPU
//! state is captured is left to the platform through [`ContextSwitch`].

/// Saved CPU state of a process
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Context {
    /// Program counter to resume at
    pub pc: usize,
    /// Stack pointer
    pub sp: usize,
    /// General purpose registers (x1-x31)
    pub regs: [usize; 31],
}

impl Context {
    /// Context that starts executing at `entry` on a stack ending at `stack_top`
    pub const fn new_at(entry: usize, stack_top: usize) -> Self {
        Self {
            pc: entry,
            sp: stack_top,
            regs: [0; 31],
        }
    }
}

/// Platform hook that captures and reinstates CPU state.
///
/// `save` must capture enough state that a later `load` of the same context
/// resumes exactly where the process was interrupted.
pub trait ContextSwitch {
    /// Capture the running CPU state into `context`
    fn save(&mut self, context: &mut Context);

    /// Reinstate `context` so the CPU resumes it on return from the trap
    fn load(&mut self, context: &Context);
}

/// Switch that leaves contexts untouched, for hosts without a trap path
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSwitch;

impl ContextSwitch for NoopSwitch {
    fn save(&mut self, _context: &mut Context) {}

    fn load(&mut self, _context: &Context) {}
}
