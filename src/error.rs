use core::fmt;

/// Failures reported by the arena allocator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapError {
    /// No free block is large enough for the request
    OutOfMemory,
    /// Zero-byte request
    InvalidSize,
    /// `init` was called on a heap that already owns an arena
    AlreadyInitialized,
    /// Operation issued before `init`
    NotInitialized,
    /// The arena cannot hold a single header plus the minimum payload
    ArenaTooSmall,
    /// Handle is out of bounds or its header tag is damaged
    CorruptedBlock,
    /// Handle refers to a block that is already free
    DoubleFree,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            HeapError::OutOfMemory => "out of memory",
            HeapError::InvalidSize => "zero-sized allocation",
            HeapError::AlreadyInitialized => "heap already initialized",
            HeapError::NotInitialized => "heap not initialized",
            HeapError::ArenaTooSmall => "arena too small",
            HeapError::CorruptedBlock => "corrupted block header",
            HeapError::DoubleFree => "block already free",
        };
        f.write_str(message)
    }
}

/// Failures reported by the process table and scheduler
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessError {
    /// All process slots are occupied
    TableFull,
    /// The stack allocation failed
    OutOfMemory,
    /// `init_process_table` was already called
    AlreadyInitialized,
    /// Process table has not been initialized yet
    NotInitialized,
    /// No live process carries this pid
    InvalidPid,
    /// The process is not in a state that allows the transition
    InvalidState,
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            ProcessError::TableFull => "process table full",
            ProcessError::OutOfMemory => "out of memory for process stack",
            ProcessError::AlreadyInitialized => "process table already initialized",
            ProcessError::NotInitialized => "process table not initialized",
            ProcessError::InvalidPid => "no such process",
            ProcessError::InvalidState => "invalid process state for this operation",
        };
        f.write_str(message)
    }
}

impl From<HeapError> for ProcessError {
    fn from(_: HeapError) -> Self {
        ProcessError::OutOfMemory
    }
}
