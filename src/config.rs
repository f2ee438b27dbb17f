use const_default::ConstDefault;

/// Default arena size handed to the allocator at boot (8 MiB)
pub const ARENA_SIZE: usize = 0x80_0000;

/// Allocation granularity; every request is rounded up to this
pub const ALIGNMENT: usize = 8;

/// Bytes reserved in front of every block payload
pub const HEADER_SIZE: usize = 32;

/// A block is only split when the leftover exceeds this many bytes
pub const SPLIT_THRESHOLD: usize = HEADER_SIZE + ALIGNMENT;

/// Capacity of the block descriptor table
pub const MAX_BLOCKS: usize = 1024;

/// Process slots available to `create_process`; the kernel process has its own
pub const MAX_PROCESSES: usize = 64;

/// Stack handed to every new process (32 KiB)
pub const STACK_SIZE: usize = 0x8000;

/// Longest process name kept in a descriptor
pub const PROCESS_NAME_LENGTH: usize = 31;

/// Time slice in ticks, indexed by priority level
pub const TIME_SLICES: [u64; 4] = [100, 50, 25, 10];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Stack bytes requested from the heap per process
    pub stack_size: usize,
    /// Ticks per slice, indexed by priority level
    pub time_slices: [u64; 4],
}

impl ConstDefault for SchedulerConfig {
    const DEFAULT: Self = Self {
        stack_size: STACK_SIZE,
        time_slices: TIME_SLICES,
    };
}

impl SchedulerConfig {
    /// Same slices, different stack size
    pub const fn with_stack_size(stack_size: usize) -> Self {
        Self {
            stack_size,
            ..Self::DEFAULT
        }
    }
}

/// Round `size` up to the allocation granularity, `None` on overflow
pub const fn align_up(size: usize) -> Option<usize> {
    match size.checked_add(ALIGNMENT - 1) {
        Some(padded) => Some(padded & !(ALIGNMENT - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_eight() {
        assert_eq!(align_up(1), Some(8));
        assert_eq!(align_up(8), Some(8));
        assert_eq!(align_up(9), Some(16));
        assert_eq!(align_up(usize::MAX), None);
    }

    #[test]
    fn defaults_match_constants() {
        assert_eq!(SPLIT_THRESHOLD, HEADER_SIZE + 8);
        assert_eq!(SchedulerConfig::DEFAULT.time_slices, [100, 50, 25, 10]);
        assert_eq!(SchedulerConfig::with_stack_size(4096).stack_size, 4096);
    }
}
