use linked_list_allocator::LockedHeap;

/// Room for descriptor names and ready queues of a full process table
const METADATA_HEAP_SIZE: usize = 0x20000;

/// Backs the kernel's own `alloc` usage: process names, ready queues.
/// Process stacks come from the managed arena instead.
#[global_allocator]
static METADATA_ALLOCATOR: LockedHeap = LockedHeap::empty();

static mut METADATA_HEAP: [u8; METADATA_HEAP_SIZE] = [0; METADATA_HEAP_SIZE];

/// Hand the metadata region to the global allocator and return its size.
///
/// # Safety
/// Must be called once, before the first allocation.
pub unsafe fn init_metadata_heap() -> usize {
    let heap_start = (&raw mut METADATA_HEAP).cast::<u8>();
    unsafe { METADATA_ALLOCATOR.lock().init(heap_start, METADATA_HEAP_SIZE) };
    METADATA_HEAP_SIZE
}

/// Bytes of the metadata region currently handed out
pub fn metadata_used() -> usize {
    METADATA_ALLOCATOR.lock().used()
}
