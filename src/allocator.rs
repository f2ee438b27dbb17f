//! First-fit arena allocator.
//!
//! The arena is carved into blocks that cover it end to end. Each block is a
//! header region followed by its payload. Block descriptors live in a fixed
//! slot table and link to their address-order neighbours by slot index; the
//! header region in the arena carries a tag, the owning slot and the payload
//! size so that damaged or forged handles are caught on free.

use const_default::ConstDefault;
use log::{debug, info, trace, warn};

use crate::config::{ALIGNMENT, HEADER_SIZE, MAX_BLOCKS, SPLIT_THRESHOLD, align_up};
use crate::error::HeapError;

/// Header tag of a granted block
pub const TAG_ALLOCATED: u32 = 0xDEAD_BEEF;
/// Header tag of a free block
pub const TAG_FREE: u32 = 0xFEED_FACE;

const TAG_OFFSET: usize = 0;
const SLOT_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;

/// Payload position of a granted block, relative to the arena base
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle(usize);

impl Handle {
    /// Rebuild a handle from a payload offset. The heap validates it on use.
    pub const fn from_offset(offset: usize) -> Self {
        Self(offset)
    }

    pub const fn offset(self) -> usize {
        self.0
    }
}

/// Running heap totals, maintained on every allocate, free, split and merge
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ConstDefault)]
pub struct HeapStats {
    /// Arena bytes under management
    pub total_bytes: usize,
    /// Payload bytes of allocated blocks
    pub used_bytes: usize,
    /// Payload bytes of free blocks
    pub free_bytes: usize,
    /// Bytes taken by block headers
    pub overhead_bytes: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    /// Rejected frees whose handle or header was damaged
    pub corrupted_blocks: usize,
}

/// One block as seen by a walk of the block list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    pub handle: Handle,
    /// Usable payload bytes
    pub size: usize,
    pub free: bool,
}

#[derive(Clone, Copy, Debug)]
struct Block {
    in_use: bool,
    /// Header offset from the arena base
    start: usize,
    /// Payload bytes following the header
    size: usize,
    free: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

impl Block {
    const EMPTY: Self = Self {
        in_use: false,
        start: 0,
        size: 0,
        free: false,
        prev: None,
        next: None,
    };

    fn payload(&self) -> usize {
        self.start + HEADER_SIZE
    }

    fn end(&self) -> usize {
        self.payload() + self.size
    }
}

/// Arena allocator over a borrowed byte region
pub struct Heap<'a> {
    arena: Option<&'a mut [u8]>,
    blocks: [Block; MAX_BLOCKS],
    head: Option<usize>,
    stats: HeapStats,
}

impl<'a> Heap<'a> {
    /// Create a heap that owns no arena yet
    pub const fn new() -> Self {
        Self {
            arena: None,
            blocks: [Block::EMPTY; MAX_BLOCKS],
            head: None,
            stats: HeapStats::DEFAULT,
        }
    }

    /// Take ownership of `arena` as a single free block.
    ///
    /// The usable length is rounded down to the allocation granularity.
    pub fn init(&mut self, arena: &'a mut [u8]) -> Result<(), HeapError> {
        if self.arena.is_some() {
            warn!("heap: init called twice, keeping live arena");
            return Err(HeapError::AlreadyInitialized);
        }

        let len = arena.len() & !(ALIGNMENT - 1);
        if len < HEADER_SIZE + ALIGNMENT {
            return Err(HeapError::ArenaTooSmall);
        }
        let (arena, _) = arena.split_at_mut(len);

        self.blocks[0] = Block {
            in_use: true,
            start: 0,
            size: len - HEADER_SIZE,
            free: true,
            prev: None,
            next: None,
        };
        self.head = Some(0);
        self.stats = HeapStats {
            total_bytes: len,
            free_bytes: len - HEADER_SIZE,
            overhead_bytes: HEADER_SIZE,
            free_blocks: 1,
            ..HeapStats::DEFAULT
        };
        self.arena = Some(arena);
        self.stamp(0, TAG_FREE);

        debug!("heap: arena of {} bytes at {:#x}", len, self.base());
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.arena.is_some()
    }

    /// Grant at least `size` bytes using a first-fit scan in address order
    pub fn allocate(&mut self, size: usize) -> Result<Handle, HeapError> {
        if self.arena.is_none() {
            return Err(HeapError::NotInitialized);
        }
        if size == 0 {
            return Err(HeapError::InvalidSize);
        }
        let size = align_up(size).ok_or(HeapError::OutOfMemory)?;

        let slot = self.find_free_block(size).ok_or_else(|| {
            trace!("heap: no free block for {} bytes", size);
            HeapError::OutOfMemory
        })?;

        if self.blocks[slot].size - size > SPLIT_THRESHOLD {
            self.split_block(slot, size);
        }

        let block = &mut self.blocks[slot];
        block.free = false;
        let granted = block.size;
        let handle = Handle(block.payload());

        self.stats.used_bytes += granted;
        self.stats.free_bytes -= granted;
        self.stats.allocated_blocks += 1;
        self.stats.free_blocks -= 1;
        self.stamp(slot, TAG_ALLOCATED);

        trace!("heap: granted {} bytes at offset {:#x}", granted, handle.0);
        Ok(handle)
    }

    /// Return a block to the heap and merge it with free neighbours.
    ///
    /// A damaged or forged handle leaves the heap untouched; it only bumps the
    /// corruption counter and is reported back as `CorruptedBlock`.
    pub fn deallocate(&mut self, handle: Handle) -> Result<(), HeapError> {
        let slot = self.validate_counted(handle)?;

        let block = &mut self.blocks[slot];
        block.free = true;
        let size = block.size;

        self.stats.used_bytes -= size;
        self.stats.free_bytes += size;
        self.stats.allocated_blocks -= 1;
        self.stats.free_blocks += 1;
        self.stamp(slot, TAG_FREE);

        trace!("heap: released {} bytes at offset {:#x}", size, handle.0);
        self.coalesce(slot);
        Ok(())
    }

    /// Allocate `count * element_size` bytes and zero the granted payload
    pub fn zero_allocate(&mut self, count: usize, element_size: usize) -> Result<Handle, HeapError> {
        let total = count
            .checked_mul(element_size)
            .ok_or(HeapError::OutOfMemory)?;
        let handle = self.allocate(total)?;
        if let Some(bytes) = self.bytes_mut(handle) {
            bytes.fill(0);
        }
        Ok(handle)
    }

    /// Resize an allocation.
    ///
    /// `None` allocates, a zero size frees and yields `None`. A request that
    /// fits the current capacity returns the same handle; capacity is never
    /// given back. Growing copies the old payload into a fresh block, and if
    /// that block cannot be found the old one is left as it was.
    pub fn reallocate(
        &mut self,
        handle: Option<Handle>,
        new_size: usize,
    ) -> Result<Option<Handle>, HeapError> {
        let Some(handle) = handle else {
            return self.allocate(new_size).map(Some);
        };
        if new_size == 0 {
            self.deallocate(handle)?;
            return Ok(None);
        }

        let slot = self.validate_counted(handle)?;
        let capacity = self.blocks[slot].size;
        if new_size <= capacity {
            return Ok(Some(handle));
        }

        let fresh = self.allocate(new_size)?;
        let copied = capacity.min(new_size);
        if let Some(arena) = self.arena.as_deref_mut() {
            arena.copy_within(handle.0..handle.0 + copied, fresh.0);
        }
        self.deallocate(handle)?;
        Ok(Some(fresh))
    }

    /// Snapshot of the incrementally maintained totals
    pub fn stats(&self) -> HeapStats {
        self.stats
    }

    /// Rebuild the totals by walking the block list
    pub fn recompute_stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            total_bytes: self.total_size(),
            corrupted_blocks: self.stats.corrupted_blocks,
            ..HeapStats::DEFAULT
        };
        for block in self.blocks() {
            stats.overhead_bytes += HEADER_SIZE;
            if block.free {
                stats.free_bytes += block.size;
                stats.free_blocks += 1;
            } else {
                stats.used_bytes += block.size;
                stats.allocated_blocks += 1;
            }
        }
        stats
    }

    /// Walk the block list in address order
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        core::iter::successors(self.head, move |&slot| self.blocks[slot].next).map(move |slot| {
            let block = &self.blocks[slot];
            BlockInfo {
                handle: Handle(block.payload()),
                size: block.size,
                free: block.free,
            }
        })
    }

    /// Payload capacity of the largest free block
    pub fn largest_free_block(&self) -> usize {
        self.blocks()
            .filter(|block| block.free)
            .map(|block| block.size)
            .max()
            .unwrap_or(0)
    }

    /// Arena bytes under management, zero before `init`
    pub fn total_size(&self) -> usize {
        self.arena.as_deref().map_or(0, <[u8]>::len)
    }

    /// Usable payload bytes behind a live allocation
    pub fn capacity(&self, handle: Handle) -> Option<usize> {
        let slot = self.validate(handle).ok()?;
        Some(self.blocks[slot].size)
    }

    /// Address of a live allocation's first payload byte
    pub fn address(&self, handle: Handle) -> Option<usize> {
        self.validate(handle).ok()?;
        Some(self.base() + handle.0)
    }

    pub fn bytes(&self, handle: Handle) -> Option<&[u8]> {
        let slot = self.validate(handle).ok()?;
        let block = self.blocks[slot];
        let arena = self.arena.as_deref()?;
        Some(&arena[block.payload()..block.end()])
    }

    pub fn bytes_mut(&mut self, handle: Handle) -> Option<&mut [u8]> {
        let slot = self.validate(handle).ok()?;
        let block = self.blocks[slot];
        let arena = self.arena.as_deref_mut()?;
        Some(&mut arena[block.payload()..block.end()])
    }

    /// Verify the block list covers the arena without gaps, never holds two
    /// adjacent free blocks, links both ways, and agrees with the header tags.
    pub fn check(&self) -> Result<(), HeapError> {
        let arena = self.arena.as_deref().ok_or(HeapError::NotInitialized)?;
        let mut expected_start = 0;
        let mut prev: Option<usize> = None;
        let mut cursor = self.head;

        while let Some(slot) = cursor {
            let block = &self.blocks[slot];
            let tag = read_u32(arena, block.start + TAG_OFFSET);
            let expected_tag = if block.free { TAG_FREE } else { TAG_ALLOCATED };

            let consistent = block.in_use
                && block.start == expected_start
                && block.prev == prev
                && tag == expected_tag
                && read_u32(arena, block.start + SLOT_OFFSET) as usize == slot
                && !(block.free && prev.is_some_and(|p| self.blocks[p].free));
            if !consistent {
                warn!("heap: inconsistent block at offset {:#x}", block.start);
                return Err(HeapError::CorruptedBlock);
            }

            expected_start = block.end();
            prev = Some(slot);
            cursor = block.next;
        }

        if expected_start != arena.len() {
            warn!("heap: block list ends at {:#x} of {:#x}", expected_start, arena.len());
            return Err(HeapError::CorruptedBlock);
        }
        Ok(())
    }

    /// Log the block map
    pub fn dump(&self) {
        let stats = self.stats;
        info!(
            "heap: {} total, {} used, {} free, {} blocks allocated, {} free, {} corrupted",
            stats.total_bytes,
            stats.used_bytes,
            stats.free_bytes,
            stats.allocated_blocks,
            stats.free_blocks,
            stats.corrupted_blocks
        );
        for block in self.blocks() {
            info!(
                "  {:#010x} {:>8} {}",
                block.handle.0,
                block.size,
                if block.free { "free" } else { "used" }
            );
        }
    }

    fn base(&self) -> usize {
        self.arena.as_deref().map_or(0, |arena| arena.as_ptr() as usize)
    }

    fn find_free_block(&self, size: usize) -> Option<usize> {
        let mut cursor = self.head;
        while let Some(slot) = cursor {
            let block = &self.blocks[slot];
            if block.free && block.size >= size {
                return Some(slot);
            }
            cursor = block.next;
        }
        None
    }

    /// Cut `slot` down to `size` payload bytes and link the remainder after it
    /// as a free block. Without a spare descriptor the block stays whole.
    fn split_block(&mut self, slot: usize, size: usize) {
        let Some(spare) = self.blocks.iter().position(|block| !block.in_use) else {
            warn!("heap: block table full, granting whole block");
            return;
        };

        let block = self.blocks[slot];
        self.blocks[spare] = Block {
            in_use: true,
            start: block.payload() + size,
            size: block.size - size - HEADER_SIZE,
            free: true,
            prev: Some(slot),
            next: block.next,
        };
        if let Some(next) = block.next {
            self.blocks[next].prev = Some(spare);
        }
        self.blocks[slot].size = size;
        self.blocks[slot].next = Some(spare);

        self.stats.free_bytes -= HEADER_SIZE;
        self.stats.overhead_bytes += HEADER_SIZE;
        self.stats.free_blocks += 1;
        self.stamp(spare, TAG_FREE);
    }

    /// Merge forward first, then fold the grown block into a free predecessor
    fn coalesce(&mut self, slot: usize) {
        if let Some(next) = self.blocks[slot].next {
            if self.blocks[next].free {
                self.absorb_next(slot);
            }
        }
        if let Some(prev) = self.blocks[slot].prev {
            if self.blocks[prev].free {
                self.absorb_next(prev);
            }
        }
    }

    /// Fold the block following `slot` into it. Both must be free.
    fn absorb_next(&mut self, slot: usize) {
        let Some(next) = self.blocks[slot].next else {
            return;
        };
        let absorbed = self.blocks[next];

        self.blocks[slot].size += HEADER_SIZE + absorbed.size;
        self.blocks[slot].next = absorbed.next;
        if let Some(after) = absorbed.next {
            self.blocks[after].prev = Some(slot);
        }

        if let Some(arena) = self.arena.as_deref_mut() {
            arena[absorbed.start..absorbed.payload()].fill(0);
        }
        self.blocks[next] = Block::EMPTY;

        self.stats.free_bytes += HEADER_SIZE;
        self.stats.overhead_bytes -= HEADER_SIZE;
        self.stats.free_blocks -= 1;
        self.stamp(slot, TAG_FREE);
    }

    /// Write the header of `slot` into the arena
    fn stamp(&mut self, slot: usize, tag: u32) {
        let block = self.blocks[slot];
        let Some(arena) = self.arena.as_deref_mut() else {
            return;
        };
        let header = &mut arena[block.start..block.payload()];
        header[TAG_OFFSET..TAG_OFFSET + 4].copy_from_slice(&tag.to_le_bytes());
        header[SLOT_OFFSET..SLOT_OFFSET + 4].copy_from_slice(&(slot as u32).to_le_bytes());
        header[SIZE_OFFSET..SIZE_OFFSET + 8].copy_from_slice(&(block.size as u64).to_le_bytes());
    }

    fn validate_counted(&mut self, handle: Handle) -> Result<usize, HeapError> {
        let result = self.validate(handle);
        if result == Err(HeapError::CorruptedBlock) {
            self.stats.corrupted_blocks += 1;
            warn!("heap: rejected corrupted block at offset {:#x}", handle.0);
        }
        result
    }

    /// Resolve a handle to the slot of a live allocated block
    fn validate(&self, handle: Handle) -> Result<usize, HeapError> {
        let arena = self.arena.as_deref().ok_or(HeapError::NotInitialized)?;
        let offset = handle.0;
        if offset < HEADER_SIZE || offset >= arena.len() || offset % ALIGNMENT != 0 {
            return Err(HeapError::CorruptedBlock);
        }

        let start = offset - HEADER_SIZE;
        let tag = read_u32(arena, start + TAG_OFFSET);
        if tag != TAG_ALLOCATED && tag != TAG_FREE {
            return Err(HeapError::CorruptedBlock);
        }

        let slot = read_u32(arena, start + SLOT_OFFSET) as usize;
        let block = self.blocks.get(slot).ok_or(HeapError::CorruptedBlock)?;
        if !block.in_use || block.start != start {
            return Err(HeapError::CorruptedBlock);
        }

        match (tag, block.free) {
            (TAG_ALLOCATED, false) => Ok(slot),
            (TAG_FREE, true) => Err(HeapError::DoubleFree),
            _ => Err(HeapError::CorruptedBlock),
        }
    }
}

impl Default for Heap<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn read_u32(arena: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([arena[at], arena[at + 1], arena[at + 2], arena[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: usize = 1 << 20;

    fn snapshot(heap: &Heap<'_>) -> Vec<u8> {
        heap.arena.as_deref().unwrap().to_vec()
    }

    #[test]
    fn init_creates_one_free_block() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();

        let blocks: Vec<_> = heap.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].free);
        assert_eq!(blocks[0].size, 4096 - HEADER_SIZE);
        assert_eq!(heap.stats().free_blocks, 1);
        heap.check().unwrap();
    }

    #[test]
    fn init_twice_is_rejected() {
        let mut first = vec![0u8; 4096];
        let mut second = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut first).unwrap();
        let live = heap.allocate(64).unwrap();

        assert_eq!(heap.init(&mut second), Err(HeapError::AlreadyInitialized));
        assert_eq!(heap.capacity(live), Some(64));
        assert_eq!(heap.total_size(), 4096);
    }

    #[test]
    fn tiny_arena_is_rejected() {
        let mut arena = vec![0u8; HEADER_SIZE + 7];
        let mut heap = Heap::new();
        assert_eq!(heap.init(&mut arena), Err(HeapError::ArenaTooSmall));
        assert!(!heap.is_initialized());
    }

    #[test]
    fn operations_before_init_fail() {
        let mut heap = Heap::new();
        assert_eq!(heap.allocate(8), Err(HeapError::NotInitialized));
        assert_eq!(
            heap.deallocate(Handle::from_offset(HEADER_SIZE)),
            Err(HeapError::NotInitialized)
        );
    }

    #[test]
    fn arena_length_is_rounded_down() {
        let mut arena = vec![0u8; 4099];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        assert_eq!(heap.total_size(), 4096);
        assert_eq!(heap.stats().total_bytes, 4096);
    }

    #[test]
    fn zero_size_leaves_heap_untouched() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        let before = snapshot(&heap);

        assert_eq!(heap.allocate(0), Err(HeapError::InvalidSize));
        assert_eq!(snapshot(&heap), before);
        assert_eq!(heap.stats(), heap.recompute_stats());
    }

    #[test]
    fn request_is_rounded_up_and_split() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();

        let handle = heap.allocate(13).unwrap();
        assert_eq!(heap.capacity(handle), Some(16));

        let blocks: Vec<_> = heap.blocks().collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[1].free);
        assert_eq!(blocks[1].size, 4096 - 2 * HEADER_SIZE - 16);
        heap.check().unwrap();
    }

    #[test]
    fn small_excess_is_granted_whole() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        let capacity = 4096 - HEADER_SIZE;

        // Leftover equals the split threshold exactly, so no split.
        let handle = heap.allocate(capacity - SPLIT_THRESHOLD).unwrap();
        assert_eq!(heap.capacity(handle), Some(capacity));
        assert_eq!(heap.blocks().count(), 1);
        assert_eq!(heap.stats().free_bytes, 0);
    }

    #[test]
    fn exact_fit_succeeds_and_one_more_byte_fails() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        let largest = heap.largest_free_block();

        let before = snapshot(&heap);
        assert_eq!(heap.allocate(largest + 1), Err(HeapError::OutOfMemory));
        assert_eq!(snapshot(&heap), before);
        assert_eq!(heap.stats(), heap.recompute_stats());

        let handle = heap.allocate(largest).unwrap();
        assert_eq!(heap.capacity(handle), Some(largest));
        assert_eq!(heap.blocks().count(), 1);
    }

    #[test]
    fn oversized_request_does_not_overflow() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        assert_eq!(heap.allocate(usize::MAX), Err(HeapError::OutOfMemory));
        assert_eq!(heap.zero_allocate(usize::MAX, 2), Err(HeapError::OutOfMemory));
    }

    #[test]
    fn free_merges_forward_then_backward() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();

        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let c = heap.allocate(64).unwrap();
        assert_eq!(heap.blocks().count(), 4);

        heap.deallocate(a).unwrap();
        heap.deallocate(c).unwrap();
        // c merged with the tail, a stands alone
        assert_eq!(heap.blocks().count(), 3);
        heap.check().unwrap();

        heap.deallocate(b).unwrap();
        let blocks: Vec<_> = heap.blocks().collect();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].size, 4096 - HEADER_SIZE);
        assert_eq!(heap.stats(), heap.recompute_stats());
        heap.check().unwrap();
    }

    #[test]
    fn first_fit_reuses_the_earliest_hole() {
        let mut arena = vec![0u8; MIB];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();

        let a = heap.allocate(100).unwrap();
        let b = heap.allocate(200).unwrap();
        heap.deallocate(a).unwrap();
        let c = heap.allocate(50).unwrap();

        assert_eq!(c, a);
        let blocks: Vec<_> = heap.blocks().collect();
        assert_eq!(blocks[0].handle, c);
        assert_eq!(blocks[0].size, 56);
        assert!(blocks[1].free);
        assert_eq!(blocks[1].size, 104 - 56 - HEADER_SIZE);
        assert_eq!(blocks[2].handle, b);
        heap.check().unwrap();
    }

    #[test]
    fn allocate_free_allocate_returns_same_range() {
        let mut arena = vec![0u8; 8192];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();

        let first = heap.allocate(300).unwrap();
        heap.deallocate(first).unwrap();
        let second = heap.allocate(300).unwrap();
        assert_eq!(first, second);
        assert_eq!(heap.capacity(second), Some(304));
    }

    #[test]
    fn corrupted_tag_only_bumps_counter() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        let victim = heap.allocate(32).unwrap();
        heap.allocate(32).unwrap();

        heap.arena.as_deref_mut().unwrap()[victim.offset() - HEADER_SIZE] ^= 0xff;
        let before = heap.stats();
        let bytes_before = snapshot(&heap);

        assert_eq!(heap.deallocate(victim), Err(HeapError::CorruptedBlock));
        let after = heap.stats();
        assert_eq!(after.corrupted_blocks, before.corrupted_blocks + 1);
        assert_eq!(
            HeapStats {
                corrupted_blocks: before.corrupted_blocks,
                ..after
            },
            before
        );
        assert_eq!(snapshot(&heap), bytes_before);
    }

    #[test]
    fn out_of_bounds_and_misaligned_handles_are_corrupt() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        let live = heap.allocate(32).unwrap();

        for bogus in [0, 8, 4096, 1 << 40, live.offset() + 4] {
            assert_eq!(
                heap.deallocate(Handle::from_offset(bogus)),
                Err(HeapError::CorruptedBlock)
            );
        }
        assert_eq!(heap.stats().corrupted_blocks, 5);
        assert_eq!(heap.stats().allocated_blocks, 1);
    }

    #[test]
    fn double_free_is_rejected_without_counting() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        let a = heap.allocate(32).unwrap();
        let _b = heap.allocate(32).unwrap();

        heap.deallocate(a).unwrap();
        let before = heap.stats();
        assert_eq!(heap.deallocate(a), Err(HeapError::DoubleFree));
        assert_eq!(heap.stats(), before);
    }

    #[test]
    fn stale_handle_after_merge_is_corrupt() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        let a = heap.allocate(32).unwrap();
        let b = heap.allocate(32).unwrap();

        heap.deallocate(a).unwrap();
        heap.deallocate(b).unwrap();
        // b's header was folded into a
        assert_eq!(heap.deallocate(b), Err(HeapError::CorruptedBlock));
        assert_eq!(heap.stats().corrupted_blocks, 1);
    }

    #[test]
    fn zero_allocate_clears_recycled_memory() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();

        let dirty = heap.allocate(64).unwrap();
        heap.bytes_mut(dirty).unwrap().fill(0xaa);
        heap.deallocate(dirty).unwrap();

        let clean = heap.zero_allocate(8, 8).unwrap();
        assert_eq!(clean, dirty);
        assert!(heap.bytes(clean).unwrap().iter().all(|&b| b == 0));
        assert_eq!(heap.zero_allocate(0, 8), Err(HeapError::InvalidSize));
    }

    #[test]
    fn reallocate_shrink_keeps_handle() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        let handle = heap.allocate(128).unwrap();
        let blocks_before = heap.blocks().count();

        assert_eq!(heap.reallocate(Some(handle), 16), Ok(Some(handle)));
        assert_eq!(heap.capacity(handle), Some(128));
        assert_eq!(heap.blocks().count(), blocks_before);
    }

    #[test]
    fn reallocate_grow_preserves_prefix() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        let handle = heap.allocate(16).unwrap();
        let _fence = heap.allocate(16).unwrap();
        heap.bytes_mut(handle)
            .unwrap()
            .copy_from_slice(b"sixteen bytes!!!");

        let grown = heap.reallocate(Some(handle), 256).unwrap().unwrap();
        assert_ne!(grown, handle);
        assert_eq!(&heap.bytes(grown).unwrap()[..16], b"sixteen bytes!!!");
        assert_eq!(heap.capacity(handle), None);
        heap.check().unwrap();
    }

    #[test]
    fn reallocate_failure_keeps_old_block() {
        let mut arena = vec![0u8; 1024];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();
        let handle = heap.allocate(16).unwrap();
        heap.bytes_mut(handle).unwrap().fill(7);

        assert_eq!(heap.reallocate(Some(handle), 4096), Err(HeapError::OutOfMemory));
        assert_eq!(heap.capacity(handle), Some(16));
        assert!(heap.bytes(handle).unwrap().iter().all(|&b| b == 7));
    }

    #[test]
    fn reallocate_edge_cases() {
        let mut arena = vec![0u8; 4096];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();

        let handle = heap.reallocate(None, 40).unwrap().unwrap();
        assert_eq!(heap.capacity(handle), Some(40));
        assert_eq!(heap.reallocate(Some(handle), 0), Ok(None));
        assert_eq!(heap.stats().allocated_blocks, 0);
        assert_eq!(
            heap.reallocate(Some(Handle::from_offset(12)), 64),
            Err(HeapError::CorruptedBlock)
        );
    }

    #[test]
    fn descriptor_exhaustion_grants_whole_blocks() {
        let mut arena = vec![0u8; (MAX_BLOCKS + 4) * (HEADER_SIZE + 8)];
        let mut heap = Heap::new();
        heap.init(&mut arena).unwrap();

        let mut handles = Vec::new();
        while let Ok(handle) = heap.allocate(8) {
            handles.push(handle);
        }
        assert_eq!(heap.stats().free_bytes, 0);
        assert!(handles.len() <= MAX_BLOCKS);
        assert_eq!(heap.stats(), heap.recompute_stats());
        heap.check().unwrap();
    }
}
