//! Arena-style memory pools backing every tensor allocation in a graph.
//!
//! A [`MemoryPool`] grows a chain of contiguous blocks on demand and hands out
//! aligned byte ranges from the current block. It never frees an individual
//! allocation; callers give back everything at once via [`MemoryPool::reset`]
//! (or a scoped [`MemoryPool::mark`] / [`MemoryPool::reset_to`] pair).

use alloc::vec::Vec;

use crate::error::{LibetudeError, Result};

/// Allocation bookkeeping returned by [`MemoryPool::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total bytes currently allocated (since the last reset).
    pub bytes_allocated: usize,
    /// High-water mark of `bytes_allocated`, never reset by `reset()`.
    pub peak_bytes: usize,
    /// Number of live (un-reset) allocations.
    pub live_allocations: usize,
}

struct Block {
    data: Vec<u8>,
    cursor: usize,
}

impl Block {
    fn new(capacity: usize) -> Self {
        Self {
            data: alloc_zeroed_vec(capacity),
            cursor: 0,
        }
    }

    /// Tries to carve `size` bytes aligned to `align` out of the remaining
    /// capacity. Returns the byte offset within this block on success.
    fn try_alloc(&mut self, size: usize, align: usize) -> Option<usize> {
        let aligned = align_up(self.cursor, align);
        let end = aligned.checked_add(size)?;
        if end > self.data.len() {
            return None;
        }
        self.cursor = end;
        Some(aligned)
    }
}

fn alloc_zeroed_vec(capacity: usize) -> Vec<u8> {
    alloc::vec![0u8; capacity]
}

fn align_up(offset: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (offset + align - 1) & !(align - 1)
}

/// A mark produced by [`MemoryPool::mark`], used to scope-reset a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMark {
    block_index: usize,
    cursor: usize,
    live_allocations: usize,
}

/// An arena/bump allocator with block growth and scoped reset.
///
/// Every operation is serialized behind a single internal lock — matching
/// the specification's "single internal lock, no lock-free path required"
/// contract — so the pool is safe to share across executor worker threads.
pub struct MemoryPool {
    inner: Lock<PoolInner>,
    default_alignment: usize,
    block_capacity: usize,
    max_bytes: Option<usize>,
}

struct PoolInner {
    blocks: Vec<Block>,
    total_capacity: usize,
    stats: PoolStats,
}

#[cfg(feature = "std")]
type Lock<T> = std::sync::Mutex<T>;

#[cfg(not(feature = "std"))]
type Lock<T> = core::cell::RefCell<T>;

#[cfg(feature = "std")]
fn lock_new<T>(value: T) -> Lock<T> {
    std::sync::Mutex::new(value)
}

#[cfg(not(feature = "std"))]
fn lock_new<T>(value: T) -> Lock<T> {
    core::cell::RefCell::new(value)
}

#[cfg(feature = "std")]
fn lock_guard<T>(lock: &Lock<T>) -> std::sync::MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(not(feature = "std"))]
fn lock_guard<T>(lock: &Lock<T>) -> core::cell::RefMut<'_, T> {
    lock.borrow_mut()
}

impl MemoryPool {
    /// Creates a pool with an initial block of `capacity` bytes, aligned to
    /// at least `alignment`. `alignment` is also used as the default
    /// alignment for [`allocate`](Self::allocate).
    pub fn create(capacity: usize, alignment: usize) -> Result<Self> {
        if capacity == 0 || !alignment.is_power_of_two() {
            return Err(LibetudeError::invalid_argument(
                "pool capacity must be non-zero and alignment must be a power of two",
            ));
        }
        let first_block = Block::new(capacity);
        Ok(Self {
            inner: lock_new(PoolInner {
                blocks: alloc::vec![first_block],
                total_capacity: capacity,
                stats: PoolStats::default(),
            }),
            default_alignment: alignment,
            block_capacity: capacity,
            max_bytes: None,
        })
    }

    /// Caps total growth at `max_bytes`; allocations beyond the cap fail
    /// with `OutOfMemory` instead of growing another block.
    pub fn with_growth_cap(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    /// Allocates `size` bytes aligned to the pool's default alignment.
    pub fn allocate(&self, size: usize) -> Result<PoolHandle<'_>> {
        self.allocate_aligned(size, self.default_alignment)
    }

    /// Allocates `size` bytes aligned to `align` (which may exceed the
    /// pool's default alignment, e.g. 32 bytes for SIMD tensors).
    pub fn allocate_aligned(&self, size: usize, align: usize) -> Result<PoolHandle<'_>> {
        if size == 0 {
            return Err(LibetudeError::invalid_argument("allocation size must be non-zero"));
        }
        if !align.is_power_of_two() {
            return Err(LibetudeError::invalid_argument("alignment must be a power of two"));
        }

        let mut inner = lock_guard(&self.inner);
        let block_index = inner.blocks.len() - 1;
        let offset = {
            let last = inner.blocks.last_mut().expect("pool always has >=1 block");
            last.try_alloc(size, align)
        };

        let (block_index, offset) = match offset {
            Some(offset) => (block_index, offset),
            None => {
                // Current block is exhausted: grow, unless capped.
                let new_block_size = self.block_capacity.max(size + align);
                if let Some(cap) = self.max_bytes {
                    if inner.total_capacity + new_block_size > cap {
                        return Err(LibetudeError::out_of_memory(
                            "pool growth would exceed configured cap",
                        ));
                    }
                }
                let mut block = Block::new(new_block_size);
                let offset = block
                    .try_alloc(size, align)
                    .ok_or_else(|| LibetudeError::out_of_memory("allocation larger than one block"))?;
                inner.total_capacity += new_block_size;
                inner.blocks.push(block);
                (inner.blocks.len() - 1, offset)
            }
        };

        inner.stats.bytes_allocated += size;
        inner.stats.live_allocations += 1;
        if inner.stats.bytes_allocated > inner.stats.peak_bytes {
            inner.stats.peak_bytes = inner.stats.bytes_allocated;
        }

        Ok(PoolHandle {
            pool: self,
            block_index,
            offset,
            len: size,
        })
    }

    /// Returns the current allocation mark, usable with [`reset_to`](Self::reset_to).
    pub fn mark(&self) -> PoolMark {
        let inner = lock_guard(&self.inner);
        PoolMark {
            block_index: inner.blocks.len() - 1,
            cursor: inner.blocks.last().map(|b| b.cursor).unwrap_or(0),
            live_allocations: inner.stats.live_allocations,
        }
    }

    /// Frees everything allocated after `mark` without invoking any
    /// destructor. The caller must not retain [`PoolHandle`]s created after
    /// the mark.
    pub fn reset_to(&self, mark: PoolMark) {
        let mut inner = lock_guard(&self.inner);
        inner.blocks.truncate(mark.block_index + 1);
        if let Some(block) = inner.blocks.get_mut(mark.block_index) {
            let freed = block.cursor - mark.cursor;
            block.cursor = mark.cursor;
            inner.stats.bytes_allocated = inner.stats.bytes_allocated.saturating_sub(freed);
        }
        inner.stats.live_allocations = mark.live_allocations;
    }

    /// Resets the pool to empty, returning the high-water mark to zero.
    /// Does not shrink already-grown blocks (reused on the next round of
    /// allocations); does not invoke any destructor.
    pub fn reset(&self) {
        let mut inner = lock_guard(&self.inner);
        inner.blocks.truncate(1);
        if let Some(block) = inner.blocks.first_mut() {
            block.cursor = 0;
        }
        inner.stats.bytes_allocated = 0;
        inner.stats.live_allocations = 0;
    }

    /// Current allocation statistics.
    pub fn stats(&self) -> PoolStats {
        lock_guard(&self.inner).stats
    }

    /// Returns `Ok(())` if live bytes are at or below `threshold`, else an
    /// `InvalidState` error describing the leak. Intended for test harnesses
    /// that run alloc/reset cycles and assert no growth.
    pub fn check_leaks(&self, threshold: usize) -> Result<()> {
        let stats = self.stats();
        if stats.bytes_allocated > threshold {
            return Err(LibetudeError::invalid_state(alloc::format!(
                "pool has {} live bytes, exceeding leak threshold {}",
                stats.bytes_allocated, threshold
            )));
        }
        Ok(())
    }

    fn read_bytes(&self, block_index: usize, offset: usize, len: usize) -> Vec<u8> {
        let inner = lock_guard(&self.inner);
        inner.blocks[block_index].data[offset..offset + len].to_vec()
    }

    fn write_bytes(&self, block_index: usize, offset: usize, bytes: &[u8]) {
        let mut inner = lock_guard(&self.inner);
        inner.blocks[block_index].data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

/// A handle to a byte range allocated from a [`MemoryPool`].
///
/// The handle is a plain (block, offset, len) triple rather than a raw
/// pointer: the backing [`Vec<u8>`] may be relocated when a pool grows a new
/// block, so tensors read and write through the pool rather than holding
/// raw pointers across resets.
#[derive(Clone, Copy)]
pub struct PoolHandle<'p> {
    pool: &'p MemoryPool,
    block_index: usize,
    offset: usize,
    len: usize,
}

impl<'p> PoolHandle<'p> {
    /// Number of bytes this handle covers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether this handle covers zero bytes (always false for a handle
    /// returned by `allocate`, kept for API symmetry with `Vec::is_empty`).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies the allocation's current contents out into a fresh `Vec`.
    pub fn to_vec(&self) -> Vec<u8> {
        self.pool.read_bytes(self.block_index, self.offset, self.len)
    }

    /// Overwrites the allocation's bytes with `data` (which must be exactly
    /// `len()` bytes).
    pub fn write(&self, data: &[u8]) {
        debug_assert_eq!(data.len(), self.len);
        self.pool.write_bytes(self.block_index, self.offset, data);
    }

    /// Fills the allocation with `byte`.
    pub fn fill(&self, byte: u8) {
        let filler = alloc::vec![byte; self.len];
        self.write(&filler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_respects_alignment() {
        let pool = MemoryPool::create(1024, 8).unwrap();
        let a = pool.allocate(3).unwrap();
        let b = pool.allocate_aligned(16, 32).unwrap();
        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 16);
    }

    #[test]
    fn reset_returns_live_bytes_to_zero() {
        let pool = MemoryPool::create(256, 8).unwrap();
        for _ in 0..10 {
            let _ = pool.allocate(16).unwrap();
        }
        assert_eq!(pool.stats().bytes_allocated, 160);
        pool.reset();
        assert_eq!(pool.stats().bytes_allocated, 0);
        assert_eq!(pool.stats().live_allocations, 0);
    }

    #[test]
    fn alloc_reset_cycles_keep_peak_non_decreasing() {
        let pool = MemoryPool::create(256, 8).unwrap();
        let mut last_peak = 0;
        for _ in 0..20 {
            for _ in 0..4 {
                let _ = pool.allocate(8).unwrap();
            }
            let stats = pool.stats();
            assert!(stats.peak_bytes >= last_peak);
            last_peak = stats.peak_bytes;
            pool.reset();
            assert_eq!(pool.stats().bytes_allocated, 0);
        }
    }

    #[test]
    fn growth_beyond_cap_fails_with_out_of_memory() {
        let pool = MemoryPool::create(16, 8).unwrap().with_growth_cap(32);
        let _ = pool.allocate(16).unwrap();
        let err = pool.allocate(64).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::OutOfMemory);
    }

    #[test]
    fn mark_and_reset_to_scopes_allocations() {
        let pool = MemoryPool::create(256, 8).unwrap();
        let _ = pool.allocate(16).unwrap();
        let mark = pool.mark();
        let _ = pool.allocate(16).unwrap();
        let _ = pool.allocate(16).unwrap();
        assert_eq!(pool.stats().live_allocations, 3);
        pool.reset_to(mark);
        assert_eq!(pool.stats().live_allocations, 1);
    }

    #[test]
    fn write_and_read_round_trip() {
        let pool = MemoryPool::create(64, 8).unwrap();
        let handle = pool.allocate(4).unwrap();
        handle.write(&[1, 2, 3, 4]);
        assert_eq!(handle.to_vec(), alloc::vec![1, 2, 3, 4]);
    }
}
