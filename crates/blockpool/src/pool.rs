//! Pool engine - fixed-size block allocation over one raw buffer
//!
//! Free blocks form an intrusive singly-linked list: the first word of every
//! free block holds the *index* of the next free block, or `num_blocks` when
//! the list ends there. Blocks are formatted lazily: the block at index
//! `initialized` is linked to `initialized + 1` only when an allocation
//! reaches the frontier, so construction never walks the whole buffer.
//!
//! Every block also carries a generation. Even generations mean free, odd
//! generations mean allocated; both allocate and release bump it, so a handle
//! is only honoured while its generation matches an allocated block.

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use blockpool_core::{
    BlockHandle, BlockLayout, HandleError, PoolConfig, PoolError, PoolId, Result,
};

/// Fixed-size block pool
///
/// Owns one contiguous buffer of `block_count * block_size` bytes for its
/// whole lifetime. Allocation and release are O(1).
pub struct BlockPool {
    id: PoolId,
    /// Start of the buffer; never moves
    base: NonNull<u8>,
    layout: BlockLayout,
    /// Layout of the buffer allocation, `None` for an empty pool
    buffer: Option<Layout>,
    num_blocks: usize,
    num_free: usize,
    /// Blocks below this index have had a link written at least once
    num_initialized: usize,
    /// Index of the first free block, `num_blocks` when empty
    head: usize,
    generations: Vec<u32>,
}

// Safety: the pool exclusively owns its buffer; mutation requires `&mut self`
unsafe impl Send for BlockPool {}

impl BlockPool {
    /// Create a pool of `num_blocks` blocks of at least `block_size` bytes
    pub fn new(num_blocks: usize, block_size: usize) -> Result<Self> {
        Self::from_config(&PoolConfig::new(num_blocks).with_block_size(block_size))
    }

    /// Create a pool whose blocks start on `align`-byte boundaries
    pub fn with_align(num_blocks: usize, block_size: usize, align: usize) -> Result<Self> {
        Self::from_config(
            &PoolConfig::new(num_blocks)
                .with_block_size(block_size)
                .with_align(align),
        )
    }

    /// Create a pool sized for elements of type `T`
    pub fn for_type<T>(num_blocks: usize) -> Result<Self> {
        Self::from_config(&PoolConfig::for_type::<T>(num_blocks))
    }

    /// Create a pool from a configuration
    pub fn from_config(config: &PoolConfig) -> Result<Self> {
        let layout = config.layout()?;
        let buffer = if layout.total_size == 0 {
            None
        } else {
            Some(
                Layout::from_size_align(layout.total_size, layout.align)
                    .map_err(|e| PoolError::InvalidConfig(e.to_string()))?,
            )
        };
        let base = match buffer {
            None => NonNull::dangling(),
            Some(buffer_layout) => {
                // Zeroed so block bytes are always initialized memory
                let ptr = unsafe { alloc::alloc_zeroed(buffer_layout) };
                match NonNull::new(ptr) {
                    Some(ptr) => ptr,
                    None => alloc::handle_alloc_error(buffer_layout),
                }
            }
        };

        let pool = Self {
            id: PoolId::next(),
            base,
            layout,
            buffer,
            num_blocks: config.num_blocks,
            num_free: config.num_blocks,
            num_initialized: 0,
            head: 0,
            generations: vec![0; config.num_blocks],
        };

        log::debug!(
            "Created {} with {} blocks of {} bytes ({} bytes at {:p})",
            pool.id,
            pool.num_blocks,
            pool.layout.block_size,
            pool.layout.total_size,
            pool.base
        );

        Ok(pool)
    }

    /// Allocate one block
    pub fn allocate(&mut self) -> Result<BlockHandle> {
        if self.num_free == 0 {
            return Err(PoolError::OutOfMemory {
                requested: 1,
                available: 0,
            });
        }

        // Format the frontier block on first touch
        if self.num_initialized < self.num_blocks {
            self.write_link(self.num_initialized, self.num_initialized + 1);
            self.num_initialized += 1;
        }

        let index = self.head;
        self.num_free -= 1;
        self.head = if self.num_free > 0 {
            self.read_link(index)
        } else {
            self.num_blocks
        };

        let generation = &mut self.generations[index];
        *generation = generation.wrapping_add(1);
        let handle = BlockHandle::new(self.id, index as u32, *generation);

        log::trace!(
            "{}: allocated block {} ({} free)",
            self.id,
            index,
            self.num_free
        );

        Ok(handle)
    }

    /// Allocate `count` blocks
    ///
    /// The free list is not ordered, so contiguous runs cannot be promised.
    /// Only `count == 1` is granted; larger requests that would fit fail with
    /// [`PoolError::UnsupportedCount`].
    pub fn allocate_blocks(&mut self, count: usize) -> Result<BlockHandle> {
        if count > self.num_free {
            return Err(PoolError::OutOfMemory {
                requested: count,
                available: self.num_free,
            });
        }
        if count != 1 {
            return Err(PoolError::UnsupportedCount(count));
        }
        self.allocate()
    }

    /// Return a block to the pool
    pub fn deallocate(&mut self, handle: BlockHandle) -> Result<()> {
        let index = self.validate(handle).map_err(|e| {
            log::warn!("{}: rejected release of {:?}: {}", self.id, handle, e);
            PoolError::InvalidRelease(e)
        })?;

        let next = if self.num_free > 0 {
            self.head
        } else {
            self.num_blocks
        };
        self.write_link(index, next);
        self.head = index;
        self.num_free += 1;

        let generation = &mut self.generations[index];
        *generation = generation.wrapping_add(1);

        log::trace!(
            "{}: released block {} ({} free)",
            self.id,
            index,
            self.num_free
        );

        Ok(())
    }

    /// Return `count` blocks granted by one [`allocate_blocks`](Self::allocate_blocks) call
    pub fn deallocate_blocks(&mut self, handle: BlockHandle, count: usize) -> Result<()> {
        if count != 1 {
            return Err(PoolError::UnsupportedCount(count));
        }
        self.deallocate(handle)
    }

    /// Mark every block free again
    ///
    /// Outstanding handles become stale. The buffer is kept; formatting
    /// restarts lazily from index 0.
    pub fn reset(&mut self) {
        for generation in self.generations.iter_mut() {
            if *generation & 1 == 1 {
                *generation = generation.wrapping_add(1);
            }
        }
        self.num_free = self.num_blocks;
        self.num_initialized = 0;
        self.head = 0;

        log::debug!("{}: reset, {} blocks free", self.id, self.num_blocks);
    }

    /// Address of an allocated block
    pub fn block_ptr(&self, handle: BlockHandle) -> Result<NonNull<u8>> {
        let index = self.validate(handle).map_err(PoolError::InvalidHandle)?;
        Ok(self.addr_from_index(index))
    }

    /// Bytes of an allocated block
    pub fn block(&self, handle: BlockHandle) -> Result<&[u8]> {
        let ptr = self.block_ptr(handle)?;
        Ok(unsafe { core::slice::from_raw_parts(ptr.as_ptr(), self.layout.block_size) })
    }

    /// Mutable bytes of an allocated block
    pub fn block_mut(&mut self, handle: BlockHandle) -> Result<&mut [u8]> {
        let ptr = self.block_ptr(handle)?;
        Ok(unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), self.layout.block_size) })
    }

    /// Whether the handle refers to a block currently allocated from this pool
    pub fn is_allocated(&self, handle: BlockHandle) -> bool {
        self.validate(handle).is_ok()
    }

    /// Whether an address lies inside the pool's buffer
    pub fn contains(&self, ptr: *const u8) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        addr >= base && addr < base + self.layout.total_size
    }

    /// Index of the block containing `ptr`
    pub fn index_of(&self, ptr: *const u8) -> Option<usize> {
        if !self.contains(ptr) {
            return None;
        }
        Some((ptr as usize - self.base.as_ptr() as usize) / self.layout.block_size)
    }

    /// Walk the free list from its head
    pub fn free_indices(&self) -> FreeIndices<'_> {
        FreeIndices {
            pool: self,
            cursor: self.head,
            remaining: self.num_free,
        }
    }

    /// Pool id stamped into every handle
    pub fn id(&self) -> PoolId {
        self.id
    }

    /// Get the block size
    pub fn block_size(&self) -> usize {
        self.layout.block_size
    }

    /// Get the block alignment
    pub fn align(&self) -> usize {
        self.layout.align
    }

    /// Get the total number of blocks
    pub fn block_count(&self) -> usize {
        self.num_blocks
    }

    /// Get the number of free blocks
    pub fn free_count(&self) -> usize {
        self.num_free
    }

    /// Get the number of allocated blocks
    pub fn allocated_count(&self) -> usize {
        self.num_blocks - self.num_free
    }

    /// Get the number of blocks that have been formatted
    pub fn initialized_count(&self) -> usize {
        self.num_initialized
    }

    /// Total buffer size in bytes
    pub fn capacity(&self) -> usize {
        self.layout.total_size
    }

    /// Bytes held by allocated blocks
    pub fn used(&self) -> usize {
        self.allocated_count() * self.layout.block_size
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            block_size: self.layout.block_size,
            total_blocks: self.num_blocks,
            allocated_blocks: self.allocated_count(),
            free_blocks: self.num_free,
            initialized_blocks: self.num_initialized,
        }
    }

    fn validate(&self, handle: BlockHandle) -> core::result::Result<usize, HandleError> {
        if handle.pool() != self.id {
            return Err(HandleError::ForeignPool);
        }
        let index = handle.index();
        if index >= self.num_blocks {
            return Err(HandleError::OutOfBounds {
                index,
                num_blocks: self.num_blocks,
            });
        }
        let generation = self.generations[index];
        if generation & 1 == 0 || generation != handle.generation() {
            return Err(HandleError::Stale { index });
        }
        Ok(index)
    }

    #[inline]
    fn addr_from_index(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.num_blocks);
        unsafe { NonNull::new_unchecked(self.base.as_ptr().add(index * self.layout.block_size)) }
    }

    #[inline]
    fn write_link(&mut self, index: usize, next: usize) {
        let link = self.addr_from_index(index).cast::<usize>();
        // Blocks are at least one word long and word aligned
        unsafe { link.as_ptr().write(next) }
    }

    #[inline]
    fn read_link(&self, index: usize) -> usize {
        debug_assert!(index < self.num_initialized);
        let link = self.addr_from_index(index).cast::<usize>();
        unsafe { link.as_ptr().read() }
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        if let Some(buffer_layout) = self.buffer {
            unsafe { alloc::dealloc(self.base.as_ptr(), buffer_layout) };
        }
        log::debug!(
            "Dropped {} ({} bytes released, {} blocks still allocated)",
            self.id,
            self.layout.total_size,
            self.allocated_count()
        );
    }
}

impl core::fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BlockPool")
            .field("id", &self.id)
            .field("block_size", &self.layout.block_size)
            .field("num_blocks", &self.num_blocks)
            .field("num_free", &self.num_free)
            .field("num_initialized", &self.num_initialized)
            .finish()
    }
}

/// Iterator over free block indices in free-list order
///
/// Blocks past the formatted frontier are implicitly linked to their
/// successor. Once exhausted, [`cursor`](Self::cursor) is the sentinel.
pub struct FreeIndices<'a> {
    pool: &'a BlockPool,
    cursor: usize,
    remaining: usize,
}

impl FreeIndices<'_> {
    /// Index the walk would visit next
    pub fn cursor(&self) -> usize {
        self.cursor
    }
}

impl Iterator for FreeIndices<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.cursor;
        self.remaining -= 1;
        self.cursor = if self.remaining == 0 {
            self.pool.num_blocks
        } else if index < self.pool.num_initialized {
            self.pool.read_link(index)
        } else {
            index + 1
        };
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

/// Pool statistics
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    pub block_size: usize,
    pub total_blocks: usize,
    pub allocated_blocks: usize,
    pub free_blocks: usize,
    pub initialized_blocks: usize,
}
