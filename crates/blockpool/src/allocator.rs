//! Typed allocator facade over a [`BlockPool`]

use core::cell::RefCell;
use core::mem;

use blockpool_core::{PoolConfig, PoolError, Result};

use crate::object::{Live, ObjectTraits, Rejected, Slot};
use crate::pool::{BlockPool, PoolStats};
use crate::BlockAllocator;

/// Pool-backed allocation strategy for elements of type `T`
///
/// Every block holds exactly one `T`. Slots borrow the allocator, so the
/// backing buffer outlives every slot handed out. Not thread-safe; see
/// [`SharedBlockPool`](crate::SharedBlockPool) for a locked engine.
pub struct PoolAllocator<T> {
    pool: RefCell<BlockPool>,
    config: PoolConfig,
    traits: ObjectTraits<T>,
}

impl<T> PoolAllocator<T> {
    /// Create an allocator with `num_blocks` element-sized blocks
    pub fn new(num_blocks: usize) -> Result<Self> {
        Self::from_config(&PoolConfig::new(num_blocks))
    }

    /// Create an allocator with blocks of `block_size` bytes
    pub fn with_block_size(num_blocks: usize, block_size: usize) -> Result<Self> {
        Self::from_config(&PoolConfig::new(num_blocks).with_block_size(block_size))
    }

    /// Create an allocator from a configuration
    ///
    /// Missing size and alignment default to those of `T`. An explicit block
    /// size smaller than `T` is rejected.
    pub fn from_config(config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        let element_size = mem::size_of::<T>();
        let block_size = config.block_size.unwrap_or(element_size);
        if block_size < element_size {
            return Err(PoolError::InvalidConfig(format!(
                "block size {} cannot hold {} ({} bytes)",
                block_size,
                core::any::type_name::<T>(),
                element_size
            )));
        }
        let align = config
            .align
            .unwrap_or(1)
            .max(mem::align_of::<T>());

        let config = PoolConfig::new(config.num_blocks)
            .with_block_size(block_size)
            .with_align(align);
        let pool = BlockPool::from_config(&config)?;

        Ok(Self {
            pool: RefCell::new(pool),
            config,
            traits: ObjectTraits::new(),
        })
    }

    /// Allocate a block and move `value` into it
    pub fn alloc(&self, value: T) -> Result<Live<'_, T>> {
        let slot = self.allocate(1)?;
        Ok(self.traits.construct_with(slot, value))
    }

    /// Destroy a value and release its block
    ///
    /// The value is dropped even if the release is refused; the slot comes
    /// back inside [`Rejected`].
    pub fn free<'a>(&'a self, value: Live<'a, T>) -> core::result::Result<(), Rejected<'a, T>> {
        let slot = self.traits.destroy(value);
        self.deallocate(slot, 1)
    }

    /// Object lifecycle helper for `T`
    pub fn traits(&self) -> ObjectTraits<T> {
        self.traits
    }

    /// Effective configuration
    pub fn config(&self) -> PoolConfig {
        self.config
    }

    /// Size of each block in bytes
    pub fn block_size(&self) -> usize {
        self.pool.borrow().block_size()
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        self.pool.borrow().stats()
    }

    /// Mark every block free; requires that no slot is outstanding
    ///
    /// Values still constructed in blocks are not dropped.
    pub fn reset(&mut self) {
        self.pool.get_mut().reset();
    }
}

impl<T> BlockAllocator<T> for PoolAllocator<T> {
    type Rebind<U> = PoolAllocator<U>;

    fn allocate(&self, count: usize) -> Result<Slot<'_, T>> {
        let mut pool = self.pool.borrow_mut();
        let handle = pool.allocate_blocks(count)?;
        let ptr = pool.block_ptr(handle)?.cast::<T>();
        // Blocks are at least size_of::<T>() bytes, aligned for T, and
        // granted to exactly one slot
        Ok(unsafe { Slot::from_raw(handle, ptr) })
    }

    fn deallocate<'a>(
        &'a self,
        slot: Slot<'a, T>,
        count: usize,
    ) -> core::result::Result<(), Rejected<'a, T>> {
        // The engine checks before mutating, so a refused block stays allocated
        self.pool
            .borrow_mut()
            .deallocate_blocks(slot.handle(), count)
            .map_err(|error| Rejected::new(error, slot))
    }

    fn max_size(&self) -> usize {
        1
    }

    fn capacity(&self) -> usize {
        self.pool.borrow().block_count()
    }

    fn available(&self) -> usize {
        self.pool.borrow().free_count()
    }

    /// Independent pool for `U` with the same number of blocks
    ///
    /// The block size carries over when it can hold a `U`; otherwise it is
    /// re-derived from `U`. Alignment is the stricter of the two.
    fn rebind<U>(&self) -> Result<Self::Rebind<U>> {
        let block_size = self
            .config
            .block_size
            .filter(|&size| size >= mem::size_of::<U>())
            .unwrap_or(mem::size_of::<U>());
        let align = self
            .config
            .align
            .unwrap_or(1)
            .max(mem::align_of::<U>());

        log::debug!(
            "Rebinding {} blocks from {} to {}",
            self.config.num_blocks,
            core::any::type_name::<T>(),
            core::any::type_name::<U>()
        );

        PoolAllocator::from_config(
            &PoolConfig::new(self.config.num_blocks)
                .with_block_size(block_size)
                .with_align(align),
        )
    }
}

impl<T> core::fmt::Debug for PoolAllocator<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("element", &core::any::type_name::<T>())
            .field("pool", &*self.pool.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_pool() {
        let pool: PoolAllocator<i32> = PoolAllocator::new(10).unwrap();

        let a = pool.alloc(42).unwrap();
        let b = pool.alloc(100).unwrap();

        assert_eq!(*a, 42);
        assert_eq!(*b, 100);

        pool.free(a).unwrap();
        assert_eq!(pool.stats().allocated_blocks, 1);
        assert_eq!(pool.available(), 9);
    }

    #[test]
    fn test_rejected_release_can_be_retried() {
        let pool: PoolAllocator<u64> = PoolAllocator::new(1).unwrap();
        let slot = pool.allocate(1).unwrap();

        let rejected = pool.deallocate(slot, 2).unwrap_err();
        assert!(matches!(rejected.error(), PoolError::UnsupportedCount(2)));
        assert_eq!(pool.available(), 0);

        pool.deallocate(rejected.into_slot(), 1).unwrap();
        assert_eq!(pool.available(), 1);
        let _slot = pool.allocate(1).unwrap();
    }

    #[test]
    fn test_free_returns_slot_on_rejection() {
        let a: PoolAllocator<String> = PoolAllocator::new(1).unwrap();
        let b: PoolAllocator<String> = PoolAllocator::new(1).unwrap();
        let value = a.alloc("kept".to_string()).unwrap();

        let (error, slot) = b.free(value).unwrap_err().into_parts();
        assert!(matches!(error, PoolError::InvalidRelease(_)));
        assert_eq!(a.available(), 0);

        // Slot is uninitialized again and can be reused by its own pool
        let value = a.traits().construct_with(slot, "again".to_string());
        assert_eq!(*value, "again");
        a.free(value).unwrap();
        assert_eq!(a.available(), 1);
    }

    #[test]
    fn test_block_size_too_small() {
        let err = PoolAllocator::<[u64; 4]>::with_block_size(4, 16).unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));
    }

    #[test]
    fn test_rebind_forwards_capacity() {
        let pool: PoolAllocator<u8> = PoolAllocator::with_block_size(12, 32).unwrap();

        let small: PoolAllocator<u16> = pool.rebind().unwrap();
        assert_eq!(small.capacity(), 12);
        assert_eq!(small.block_size(), 32);

        let large: PoolAllocator<[u64; 8]> = pool.rebind().unwrap();
        assert_eq!(large.capacity(), 12);
        assert_eq!(large.block_size(), 64);

        // Rebound pools are independent
        let _slot = large.allocate(1).unwrap();
        assert_eq!(large.available(), 11);
        assert_eq!(pool.available(), 12);
    }

    #[test]
    fn test_reset_reclaims_blocks() {
        let mut pool: PoolAllocator<u32> = PoolAllocator::new(2).unwrap();
        let _ = pool.allocate(1).unwrap();
        let _ = pool.allocate(1).unwrap();
        assert_eq!(pool.available(), 0);

        pool.reset();
        assert_eq!(pool.available(), 2);
    }
}
