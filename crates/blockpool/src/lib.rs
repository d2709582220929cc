//! # blockpool - Fixed-Size Block Pool
//!
//! Hands out and reclaims equally sized blocks from one buffer without
//! touching the system allocator per allocation:
//! - BlockPool: the engine, an intrusive index free list with lazy formatting
//! - ObjectTraits: typed construction and destruction inside blocks
//! - PoolAllocator: the engine as a pluggable strategy for generic containers
//! - SharedBlockPool: the engine behind a lock, for cross-thread use

pub mod allocator;
pub mod object;
pub mod pool;
pub mod sync;

pub use allocator::PoolAllocator;
pub use object::{Live, ObjectTraits, Rejected, Slot};
pub use pool::{BlockPool, FreeIndices, PoolStats};
pub use sync::SharedBlockPool;

pub use blockpool_core::{BlockHandle, HandleError, PoolConfig, PoolError, PoolId, Result};

/// Allocation strategy handing out one typed slot per block
///
/// Generic containers take an `A: BlockAllocator<T>` and use
/// [`ObjectTraits`] to manage values inside the slots they receive.
pub trait BlockAllocator<T> {
    /// The same strategy for another element type
    type Rebind<U>: BlockAllocator<U>;

    /// Allocate `count` blocks
    fn allocate(&self, count: usize) -> Result<Slot<'_, T>>;

    /// Release blocks obtained from [`allocate`](Self::allocate)
    ///
    /// A refused release hands the slot back inside [`Rejected`].
    fn deallocate<'a>(
        &'a self,
        slot: Slot<'a, T>,
        count: usize,
    ) -> core::result::Result<(), Rejected<'a, T>>;

    /// Largest number of elements a single allocation can hold
    fn max_size(&self) -> usize;

    /// Total number of blocks
    fn capacity(&self) -> usize;

    /// Number of free blocks
    fn available(&self) -> usize;

    /// Number of allocated blocks
    fn used(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Derive the strategy for element type `U`
    fn rebind<U>(&self) -> Result<Self::Rebind<U>>;
}

pub mod prelude {
    pub use crate::{BlockAllocator, BlockPool, ObjectTraits, PoolAllocator, SharedBlockPool};
    pub use crate::{Live, Rejected, Slot};
    pub use blockpool_core::prelude::*;
}
