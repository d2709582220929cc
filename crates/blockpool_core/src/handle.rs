//! Handles to pool blocks
//!
//! A pool never hands out raw addresses. Callers receive a [`BlockHandle`]
//! carrying the owning pool's id, the block index, and the block's generation
//! at the time of allocation. Releasing bumps the generation, so a handle that
//! outlives its block is detected instead of corrupting the free list.

use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(0);

/// Process-unique identity of a pool
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolId(u32);

impl PoolId {
    /// Generate the next unique pool id
    pub fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw value
    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolId({})", self.0)
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

/// Reference to one allocated block
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHandle {
    pool: PoolId,
    index: u32,
    generation: u32,
}

impl BlockHandle {
    /// Create a handle; only pools mint handles for blocks they granted
    #[inline]
    pub const fn new(pool: PoolId, index: u32, generation: u32) -> Self {
        Self {
            pool,
            index,
            generation,
        }
    }

    /// Owning pool
    #[inline]
    pub const fn pool(&self) -> PoolId {
        self.pool
    }

    /// Block index within the pool
    #[inline]
    pub const fn index(&self) -> usize {
        self.index as usize
    }

    /// Generation of the block when this handle was minted
    #[inline]
    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for BlockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockHandle({}:{}v{})",
            self.pool.0, self.index, self.generation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_ids_unique() {
        let a = PoolId::next();
        let b = PoolId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn test_handle_accessors() {
        let pool = PoolId::next();
        let handle = BlockHandle::new(pool, 7, 2);

        assert_eq!(handle.pool(), pool);
        assert_eq!(handle.index(), 7);
        assert_eq!(handle.generation(), 2);
        assert_ne!(handle, BlockHandle::new(pool, 7, 3));
    }
}
