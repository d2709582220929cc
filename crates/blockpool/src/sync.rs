//! Lock-guarded engine for callers that share a pool across threads

use parking_lot::Mutex;

use blockpool_core::{BlockHandle, PoolConfig, Result};

use crate::pool::{BlockPool, PoolStats};

/// A [`BlockPool`] behind a mutex
///
/// Every operation takes the lock for its duration, so allocate and release
/// stay O(1) but serialize.
pub struct SharedBlockPool {
    inner: Mutex<BlockPool>,
}

impl SharedBlockPool {
    /// Wrap an existing engine
    pub fn new(pool: BlockPool) -> Self {
        Self {
            inner: Mutex::new(pool),
        }
    }

    /// Create a shared pool from a configuration
    pub fn from_config(config: &PoolConfig) -> Result<Self> {
        BlockPool::from_config(config).map(Self::new)
    }

    /// Allocate one block
    pub fn allocate(&self) -> Result<BlockHandle> {
        self.inner.lock().allocate()
    }

    /// Return a block to the pool
    pub fn deallocate(&self, handle: BlockHandle) -> Result<()> {
        self.inner.lock().deallocate(handle)
    }

    /// Run `f` on an allocated block's bytes while holding the lock
    pub fn with_block<R>(&self, handle: BlockHandle, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let mut pool = self.inner.lock();
        let bytes = pool.block_mut(handle)?;
        Ok(f(bytes))
    }

    /// Whether the handle refers to a block currently allocated
    pub fn is_allocated(&self, handle: BlockHandle) -> bool {
        self.inner.lock().is_allocated(handle)
    }

    /// Get statistics
    pub fn stats(&self) -> PoolStats {
        self.inner.lock().stats()
    }

    /// Mark every block free
    pub fn reset(&self) {
        self.inner.lock().reset();
    }

    /// Unwrap the engine
    pub fn into_inner(self) -> BlockPool {
        self.inner.into_inner()
    }
}
