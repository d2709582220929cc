//! Error types for pool allocation and release

use thiserror::Error;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Errors that can occur while using a block pool
#[derive(Debug, Error)]
pub enum PoolError {
    /// More blocks were requested than are currently free
    #[error("Out of memory: requested {requested} block(s), {available} available")]
    OutOfMemory {
        requested: usize,
        available: usize,
    },

    /// Only single-block requests are granted
    #[error("Unsupported block count {0}: blocks are granted and released one at a time")]
    UnsupportedCount(usize),

    /// A block was released that this pool does not currently hold as allocated
    #[error("Invalid release: {0}")]
    InvalidRelease(HandleError),

    /// A handle was used to reach a block that is not allocated
    #[error("Invalid handle: {0}")]
    InvalidHandle(HandleError),

    /// Pool parameters are unusable
    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// Configuration text could not be parsed
    #[error("Failed to parse pool configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// Configuration file could not be read
    #[error("Failed to read pool configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl PoolError {
    /// Whether this error is the pool running dry
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, PoolError::OutOfMemory { .. })
    }
}

/// Why a handle was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandleError {
    /// Handle was minted by a different pool
    #[error("block belongs to another pool")]
    ForeignPool,

    /// Handle index lies outside the pool
    #[error("block index {index} out of bounds for pool of {num_blocks} blocks")]
    OutOfBounds { index: usize, num_blocks: usize },

    /// Block was already released (double release or stale handle)
    #[error("block {index} is not allocated (stale or double release)")]
    Stale { index: usize },
}
