//! # blockpool_core - Block Pool Primitives
//!
//! Shared building blocks for the fixed-size block pool:
//! - **Handles**: pool-tagged, generational references to allocated blocks
//! - **Errors**: the checked failure modes of allocation and release
//! - **Config**: serde/TOML pool configuration with validation

pub mod config;
pub mod error;
pub mod handle;

pub use config::{BlockLayout, PoolConfig, LINK_ALIGN, LINK_SIZE};
pub use error::{HandleError, PoolError, Result};
pub use handle::{BlockHandle, PoolId};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::PoolConfig;
    pub use crate::error::{HandleError, PoolError, Result};
    pub use crate::handle::{BlockHandle, PoolId};
}
