//! Pool configuration
//!
//! A pool is described by its block count plus an optional block size and
//! alignment. Missing size/alignment are filled in by whoever builds the pool:
//! typed pools use the element's size and alignment, untyped pools fall back
//! to one machine word.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PoolError, Result};

/// Size of the free-list link stored inside every free block
pub const LINK_SIZE: usize = core::mem::size_of::<usize>();
/// Alignment of the free-list link
pub const LINK_ALIGN: usize = core::mem::align_of::<usize>();

/// Configuration for a fixed-size block pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Number of blocks in the pool
    pub num_blocks: usize,

    /// Requested size of each block in bytes
    #[serde(default)]
    pub block_size: Option<usize>,

    /// Requested alignment of each block
    #[serde(default)]
    pub align: Option<usize>,
}

/// Resolved block geometry of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    /// Stride between blocks, large enough for the link word
    pub block_size: usize,
    /// Alignment of every block start
    pub align: usize,
    /// Size of the whole buffer
    pub total_size: usize,
}

impl PoolConfig {
    /// Configuration with word-sized blocks
    pub const fn new(num_blocks: usize) -> Self {
        Self {
            num_blocks,
            block_size: None,
            align: None,
        }
    }

    /// Configuration sized for elements of type `T`
    pub const fn for_type<T>(num_blocks: usize) -> Self {
        Self {
            num_blocks,
            block_size: Some(core::mem::size_of::<T>()),
            align: Some(core::mem::align_of::<T>()),
        }
    }

    /// Set the block size
    pub const fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = Some(block_size);
        self
    }

    /// Set the block alignment
    pub const fn with_align(mut self, align: usize) -> Self {
        self.align = Some(align);
        self
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PoolConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check the configuration can back a pool
    pub fn validate(&self) -> Result<()> {
        self.layout().map(|_| ())
    }

    /// Resolve the block geometry
    ///
    /// The block size is at least one link word and rounded up to the
    /// alignment, which is at least the link's alignment.
    pub fn layout(&self) -> Result<BlockLayout> {
        if self.num_blocks > u32::MAX as usize {
            return Err(PoolError::InvalidConfig(format!(
                "num_blocks {} exceeds {}",
                self.num_blocks,
                u32::MAX
            )));
        }

        let requested_align = self.align.unwrap_or(LINK_ALIGN);
        if !requested_align.is_power_of_two() {
            return Err(PoolError::InvalidConfig(format!(
                "alignment {} is not a power of two",
                requested_align
            )));
        }
        let align = requested_align.max(LINK_ALIGN);

        let requested_size = self.block_size.unwrap_or(LINK_SIZE);
        let block_size = requested_size
            .max(LINK_SIZE)
            .checked_add(align - 1)
            .map(|size| size & !(align - 1))
            .ok_or_else(|| {
                PoolError::InvalidConfig(format!("block size {} overflows", requested_size))
            })?;

        let total_size = block_size.checked_mul(self.num_blocks).ok_or_else(|| {
            PoolError::InvalidConfig(format!(
                "{} blocks of {} bytes overflow the address space",
                self.num_blocks, block_size
            ))
        })?;
        if total_size > isize::MAX as usize - (align - 1) {
            return Err(PoolError::InvalidConfig(format!(
                "pool of {} bytes is too large",
                total_size
            )));
        }

        Ok(BlockLayout {
            block_size,
            align,
            total_size,
        })
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_word_minimum() {
        let layout = PoolConfig::new(3).with_block_size(1).layout().unwrap();
        assert_eq!(layout.block_size, LINK_SIZE);
        assert_eq!(layout.align, LINK_ALIGN);
        assert_eq!(layout.total_size, 3 * LINK_SIZE);
    }

    #[test]
    fn test_layout_rounds_to_alignment() {
        let layout = PoolConfig::new(4)
            .with_block_size(LINK_SIZE + 1)
            .with_align(32)
            .layout()
            .unwrap();
        assert_eq!(layout.block_size, 32);
        assert_eq!(layout.align, 32);
        assert_eq!(layout.total_size, 128);
    }

    #[test]
    fn test_layout_for_type() {
        #[repr(align(16))]
        struct Wide(#[allow(dead_code)] [u8; 40]);

        let layout = PoolConfig::for_type::<Wide>(2).layout().unwrap();
        assert_eq!(layout.block_size, 48);
        assert_eq!(layout.align, 16);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(PoolConfig::new(1).with_align(3).validate().is_err());
        assert!(PoolConfig::new(usize::MAX / 2).with_block_size(64).validate().is_err());
        assert!(PoolConfig::new(1).with_block_size(usize::MAX).validate().is_err());
    }

    #[test]
    fn test_from_toml() {
        let config = PoolConfig::from_toml_str(
            r#"
            num_blocks = 128
            block_size = 24
            "#,
        )
        .unwrap();
        assert_eq!(config.num_blocks, 128);
        assert_eq!(config.block_size, Some(24));
        assert_eq!(config.align, None);

        let err = PoolConfig::from_toml_str("num_blocks = 4\nalign = 6\n").unwrap_err();
        assert!(matches!(err, PoolError::InvalidConfig(_)));

        let err = PoolConfig::from_toml_str("block_size = 8").unwrap_err();
        assert!(matches!(err, PoolError::Config(_)));
    }
}
