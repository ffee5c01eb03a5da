//! Heap configuration.
//!
//! The defaults are the compatibility constants the rest of the runtime is
//! tuned against; presets exist for embedders with unusual footprints and
//! for tests that want collections to happen early.

use crate::object::{FIRST_REGULAR_OBJECT_CID, OBJECT_ALIGNMENT, WORD_SIZE};

const KB: usize = 1024;
const MB: usize = KB * KB;

/// Configuration for a heap instance.
///
/// # Example
///
/// ```ignore
/// use loam_heap::{Heap, HeapConfig};
///
/// let heap = Heap::new(HeapConfig {
///     verify: true,
///     ..HeapConfig::default()
/// });
/// ```
#[derive(Debug, Clone)]
pub struct HeapConfig {
    /// Size of each semispace in bytes. Total reservation is twice this.
    ///
    /// Default: one megabyte per word-size byte (4MB on 32-bit, 8MB on
    /// 64-bit).
    pub initial_semispace_size: usize,

    /// Hard ceiling a growing semispace may not cross; the heap aborts
    /// rather than exceed it.
    ///
    /// Default: 16x the default initial size.
    pub max_semispace_size: usize,

    /// Number of class-table slots. The table does not grow; allocation past
    /// this point recycles freed slots or aborts.
    ///
    /// Default: 1024.
    pub class_table_capacity: usize,

    /// Seed for the identity-hash generator. Zero selects a fixed default;
    /// embedders wanting unpredictable hashes pass entropy here.
    ///
    /// Default: 0.
    pub identity_hash_seed: u64,

    /// Walk the heap after every collection and check its invariants.
    /// Expensive, but turns collector bugs into immediate panics.
    ///
    /// Default: on in debug builds.
    pub verify: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            initial_semispace_size: WORD_SIZE * MB,
            max_semispace_size: 16 * WORD_SIZE * MB,
            class_table_capacity: 1024,
            identity_hash_seed: 0,
            verify: cfg!(debug_assertions),
        }
    }
}

impl HeapConfig {
    /// A configuration for memory-constrained embedders and for tests that
    /// want to reach collection and growth quickly.
    pub fn low_memory() -> Self {
        Self {
            initial_semispace_size: 64 * KB,
            max_semispace_size: MB,
            ..Default::default()
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_semispace_size < 16 * KB {
            return Err(ConfigError::SemispaceTooSmall);
        }
        if !self.initial_semispace_size.is_power_of_two() {
            // Growth doubles; a non-power-of-two start can never land
            // exactly on the maximum.
            return Err(ConfigError::SemispaceNotPowerOfTwo);
        }
        if self.max_semispace_size < self.initial_semispace_size {
            return Err(ConfigError::MaxBelowInitial);
        }
        if self.class_table_capacity < FIRST_REGULAR_OBJECT_CID {
            return Err(ConfigError::ClassTableTooSmall);
        }
        debug_assert!(self.initial_semispace_size % OBJECT_ALIGNMENT == 0);
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Semispace size is too small (minimum 16KB).
    SemispaceTooSmall,
    /// Semispace size must be a power of two.
    SemispaceNotPowerOfTwo,
    /// Maximum semispace size is below the initial size.
    MaxBelowInitial,
    /// Class table cannot hold the reserved cids.
    ClassTableTooSmall,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::SemispaceTooSmall => write!(f, "semispace size must be at least 16KB"),
            ConfigError::SemispaceNotPowerOfTwo => {
                write!(f, "semispace size must be a power of two")
            }
            ConfigError::MaxBelowInitial => {
                write!(f, "maximum semispace size is below the initial size")
            }
            ConfigError::ClassTableTooSmall => {
                write!(f, "class table capacity cannot hold the reserved cids")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(HeapConfig::default().validate().is_ok());
    }

    #[test]
    fn test_low_memory_config_is_valid() {
        assert!(HeapConfig::low_memory().validate().is_ok());
    }

    #[test]
    fn test_default_sizes_track_word_size() {
        let config = HeapConfig::default();
        assert_eq!(config.initial_semispace_size, WORD_SIZE * MB);
        assert_eq!(config.max_semispace_size, 16 * WORD_SIZE * MB);
    }

    #[test]
    fn test_invalid_semispace_size() {
        let config = HeapConfig {
            initial_semispace_size: 4 * KB,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::SemispaceTooSmall));

        let config = HeapConfig {
            initial_semispace_size: 96 * KB,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::SemispaceNotPowerOfTwo));
    }

    #[test]
    fn test_max_below_initial() {
        let config = HeapConfig {
            initial_semispace_size: 8 * MB,
            max_semispace_size: 4 * MB,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MaxBelowInitial));
    }

    #[test]
    fn test_class_table_too_small() {
        let config = HeapConfig {
            class_table_capacity: 4,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ClassTableTooSmall));
    }
}
