//! Allocator configuration
//!
//! Every constant the allocator depends on is fixed when a [`Hoard`] is built.
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `HOARD_*` environment variables (`HOARD_THREADS=4`, `HOARD_CAPACITY=4096`).
//!
//! ```toml
//! log_min = 4
//! log_max = 8
//! page_size = 64
//! superblock_pages = 2
//! capacity = 1024
//! empty_ratio = 0.5
//! retain_threshold = 1
//! threads = 2
//! ```
//!
//! [`Hoard`]: crate::hoard::Hoard

use crate::error::{Error, Result};
use crate::hoard::heap::ReleasePolicy;
use crate::hoard::size_class::SizeClassTable;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "HOARD";

/// Largest exponent accepted for a size class
const MAX_EXPONENT: u32 = 32;

/// Allocator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HoardConfig {
    /// Smallest size-class exponent (2^log_min bytes)
    pub log_min: u32,
    /// Largest size-class exponent (2^log_max bytes)
    pub log_max: u32,
    /// Page size in bytes
    pub page_size: usize,
    /// Pages per superblock
    pub superblock_pages: usize,
    /// Size of the simulated address space in bytes
    pub capacity: usize,
    /// Utilization below which a thread heap hands a superblock back
    pub empty_ratio: f64,
    /// Superblocks a thread heap keeps regardless of utilization
    pub retain_threshold: usize,
    /// Number of thread heaps (ids 1..=threads)
    pub threads: usize,
}

impl Default for HoardConfig {
    fn default() -> Self {
        Self {
            log_min: 4,
            log_max: 8,
            page_size: 64,
            superblock_pages: 2,
            capacity: 1024,
            empty_ratio: 0.5,
            retain_threshold: 1,
            threads: 2,
        }
    }
}

impl HoardConfig {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = config::Config::try_from(&HoardConfig::default())
            .map_err(|e| Error::Config(format!("Failed to build defaults: {}", e)))?;

        let mut builder = config::Config::builder().add_source(defaults);
        if let Some(path) = path {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .try_parsing(true),
        );

        let config: HoardConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| Error::Config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string (missing keys take defaults)
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: HoardConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize configuration: {}", e)))
    }

    /// Superblock size in bytes
    pub fn block_size(&self) -> usize {
        self.page_size * self.superblock_pages
    }

    /// Size-class routing table
    pub fn size_classes(&self) -> SizeClassTable {
        SizeClassTable::new(self.log_min, self.log_max)
    }

    /// Hand-back policy for thread heaps
    pub fn release_policy(&self) -> ReleasePolicy {
        ReleasePolicy::new(self.empty_ratio, self.retain_threshold)
    }

    /// Reject settings the allocator cannot run with
    ///
    /// Size classes larger than the block size are not rejected here; they
    /// fail per request with [`Error::InvalidSizeClass`].
    pub fn validate(&self) -> Result<()> {
        if self.log_min > self.log_max {
            return Err(Error::Config(format!(
                "log_min ({}) must not exceed log_max ({})",
                self.log_min, self.log_max
            )));
        }
        if self.log_max > MAX_EXPONENT {
            return Err(Error::Config(format!(
                "log_max ({}) must be at most {}",
                self.log_max, MAX_EXPONENT
            )));
        }
        if self.page_size == 0 || self.superblock_pages == 0 {
            return Err(Error::Config(
                "page_size and superblock_pages must be non-zero".to_string(),
            ));
        }
        let block_size = self.block_size();
        if !block_size.is_power_of_two() {
            return Err(Error::Config(format!(
                "superblock size {} must be a power of two",
                block_size
            )));
        }
        if (1usize << self.log_min) > block_size {
            return Err(Error::Config(format!(
                "smallest size class ({} bytes) does not fit a {}-byte superblock",
                1usize << self.log_min,
                block_size
            )));
        }
        if self.capacity == 0 {
            return Err(Error::Config("capacity must be non-zero".to_string()));
        }
        if !(self.empty_ratio > 0.0 && self.empty_ratio <= 1.0) {
            return Err(Error::Config(format!(
                "empty_ratio ({}) must be in (0, 1]",
                self.empty_ratio
            )));
        }
        if self.threads == 0 {
            return Err(Error::Config("at least one thread heap is required".to_string()));
        }
        Ok(())
    }
}
