//! Size class routing for the Hoard allocator

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A power-of-two slot size, identified by its exponent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SizeClass {
    exponent: u32,
}

impl SizeClass {
    /// Create the size class for slots of `2^exponent` bytes
    pub fn new(exponent: u32) -> Self {
        Self { exponent }
    }

    /// Exponent of this size class
    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    /// Slot size in bytes
    pub fn slot_size(&self) -> usize {
        1usize << self.exponent
    }

    /// Number of slots a superblock of `block_size` bytes holds
    pub fn slots_per_block(&self, block_size: usize) -> usize {
        block_size / self.slot_size()
    }

    /// Check if a given size fits in this size class
    pub fn can_fit(&self, size: usize) -> bool {
        size <= self.slot_size()
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}B", self.slot_size())
    }
}

/// The configured range of size classes, `2^log_min ..= 2^log_max`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeClassTable {
    log_min: u32,
    log_max: u32,
}

impl SizeClassTable {
    pub fn new(log_min: u32, log_max: u32) -> Self {
        Self { log_min, log_max }
    }

    /// Smallest class whose slots hold `size` bytes
    ///
    /// Sizes up to the smallest class (including zero) round up to it.
    pub fn classify(&self, size: usize) -> Result<SizeClass> {
        if size > self.max_size() {
            return Err(Error::SizeTooLarge {
                size,
                max: self.max_size(),
            });
        }
        let exponent = size.next_power_of_two().trailing_zeros().max(self.log_min);
        Ok(SizeClass::new(exponent))
    }

    /// Position of `class` in the table
    pub fn index_of(&self, class: SizeClass) -> Option<usize> {
        if class.exponent() < self.log_min || class.exponent() > self.log_max {
            return None;
        }
        Some((class.exponent() - self.log_min) as usize)
    }

    /// All classes, smallest first
    pub fn classes(&self) -> impl Iterator<Item = SizeClass> {
        (self.log_min..=self.log_max).map(SizeClass::new)
    }

    /// Classes whose slots are larger than a superblock and can never be served
    pub fn unusable(&self, block_size: usize) -> Vec<SizeClass> {
        self.classes()
            .filter(|class| class.slot_size() > block_size)
            .collect()
    }

    pub fn len(&self) -> usize {
        (self.log_max + 1).saturating_sub(self.log_min) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.log_min > self.log_max
    }

    /// Largest request size the table routes
    pub fn max_size(&self) -> usize {
        1usize << self.log_max
    }

    pub fn min_size(&self) -> usize {
        1usize << self.log_min
    }
}
