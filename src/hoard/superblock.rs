//! Superblocks: fixed-size regions carved into equal slots of one size class

use super::size_class::SizeClass;
use crate::error::{Error, Result};
use std::fmt;

/// A fixed-size block subdivided into slots of one size class
///
/// Free slots form a stack: the most recently freed slot is handed out
/// first. A per-slot bitmap mirrors the stack so "is this address free"
/// is answered without walking it.
#[derive(Debug, Clone)]
pub struct Superblock {
    class: SizeClass,
    base: usize,
    block_size: usize,
    /// Free slot addresses, top of stack last
    free_slots: Vec<usize>,
    /// Free flag per slot index
    free_map: Vec<bool>,
}

impl Superblock {
    /// Check that `class` can be carved out of a `block_size`-byte superblock
    pub fn check_class(class: SizeClass, block_size: usize) -> Result<()> {
        if !block_size.is_power_of_two() || class.slot_size() > block_size {
            return Err(Error::InvalidSizeClass {
                slot_size: class.slot_size(),
                block_size,
            });
        }
        Ok(())
    }

    /// Create a fully free superblock at `base`
    ///
    /// Slots are stacked highest address first, so the first slot handed
    /// out is the one at `base`.
    pub fn new(class: SizeClass, base: usize, block_size: usize) -> Result<Self> {
        Self::check_class(class, block_size)?;
        if base % block_size != 0 {
            return Err(Error::invalid_address(
                base,
                format!("superblock base is not aligned to {} bytes", block_size),
            ));
        }

        let slot_size = class.slot_size();
        let slots = class.slots_per_block(block_size);
        let free_slots = (0..slots).rev().map(|i| base + i * slot_size).collect();

        Ok(Self {
            class,
            base,
            block_size,
            free_slots,
            free_map: vec![true; slots],
        })
    }

    /// Pop the most recently freed slot
    pub fn take_slot(&mut self) -> Option<usize> {
        let address = self.free_slots.pop()?;
        let index = self.slot_index(address);
        self.free_map[index] = false;
        Some(address)
    }

    /// Return a slot to the free stack
    ///
    /// Rejects addresses outside this superblock, addresses that are not a
    /// slot start, and slots that are already free.
    pub fn give_slot(&mut self, address: usize) -> Result<()> {
        if !self.contains(address) {
            return Err(Error::invalid_address(
                address,
                format!("outside superblock {}", self),
            ));
        }
        if (address - self.base) % self.slot_size() != 0 {
            return Err(Error::invalid_address(
                address,
                format!("not the start of a {} slot", self.class),
            ));
        }
        let index = self.slot_index(address);
        if self.free_map[index] {
            return Err(Error::invalid_address(address, "slot is already free"));
        }
        self.free_map[index] = true;
        self.free_slots.push(address);
        Ok(())
    }

    /// Whether the slot covering `address` is currently free
    pub fn is_free(&self, address: usize) -> bool {
        self.contains(address) && self.free_map[self.slot_index(address)]
    }

    pub fn contains(&self, address: usize) -> bool {
        address >= self.base && address < self.end()
    }

    fn slot_index(&self, address: usize) -> usize {
        (address - self.base) / self.slot_size()
    }

    pub fn class(&self) -> SizeClass {
        self.class
    }

    pub fn slot_size(&self) -> usize {
        self.class.slot_size()
    }

    pub fn base(&self) -> usize {
        self.base
    }

    /// One past the last byte
    pub fn end(&self) -> usize {
        self.base + self.block_size
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.free_map.len()
    }

    pub fn free_count(&self) -> usize {
        self.free_slots.len()
    }

    /// Slots currently handed out
    pub fn live_count(&self) -> usize {
        self.capacity() - self.free_count()
    }

    /// No free slot left
    pub fn is_full(&self) -> bool {
        self.free_slots.is_empty()
    }

    /// Every slot free
    pub fn is_unused(&self) -> bool {
        self.live_count() == 0
    }
}

impl fmt::Display for Superblock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Superblock(base={}, class={}, free={}/{})",
            self.base,
            self.class,
            self.free_count(),
            self.capacity()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_superblock_is_fully_free() -> Result<()> {
        let sb = Superblock::new(SizeClass::new(4), 128, 128)?;
        assert_eq!(sb.capacity(), 8);
        assert_eq!(sb.free_count(), 8);
        assert!(sb.is_unused());
        assert!(sb.is_free(128));
        assert!(sb.is_free(255));
        assert!(!sb.is_free(256));
        Ok(())
    }

    #[test]
    fn test_take_slot_lowest_first() -> Result<()> {
        let mut sb = Superblock::new(SizeClass::new(5), 256, 128)?;
        assert_eq!(sb.take_slot(), Some(256));
        assert_eq!(sb.take_slot(), Some(288));
        assert_eq!(sb.take_slot(), Some(320));
        assert_eq!(sb.take_slot(), Some(352));
        assert_eq!(sb.take_slot(), None);
        assert!(sb.is_full());
        Ok(())
    }

    #[test]
    fn test_lifo_reuse() -> Result<()> {
        let mut sb = Superblock::new(SizeClass::new(4), 0, 128)?;
        let a = sb.take_slot().unwrap();
        let b = sb.take_slot().unwrap();
        let _c = sb.take_slot().unwrap();

        sb.give_slot(a)?;
        sb.give_slot(b)?;

        // Most recently freed comes back first
        assert_eq!(sb.take_slot(), Some(b));
        assert_eq!(sb.take_slot(), Some(a));
        Ok(())
    }

    #[test]
    fn test_is_free_covers_whole_slot() -> Result<()> {
        let mut sb = Superblock::new(SizeClass::new(5), 0, 128)?;
        let addr = sb.take_slot().unwrap();
        for byte in addr..addr + 32 {
            assert!(!sb.is_free(byte));
        }
        assert!(sb.is_free(addr + 32));
        sb.give_slot(addr)?;
        assert!(sb.is_free(addr + 31));
        Ok(())
    }

    #[test]
    fn test_give_slot_rejects_bad_addresses() -> Result<()> {
        let mut sb = Superblock::new(SizeClass::new(4), 128, 128)?;
        let addr = sb.take_slot().unwrap();

        // outside
        assert!(matches!(sb.give_slot(0), Err(Error::InvalidAddress { .. })));
        // misaligned
        assert!(matches!(sb.give_slot(addr + 3), Err(Error::InvalidAddress { .. })));
        // never handed out
        assert!(matches!(sb.give_slot(addr + 16), Err(Error::InvalidAddress { .. })));

        sb.give_slot(addr)?;
        // double free
        assert!(matches!(sb.give_slot(addr), Err(Error::InvalidAddress { .. })));
        assert_eq!(sb.free_count(), 8);
        Ok(())
    }

    #[test]
    fn test_oversized_class_rejected() {
        let err = Superblock::new(SizeClass::new(8), 0, 128).unwrap_err();
        assert_eq!(
            err,
            Error::InvalidSizeClass {
                slot_size: 256,
                block_size: 128
            }
        );
    }

    #[test]
    fn test_misaligned_base_rejected() {
        assert!(matches!(
            Superblock::new(SizeClass::new(4), 64, 128),
            Err(Error::InvalidAddress { .. })
        ));
    }
}
