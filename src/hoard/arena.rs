//! Process-wide allocator state: address space, superblock index, global heap
//!
//! Everything here lives behind a single lock in [`Hoard`](super::Hoard).
//! Superblocks are minted from the address space but never returned to it;
//! once created they only move between heaps.

use super::heap::{Heap, ReleasePolicy, GLOBAL_HEAP};
use super::metrics;
use super::size_class::{SizeClass, SizeClassTable};
use super::superblock::Superblock;
use crate::error::{Error, Result};
use std::collections::HashMap;
use tracing::debug;

/// Fill byte for memory nobody has written
pub const EMPTY_BYTE: u8 = b'#';

/// A fixed-capacity byte buffer with a bump pointer
///
/// The bytes are only written by callers (for inspection); allocator
/// metadata never lives here.
#[derive(Debug)]
pub struct AddressSpace {
    bytes: Vec<u8>,
    frontier: usize,
}

impl AddressSpace {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![EMPTY_BYTE; capacity],
            frontier: 0,
        }
    }

    /// Claim the next `block_size` bytes, returning their start
    pub fn allocate_region(&mut self, block_size: usize) -> Result<usize> {
        let end = self
            .frontier
            .checked_add(block_size)
            .filter(|&end| end <= self.capacity())
            .ok_or(Error::OutOfSpace {
                requested: block_size,
                frontier: self.frontier,
                capacity: self.capacity(),
            })?;
        let base = self.frontier;
        self.frontier = end;
        Ok(base)
    }

    /// Overwrite `len` bytes at `address` with `fill`
    pub fn write(&mut self, address: usize, fill: u8, len: usize) -> Result<()> {
        let end = address
            .checked_add(len)
            .filter(|&end| end <= self.frontier)
            .ok_or_else(|| {
                Error::invalid_address(
                    address,
                    format!("write of {} bytes crosses the frontier at {}", len, self.frontier),
                )
            })?;
        self.bytes[address..end].fill(fill);
        Ok(())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn frontier(&self) -> usize {
        self.frontier
    }
}

/// Where a superblock is and who owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperblockEntry {
    pub class: SizeClass,
    pub owner: usize,
}

/// Maps superblock base addresses to their class and current owner
///
/// Entries are added when a superblock is minted and never removed.
#[derive(Debug)]
pub struct SuperblockIndex {
    block_size: usize,
    entries: HashMap<usize, SuperblockEntry>,
}

impl SuperblockIndex {
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size,
            entries: HashMap::new(),
        }
    }

    /// Start of the block containing `address`
    pub fn base_of(&self, address: usize) -> usize {
        (address / self.block_size) * self.block_size
    }

    pub fn register(&mut self, base: usize, class: SizeClass, owner: usize) {
        self.entries.insert(base, SuperblockEntry { class, owner });
    }

    /// Base and entry of the superblock containing `address`
    pub fn resolve(&self, address: usize) -> Option<(usize, SuperblockEntry)> {
        let base = self.base_of(address);
        self.entries.get(&base).map(|entry| (base, *entry))
    }

    pub fn set_owner(&mut self, base: usize, owner: usize) {
        if let Some(entry) = self.entries.get_mut(&base) {
            entry.owner = owner;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared allocator state guarded by one lock
#[derive(Debug)]
pub struct Arena {
    space: AddressSpace,
    index: SuperblockIndex,
    global: Heap,
    block_size: usize,
}

impl Arena {
    pub fn new(capacity: usize, block_size: usize, table: SizeClassTable, policy: ReleasePolicy) -> Self {
        Self {
            space: AddressSpace::new(capacity),
            index: SuperblockIndex::new(block_size),
            global: Heap::new(GLOBAL_HEAP, table, policy),
            block_size,
        }
    }

    /// Hand a superblock of `class` to heap `owner`
    ///
    /// Prefers the superblock most recently returned to the global heap;
    /// mints a new one at the frontier otherwise. Fails without touching
    /// the address space when `class` cannot fit a superblock.
    pub fn acquire(&mut self, class: SizeClass, owner: usize) -> Result<Superblock> {
        if let Some(superblock) = self.global.pop_superblock(class) {
            self.index.set_owner(superblock.base(), owner);
            metrics::SUPERBLOCKS_RECYCLED.inc();
            debug!(heap = owner, base = superblock.base(), class = %class, "Recycled superblock from global heap");
            return Ok(superblock);
        }

        Superblock::check_class(class, self.block_size)?;
        let base = self.space.allocate_region(self.block_size)?;
        let superblock = Superblock::new(class, base, self.block_size)?;
        self.index.register(base, class, owner);
        metrics::SUPERBLOCKS_MINTED.inc();
        debug!(heap = owner, base, class = %class, frontier = self.space.frontier(), "Minted superblock");
        Ok(superblock)
    }

    /// Move a superblock evicted from a thread heap into the global heap
    pub fn hand_back(&mut self, superblock: Superblock) -> Result<()> {
        let base = superblock.base();
        self.global.push_superblock(superblock)?;
        self.index.set_owner(base, GLOBAL_HEAP);
        metrics::HANDBACKS.inc();
        debug!(base, "Superblock handed back to global heap");
        Ok(())
    }

    /// Superblock containing `address`, if it is below the frontier and minted
    pub fn resolve(&self, address: usize) -> Result<(usize, SuperblockEntry)> {
        if address >= self.space.frontier() {
            return Err(Error::invalid_address(
                address,
                format!("beyond the frontier at {}", self.space.frontier()),
            ));
        }
        self.index
            .resolve(address)
            .ok_or_else(|| Error::invalid_address(address, "not inside any superblock"))
    }

    pub fn owner_of(&self, base: usize) -> Option<usize> {
        self.index.resolve(base).map(|(_, entry)| entry.owner)
    }

    pub fn space(&self) -> &AddressSpace {
        &self.space
    }

    pub fn space_mut(&mut self) -> &mut AddressSpace {
        &mut self.space
    }

    pub fn index(&self) -> &SuperblockIndex {
        &self.index
    }

    pub fn global(&self) -> &Heap {
        &self.global
    }

    pub fn global_mut(&mut self) -> &mut Heap {
        &mut self.global
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena(capacity: usize) -> Arena {
        Arena::new(capacity, 128, SizeClassTable::new(4, 8), ReleasePolicy::default())
    }

    #[test]
    fn test_region_bump_and_exhaustion() -> Result<()> {
        let mut space = AddressSpace::new(300);
        assert_eq!(space.allocate_region(128)?, 0);
        assert_eq!(space.allocate_region(128)?, 128);
        assert_eq!(space.frontier(), 256);

        let err = space.allocate_region(128).unwrap_err();
        assert_eq!(
            err,
            Error::OutOfSpace {
                requested: 128,
                frontier: 256,
                capacity: 300
            }
        );
        assert_eq!(space.frontier(), 256);
        Ok(())
    }

    #[test]
    fn test_write_stays_below_frontier() -> Result<()> {
        let mut space = AddressSpace::new(256);
        space.allocate_region(128)?;
        space.write(16, b'a', 16)?;
        assert_eq!(&space.bytes()[16..32], &[b'a'; 16]);
        assert_eq!(space.bytes()[32], EMPTY_BYTE);
        assert!(space.write(120, b'a', 16).is_err());
        Ok(())
    }

    #[test]
    fn test_index_resolves_interior_addresses() {
        let mut index = SuperblockIndex::new(128);
        index.register(128, SizeClass::new(4), 1);
        assert_eq!(index.base_of(200), 128);
        let (base, entry) = index.resolve(255).unwrap();
        assert_eq!(base, 128);
        assert_eq!(entry.owner, 1);
        assert!(index.resolve(300).is_none());

        index.set_owner(128, GLOBAL_HEAP);
        assert_eq!(index.resolve(130).unwrap().1.owner, GLOBAL_HEAP);
    }

    #[test]
    fn test_acquire_mints_then_recycles() -> Result<()> {
        let mut arena = arena(1024);
        let class = SizeClass::new(5);

        let minted = arena.acquire(class, 1)?;
        assert_eq!(minted.base(), 0);
        assert_eq!(arena.owner_of(0), Some(1));

        arena.hand_back(minted)?;
        assert_eq!(arena.owner_of(0), Some(GLOBAL_HEAP));
        assert_eq!(arena.global().superblock_count(), 1);

        let recycled = arena.acquire(class, 2)?;
        assert_eq!(recycled.base(), 0);
        assert_eq!(arena.owner_of(0), Some(2));
        assert_eq!(arena.space().frontier(), 128);
        assert_eq!(arena.global().superblock_count(), 0);
        Ok(())
    }

    #[test]
    fn test_acquire_oversized_class_consumes_nothing() {
        let mut arena = arena(1024);
        let err = arena.acquire(SizeClass::new(8), 1).unwrap_err();
        assert!(matches!(err, Error::InvalidSizeClass { .. }));
        assert_eq!(arena.space().frontier(), 0);
        assert!(arena.index().is_empty());
    }

    #[test]
    fn test_resolve_rejects_unminted_addresses() -> Result<()> {
        let mut arena = arena(1024);
        arena.acquire(SizeClass::new(4), 1)?;
        assert!(arena.resolve(100).is_ok());
        assert!(matches!(arena.resolve(128), Err(Error::InvalidAddress { .. })));
        Ok(())
    }
}
