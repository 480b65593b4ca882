//! Hoard manager: routes requests to heaps and moves superblocks between them

use super::arena::Arena;
use super::heap::{Heap, Release, GLOBAL_HEAP};
use super::metrics;
use super::size_class::SizeClassTable;
use super::state::{ByteStatus, StateDump};
use super::stats::HoardStats;
use crate::config::HoardConfig;
use crate::error::{Error, Result};
use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// The allocator: thread heaps over a shared arena
///
/// Each thread heap has its own lock; the arena (address space, superblock
/// index, global heap) has one more. Locks are always taken thread heap
/// first, arena second, and superblock transfers happen with both held.
pub struct Hoard {
    config: HoardConfig,
    table: SizeClassTable,
    /// Thread heaps, `heaps[i]` has id `i + 1`
    heaps: Vec<Mutex<Heap>>,
    arena: Mutex<Arena>,
}

impl Hoard {
    /// Create an allocator with the given configuration
    pub fn new(config: HoardConfig) -> Result<Self> {
        config.validate()?;
        metrics::init_metrics();

        let table = config.size_classes();
        let policy = config.release_policy();
        let block_size = config.block_size();

        info!(
            "Initializing Hoard: {} thread heaps, {} size classes ({}..={} bytes), superblock {} bytes, capacity {} bytes",
            config.threads,
            table.len(),
            table.min_size(),
            table.max_size(),
            block_size,
            config.capacity
        );
        for class in table.unusable(block_size) {
            warn!(
                "Size class {} exceeds the {}-byte superblock; requests routed to it will fail",
                class, block_size
            );
        }

        let heaps = (1..=config.threads)
            .map(|id| Mutex::new(Heap::new(id, table, policy)))
            .collect();
        let arena = Mutex::new(Arena::new(config.capacity, block_size, table, policy));

        Ok(Self {
            config,
            table,
            heaps,
            arena,
        })
    }

    /// Create an allocator with the default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(HoardConfig::default())
    }

    /// Allocate `size` bytes for thread heap `heap`
    pub fn allocate(&self, heap: usize, size: usize) -> Result<usize> {
        let result = self.allocate_inner(heap, size);
        match &result {
            Ok(address) => {
                metrics::record_allocation(heap);
                debug!(heap, size, address, "malloc");
            }
            Err(e) => {
                metrics::record_error(e);
                debug!(heap, size, error = %e, "malloc failed");
            }
        }
        result
    }

    fn allocate_inner(&self, heap_id: usize, size: usize) -> Result<usize> {
        let mut heap = self.lock_heap(heap_id)?;
        if let Some(address) = heap.allocate(size)? {
            return Ok(address);
        }

        let class = self.table.classify(size)?;
        let mut arena = self.arena.lock();
        loop {
            let superblock = arena.acquire(class, heap_id)?;
            if let Some(address) = heap.adopt_superblock(superblock)? {
                return Ok(address);
            }
        }
    }

    /// Release `address`, previously returned by `allocate` for `heap`
    ///
    /// The slot goes back to whichever heap owns its superblock now, which
    /// differs from `heap` only if the superblock was handed back while the
    /// slot was live.
    pub fn release(&self, heap: usize, address: usize) -> Result<()> {
        let result = self.release_inner(heap, address);
        match &result {
            Ok(()) => {
                metrics::record_release(heap);
                debug!(heap, address, "free");
            }
            Err(e) => {
                metrics::record_error(e);
                debug!(heap, address, error = %e, "free failed");
            }
        }
        result
    }

    fn release_inner(&self, heap_id: usize, address: usize) -> Result<()> {
        self.heap_slot(heap_id)?;

        loop {
            let (base, entry) = self.arena.lock().resolve(address)?;

            if entry.owner == GLOBAL_HEAP {
                let mut arena = self.arena.lock();
                if arena.owner_of(base) != Some(GLOBAL_HEAP) {
                    continue;
                }
                arena.global_mut().release(address, base, entry.class)?;
                return Ok(());
            }

            let mut owner = self.lock_heap(entry.owner)?;
            if !owner.owns(base, entry.class) {
                // moved between lookup and lock
                continue;
            }
            if let Release::HandBack(superblock) = owner.release(address, base, entry.class)? {
                self.arena.lock().hand_back(superblock)?;
            }
            return Ok(());
        }
    }

    /// Fill `len` bytes at `address` with `fill`
    ///
    /// The allocator never reads these bytes; they exist for inspection.
    pub fn write(&self, address: usize, fill: u8, len: usize) -> Result<()> {
        self.arena.lock().space_mut().write(address, fill, len)
    }

    /// Status of every byte of the address space
    pub fn dump_state(&self) -> StateDump {
        let heaps: Vec<MutexGuard<'_, Heap>> = self.heaps.iter().map(|h| h.lock()).collect();
        let arena = self.arena.lock();
        let space = arena.space();

        let mut status = vec![ByteStatus::Unused; space.capacity()];
        let owned = heaps
            .iter()
            .flat_map(|h| h.superblocks())
            .chain(arena.global().superblocks());
        for superblock in owned {
            for address in superblock.base()..superblock.end() {
                status[address] = if superblock.is_free(address) {
                    ByteStatus::Freed
                } else {
                    ByteStatus::Live
                };
            }
        }

        StateDump {
            frontier: space.frontier(),
            bytes: space.bytes().to_vec(),
            status,
        }
    }

    /// Statistics for the global heap and every thread heap
    pub fn stats(&self) -> HoardStats {
        let heaps: Vec<MutexGuard<'_, Heap>> = self.heaps.iter().map(|h| h.lock()).collect();
        let arena = self.arena.lock();

        HoardStats {
            capacity: arena.space().capacity(),
            frontier: arena.space().frontier(),
            block_size: arena.block_size(),
            minted: arena.index().len(),
            heaps: std::iter::once(arena.global().stats())
                .chain(heaps.iter().map(|h| h.stats()))
                .collect(),
        }
    }

    /// Base addresses of the superblocks `heap` owns for the class serving `size`
    ///
    /// Heap `0` is the global heap. Bases are listed in bucket order.
    pub fn superblock_bases(&self, heap: usize, size: usize) -> Result<Vec<usize>> {
        let class = self.table.classify(size)?;
        let collect = |h: &Heap| -> Vec<usize> {
            h.bucket(class)
                .map(|b| b.iter().map(|sb| sb.base()).collect())
                .unwrap_or_default()
        };
        if heap == GLOBAL_HEAP {
            return Ok(collect(self.arena.lock().global()));
        }
        Ok(collect(&*self.lock_heap(heap)?))
    }

    /// (used, total) units of `heap`; heap `0` is the global heap
    pub fn units(&self, heap: usize) -> Result<(usize, usize)> {
        if heap == GLOBAL_HEAP {
            let arena = self.arena.lock();
            return Ok((arena.global().used_units(), arena.global().total_units()));
        }
        let heap = self.lock_heap(heap)?;
        Ok((heap.used_units(), heap.total_units()))
    }

    pub fn frontier(&self) -> usize {
        self.arena.lock().space().frontier()
    }

    pub fn config(&self) -> &HoardConfig {
        &self.config
    }

    pub fn size_classes(&self) -> SizeClassTable {
        self.table
    }

    /// Number of thread heaps
    pub fn threads(&self) -> usize {
        self.heaps.len()
    }

    fn heap_slot(&self, heap: usize) -> Result<&Mutex<Heap>> {
        heap.checked_sub(1)
            .and_then(|i| self.heaps.get(i))
            .ok_or(Error::UnknownHeap {
                heap,
                threads: self.heaps.len(),
            })
    }

    fn lock_heap(&self, heap: usize) -> Result<MutexGuard<'_, Heap>> {
        self.heap_slot(heap).map(|h| h.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hoard() -> Hoard {
        Hoard::with_defaults().expect("default config is valid")
    }

    #[test]
    fn test_allocate_mints_superblock() -> Result<()> {
        let hoard = hoard();
        assert_eq!(hoard.allocate(1, 16)?, 0);
        assert_eq!(hoard.frontier(), 128);
        assert_eq!(hoard.units(1)?, (1, 8));
        Ok(())
    }

    #[test]
    fn test_allocate_reuses_owned_superblock() -> Result<()> {
        let hoard = hoard();
        let a = hoard.allocate(1, 10)?;
        let b = hoard.allocate(1, 12)?;
        assert_eq!(b, a + 16);
        assert_eq!(hoard.frontier(), 128);
        Ok(())
    }

    #[test]
    fn test_heaps_get_separate_superblocks() -> Result<()> {
        let hoard = hoard();
        let a = hoard.allocate(1, 32)?;
        let b = hoard.allocate(2, 32)?;
        assert_eq!(a, 0);
        assert_eq!(b, 128);
        Ok(())
    }

    #[test]
    fn test_unknown_heaps_rejected() {
        let hoard = hoard();
        assert_eq!(
            hoard.allocate(GLOBAL_HEAP, 16),
            Err(Error::UnknownHeap { heap: 0, threads: 2 })
        );
        assert!(matches!(hoard.allocate(3, 16), Err(Error::UnknownHeap { .. })));
        assert!(matches!(hoard.release(0, 0), Err(Error::UnknownHeap { .. })));
    }

    #[test]
    fn test_size_too_large_mutates_nothing() {
        let hoard = hoard();
        assert!(matches!(hoard.allocate(1, 257), Err(Error::SizeTooLarge { .. })));
        assert_eq!(hoard.frontier(), 0);
    }

    #[test]
    fn test_oversized_class_fails_cleanly() {
        let hoard = hoard();
        assert_eq!(
            hoard.allocate(1, 200),
            Err(Error::InvalidSizeClass {
                slot_size: 256,
                block_size: 128
            })
        );
        assert_eq!(hoard.frontier(), 0);
        assert_eq!(hoard.units(1).unwrap(), (0, 0));
    }

    #[test]
    fn test_out_of_space() -> Result<()> {
        let hoard = Hoard::new(HoardConfig {
            capacity: 256,
            ..HoardConfig::default()
        })?;
        hoard.allocate(1, 128)?;
        hoard.allocate(1, 128)?;
        let err = hoard.allocate(1, 128).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace { .. }));
        // existing allocations unaffected
        assert_eq!(hoard.frontier(), 256);
        assert_eq!(hoard.units(1)?, (2, 2));
        Ok(())
    }

    #[test]
    fn test_release_errors() -> Result<()> {
        let hoard = hoard();
        let a = hoard.allocate(1, 16)?;

        assert!(matches!(hoard.release(1, 500), Err(Error::InvalidAddress { .. })));
        assert!(matches!(hoard.release(1, a + 1), Err(Error::InvalidAddress { .. })));
        assert!(matches!(hoard.release(1, a + 16), Err(Error::InvalidAddress { .. })));

        hoard.release(1, a)?;
        assert!(matches!(hoard.release(1, a), Err(Error::InvalidAddress { .. })));
        assert_eq!(hoard.units(1)?, (0, 8));
        Ok(())
    }

    #[test]
    fn test_write_and_dump() -> Result<()> {
        let hoard = hoard();
        let a = hoard.allocate(1, 16)?;
        hoard.write(a, b'1', 16)?;
        let b = hoard.allocate(1, 16)?;
        hoard.release(1, b)?;

        let dump = hoard.dump_state();
        assert_eq!(dump.frontier, 128);
        assert_eq!(&dump.bytes[a..a + 16], &[b'1'; 16]);
        assert_eq!(dump.status_at(a), Some(ByteStatus::Live));
        assert_eq!(dump.status_at(a + 15), Some(ByteStatus::Live));
        assert_eq!(dump.status_at(b), Some(ByteStatus::Freed));
        assert_eq!(dump.status_at(128), Some(ByteStatus::Unused));

        let summary = dump.summary();
        assert_eq!(summary.live, 16);
        assert_eq!(summary.freed, 112);
        assert_eq!(summary.unused, 1024 - 128);
        Ok(())
    }

    #[test]
    fn test_stats_snapshot() -> Result<()> {
        let hoard = hoard();
        hoard.allocate(1, 16)?;
        hoard.allocate(2, 64)?;
        let stats = hoard.stats();
        assert_eq!(stats.minted, 2);
        assert_eq!(stats.heaps.len(), 3);
        assert_eq!(stats.heaps[0].heap, GLOBAL_HEAP);
        assert_eq!(stats.heap(2).map(|h| h.total_units), Some(2));
        Ok(())
    }
}
