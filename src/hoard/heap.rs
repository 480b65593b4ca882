//! Heaps: one per thread plus the global heap

use super::bucket::Bucket;
use super::size_class::{SizeClass, SizeClassTable};
use super::stats::{ClassStats, HeapStats};
use super::superblock::Superblock;
use crate::error::{Error, Result};
use tracing::debug;

/// Id of the global heap
pub const GLOBAL_HEAP: usize = 0;

/// When a thread heap gives a superblock back to the global heap
///
/// Utilization is aggregated over every size class in the heap, not
/// tracked per class. A nearly full superblock of one class can be handed
/// back because another class in the same heap is mostly free.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReleasePolicy {
    /// Hand back when used/total falls below this
    pub empty_ratio: f64,
    /// ...and the heap owns more superblocks than this
    pub retain_threshold: usize,
}

impl ReleasePolicy {
    pub fn new(empty_ratio: f64, retain_threshold: usize) -> Self {
        Self {
            empty_ratio,
            retain_threshold,
        }
    }

    pub fn should_release(&self, used_units: usize, total_units: usize, superblocks: usize) -> bool {
        if total_units == 0 {
            return false;
        }
        let utilization = used_units as f64 / total_units as f64;
        utilization < self.empty_ratio && superblocks > self.retain_threshold
    }
}

impl Default for ReleasePolicy {
    fn default() -> Self {
        Self::new(0.5, 1)
    }
}

/// Outcome of freeing a slot into a heap
#[derive(Debug)]
pub enum Release {
    /// The superblock stays with the heap
    Kept,
    /// The superblock was evicted and must go to the global heap
    HandBack(Superblock),
}

/// A heap owning one bucket per size class
#[derive(Debug)]
pub struct Heap {
    id: usize,
    table: SizeClassTable,
    buckets: Vec<Bucket>,
    policy: ReleasePolicy,
    /// Slots across all owned superblocks
    total_units: usize,
    /// Slots currently handed out from owned superblocks
    used_units: usize,
    superblocks: usize,
}

impl Heap {
    pub fn new(id: usize, table: SizeClassTable, policy: ReleasePolicy) -> Self {
        Self {
            id,
            table,
            buckets: table.classes().map(Bucket::new).collect(),
            policy,
            total_units: 0,
            used_units: 0,
            superblocks: 0,
        }
    }

    /// Serve `size` bytes from an owned superblock
    ///
    /// `Ok(None)` means every superblock of the class is full and the heap
    /// needs a new one.
    pub fn allocate(&mut self, size: usize) -> Result<Option<usize>> {
        let class = self.table.classify(size)?;
        let address = self.bucket_mut(class)?.find_free_slot();
        if let Some(address) = address {
            self.used_units += 1;
            debug!(heap = self.id, address, class = %class, "Allocated from owned superblock");
        }
        Ok(address)
    }

    /// Take ownership of a superblock and grant its first free slot
    pub fn adopt_superblock(&mut self, superblock: Superblock) -> Result<Option<usize>> {
        let class = superblock.class();
        let (units, live) = (superblock.capacity(), superblock.live_count());
        let address = self.bucket_mut(class)?.adopt(superblock);

        self.superblocks += 1;
        self.total_units += units;
        self.used_units += live + usize::from(address.is_some());
        Ok(address)
    }

    /// Take ownership of a superblock without granting a slot
    pub fn push_superblock(&mut self, superblock: Superblock) -> Result<()> {
        let class = superblock.class();
        let (units, live) = (superblock.capacity(), superblock.live_count());
        self.bucket_mut(class)?.push(superblock);

        self.superblocks += 1;
        self.total_units += units;
        self.used_units += live;
        Ok(())
    }

    /// Give up the most recently added superblock of `class`
    pub fn pop_superblock(&mut self, class: SizeClass) -> Option<Superblock> {
        let superblock = self.bucket_mut(class).ok()?.pop()?;
        self.forget(&superblock);
        Some(superblock)
    }

    /// Free `address`, which lies in the owned superblock based at `base`
    ///
    /// Thread heaps then check the release policy; the global heap never
    /// hands back.
    pub fn release(&mut self, address: usize, base: usize, class: SizeClass) -> Result<Release> {
        let id = self.id;
        let superblock = self
            .bucket_mut(class)?
            .get_mut(base)
            .ok_or_else(|| Error::invalid_address(address, format!("not owned by heap {}", id)))?;
        superblock.give_slot(address)?;
        self.used_units -= 1;
        debug!(heap = id, address, class = %class, "Released slot");

        if id == GLOBAL_HEAP
            || !self
                .policy
                .should_release(self.used_units, self.total_units, self.superblocks)
        {
            return Ok(Release::Kept);
        }

        match self.bucket_mut(class)?.evict(base) {
            Some(superblock) => {
                self.forget(&superblock);
                debug!(
                    heap = id,
                    base,
                    used = self.used_units,
                    total = self.total_units,
                    "Utilization below threshold, handing superblock back"
                );
                Ok(Release::HandBack(superblock))
            }
            None => Ok(Release::Kept),
        }
    }

    /// Drop a departing superblock from the counters
    fn forget(&mut self, superblock: &Superblock) {
        self.superblocks -= 1;
        self.total_units -= superblock.capacity();
        self.used_units -= superblock.live_count();
    }

    /// Whether this heap owns the superblock based at `base`
    pub fn owns(&self, base: usize, class: SizeClass) -> bool {
        self.bucket(class).and_then(|b| b.get(base)).is_some()
    }

    pub fn bucket(&self, class: SizeClass) -> Option<&Bucket> {
        self.table.index_of(class).map(|i| &self.buckets[i])
    }

    fn bucket_mut(&mut self, class: SizeClass) -> Result<&mut Bucket> {
        let index = self.table.index_of(class).ok_or(Error::SizeTooLarge {
            size: class.slot_size(),
            max: self.table.max_size(),
        })?;
        Ok(&mut self.buckets[index])
    }

    pub fn buckets(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// Every owned superblock
    pub fn superblocks(&self) -> impl Iterator<Item = &Superblock> {
        self.buckets.iter().flat_map(|b| b.iter())
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_global(&self) -> bool {
        self.id == GLOBAL_HEAP
    }

    pub fn used_units(&self) -> usize {
        self.used_units
    }

    pub fn total_units(&self) -> usize {
        self.total_units
    }

    pub fn superblock_count(&self) -> usize {
        self.superblocks
    }

    /// used/total, zero for a heap with no superblocks
    pub fn utilization(&self) -> f64 {
        if self.total_units == 0 {
            0.0
        } else {
            self.used_units as f64 / self.total_units as f64
        }
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            heap: self.id,
            superblocks: self.superblocks,
            used_units: self.used_units,
            total_units: self.total_units,
            utilization: self.utilization(),
            classes: self
                .buckets
                .iter()
                .filter(|b| !b.is_empty())
                .map(|b| ClassStats {
                    slot_size: b.class().slot_size(),
                    superblocks: b.len(),
                    free_slots: b.free_slots(),
                    total_slots: b.total_slots(),
                })
                .collect(),
        }
    }
}
