//! Size-class buckets: the superblocks of one class owned by one heap

use super::size_class::SizeClass;
use super::superblock::Superblock;

/// Superblocks of a single size class owned by one heap
///
/// Membership order matters: lookups scan oldest first, and the global
/// heap recycles the most recently pushed superblock first.
#[derive(Debug)]
pub struct Bucket {
    class: SizeClass,
    superblocks: Vec<Superblock>,
}

impl Bucket {
    pub fn new(class: SizeClass) -> Self {
        Self {
            class,
            superblocks: Vec::new(),
        }
    }

    /// Take a slot from the first superblock that has one
    pub fn find_free_slot(&mut self) -> Option<usize> {
        self.superblocks.iter_mut().find_map(|sb| sb.take_slot())
    }

    /// Add a superblock and immediately take a slot from it
    ///
    /// Returns `None` only when the superblock arrives with no free slot;
    /// it is kept either way.
    pub fn adopt(&mut self, superblock: Superblock) -> Option<usize> {
        debug_assert_eq!(superblock.class(), self.class);
        self.superblocks.push(superblock);
        self.superblocks.last_mut().and_then(|sb| sb.take_slot())
    }

    /// Add a superblock without taking a slot
    pub fn push(&mut self, superblock: Superblock) {
        debug_assert_eq!(superblock.class(), self.class);
        self.superblocks.push(superblock);
    }

    /// Remove the most recently added superblock
    pub fn pop(&mut self) -> Option<Superblock> {
        self.superblocks.pop()
    }

    /// Remove the superblock based at `base`
    pub fn evict(&mut self, base: usize) -> Option<Superblock> {
        let position = self.superblocks.iter().position(|sb| sb.base() == base)?;
        Some(self.superblocks.remove(position))
    }

    pub fn get(&self, base: usize) -> Option<&Superblock> {
        self.superblocks.iter().find(|sb| sb.base() == base)
    }

    pub fn get_mut(&mut self, base: usize) -> Option<&mut Superblock> {
        self.superblocks.iter_mut().find(|sb| sb.base() == base)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Superblock> {
        self.superblocks.iter()
    }

    pub fn class(&self) -> SizeClass {
        self.class
    }

    pub fn len(&self) -> usize {
        self.superblocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.superblocks.is_empty()
    }

    /// Free slots across all superblocks
    pub fn free_slots(&self) -> usize {
        self.superblocks.iter().map(|sb| sb.free_count()).sum()
    }

    /// Total slots across all superblocks
    pub fn total_slots(&self) -> usize {
        self.superblocks.iter().map(|sb| sb.capacity()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;

    const BLOCK: usize = 128;

    fn superblock(base: usize) -> Result<Superblock> {
        Superblock::new(SizeClass::new(5), base, BLOCK)
    }

    #[test]
    fn test_empty_bucket_has_no_slot() {
        let mut bucket = Bucket::new(SizeClass::new(5));
        assert_eq!(bucket.find_free_slot(), None);
        assert!(bucket.is_empty());
    }

    #[test]
    fn test_adopt_grants_first_slot() -> Result<()> {
        let mut bucket = Bucket::new(SizeClass::new(5));
        assert_eq!(bucket.adopt(superblock(256)?), Some(256));
        assert_eq!(bucket.find_free_slot(), Some(288));
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.free_slots(), 2);
        assert_eq!(bucket.total_slots(), 4);
        Ok(())
    }

    #[test]
    fn test_find_scans_in_membership_order() -> Result<()> {
        let mut bucket = Bucket::new(SizeClass::new(5));
        bucket.push(superblock(0)?);
        bucket.push(superblock(128)?);

        // first superblock drains before the second is touched
        for expected in [0, 32, 64, 96, 128] {
            assert_eq!(bucket.find_free_slot(), Some(expected));
        }
        Ok(())
    }

    #[test]
    fn test_pop_is_lifo() -> Result<()> {
        let mut bucket = Bucket::new(SizeClass::new(5));
        bucket.push(superblock(0)?);
        bucket.push(superblock(384)?);
        assert_eq!(bucket.pop().map(|sb| sb.base()), Some(384));
        assert_eq!(bucket.pop().map(|sb| sb.base()), Some(0));
        assert!(bucket.pop().is_none());
        Ok(())
    }

    #[test]
    fn test_evict_by_base() -> Result<()> {
        let mut bucket = Bucket::new(SizeClass::new(5));
        bucket.push(superblock(0)?);
        bucket.push(superblock(128)?);
        bucket.push(superblock(256)?);

        let evicted = bucket.evict(128).expect("superblock at 128");
        assert_eq!(evicted.base(), 128);
        assert!(bucket.get(128).is_none());
        assert!(bucket.evict(128).is_none());

        let order: Vec<usize> = bucket.iter().map(|sb| sb.base()).collect();
        assert_eq!(order, vec![0, 256]);
        Ok(())
    }
}
