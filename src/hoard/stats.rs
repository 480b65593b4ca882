//! Allocator statistics snapshots

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whole-allocator statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HoardStats {
    pub capacity: usize,
    pub frontier: usize,
    pub block_size: usize,
    /// Superblocks ever carved from the address space
    pub minted: usize,
    /// Global heap first, then thread heaps by id
    pub heaps: Vec<HeapStats>,
}

/// Statistics for one heap
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeapStats {
    pub heap: usize,
    pub superblocks: usize,
    pub used_units: usize,
    pub total_units: usize,
    pub utilization: f64,
    pub classes: Vec<ClassStats>,
}

/// Statistics for one occupied size class of a heap
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ClassStats {
    pub slot_size: usize,
    pub superblocks: usize,
    pub free_slots: usize,
    pub total_slots: usize,
}

impl HoardStats {
    pub fn heap(&self, id: usize) -> Option<&HeapStats> {
        self.heaps.iter().find(|h| h.heap == id)
    }
}

impl fmt::Display for HoardStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Address space: {}/{} bytes used, superblock size {}, {} minted",
            self.frontier, self.capacity, self.block_size, self.minted
        )?;
        writeln!(f, "───────────────────────────────────────────────")?;
        for heap in &self.heaps {
            let name = if heap.heap == 0 {
                "global".to_string()
            } else {
                format!("heap {}", heap.heap)
            };
            writeln!(
                f,
                "{:<8} superblocks={:<3} used={}/{} ({:.0}%)",
                name,
                heap.superblocks,
                heap.used_units,
                heap.total_units,
                heap.utilization * 100.0
            )?;
            for class in &heap.classes {
                writeln!(
                    f,
                    "  • {:>5}B  superblocks={:<3} free={}/{}",
                    class.slot_size, class.superblocks, class.free_slots, class.total_slots
                )?;
            }
        }
        Ok(())
    }
}
