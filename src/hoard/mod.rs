//! Hoard Allocator
//!
//! Segregated-fit allocator over a simulated address space. Each thread heap
//! serves requests from power-of-two size classes, each backed by fixed-size
//! superblocks. A distinguished global heap (id 0) collects under-used
//! superblocks from thread heaps and hands them to whichever heap runs dry
//! next, which bounds blowup without ever returning memory to the address
//! space.
//!
//! # Architecture
//!
//! ```text
//! Hoard
//!   ├─→ Heap 1  (Mutex)
//!   │     ├─→ Bucket(16B)  → [SB@0: free 32,48,..] [SB@256: free ..]
//!   │     └─→ Bucket(32B)  → [SB@128]
//!   ├─→ Heap 2  (Mutex)
//!   │     └─→ Bucket(16B)  → []
//!   └─→ Arena   (Mutex)
//!         ├─→ AddressSpace     → bytes[capacity], frontier
//!         ├─→ SuperblockIndex  → base → (class, owner)
//!         └─→ Global heap (0)  → Bucket(32B) → [SB@384]
//! ```
//!
//! Allocation tries the thread heap first. On a miss the manager pulls the
//! most recently handed-back superblock of that class from the global heap,
//! or mints a fresh one at the address-space frontier.
//!
//! Release resolves the superblock by rounding the address down to a block
//! boundary, frees the slot in whichever heap currently owns it, and moves
//! the superblock to the global heap when the owner's aggregate utilization
//! falls below the empty ratio and it holds more superblocks than the
//! retain threshold.

pub mod arena;
pub mod bucket;
pub mod heap;
pub mod manager;
pub mod metrics;
pub mod script;
pub mod size_class;
pub mod state;
pub mod stats;
pub mod superblock;

pub use arena::{AddressSpace, Arena, SuperblockEntry, SuperblockIndex, EMPTY_BYTE};
pub use bucket::Bucket;
pub use heap::{Heap, Release, ReleasePolicy, GLOBAL_HEAP};
pub use manager::Hoard;
pub use script::{run_script, Command, StepOutcome, PRELIM_SCENARIO};
pub use size_class::{SizeClass, SizeClassTable};
pub use state::{ByteStatus, StateDump, StateSummary};
pub use stats::{ClassStats, HeapStats, HoardStats};
pub use superblock::Superblock;
