// hoardsim - Simulated Hoard Allocator
// Per-thread heaps over a shared global heap of recyclable superblocks

#![warn(rust_2018_idioms)]

pub mod config;
pub mod hoard;

// Re-exports for convenience
pub use config::HoardConfig;
pub use hoard::{ByteStatus, Hoard, HoardStats, StateDump, GLOBAL_HEAP};

/// hoardsim error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq)]
    pub enum Error {
        #[error("Size too large: {size} bytes exceeds largest size class ({max} bytes)")]
        SizeTooLarge { size: usize, max: usize },

        #[error(
            "Out of space: superblock of {requested} bytes at frontier {frontier} exceeds capacity {capacity}"
        )]
        OutOfSpace {
            requested: usize,
            frontier: usize,
            capacity: usize,
        },

        #[error("Invalid address {address}: {reason}")]
        InvalidAddress { address: usize, reason: String },

        #[error("Invalid size class: slot size {slot_size} does not fit a {block_size}-byte superblock")]
        InvalidSizeClass { slot_size: usize, block_size: usize },

        #[error("Unknown heap {heap}: thread heaps are numbered 1..={threads}")]
        UnknownHeap { heap: usize, threads: usize },

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("Parse error: {0}")]
        Parse(String),
    }

    impl Error {
        /// Short label used for metrics and log fields
        pub fn kind(&self) -> &'static str {
            match self {
                Error::SizeTooLarge { .. } => "size_too_large",
                Error::OutOfSpace { .. } => "out_of_space",
                Error::InvalidAddress { .. } => "invalid_address",
                Error::InvalidSizeClass { .. } => "invalid_size_class",
                Error::UnknownHeap { .. } => "unknown_heap",
                Error::Config(_) => "config",
                Error::Parse(_) => "parse",
            }
        }

        pub(crate) fn invalid_address(address: usize, reason: impl Into<String>) -> Self {
            Error::InvalidAddress {
                address,
                reason: reason.into(),
            }
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
