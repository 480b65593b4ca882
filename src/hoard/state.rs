//! Per-byte view of the simulated address space

use serde::{Deserialize, Serialize};
use std::fmt::Write;

const GREEN: &str = "\x1B[32m";
const YELLOW: &str = "\x1B[33m";
const RED: &str = "\x1B[31m";
const RESET: &str = "\x1B[0m";

/// Status of one byte of the address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteStatus {
    /// Inside a slot that is currently handed out
    Live,
    /// Inside a superblock but in a free slot
    Freed,
    /// Beyond the frontier, never part of a superblock
    Unused,
}

impl ByteStatus {
    /// Glyph used when rendering without color
    pub fn glyph(&self) -> char {
        match self {
            ByteStatus::Live => 'x',
            ByteStatus::Freed => 'o',
            ByteStatus::Unused => '.',
        }
    }

    fn color(&self) -> &'static str {
        match self {
            ByteStatus::Live => GREEN,
            ByteStatus::Freed => YELLOW,
            ByteStatus::Unused => RED,
        }
    }
}

/// Snapshot of the address space contents and status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDump {
    pub frontier: usize,
    pub bytes: Vec<u8>,
    pub status: Vec<ByteStatus>,
}

/// Byte counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSummary {
    pub live: usize,
    pub freed: usize,
    pub unused: usize,
}

impl StateDump {
    pub fn status_at(&self, address: usize) -> Option<ByteStatus> {
        self.status.get(address).copied()
    }

    pub fn len(&self) -> usize {
        self.status.len()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
    }

    pub fn summary(&self) -> StateSummary {
        let mut summary = StateSummary::default();
        for status in &self.status {
            match status {
                ByteStatus::Live => summary.live += 1,
                ByteStatus::Freed => summary.freed += 1,
                ByteStatus::Unused => summary.unused += 1,
            }
        }
        summary
    }

    /// One character per byte, `width` bytes per line
    ///
    /// With color, each byte shows its stored content in green (live),
    /// yellow (freed) or red (unused). Without color, bytes are replaced by
    /// status glyphs.
    pub fn render(&self, color: bool, width: usize) -> String {
        let width = width.max(1);
        let mut out = String::with_capacity(self.len() * if color { 10 } else { 1 } + self.len() / width + 1);

        for (address, (&byte, status)) in self.bytes.iter().zip(&self.status).enumerate() {
            if address > 0 && address % width == 0 {
                out.push('\n');
            }
            if color {
                let shown = if byte.is_ascii_graphic() { byte as char } else { '?' };
                let _ = write!(out, "{}{}{}", status.color(), shown, RESET);
            } else {
                out.push(status.glyph());
            }
        }
        out.push('\n');
        out
    }
}
