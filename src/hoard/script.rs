//! Command scripts for driving the allocator by hand
//!
//! One command per line; blank lines and `#` comments are skipped.
//!
//! ```text
//! thread 2          switch the current thread heap
//! malloc 16 a       allocate 16 bytes, fill them with 'a'
//! free 128          release address 128
//! print             show the address space
//! ?                 help
//! quit              stop
//! ```

use super::manager::Hoard;
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Two-thread smoke test with the default configuration
///
/// Addresses are deterministic: 16-byte slots come from the superblock at
/// 0, the first 32-byte superblock is minted at 128.
pub const PRELIM_SCENARIO: &str = "\
# thread 1 takes three 16-byte chunks and one 32-byte chunk
thread 1
malloc 16 1
malloc 16 1
malloc 16 1
malloc 32 1
# heap 1 is at 3/12 with two superblocks: the 32-byte one goes global
free 128
# one superblock left, nothing moves
free 0
# thread 2 picks up the recycled 32-byte superblock
thread 2
malloc 32 2
# thread 1 needs a fresh 32-byte superblock
thread 1
malloc 32 1
# 2/12 again: the 16-byte superblock goes global with 32 still live
free 16
# thread 2 adopts it and shares it with thread 1's live slot
thread 2
malloc 16 2
";

const HELP: &str = "\
Valid commands:
* malloc (size) [char]
\tAllocate from the current thread heap, optionally fill with char
* free (addr)
\tFree an address returned by malloc
* thread (id)
\tSwitch the current thread heap
* print
\tShow the memory
* ?
\tPrint this help
* exit | quit | q
\tQuit";

/// One parsed command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Malloc { size: usize, fill: Option<u8> },
    Free { address: usize },
    Thread { heap: usize },
    Print,
    Help,
    Quit,
}

impl Command {
    pub fn help() -> &'static str {
        HELP
    }
}

impl FromStr for Command {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace();
        let word = parts
            .next()
            .ok_or_else(|| Error::Parse("empty command".to_string()))?;
        let args: Vec<&str> = parts.collect();

        let command = match (word, args.as_slice()) {
            ("malloc", [size]) => Command::Malloc {
                size: number(size)?,
                fill: None,
            },
            ("malloc", [size, fill]) => Command::Malloc {
                size: number(size)?,
                fill: Some(fill.as_bytes()[0]),
            },
            ("free", [address]) => Command::Free {
                address: number(address)?,
            },
            ("thread", [heap]) => Command::Thread {
                heap: number(heap)?,
            },
            ("print", []) => Command::Print,
            ("?" | "help", []) => Command::Help,
            ("exit" | "quit" | "q", []) => Command::Quit,
            _ => {
                return Err(Error::Parse(format!(
                    "invalid command '{}', type ? for help",
                    line.trim()
                )))
            }
        };
        Ok(command)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Malloc { size, fill: None } => write!(f, "malloc {}", size),
            Command::Malloc {
                size,
                fill: Some(c),
            } => write!(f, "malloc {} {}", size, *c as char),
            Command::Free { address } => write!(f, "free {}", address),
            Command::Thread { heap } => write!(f, "thread {}", heap),
            Command::Print => write!(f, "print"),
            Command::Help => write!(f, "?"),
            Command::Quit => write!(f, "quit"),
        }
    }
}

fn number(token: &str) -> Result<usize> {
    token
        .parse()
        .map_err(|_| Error::Parse(format!("expected a number, got '{}'", token)))
}

/// What executing one command did
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    Allocated { heap: usize, size: usize, address: usize },
    Released { heap: usize, address: usize },
    Switched { heap: usize },
    Print,
    Help,
    Quit,
    Failed { line: String, error: Error },
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed { .. })
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Allocated {
                heap,
                size,
                address,
            } => write!(f, "[heap {}] malloc({}) = {}", heap, size, address),
            StepOutcome::Released { heap, address } => {
                write!(f, "[heap {}] free({})", heap, address)
            }
            StepOutcome::Switched { heap } => write!(f, "now on heap {}", heap),
            StepOutcome::Print => write!(f, "print"),
            StepOutcome::Help => write!(f, "{}", HELP),
            StepOutcome::Quit => write!(f, "bye"),
            StepOutcome::Failed { line, error } => write!(f, "'{}' failed: {}", line, error),
        }
    }
}

/// A command-driven session on one allocator
pub struct Session<'a> {
    hoard: &'a Hoard,
    heap: usize,
}

impl<'a> Session<'a> {
    /// Start on thread heap 1
    pub fn new(hoard: &'a Hoard) -> Self {
        Self { hoard, heap: 1 }
    }

    pub fn heap(&self) -> usize {
        self.heap
    }

    /// Parse and execute one line; `None` for blank lines and comments
    pub fn execute_line(&mut self, line: &str) -> Option<StepOutcome> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let outcome = trimmed
            .parse::<Command>()
            .and_then(|command| self.execute(&command));
        Some(outcome.unwrap_or_else(|error| StepOutcome::Failed {
            line: trimmed.to_string(),
            error,
        }))
    }

    /// Execute one command
    pub fn execute(&mut self, command: &Command) -> Result<StepOutcome> {
        match *command {
            Command::Malloc { size, fill } => {
                let address = self.hoard.allocate(self.heap, size)?;
                if let Some(fill) = fill {
                    self.hoard.write(address, fill, size)?;
                }
                Ok(StepOutcome::Allocated {
                    heap: self.heap,
                    size,
                    address,
                })
            }
            Command::Free { address } => {
                self.hoard.release(self.heap, address)?;
                Ok(StepOutcome::Released {
                    heap: self.heap,
                    address,
                })
            }
            Command::Thread { heap } => {
                if heap == 0 || heap > self.hoard.threads() {
                    return Err(Error::UnknownHeap {
                        heap,
                        threads: self.hoard.threads(),
                    });
                }
                self.heap = heap;
                Ok(StepOutcome::Switched { heap })
            }
            Command::Print => Ok(StepOutcome::Print),
            Command::Help => Ok(StepOutcome::Help),
            Command::Quit => Ok(StepOutcome::Quit),
        }
    }
}

/// Run every line of `script`, stopping after `quit`
///
/// Failures are recorded and do not stop the script.
pub fn run_script(hoard: &Hoard, script: &str) -> Vec<StepOutcome> {
    let mut session = Session::new(hoard);
    let mut outcomes = Vec::new();
    for line in script.lines() {
        if let Some(outcome) = session.execute_line(line) {
            let quit = outcome == StepOutcome::Quit;
            outcomes.push(outcome);
            if quit {
                break;
            }
        }
    }
    outcomes
}
