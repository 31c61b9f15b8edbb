//! # Error Taxonomy
//!
//! Every failure the unlock pipeline can surface, in one enum. All of
//! them are fatal for the current invocation; the tool never retries.

use core::fmt;
use std::io;

/// Which redirection the transport was performing when it failed.
///
/// A failed fake-base redirection aborts before the device node is ever
/// opened. A failed restore happens after the patch has committed and can
/// only be reported, not undone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectPhase {
    /// Moving the exposed base to the scan window before mapping
    FakeBase,
    /// Moving the base back to the production value on release
    RestoreBase,
}

impl fmt::Display for RedirectPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedirectPhase::FakeBase => write!(f, "fake base"),
            RedirectPhase::RestoreBase => write!(f, "restore base"),
        }
    }
}

/// Unlock pipeline error
#[derive(Debug)]
pub enum Error {
    /// Partition name (or id) not present in the catalog / factory table
    UnknownPartition(String),
    /// The detected (model, build id) pair has no compatibility entry
    UnsupportedDevice {
        /// `ro.product.model` as reported by the device
        model: String,
        /// `ro.build.display.id` as reported by the device
        build_id: String,
    },
    /// Opening, mapping, or unmapping the device node failed
    DeviceAccess {
        /// The system call that failed
        op: &'static str,
        /// Underlying system error
        source: io::Error,
    },
    /// The scan exhausted the window without matching the signature
    SignatureNotFound {
        /// Number of bytes that were scanned
        window_len: usize,
    },
    /// A live record's partition id no longer matches the factory sequence
    TableDrifted {
        /// Slot index inside the located table
        slot: usize,
        /// Partition id the factory table carries at that slot
        expected_id: u32,
        /// Partition id actually read from the window
        found_id: u32,
    },
    /// The injection transport failed while rewriting the base register
    Redirection {
        /// Fake-base or restore-base
        phase: RedirectPhase,
        /// Transport-level error
        source: io::Error,
    },
}

/// Result type for unlock operations
pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownPartition(name) => {
                write!(f, "unknown partition \"{name}\"")
            }
            Error::UnsupportedDevice { model, build_id } => {
                write!(f, "{model} ({build_id}) is not supported")
            }
            Error::DeviceAccess { op, source } => {
                write!(f, "{op} failed: {source}")
            }
            Error::SignatureNotFound { window_len } => {
                write!(
                    f,
                    "protection table signature not found in {window_len} mapped bytes"
                )
            }
            Error::TableDrifted {
                slot,
                expected_id,
                found_id,
            } => {
                write!(
                    f,
                    "live table drifted at slot {slot}: expected partition id \
                     {expected_id}, found {found_id}; refusing to write"
                )
            }
            Error::Redirection { phase, source } => {
                write!(f, "base address redirection ({phase}) failed: {source}")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::DeviceAccess { source, .. } => Some(source),
            Error::Redirection { source, .. } => Some(source),
            _ => None,
        }
    }
}
