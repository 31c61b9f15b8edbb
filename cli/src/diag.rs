//! Control-plane injection over the platform diag character device.
//!
//! The value-injection wire protocol belongs to the device family's
//! vendor stack; what this boundary owes the library is the
//! [`InjectionTransport`] contract: ordered pairs, applied in order,
//! failure reported. Each batch is serialized into one request image and
//! handed to the device in a single write.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use mmcunlock_core::inject::{InjectionTransport, InjectionValue};
use mmcunlock_core::{Error, Result};

/// The diag character device the injection requests go through
pub const DIAG_DEVICE: &str = "/dev/diag";

/// Injection transport backed by [`DIAG_DEVICE`]
#[derive(Debug)]
pub struct DiagTransport {
    device: File,
}

impl DiagTransport {
    /// Open the diag device read-write.
    pub fn open() -> Result<Self> {
        let device = OpenOptions::new()
            .read(true)
            .write(true)
            .open(DIAG_DEVICE)
            .map_err(|source| Error::DeviceAccess {
                op: "open",
                source,
            })?;
        Ok(Self { device })
    }
}

impl InjectionTransport for DiagTransport {
    fn inject(&mut self, values: &[InjectionValue], aux: Option<u32>) -> io::Result<()> {
        // Request image: pair count, auxiliary address (zero when absent),
        // then the pairs in order, each value widened to a full word.
        let mut frame = Vec::with_capacity(8 + values.len() * 8);
        frame.extend_from_slice(&(values.len() as u32).to_le_bytes());
        frame.extend_from_slice(&aux.unwrap_or(0).to_le_bytes());
        for value in values {
            frame.extend_from_slice(&value.address.to_le_bytes());
            frame.extend_from_slice(&u32::from(value.value).to_le_bytes());
        }

        log::debug!(
            "Diag: injecting {} pair(s) via {DIAG_DEVICE}",
            values.len()
        );
        self.device.write_all(&frame)?;
        self.device.flush()
    }
}
