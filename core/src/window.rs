//! # Mapped Window
//!
//! A process-local view of the physical memory the privileged device node
//! exposes. Depending on the device generation the node either maps a
//! fixed extent directly, or first needs its base register redirected
//! through the injection transport. In that case the register must be
//! put back to the production value on every exit path, or the device is
//! left in an inconsistent state.
//!
//! The window owns the file handle, the mapping, and the redirection
//! state; dropping it unwinds all three.

use core::fmt;
use core::num::NonZeroUsize;
use core::ptr::NonNull;
use core::slice;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use std::ffi::c_void;
use std::fs::{File, OpenOptions};
use std::io;

use crate::compat::DeviceProfile;
use crate::error::{Error, RedirectPhase, Result};
use crate::inject::{self, InjectionTransport};

/// The privileged device node of the observed family
pub const MMAP_DEVICE: &str = "/dev/shlcdc";

/// Fixed virtual base the direct-mapping generation uses
pub const DIRECT_VIRTUAL_BASE: usize = 0x1000_0000;

/// Mapping length of the direct-mapping generation
pub const DIRECT_LENGTH: usize = 0x8000_0000;

/// Kernel image base of the device family
pub const KERNEL_BASE_ADDRESS: u32 = 0x0020_0000;

/// Offset between the mapped window and the kernel's direct map
pub const MAPPED_OFFSET: u32 = 0x0500_0000;

/// Kernel virtual address corresponding to window offset zero
pub const PAGE_OFFSET: u32 = 0xC000_0000 - KERNEL_BASE_ADDRESS - MAPPED_OFFSET;

/// How to bring up the window
pub enum MapStrategy<'t> {
    /// Redirect the driver's base register to the scan window first, then
    /// map from offset zero (newer generation)
    Redirected {
        /// Control-plane write channel
        transport: &'t mut dyn InjectionTransport,
        /// Constants for the running device
        profile: &'static DeviceProfile,
    },
    /// Map a fixed large extent at a fixed virtual base, no redirection
    /// (older generation)
    Direct {
        /// Virtual address to pin the mapping at
        virtual_base: usize,
        /// Mapping length in bytes
        length: usize,
    },
}

impl fmt::Debug for MapStrategy<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapStrategy::Redirected { profile, .. } => f
                .debug_struct("Redirected")
                .field("profile", profile)
                .finish_non_exhaustive(),
            MapStrategy::Direct {
                virtual_base,
                length,
            } => f
                .debug_struct("Direct")
                .field("virtual_base", virtual_base)
                .field("length", length)
                .finish(),
        }
    }
}

struct Mapping {
    base: NonNull<c_void>,
    length: usize,
}

struct RedirectState<'t> {
    transport: &'t mut dyn InjectionTransport,
    profile: &'static DeviceProfile,
}

/// An open, mapped view of the device's physical window.
///
/// Invariant: from construction until release the mapping and the file
/// handle are live, and (for the redirected generation) the device's
/// base register points at the scan window and must be restored.
pub struct MappedWindow<'t> {
    mapping: Option<Mapping>,
    device: Option<File>,
    redirect: Option<RedirectState<'t>>,
}

impl<'t> MappedWindow<'t> {
    /// Open [`MMAP_DEVICE`] with the given strategy.
    pub fn open(strategy: MapStrategy<'t>) -> Result<Self> {
        Self::open_at(MMAP_DEVICE, strategy)
    }

    /// Open an explicit device node. The production path goes through
    /// [`MappedWindow::open`]; this exists for integrators and tests.
    pub fn open_at(device: &str, strategy: MapStrategy<'t>) -> Result<Self> {
        match strategy {
            MapStrategy::Redirected { transport, profile } => {
                Self::open_redirected(device, transport, profile)
            }
            MapStrategy::Direct {
                virtual_base,
                length,
            } => Self::open_direct(device, virtual_base, length),
        }
    }

    fn open_redirected(
        device: &str,
        transport: &'t mut dyn InjectionTransport,
        profile: &'static DeviceProfile,
    ) -> Result<Self> {
        inject::redirect(transport, profile, inject::FAKE_BASE).map_err(|source| {
            Error::Redirection {
                phase: RedirectPhase::FakeBase,
                source,
            }
        })?;
        log::debug!(
            "Window: base register redirected to {:#010x}",
            inject::FAKE_BASE
        );

        // The register now points away from production; everything below
        // must put it back before reporting failure.
        let node = match open_device(device) {
            Ok(node) => node,
            Err(err) => {
                restore_base_best_effort(transport, profile);
                return Err(err);
            }
        };

        let length = window_length();
        let base = match map_shared(&node, None, length, false) {
            Ok(base) => base,
            Err(err) => {
                drop(node);
                restore_base_best_effort(transport, profile);
                return Err(err);
            }
        };

        log::info!("Window: mapped {length:#x} bytes of {device}");
        Ok(Self {
            mapping: Some(Mapping { base, length }),
            device: Some(node),
            redirect: Some(RedirectState { transport, profile }),
        })
    }

    fn open_direct(device: &str, virtual_base: usize, length: usize) -> Result<Self> {
        let node = open_device(device)?;
        let base = map_shared(&node, NonZeroUsize::new(virtual_base), length, true)?;

        log::info!("Window: mapped {length:#x} bytes of {device} at {virtual_base:#x}");
        Ok(Self {
            mapping: Some(Mapping { base, length }),
            device: Some(node),
            redirect: None,
        })
    }

    /// Mapped length in bytes (zero once released)
    pub fn len(&self) -> usize {
        self.mapping.as_ref().map_or(0, |mapping| mapping.length)
    }

    /// Whether the window currently maps anything
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The mapped bytes
    pub fn as_slice(&self) -> &[u8] {
        match &self.mapping {
            // SAFETY: the mapping is live for as long as self holds it and
            // nothing else in this process aliases it
            Some(mapping) => unsafe {
                slice::from_raw_parts(mapping.base.as_ptr().cast(), mapping.length)
            },
            None => &[],
        }
    }

    /// The mapped bytes, writable
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        match &self.mapping {
            // SAFETY: as for as_slice, and the &mut receiver guarantees
            // exclusive access
            Some(mapping) => unsafe {
                slice::from_raw_parts_mut(mapping.base.as_ptr().cast(), mapping.length)
            },
            None => &mut [],
        }
    }

    /// Kernel virtual address a window offset corresponds to, for
    /// operator-facing diagnostics
    pub fn kernel_address(&self, offset: usize) -> u32 {
        PAGE_OFFSET.wrapping_add(offset as u32)
    }

    /// Unmap, close, and, for the redirected generation, move the base
    /// register back to the production value.
    ///
    /// A restore failure after a committed patch cannot be undone; it is
    /// logged and returned, and the caller decides how loudly to report it.
    pub fn release(mut self) -> Result<()> {
        self.teardown()
    }

    /// Idempotent unwind shared by `release` and `Drop`.
    fn teardown(&mut self) -> Result<()> {
        let mut first_error = None;

        if let Some(mapping) = self.mapping.take() {
            // SAFETY: base/length came from a successful mmap and are
            // unmapped exactly once
            if let Err(errno) = unsafe { munmap(mapping.base, mapping.length) } {
                first_error = Some(Error::DeviceAccess {
                    op: "munmap",
                    source: io::Error::from_raw_os_error(errno as i32),
                });
            }
        }

        drop(self.device.take());

        if let Some(state) = self.redirect.take() {
            if let Err(err) =
                restore_base(state.transport, state.profile)
            {
                log::warn!("Window: best-effort base restore failed: {err}");
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for MappedWindow<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            log::warn!("Window: release on drop failed: {err}");
        }
    }
}

impl fmt::Debug for MappedWindow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedWindow")
            .field("length", &self.len())
            .field("redirected", &self.redirect.is_some())
            .finish()
    }
}

/// Extent of the redirected-generation window: page_size squared, oversized
/// relative to a single page so the target offset is very likely covered.
pub fn window_length() -> usize {
    let page = page_size();
    page * page
}

fn page_size() -> usize {
    // SAFETY: sysconf has no memory-safety preconditions
    let size = unsafe { nix::libc::sysconf(nix::libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

fn open_device(device: &str) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(device)
        .map_err(|source| Error::DeviceAccess {
            op: "open",
            source,
        })
}

fn map_shared(
    node: &File,
    addr: Option<NonZeroUsize>,
    length: usize,
    fixed: bool,
) -> Result<NonNull<c_void>> {
    let length = NonZeroUsize::new(length).ok_or_else(|| Error::DeviceAccess {
        op: "mmap",
        source: io::Error::from_raw_os_error(nix::libc::EINVAL),
    })?;

    let mut flags = MapFlags::MAP_SHARED;
    if fixed {
        flags |= MapFlags::MAP_FIXED;
    }

    // SAFETY: mapping a device node; nothing in this process holds
    // references into the target range
    unsafe {
        mmap(
            addr,
            length,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            flags,
            node,
            0,
        )
    }
    .map_err(|errno| Error::DeviceAccess {
        op: "mmap",
        source: io::Error::from_raw_os_error(errno as i32),
    })
}

fn restore_base(
    transport: &mut dyn InjectionTransport,
    profile: &DeviceProfile,
) -> Result<()> {
    inject::redirect(transport, profile, profile.production_base).map_err(|source| {
        Error::Redirection {
            phase: RedirectPhase::RestoreBase,
            source,
        }
    })
}

fn restore_base_best_effort(transport: &mut dyn InjectionTransport, profile: &DeviceProfile) {
    if let Err(err) = restore_base(transport, profile) {
        log::warn!("Window: best-effort base restore failed: {err}");
    }
}
