//! # mmcunlock-core
//!
//! Locates the kernel's MMC partition protection table inside a raw
//! physical-memory window exposed by a privileged device node, clears the
//! read/write protection bits for one or all partitions, and can restore
//! the factory values.
//!
//! The table's address moves between firmware builds, so it is found by
//! scanning for its stable partition-id sequence rather than dereferencing
//! a known address. On newer device generations the window itself only
//! becomes reachable after the driver's base register has been redirected
//! through an out-of-band injection transport, which must be put back on
//! every exit path.
//!
//! ## Components
//!
//! - [`table`]: the fixed-layout record model and the factory table
//! - [`scan`]: the byte-granular signature scanner
//! - [`window`]: the mapped window with guaranteed unwind
//! - [`patch`]: unlock / restore over a located table
//! - [`catalog`]: the user-selectable partition allow-list
//! - [`compat`]: per-device constants keyed by (model, build id)
//! - [`inject`]: the redirection protocol over the transport seam

pub mod catalog;
pub mod compat;
pub mod error;
pub mod inject;
pub mod patch;
pub mod scan;
pub mod table;
pub mod window;

pub use error::{Error, RedirectPhase, Result};
pub use patch::{locate_table, LocatedTable, Target};
pub use window::{MapStrategy, MappedWindow};

/// What a single invocation does to the located table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Clear protect flags for the targeted record(s)
    Unlock(Target),
    /// Write the factory image back
    Restore,
}

/// Run one invocation end to end: open the window, locate the table,
/// apply the operation, release the window.
///
/// The window is released on every path. A patch failure takes precedence
/// over a release failure in the returned error; a release failure after a
/// successful patch is still an error, because the device may have been
/// left with a redirected base register.
pub fn run(strategy: MapStrategy<'_>, operation: Operation) -> Result<()> {
    let mut window = MappedWindow::open(strategy)?;

    let outcome = apply(&mut window, operation);
    let released = window.release();

    outcome.and(released)
}

fn apply(window: &mut MappedWindow<'_>, operation: Operation) -> Result<()> {
    let mut located = patch::locate_table(window)?;
    match operation {
        Operation::Unlock(target) => located.unlock(target),
        Operation::Restore => located.restore(),
    }
}
