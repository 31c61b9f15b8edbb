//! # Protection Table Data Model
//!
//! The kernel keeps one `ProtectRecord` per physical eMMC partition slot in
//! a fixed-layout array. The partition-id sequence of that array is stable
//! across firmware builds while its address is not, which is what makes it
//! scannable: the id sequence is the signature, the flags are the payload.

use core::mem::size_of;

bitflags::bitflags! {
    /// Access protection bits enforced by the firmware for one partition
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtectFlags: u32 {
        /// Reads from the partition are blocked
        const READ = 0x01;
        /// Writes to the partition are blocked
        const WRITE = 0x02;
    }
}

/// One slot of the kernel protection table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ProtectRecord {
    /// Physical partition id
    pub partition_id: u32,
    /// Raw protect bits, in the kernel's own layout
    pub protect_flags: u32,
}

/// Size of one record in the live table
pub const RECORD_SIZE: usize = size_of::<ProtectRecord>();

static_assertions::const_assert_eq!(RECORD_SIZE, 2 * size_of::<u32>());
static_assertions::const_assert_eq!(RECORD_SIZE, 8);

impl ProtectRecord {
    /// Build a record from a partition id and typed flags
    pub const fn new(partition_id: u32, flags: ProtectFlags) -> Self {
        Self {
            partition_id,
            protect_flags: flags.bits(),
        }
    }

    /// Typed view of the protect bits (unknown bits are preserved raw)
    pub const fn flags(&self) -> ProtectFlags {
        ProtectFlags::from_bits_retain(self.protect_flags)
    }
}

// Partition ids of the observed device family. The table covers every
// physical slot; only a subset is user-selectable (see `catalog`).

/// Modem boot information block
pub const MIBIB: u32 = 2;
/// Application bootloader
pub const APPSBL: u32 = 6;
/// Kernel boot image
pub const BOOT: u32 = 8;
/// Recovery image
pub const RECOVERY: u32 = 9;
/// System (rootfs) partition
pub const SYSTEM: u32 = 11;

/// Number of physical partition slots in the table
pub const TABLE_LEN: usize = 11;

/// Byte length of the whole table image
pub const TABLE_BYTES: usize = TABLE_LEN * RECORD_SIZE;

/// The factory protection table, in the physical slot order the firmware
/// uses. Restore writes this image back verbatim; the id column doubles as
/// the scan signature.
pub const FACTORY_TABLE: [ProtectRecord; TABLE_LEN] = [
    ProtectRecord::new(0, ProtectFlags::WRITE),
    ProtectRecord::new(1, ProtectFlags::READ.union(ProtectFlags::WRITE)),
    ProtectRecord::new(MIBIB, ProtectFlags::READ.union(ProtectFlags::WRITE)),
    ProtectRecord::new(3, ProtectFlags::READ.union(ProtectFlags::WRITE)),
    ProtectRecord::new(4, ProtectFlags::WRITE),
    ProtectRecord::new(APPSBL, ProtectFlags::READ.union(ProtectFlags::WRITE)),
    ProtectRecord::new(7, ProtectFlags::READ.union(ProtectFlags::WRITE)),
    ProtectRecord::new(BOOT, ProtectFlags::WRITE),
    ProtectRecord::new(RECOVERY, ProtectFlags::WRITE),
    ProtectRecord::new(10, ProtectFlags::READ.union(ProtectFlags::WRITE)),
    ProtectRecord::new(SYSTEM, ProtectFlags::WRITE),
];

/// The partition-id sequence used as the scan signature
pub const SIGNATURE: [u32; TABLE_LEN] = signature();

const fn signature() -> [u32; TABLE_LEN] {
    let mut ids = [0u32; TABLE_LEN];
    let mut slot = 0;
    while slot < TABLE_LEN {
        ids[slot] = FACTORY_TABLE[slot].partition_id;
        slot += 1;
    }
    ids
}

/// Native-endian byte image of the factory table, laid out exactly as the
/// kernel stores it
pub fn factory_image() -> [u8; TABLE_BYTES] {
    let mut image = [0u8; TABLE_BYTES];
    for (slot, record) in FACTORY_TABLE.iter().enumerate() {
        let base = slot * RECORD_SIZE;
        image[base..base + 4].copy_from_slice(&record.partition_id.to_ne_bytes());
        image[base + 4..base + 8].copy_from_slice(&record.protect_flags.to_ne_bytes());
    }
    image
}

/// Read a native-endian u32 word at an arbitrary (possibly unaligned) byte
/// offset. Callers must have bounds-checked `offset + 4 <= buffer.len()`.
pub(crate) fn word_at(buffer: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&buffer[offset..offset + 4]);
    u32::from_ne_bytes(word)
}

/// Write a native-endian u32 word at an arbitrary byte offset.
pub(crate) fn put_word(buffer: &mut [u8], offset: usize, value: u32) {
    buffer[offset..offset + 4].copy_from_slice(&value.to_ne_bytes());
}
