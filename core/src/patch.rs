//! # Protection Table Patcher
//!
//! Locates the table inside a live window and mutates its protect-flags
//! column. The located handle borrows the window mutably, so it cannot be
//! held across a release: operating on unmapped memory is a compile error
//! here, not a crash at runtime.
//!
//! Restore writes the static factory image, not a snapshot of prior live
//! state. Factory values are constants for the device family, so this is
//! safe as long as nothing else rewrote the table first.

use crate::error::{Error, Result};
use crate::scan;
use crate::table::{
    self, put_word, word_at, FACTORY_TABLE, RECORD_SIZE, SIGNATURE, TABLE_BYTES, TABLE_LEN,
};
use crate::window::MappedWindow;

/// Which record(s) to unlock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every slot in the table
    All,
    /// The single record carrying this partition id
    One(u32),
}

/// The protection table, located inside a live window
#[derive(Debug)]
pub struct LocatedTable<'w, 't> {
    window: &'w mut MappedWindow<'t>,
    offset: usize,
}

/// Scan the window for the factory signature.
///
/// A miss is the normal "wrong firmware" outcome and maps to
/// [`Error::SignatureNotFound`].
pub fn locate_table<'w, 't>(window: &'w mut MappedWindow<'t>) -> Result<LocatedTable<'w, 't>> {
    let window_len = window.len();
    let offset = scan::locate(window.as_slice(), &SIGNATURE)
        .ok_or(Error::SignatureNotFound { window_len })?;

    log::info!(
        "Patch: protection table at window offset {:#x} (kernel address {:#010x})",
        offset,
        window.kernel_address(offset)
    );
    Ok(LocatedTable { window, offset })
}

impl LocatedTable<'_, '_> {
    /// Byte offset of the table inside the window
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Clear the protect flags of the targeted record(s)
    pub fn unlock(&mut self, target: Target) -> Result<()> {
        let offset = self.offset;
        unlock_in(self.window.as_mut_slice(), offset, target)
    }

    /// Write the factory table image back over the live table
    pub fn restore(&mut self) -> Result<()> {
        let offset = self.offset;
        restore_in(self.window.as_mut_slice(), offset)
    }
}

pub(crate) fn unlock_in(buffer: &mut [u8], table_offset: usize, target: Target) -> Result<()> {
    match target {
        Target::All => {
            for slot in 0..TABLE_LEN {
                clear_slot(buffer, table_offset, slot)?;
            }
            log::info!("Patch: cleared protect flags for all {TABLE_LEN} slots");
        }
        Target::One(partition_id) => {
            // Slot index and partition id are different namespaces; the
            // factory id sequence is the only valid translation.
            let slot = FACTORY_TABLE
                .iter()
                .position(|record| record.partition_id == partition_id)
                .ok_or_else(|| Error::UnknownPartition(partition_id.to_string()))?;
            clear_slot(buffer, table_offset, slot)?;
            log::info!("Patch: cleared protect flags for partition id {partition_id} (slot {slot})");
        }
    }
    Ok(())
}

pub(crate) fn restore_in(buffer: &mut [u8], table_offset: usize) -> Result<()> {
    for slot in 0..TABLE_LEN {
        verify_slot(buffer, table_offset, slot)?;
    }
    buffer[table_offset..table_offset + TABLE_BYTES].copy_from_slice(&table::factory_image());
    log::info!("Patch: factory table image restored");
    Ok(())
}

fn clear_slot(buffer: &mut [u8], table_offset: usize, slot: usize) -> Result<()> {
    verify_slot(buffer, table_offset, slot)?;
    put_word(buffer, table_offset + slot * RECORD_SIZE + 4, 0);
    Ok(())
}

/// The signature match is positional; re-check the live id immediately
/// before every write so a coincidental match cannot corrupt memory that
/// merely looked like the table.
fn verify_slot(buffer: &[u8], table_offset: usize, slot: usize) -> Result<()> {
    let expected_id = FACTORY_TABLE[slot].partition_id;
    let found_id = word_at(buffer, table_offset + slot * RECORD_SIZE);
    if found_id != expected_id {
        return Err(Error::TableDrifted {
            slot,
            expected_id,
            found_id,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{factory_image, ProtectFlags, BOOT};

    const FLAGS_OFFSET: usize = 4;

    /// 8192-byte buffer with an 11-record table at `table_offset`, every
    /// record carrying the factory id and flags 0x03.
    fn live_buffer(table_offset: usize) -> Vec<u8> {
        let mut buffer = vec![0xFF; 8192];
        for (slot, record) in FACTORY_TABLE.iter().enumerate() {
            let base = table_offset + slot * RECORD_SIZE;
            put_word(&mut buffer, base, record.partition_id);
            put_word(&mut buffer, base + FLAGS_OFFSET, 0x03);
        }
        buffer
    }

    fn flags_at(buffer: &[u8], table_offset: usize, slot: usize) -> u32 {
        word_at(buffer, table_offset + slot * RECORD_SIZE + FLAGS_OFFSET)
    }

    #[test]
    fn unlock_one_touches_exactly_one_slot() {
        // The documented scenario: table at 4096, id 8 lives at slot 7.
        let table_offset = 4096;
        let mut buffer = live_buffer(table_offset);
        assert_eq!(scan::locate(&buffer, &SIGNATURE), Some(table_offset));

        unlock_in(&mut buffer, table_offset, Target::One(8)).unwrap();

        for slot in 0..TABLE_LEN {
            let expected = if slot == 7 { 0x00 } else { 0x03 };
            assert_eq!(flags_at(&buffer, table_offset, slot), expected, "slot {slot}");
        }
    }

    #[test]
    fn restore_writes_factory_values_back() {
        let table_offset = 4096;
        let mut buffer = live_buffer(table_offset);

        unlock_in(&mut buffer, table_offset, Target::One(8)).unwrap();
        restore_in(&mut buffer, table_offset).unwrap();

        // Slot 7 (id 8, the boot image) goes back to write-protected.
        assert_eq!(
            flags_at(&buffer, table_offset, 7),
            ProtectFlags::WRITE.bits()
        );
        for (slot, record) in FACTORY_TABLE.iter().enumerate() {
            assert_eq!(flags_at(&buffer, table_offset, slot), record.protect_flags);
        }
    }

    #[test]
    fn unlock_all_then_restore_round_trips() {
        let table_offset = 512;
        let mut buffer = vec![0x00; 2048];
        buffer[table_offset..table_offset + TABLE_BYTES].copy_from_slice(&factory_image());
        let before = buffer.clone();

        unlock_in(&mut buffer, table_offset, Target::All).unwrap();
        for slot in 0..TABLE_LEN {
            assert_eq!(flags_at(&buffer, table_offset, slot), 0);
        }

        restore_in(&mut buffer, table_offset).unwrap();
        assert_eq!(buffer, before);
    }

    #[test]
    fn unlock_one_by_constant_matches_the_catalog() {
        let table_offset = 0;
        let mut buffer = live_buffer(table_offset);
        unlock_in(&mut buffer, table_offset, Target::One(BOOT)).unwrap();
        assert_eq!(flags_at(&buffer, table_offset, 7), 0);
    }

    #[test]
    fn unknown_partition_id_is_refused() {
        // Id 5 has no physical slot on this family.
        let mut buffer = live_buffer(0);
        assert!(matches!(
            unlock_in(&mut buffer, 0, Target::One(5)),
            Err(Error::UnknownPartition(name)) if name == "5"
        ));
    }

    #[test]
    fn drifted_table_aborts_instead_of_writing() {
        let table_offset = 256;
        let mut buffer = live_buffer(table_offset);
        // Corrupt the id of slot 3 after the hypothetical scan.
        put_word(&mut buffer, table_offset + 3 * RECORD_SIZE, 0xBAD);

        let err = unlock_in(&mut buffer, table_offset, Target::All).unwrap_err();
        match err {
            Error::TableDrifted {
                slot,
                expected_id,
                found_id,
            } => {
                assert_eq!(slot, 3);
                assert_eq!(expected_id, 3);
                assert_eq!(found_id, 0xBAD);
            }
            other => panic!("expected TableDrifted, got {other:?}"),
        }
        // The drifted slot itself was never written.
        assert_eq!(flags_at(&buffer, table_offset, 3), 0x03);
    }

    #[test]
    fn drifted_table_also_blocks_restore() {
        let table_offset = 256;
        let mut buffer = live_buffer(table_offset);
        put_word(&mut buffer, table_offset, 0xBAD);

        assert!(matches!(
            restore_in(&mut buffer, table_offset),
            Err(Error::TableDrifted { slot: 0, .. })
        ));
        // Nothing was copied.
        assert_eq!(flags_at(&buffer, table_offset, 1), 0x03);
    }
}
