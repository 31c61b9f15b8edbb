//! # Signature Scanner
//!
//! Finds the protection table inside an opaque memory window. The table's
//! address moves between firmware builds, but its partition-id column does
//! not, so the scanner slides over the window one byte at a time and
//! compares the id word of every candidate slot against the expected
//! sequence.
//!
//! The scan is deliberately naive: it runs once over a window of a few
//! megabytes, so a skip table would buy nothing worth its complexity.

use crate::table::{word_at, RECORD_SIZE};

/// Distance between consecutive partition-id words in the live table
pub const RECORD_STRIDE: usize = RECORD_SIZE;

/// Locate `signature` inside `buffer`.
///
/// A candidate offset `p` matches when, for every `n`, the u32 word at
/// `p + n * RECORD_STRIDE` equals `signature[n]`. Returns the first
/// (lowest) matching byte offset; coincidental later matches are ignored
/// by policy. `None` is a normal outcome, not a fault: it is what a wrong
/// firmware build looks like.
///
/// An empty signature matches trivially at offset 0.
pub fn locate(buffer: &[u8], signature: &[u32]) -> Option<usize> {
    if signature.is_empty() {
        return Some(0);
    }

    let signature_bytes = signature.len() * RECORD_STRIDE;
    if buffer.len() < signature_bytes {
        return None;
    }

    'candidate: for position in 0..=(buffer.len() - signature_bytes) {
        for (slot, &id) in signature.iter().enumerate() {
            if word_at(buffer, position + slot * RECORD_STRIDE) != id {
                continue 'candidate;
            }
        }
        return Some(position);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{factory_image, SIGNATURE, TABLE_BYTES};

    /// Buffer of `len` bytes with the factory table planted at `offset`.
    /// The filler is 0xFF so no stray zero words fake a partial match.
    fn buffer_with_table_at(offset: usize, len: usize) -> Vec<u8> {
        let mut buffer = vec![0xFF; len];
        buffer[offset..offset + TABLE_BYTES].copy_from_slice(&factory_image());
        buffer
    }

    #[test]
    fn finds_the_table_at_every_offset() {
        // Unaligned offsets included: the live table is not required to sit
        // on a word boundary relative to the window base.
        for offset in [0, 1, 3, 7, 64, 100, 4096] {
            let buffer = buffer_with_table_at(offset, offset + TABLE_BYTES + 32);
            assert_eq!(locate(&buffer, &SIGNATURE), Some(offset), "offset {offset}");
        }
    }

    #[test]
    fn finds_a_table_flush_with_the_end() {
        let len = 4096;
        let offset = len - TABLE_BYTES;
        let buffer = buffer_with_table_at(offset, len);
        assert_eq!(locate(&buffer, &SIGNATURE), Some(offset));
    }

    #[test]
    fn misses_when_the_signature_is_absent() {
        let buffer = vec![0xFF; 8192];
        assert_eq!(locate(&buffer, &SIGNATURE), None);
    }

    #[test]
    fn misses_when_only_a_prefix_is_present() {
        // Plant the first ten ids, then break the last one.
        let mut buffer = buffer_with_table_at(128, 4096);
        let last_id_offset = 128 + (SIGNATURE.len() - 1) * RECORD_STRIDE;
        buffer[last_id_offset..last_id_offset + 4].copy_from_slice(&0xDEAD_BEEFu32.to_ne_bytes());
        assert_eq!(locate(&buffer, &SIGNATURE), None);
    }

    #[test]
    fn first_match_wins() {
        let mut buffer = vec![0xFF; 8192];
        buffer[512..512 + TABLE_BYTES].copy_from_slice(&factory_image());
        buffer[4096..4096 + TABLE_BYTES].copy_from_slice(&factory_image());
        assert_eq!(locate(&buffer, &SIGNATURE), Some(512));
    }

    #[test]
    fn short_buffer_is_a_clean_miss() {
        let buffer = vec![0xFF; TABLE_BYTES - 1];
        assert_eq!(locate(&buffer, &SIGNATURE), None);
        assert_eq!(locate(&[], &SIGNATURE), None);
    }

    #[test]
    fn empty_signature_matches_trivially() {
        assert_eq!(locate(&[0u8; 16], &[]), Some(0));
        assert_eq!(locate(&[], &[]), Some(0));
    }

    #[test]
    fn flags_do_not_participate_in_the_match() {
        // Same id column, wildly different flag words: still a match,
        // since observed flag values are not stable across builds.
        let mut buffer = buffer_with_table_at(256, 4096);
        for slot in 0..SIGNATURE.len() {
            let flags_offset = 256 + slot * RECORD_STRIDE + 4;
            buffer[flags_offset..flags_offset + 4]
                .copy_from_slice(&(0x5A5A_0000 | slot as u32).to_ne_bytes());
        }
        assert_eq!(locate(&buffer, &SIGNATURE), Some(256));
    }
}
