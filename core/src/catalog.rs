//! # Partition Catalog
//!
//! The fixed allow-list of partitions the tool will target by name. This is
//! deliberately smaller than the full protection table: the table covers
//! every physical slot, the catalog only the ones it makes sense to unlock
//! individually.

use crate::table;

/// A user-selectable partition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Human-readable name accepted on the command line
    pub name: &'static str,
    /// Physical partition id
    pub partition_id: u32,
}

/// The allow-list, in usage-text order
pub const CATALOG: [CatalogEntry; 3] = [
    CatalogEntry {
        name: "boot",
        partition_id: table::BOOT,
    },
    CatalogEntry {
        name: "recovery",
        partition_id: table::RECOVERY,
    },
    CatalogEntry {
        name: "system",
        partition_id: table::SYSTEM,
    },
];

/// Resolve a partition name to its physical id
pub fn lookup(name: &str) -> Option<u32> {
    CATALOG
        .iter()
        .find(|entry| entry.name == name)
        .map(|entry| entry.partition_id)
}

/// Iterate the accepted names, for usage text
pub fn names() -> impl Iterator<Item = &'static str> {
    CATALOG.iter().map(|entry| entry.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_resolves_the_allow_list() {
        assert_eq!(lookup("boot"), Some(8));
        assert_eq!(lookup("recovery"), Some(9));
        assert_eq!(lookup("system"), Some(11));
    }

    #[test]
    fn lookup_rejects_everything_else() {
        assert_eq!(lookup("mibib"), None);
        assert_eq!(lookup("BOOT"), None);
        assert_eq!(lookup(""), None);
    }

    #[test]
    fn every_catalog_id_sits_in_the_factory_table() {
        for entry in CATALOG {
            assert!(
                table::FACTORY_TABLE
                    .iter()
                    .any(|record| record.partition_id == entry.partition_id),
                "{} missing from factory table",
                entry.name
            );
        }
    }
}
