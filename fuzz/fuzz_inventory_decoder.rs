//! Inventory decoding on arbitrary bodies, ingested into a symbol table.
//!
//! cargo +nightly fuzz run fuzz_inventory_decoder

#![no_main]

use docbot_core::{NamingRules, SymbolTable, decode_inventory};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(inventory) = decode_inventory(data) else {
        return;
    };
    let mut table = SymbolTable::new(NamingRules::default());
    let stored = table.ingest("fuzz", "https://fuzz.test/", &inventory);
    assert_eq!(stored, inventory.len());
    // every rename must point at a stored symbol
    for (_, entry) in inventory.rows() {
        for alias in table.similar_names(&entry.name) {
            assert!(table.get_exact(alias).is_some());
        }
    }
});
