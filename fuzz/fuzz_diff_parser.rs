//! Fuzz target for the unified diff parser and identifier scanner.
//!
//! Run with: cargo +nightly fuzz run fuzz_diff_parser

#![no_main]

use diffscope_core::diff::DiffAdditions;
use diffscope_core::identifiers::extract_identifiers;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let additions = DiffAdditions::parse(&text);
    let total: usize = additions.files().map(|f| f.lines.len()).sum();
    assert_eq!(total, additions.added_line_count());
    for (n, line) in text.lines().enumerate().take(64) {
        for ident in extract_identifiers(line, n as u32) {
            assert!(!ident.text.is_empty());
            assert!(!ident.text.starts_with(|c: char| c.is_ascii_digit()));
        }
    }
});
