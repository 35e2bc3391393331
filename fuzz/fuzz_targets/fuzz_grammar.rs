#![no_main]

use libfuzzer_sys::fuzz_target;
use pgtwixt::conninfo::{grammar, ConnectionString};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(pairs) = grammar::parse_pairs(text) else {
        return;
    };

    // Quoting every value and parsing again must give back the same pairs.
    let requoted = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", grammar::quote(k), grammar::quote(v)))
        .collect::<Vec<_>>()
        .join(" ");
    assert_eq!(grammar::parse_pairs(&requoted).ok(), Some(pairs));

    let _ = ConnectionString::parse(text);
});
