//! Fuzz target for command-line parsing
//!
//! # Strategy
//!
//! - Arbitrary UTF-8-ish command lines against every table entry's specs
//! - Alias expansion over arbitrary lines
//!
//! # Invariants
//!
//! - Tokenizing and parameter parsing NEVER panic
//! - Alias expansion returns a line (never truncates to garbage lengths)

#![no_main]

use busbar_core::{
    alias::AliasStore,
    command::COMMAND_TABLE,
    params::{Tokenizer, parse_parameters},
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);

    let mut aliases = AliasStore::new();
    aliases.set("x", "help");
    let expanded = aliases.expand(&line);

    for spec in COMMAND_TABLE {
        let mut tokenizer = Tokenizer::new(&expanded);
        let _ = tokenizer.next_token();
        let _ = parse_parameters(&mut tokenizer, spec.params);
    }
});
