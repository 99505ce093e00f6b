//! Fuzz target for argument decoding.
//!
//! Run with: cargo +nightly fuzz run fuzz_unmarshal_args
//!
//! The first byte picks how many type tags follow, each tag taking one byte;
//! the rest of the input is read as big-endian words. Decoding must fail
//! cleanly on anything malformed, and whatever decodes must encode back to
//! the same words.

#![no_main]

use libfuzzer_sys::fuzz_target;
use minipc_core::{TypeTag, marshal_args, unmarshal_args};

fn tag(byte: u8) -> TypeTag {
    match byte % 7 {
        0 => TypeTag::None,
        1 => TypeTag::Int32,
        2 => TypeTag::UInt32,
        3 => TypeTag::Int64,
        4 => TypeTag::Double,
        5 => TypeTag::String {
            max_len: usize::from(byte >> 3) * 8,
        },
        _ => TypeTag::Struct {
            size: usize::from(byte >> 3),
        },
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&count, rest)) = data.split_first() else {
        return;
    };
    let count = usize::from(count % 8).min(rest.len());
    let (tags, payload) = rest.split_at(count);
    let signature: Vec<TypeTag> = tags.iter().map(|&b| tag(b)).collect();
    let words: Vec<u32> = payload
        .chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    if let Ok(values) = unmarshal_args(&signature, &words) {
        let encoded = marshal_args(&signature, &values).expect("decoded values re-encode");
        // Padding bytes are not preserved, so only the word count must agree.
        assert_eq!(encoded.len(), words.len());
    }
});
