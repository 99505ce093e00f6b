//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser
//!
//! Feeds arbitrary text to `AppConfig::parse()` to find panics or hangs in
//! TOML parsing and validation.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = minipc_config::AppConfig::parse(s) {
            // Anything that parses must render and parse again.
            let rendered = config.to_toml().expect("valid config renders");
            let again = minipc_config::AppConfig::parse(&rendered).expect("rendered config parses");
            assert_eq!(again, config);
        }
    }
});
