//! `AppConfig::parse` on arbitrary input.
//!
//! cargo +nightly fuzz run fuzz_config

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = docbot_config::AppConfig::parse(text) {
        // anything that parsed must also pass validation and infer base URLs
        assert!(config.validate().is_ok());
        for package in &config.docs.packages {
            let _ = package.effective_base_url();
        }
    }
});
