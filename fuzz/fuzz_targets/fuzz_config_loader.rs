#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validation errors are fine; panics are not.
    if let Ok(cfg) = toml::from_str::<afc_config::Config>(data) {
        if cfg.validate().is_ok() {
            let params = afc_core::ChargeParams::from(&cfg);
            let _ = params.validate();
        }
    }
});
