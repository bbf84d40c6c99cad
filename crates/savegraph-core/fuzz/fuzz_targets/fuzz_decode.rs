#![no_main]
use libfuzzer_sys::fuzz_target;
use savegraph_core::config::AnalysisConfig;
use savegraph_core::deserialize::decode_save;
use savegraph_core::model::build_model;

fuzz_target!(|data: &[u8]| {
    // Arbitrary file bytes must never panic; returning Err is fine.
    let config = AnalysisConfig {
        max_declared_size_bytes: 1 << 20,
        ..AnalysisConfig::default()
    };
    if let Ok(decoded) = decode_save(data, &config) {
        let _ = build_model(decoded.records, decoded.trailing);
    }
});
