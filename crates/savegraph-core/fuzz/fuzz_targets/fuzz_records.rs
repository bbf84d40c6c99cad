#![no_main]
use libfuzzer_sys::fuzz_target;
use savegraph_core::chunk::{CURRENT_VERSION, MIN_SUPPORTED_VERSION};
use savegraph_core::deserialize::decode_records;
use savegraph_core::test_utils::SaveWriter;

#[derive(Debug, arbitrary::Arbitrary)]
struct Input {
    version: u8,
    body: Vec<u8>,
}

fuzz_target!(|input: Input| {
    // Feed arbitrary bodies straight to the record decoder, and once more
    // wrapped in a well-formed container so the chunk layer passes.
    let span = CURRENT_VERSION - MIN_SUPPORTED_VERSION + 1;
    let version = MIN_SUPPORTED_VERSION + u32::from(input.version) % span;
    let _ = decode_records(&input.body, version, 1 << 20);

    let bytes = SaveWriter::new(version).raw_body(&input.body).finish();
    let _ = savegraph_core::deserialize::decode_save(
        &bytes,
        &savegraph_core::config::AnalysisConfig::default(),
    );
});
