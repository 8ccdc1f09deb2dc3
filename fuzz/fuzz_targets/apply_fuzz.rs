#![no_main]
use beatpatch::bps;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary patches must only ever produce errors, never panic.
    let _ = bps::apply_memory(&[], data);

    if data.len() >= 2 {
        let split = data[0] as usize % data.len();
        let (source, patch) = data[1..].split_at(split.min(data.len() - 1));
        let _ = bps::apply_memory(source, patch);
    }
});
