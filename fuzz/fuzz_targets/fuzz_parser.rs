#![no_main]

use libfuzzer_sys::fuzz_target;
use sponge_lang::instrument::{InjectionPlan, instrument};
use sponge_lang::parser::parse;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    if source.len() > 4096 {
        return;
    }

    // Parsing must never panic; failures are reported as errors.
    let Ok(mut program) = parse(source) else {
        return;
    };

    // Every statement line can carry a breakpoint.
    let report = instrument(&mut program, &InjectionPlan::AllLines);
    assert!(report.dropped.is_empty(), "dropped {:?}", report.dropped);
});
