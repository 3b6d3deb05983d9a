#![no_main]

use libfuzzer_sys::fuzz_target;
use sponge_runner::{WorkerCommand, WorkerEvent};

fuzz_target!(|data: &[u8]| {
    if data.len() > 8192 {
        return;
    }

    // Decoding arbitrary bytes must never panic.
    if let Ok(event) = serde_json::from_slice::<WorkerEvent>(data) {
        // Anything that decodes re-encodes to a decodable message.
        let json = serde_json::to_string(&event).expect("event encodes");
        let _: WorkerEvent = serde_json::from_str(&json).expect("event decodes");
    }

    if let Ok(command) = serde_json::from_slice::<WorkerCommand>(data) {
        let json = serde_json::to_string(&command).expect("command encodes");
        let _: WorkerCommand = serde_json::from_str(&json).expect("command decodes");
    }
});
