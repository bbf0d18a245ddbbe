//! Fuzz target for Payload::decode
//!
//! Tests CBOR payload deserialization with malformed data, type confusion
//! (wrong payload bytes for an opcode), and oversized inputs.
//!
//! The fuzzer should NEVER panic. All invalid inputs must return an error.

#![no_main]

use fleetframe_proto::{Opcode, Payload};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let opcodes = [
        Opcode::Hello,
        Opcode::HelloReply,
        Opcode::Goodbye,
        Opcode::Ping,
        Opcode::Pong,
        Opcode::LocationUpdate,
        Opcode::TrackDelivery,
        Opcode::StopTracking,
        Opcode::FareQuote,
        Opcode::DriverLocation,
        Opcode::StatusUpdate,
        Opcode::FareEstimate,
        Opcode::Error,
    ];

    for opcode in opcodes {
        // Deserializing arbitrary bytes must never panic, only return Err
        let _ = Payload::decode(opcode, data);
    }
});
