//! Fuzz target for Frame::decode
//!
//! Feeds arbitrary byte sequences to the frame decoder to find parser
//! crashes, integer overflows in size calculations, buffer over-reads, and
//! malformed headers that bypass validation.
//!
//! The fuzzer should NEVER panic. All invalid inputs must return an error.

#![no_main]

use fleetframe_proto::Frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic, only return Err
    let _ = Frame::decode(data);
});
