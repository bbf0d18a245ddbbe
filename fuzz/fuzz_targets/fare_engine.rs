//! Fuzz target for the fare engine
//!
//! The engine must never panic for any input tuple, and whenever the inputs
//! are sane the commission split must balance exactly.

#![no_main]

use arbitrary::Arbitrary;
use chrono::{DateTime, Utc};
use fleetframe_core::{VehicleType, compute_fare};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct FareInput {
    distance_km: f64,
    duration_min: f64,
    vehicle: String,
    timestamp_ms: i64,
}

fuzz_target!(|input: FareInput| {
    let now = DateTime::<Utc>::from_timestamp_millis(input.timestamp_ms)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let vehicle = VehicleType::parse_lenient(&input.vehicle);
    let fare = compute_fare(input.distance_km, vehicle, input.duration_min, now);

    // The split must balance whenever the inputs produce finite money
    if input.distance_km.is_finite() && input.distance_km >= 0.0 && input.distance_km < 1e12 {
        assert_eq!(fare.driver_earnings + fare.platform_commission, fare.total_fare);
    }
});
