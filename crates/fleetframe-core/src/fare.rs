//! Dynamic fare engine.
//!
//! Pure and deterministic: a distance/duration/vehicle tuple plus the
//! caller-supplied wall-clock time produces a priced, commission-split
//! breakdown. No I/O, no hidden clock reads - peak-hour surge derives from
//! the `now` argument alone, so the same inputs always price the same.

use chrono::{DateTime, Timelike, Utc};
use fleetframe_proto::payloads::fare::FareBreakdown;

/// Fuel surcharge as a fraction of the distance cost.
const FUEL_RATE: f64 = 0.15;

/// Platform commission as a fraction of the subtotal.
const COMMISSION_RATE: f64 = 0.12;

/// Peak-hour multiplier.
const SURGE_MULTIPLIER: f64 = 1.2;

/// Toll estimate per kilometer for trips beyond [`TOLL_FREE_KM`].
const TOLL_PER_KM: f64 = 2.0;

/// Trips at or under this distance incur no toll estimate.
const TOLL_FREE_KM: f64 = 10.0;

/// Vehicle classes with fixed rate-table entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleType {
    /// Two-wheeler for small packages
    Bike,
    /// Auto-rickshaw
    Auto,
    /// Mini truck for bulk loads
    MiniTruck,
    /// Pickup van
    Pickup,
}

impl VehicleType {
    /// Parse a wire vehicle string.
    ///
    /// Unrecognized values fall back to the `auto` rate rather than being
    /// rejected; quoting keeps working when a client sends a vehicle class
    /// this server version does not know.
    #[must_use]
    pub fn parse_lenient(value: &str) -> Self {
        match value {
            "bike" => Self::Bike,
            "mini-truck" => Self::MiniTruck,
            "pickup" => Self::Pickup,
            _ => Self::Auto,
        }
    }

    /// Flat pickup charge.
    #[must_use]
    pub const fn base_fare(self) -> i64 {
        match self {
            Self::Bike => 30,
            Self::Auto => 50,
            Self::Pickup => 100,
            Self::MiniTruck => 150,
        }
    }

    /// Charge per kilometer.
    #[must_use]
    pub const fn per_km_rate(self) -> f64 {
        match self {
            Self::Bike => 8.0,
            Self::Auto => 12.0,
            Self::Pickup => 20.0,
            Self::MiniTruck => 25.0,
        }
    }
}

/// Whether an hour-of-day falls in a surge window.
///
/// Morning peak is 08:00-10:59, evening peak 17:00-20:59 (both bounds
/// inclusive at the hour granularity).
fn is_peak_hour(hour: u32) -> bool {
    (8..=10).contains(&hour) || (17..=20).contains(&hour)
}

/// Compute a fare breakdown.
///
/// Steps, in order: rate-table lookup, distance cost, fuel adjustment (15%
/// of distance cost, rounded), toll estimate (2/km beyond 10 km, rounded),
/// surge multiplier from `now`'s hour, then commission (12%, rounded from
/// the pre-rounded subtotal) and the rounded total. Driver earnings are the
/// total minus the commission.
#[must_use]
pub fn compute_fare(
    distance_km: f64,
    vehicle: VehicleType,
    duration_min: f64,
    now: DateTime<Utc>,
) -> FareBreakdown {
    let base_fare = vehicle.base_fare();
    let distance_cost = distance_km * vehicle.per_km_rate();
    let fuel_adjustment = (distance_cost * FUEL_RATE).round();
    let toll_charges =
        if distance_km > TOLL_FREE_KM { (distance_km * TOLL_PER_KM).round() } else { 0.0 };

    let surge_factor = is_peak_hour(now.hour()).then_some(SURGE_MULTIPLIER);

    let subtotal = (base_fare as f64 + distance_cost + fuel_adjustment + toll_charges)
        * surge_factor.unwrap_or(1.0);

    let platform_commission = (subtotal * COMMISSION_RATE).round() as i64;
    let total_fare = subtotal.round() as i64;

    FareBreakdown {
        base_fare,
        distance_cost,
        fuel_adjustment: fuel_adjustment as i64,
        toll_charges: toll_charges as i64,
        surge_factor,
        platform_commission,
        total_fare,
        driver_earnings: total_fare - platform_commission,
        estimated_duration_min: duration_min,
    }
}
