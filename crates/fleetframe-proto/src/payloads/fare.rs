//! Fare estimation payloads.

use serde::{Deserialize, Serialize};

/// Request a fare estimate for a prospective trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareQuote {
    /// Trip distance in kilometers
    pub distance_km: f64,
    /// Vehicle type string (`bike`, `auto`, `mini-truck`, `pickup`);
    /// unrecognized values are priced at the `auto` rate
    pub vehicle: String,
    /// Estimated trip duration in minutes
    pub duration_min: f64,
}

/// Priced, commission-split fare breakdown.
///
/// Invariants (maintained by the fare engine, not re-checked on decode):
/// `total_fare = round((base_fare + distance_cost + fuel_adjustment +
/// toll_charges) * surge)` and `driver_earnings = total_fare -
/// platform_commission`, with the commission rounded from the pre-rounded
/// subtotal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FareBreakdown {
    /// Flat pickup charge for the vehicle type
    pub base_fare: i64,
    /// Distance charge before adjustments
    pub distance_cost: f64,
    /// Fuel surcharge, 15% of the distance cost, rounded
    pub fuel_adjustment: i64,
    /// Toll estimate for trips over 10 km, otherwise zero
    pub toll_charges: i64,
    /// Peak-hour multiplier; absent outside surge windows
    #[serde(skip_serializing_if = "Option::is_none")]
    pub surge_factor: Option<f64>,
    /// Platform's cut, rounded from the pre-rounded subtotal
    pub platform_commission: i64,
    /// Total charged to the customer
    pub total_fare: i64,
    /// What the driver takes home
    pub driver_earnings: i64,
    /// Estimated trip duration in minutes, echoed from the request
    pub estimated_duration_min: f64,
}
