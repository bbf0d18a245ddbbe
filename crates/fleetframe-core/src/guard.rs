//! Authorization guard.
//!
//! Every location write and every tracking subscription passes through these
//! checks unconditionally before any state mutation - a bypass here leaks a
//! customer's or driver's live position to an unrelated party. The functions
//! are pure: the caller performs the ownership lookup first and passes the
//! snapshot in, so "no mutation before the lookup resolves" holds by
//! construction.

use fleetframe_proto::{DeliveryStatus, Role, payloads::tracking::LocationUpdate};

use crate::{auth::ConnectionContext, store::DeliveryOwnership};

/// Structured denial reason.
///
/// Callers react differently per variant: malformed input is the sender's
/// bug, unauthorized access is a security event, an inactive delivery is
/// retryable once the delivery progresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deny {
    /// Payload failed validation
    Malformed(String),
    /// Referenced delivery does not exist
    NotFound {
        /// Delivery that was referenced
        delivery_id: u64,
    },
    /// Role or ownership violation
    Unauthorized {
        /// What the caller attempted
        reason: String,
    },
    /// Delivery exists but is not in a state that accepts location updates
    InactiveDelivery {
        /// Delivery that was referenced
        delivery_id: u64,
        /// Its current status
        status: DeliveryStatus,
    },
}

impl Deny {
    /// Whether this denial must be reported to the audit collaborator.
    ///
    /// Only deliberate-looking access violations are security events;
    /// malformed input and missing deliveries are ordinary client errors.
    #[must_use]
    pub const fn is_security_event(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Authorize a driver location update.
///
/// `ownership` is the lookup result for `update.delivery_id`; pass `None`
/// both when no delivery id was given and when the lookup found nothing
/// (the guard only consults it when a delivery id is present).
///
/// # Errors
///
/// - `Deny::Unauthorized` if the caller is not a driver, or the delivery is
///   assigned to someone else
/// - `Deny::Malformed` for non-finite or out-of-range coordinates
/// - `Deny::NotFound` if a delivery id was given but the lookup was empty
/// - `Deny::InactiveDelivery` if the delivery is not being actively worked
pub fn authorize_location_update(
    ctx: &ConnectionContext,
    update: &LocationUpdate,
    ownership: Option<&DeliveryOwnership>,
) -> Result<(), Deny> {
    if ctx.role != Role::Driver {
        return Err(Deny::Unauthorized {
            reason: format!("role {} cannot publish location", ctx.role),
        });
    }

    if !update.lat.is_finite() || !(-90.0..=90.0).contains(&update.lat) {
        return Err(Deny::Malformed(format!("latitude out of range: {}", update.lat)));
    }

    if !update.lng.is_finite() || !(-180.0..=180.0).contains(&update.lng) {
        return Err(Deny::Malformed(format!("longitude out of range: {}", update.lng)));
    }

    if let Some(delivery_id) = update.delivery_id {
        let Some(record) = ownership else {
            return Err(Deny::NotFound { delivery_id });
        };

        if record.driver_id != Some(ctx.user_id) {
            return Err(Deny::Unauthorized {
                reason: format!("delivery {delivery_id} is not assigned to driver {}", ctx.user_id),
            });
        }

        if !record.status.is_active() {
            return Err(Deny::InactiveDelivery { delivery_id, status: record.status });
        }
    }

    Ok(())
}

/// Authorize a tracking subscription.
///
/// The delivery's customer, its assigned driver, and any admin may track it;
/// everyone else is denied and the denial is a security event.
///
/// # Errors
///
/// - `Deny::NotFound` if the delivery does not exist
/// - `Deny::Unauthorized` for any caller that is not party to the delivery
pub fn authorize_track(
    ctx: &ConnectionContext,
    delivery_id: u64,
    ownership: Option<&DeliveryOwnership>,
) -> Result<(), Deny> {
    let Some(record) = ownership else {
        return Err(Deny::NotFound { delivery_id });
    };

    if ctx.role.is_admin() {
        return Ok(());
    }

    if record.customer_id == ctx.user_id || record.driver_id == Some(ctx.user_id) {
        return Ok(());
    }

    Err(Deny::Unauthorized {
        reason: format!("user {} is not party to delivery {delivery_id}", ctx.user_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(user_id: u64, role: Role) -> ConnectionContext {
        ConnectionContext {
            connection_id: 1,
            user_id,
            role,
            remote_addr: "198.51.100.4:9000".parse().unwrap(),
            user_agent: None,
            connected_at_ms: 0,
            verified: true,
        }
    }

    fn update(delivery_id: Option<u64>) -> LocationUpdate {
        LocationUpdate { lat: 12.9, lng: 77.6, heading: 90.0, delivery_id }
    }

    fn owned(driver_id: u64, status: DeliveryStatus) -> DeliveryOwnership {
        DeliveryOwnership { customer_id: 500, driver_id: Some(driver_id), status }
    }

    #[test]
    fn non_driver_cannot_publish_location() {
        let deny = authorize_location_update(&ctx(1, Role::Customer), &update(None), None)
            .unwrap_err();
        assert!(matches!(deny, Deny::Unauthorized { .. }));
        assert!(deny.is_security_event());
    }

    #[test]
    fn coordinates_must_be_in_range() {
        let driver = ctx(1, Role::Driver);

        let mut bad = update(None);
        bad.lat = 90.5;
        assert!(matches!(
            authorize_location_update(&driver, &bad, None),
            Err(Deny::Malformed(_))
        ));

        bad.lat = f64::NAN;
        assert!(matches!(
            authorize_location_update(&driver, &bad, None),
            Err(Deny::Malformed(_))
        ));

        let mut bad = update(None);
        bad.lng = -181.0;
        assert!(matches!(
            authorize_location_update(&driver, &bad, None),
            Err(Deny::Malformed(_))
        ));
    }

    #[test]
    fn freeform_update_without_delivery_is_allowed() {
        assert!(authorize_location_update(&ctx(1, Role::Driver), &update(None), None).is_ok());
    }

    #[test]
    fn update_for_unknown_delivery_is_not_found() {
        let deny = authorize_location_update(&ctx(1, Role::Driver), &update(Some(9)), None)
            .unwrap_err();
        assert_eq!(deny, Deny::NotFound { delivery_id: 9 });
        assert!(!deny.is_security_event());
    }

    #[test]
    fn update_for_foreign_delivery_is_unauthorized() {
        let record = owned(2, DeliveryStatus::InTransit);
        let deny =
            authorize_location_update(&ctx(1, Role::Driver), &update(Some(9)), Some(&record))
                .unwrap_err();
        assert!(matches!(deny, Deny::Unauthorized { .. }));
        assert!(deny.is_security_event());
    }

    #[test]
    fn update_for_inactive_delivery_is_retryable() {
        for status in [DeliveryStatus::Pending, DeliveryStatus::Delivered, DeliveryStatus::Cancelled]
        {
            let record = owned(1, status);
            let deny =
                authorize_location_update(&ctx(1, Role::Driver), &update(Some(9)), Some(&record))
                    .unwrap_err();
            assert_eq!(deny, Deny::InactiveDelivery { delivery_id: 9, status });
            assert!(!deny.is_security_event());
        }
    }

    #[test]
    fn update_for_active_owned_delivery_is_allowed() {
        for status in
            [DeliveryStatus::Accepted, DeliveryStatus::PickedUp, DeliveryStatus::InTransit]
        {
            let record = owned(1, status);
            assert!(
                authorize_location_update(&ctx(1, Role::Driver), &update(Some(9)), Some(&record))
                    .is_ok()
            );
        }
    }

    #[test]
    fn track_allows_customer_driver_and_admin() {
        let record = DeliveryOwnership {
            customer_id: 500,
            driver_id: Some(600),
            status: DeliveryStatus::InTransit,
        };

        assert!(authorize_track(&ctx(500, Role::Customer), 9, Some(&record)).is_ok());
        assert!(authorize_track(&ctx(600, Role::Driver), 9, Some(&record)).is_ok());
        assert!(authorize_track(&ctx(1, Role::Admin), 9, Some(&record)).is_ok());
    }

    #[test]
    fn track_denies_unrelated_caller() {
        let record = DeliveryOwnership {
            customer_id: 500,
            driver_id: Some(600),
            status: DeliveryStatus::InTransit,
        };

        for role in [Role::Customer, Role::Enterprise, Role::Driver] {
            let deny = authorize_track(&ctx(700, role), 9, Some(&record)).unwrap_err();
            assert!(matches!(deny, Deny::Unauthorized { .. }));
            assert!(deny.is_security_event());
        }
    }

    #[test]
    fn track_unknown_delivery_is_not_found() {
        let deny = authorize_track(&ctx(1, Role::Admin), 9, None).unwrap_err();
        assert_eq!(deny, Deny::NotFound { delivery_id: 9 });
    }
}
