//! Server runtime wiring tests.
//!
//! End-to-end QUIC flows are covered by driving the dispatcher directly in
//! `fleetframe-core`; these tests cover the runtime's own responsibilities:
//! configuration validation and wiring.

use fleetframe_core::{CoreConfig, DeliveryOwnership, DeliveryStore};
use fleetframe_proto::DeliveryStatus;
use fleetframe_server::{Server, ServerError, ServerRuntimeConfig};

fn config(bind: &str, secret: &str) -> ServerRuntimeConfig {
    ServerRuntimeConfig {
        bind_address: bind.to_string(),
        jwt_secret: secret.to_string(),
        core: CoreConfig::default(),
        ..ServerRuntimeConfig::default()
    }
}

#[tokio::test]
async fn binds_on_ephemeral_port() {
    let server = Server::bind(config("127.0.0.1:0", "test-secret")).unwrap();

    let addr = server.local_addr().unwrap();
    assert_ne!(addr.port(), 0);
    assert_eq!(server.dispatcher().connection_count(), 0);
}

#[tokio::test]
async fn empty_jwt_secret_is_refused() {
    let result = Server::bind(config("127.0.0.1:0", ""));
    assert!(matches!(result, Err(ServerError::Config(_))));
}

#[tokio::test]
async fn invalid_bind_address_is_refused() {
    let result = Server::bind(config("not-an-address", "test-secret"));
    assert!(matches!(result, Err(ServerError::Config(_))));
}

#[tokio::test]
async fn store_is_shared_with_dispatcher() {
    let server = Server::bind(config("127.0.0.1:0", "test-secret")).unwrap();

    server.store().insert_delivery(1, DeliveryOwnership {
        customer_id: 10,
        driver_id: Some(20),
        status: DeliveryStatus::Accepted,
    });

    // The dispatcher was built over the same store handle
    let record = server.store().delivery_ownership(1).unwrap().unwrap();
    assert_eq!(record.customer_id, 10);
}
