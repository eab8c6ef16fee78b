mod common;

use common::{FakeConnector, PASSWORD, table, table_with_account};
use envoy_fleet::device::ManagedDevice;
use envoy_fleet::error::FleetError;
use envoy_fleet::pairing::PairingSession;
use std::sync::Arc;

#[tokio::test]
async fn listing_requires_login() {
    let connector = FakeConnector::new();
    let pairing = PairingSession::new(Arc::new(connector), table(&[("A", "10.0.0.5")]));

    let err = pairing.list_devices().await.unwrap_err();
    assert!(matches!(err, FleetError::Auth { .. }));
}

#[tokio::test]
async fn failed_login_returns_false() {
    let connector = FakeConnector::new();
    let mut pairing = PairingSession::new(Arc::new(connector), table(&[]));

    assert!(!pairing.login("owner@example.com", "wrong").await);
    assert!(!pairing.is_logged_in());
}

#[tokio::test]
async fn lists_inverters_of_every_reachable_gateway() {
    let connector = FakeConnector::new();
    connector.set_readings("A", &[("S1", 0.0), ("S2", 0.0)]);
    connector.set_readings("B", &[("S3", 0.0)]);
    connector.set_unreachable("10.0.0.7");
    let discovery = table(&[("A", "10.0.0.5"), ("B", "10.0.0.6"), ("C", "10.0.0.7")]);
    let mut pairing = PairingSession::new(Arc::new(connector.clone()), discovery);

    assert!(pairing.login("owner@example.com", PASSWORD).await);
    let candidates = pairing.list_devices().await.unwrap();

    let serials: Vec<_> = candidates.iter().map(|c| c.serial.as_str()).collect();
    assert_eq!(serials, vec!["S1", "S2", "S3"]);
    let s3 = &candidates[2];
    assert_eq!(s3.name, "IQ S3");
    assert_eq!(s3.settings.id, "B");
    assert_eq!(s3.settings.address, "10.0.0.6");
    assert_eq!(s3.settings.username, "owner@example.com");
    assert_eq!(s3.settings.password, PASSWORD);
    // The unreachable gateway was tried and skipped
    assert!(connector.connects().iter().any(|c| c.0 == "C"));

    let device: ManagedDevice = candidates[0].clone().into();
    assert_eq!(device.name, "IQ S1");
    assert_eq!(device.endpoint_id(), "A");
}

#[tokio::test]
async fn gateway_with_its_own_account_pairs_under_it() {
    let connector = FakeConnector::new();
    connector.set_readings("A", &[("S1", 0.0)]);
    let discovery = table_with_account("A", "10.0.0.5", "installer@example.com");
    let mut pairing = PairingSession::new(Arc::new(connector.clone()), discovery);

    assert!(pairing.login("owner@example.com", PASSWORD).await);
    let candidates = pairing.list_devices().await.unwrap();

    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].settings.username, "installer@example.com");
    assert_eq!(connector.connects()[0].2, "installer@example.com");
}
