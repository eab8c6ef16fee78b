mod common;

use common::{FakeConnector, PASSWORD, table};
use envoy_fleet::discovery::{AddressChange, DiscoveryRegistry};
use envoy_fleet::gateway::{Credentials, SessionState};

fn creds() -> Credentials {
    Credentials::new("owner@example.com", PASSWORD)
}

#[test]
fn observe_registers_each_endpoint_once() {
    let discovery = table(&[("A", "10.0.0.5"), ("B", "10.0.0.6")]);
    let mut registry = DiscoveryRegistry::new();

    let endpoints = registry.observe_endpoints(discovery.as_ref());
    assert_eq!(endpoints.len(), 2);
    assert_eq!(endpoints[0].id, "A");
    assert_eq!(registry.session_state("A"), SessionState::Absent);

    // A later announcement at a new address is not merged by observing
    discovery.announce("A", "10.0.0.7");
    let endpoints = registry.observe_endpoints(discovery.as_ref());
    assert_eq!(endpoints.len(), 2);
    assert_eq!(registry.endpoint("A").unwrap().address, "10.0.0.5");
}

#[test]
fn drift_lists_endpoints_discovery_places_elsewhere() {
    let discovery = table(&[("B", "10.0.0.6")]);
    let mut registry = DiscoveryRegistry::new();
    registry.ensure_endpoint("A", "10.0.0.5");
    registry.observe_endpoints(discovery.as_ref());
    assert!(registry.address_drift(discovery.as_ref()).is_empty());

    discovery.announce("A", "10.0.0.9");
    discovery.announce("C", "10.0.0.10");

    assert_eq!(
        registry.address_drift(discovery.as_ref()),
        vec![("A".to_string(), "10.0.0.9".to_string())]
    );
    // Reporting drift changes nothing by itself
    assert_eq!(registry.endpoint("A").unwrap().address, "10.0.0.5");
}

#[tokio::test]
async fn address_change_drops_established_session() {
    let connector = FakeConnector::new();
    let discovery = table(&[("A", "10.0.0.5")]);
    let mut registry = DiscoveryRegistry::new();
    registry.observe_endpoints(discovery.as_ref());
    let (endpoint, session) = registry.entry("A").unwrap();
    let address = endpoint.address.clone();
    session.establish(&connector, &address, &creds()).await;
    assert_eq!(registry.established_ids(), vec!["A".to_string()]);

    let change = registry.on_address_changed("A", "10.0.0.9");

    assert_eq!(change, AddressChange::Moved { session_reset: true });
    assert_eq!(registry.session_state("A"), SessionState::Absent);
    assert_eq!(registry.endpoint("A").unwrap().address, "10.0.0.9");

    // Re-establishing goes to the new address
    let (endpoint, session) = registry.entry("A").unwrap();
    let address = endpoint.address.clone();
    assert_eq!(
        session.establish(&connector, &address, &creds()).await,
        SessionState::Established
    );
    assert_eq!(connector.connects().last().unwrap().1, "10.0.0.9");
}

#[test]
fn address_change_is_idempotent_and_ignores_unknown_ids() {
    let discovery = table(&[("A", "10.0.0.5")]);
    let mut registry = DiscoveryRegistry::new();
    registry.observe_endpoints(discovery.as_ref());

    assert_eq!(
        registry.on_address_changed("A", "10.0.0.5"),
        AddressChange::Unchanged
    );
    assert_eq!(
        registry.on_address_changed("nope", "10.0.0.9"),
        AddressChange::Unknown
    );
    assert_eq!(
        registry.on_address_changed("A", "10.0.0.9"),
        AddressChange::Moved {
            session_reset: false
        }
    );
    assert_eq!(
        registry.on_address_changed("A", "10.0.0.9"),
        AddressChange::Unchanged
    );
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn fetch_all_skips_sessions_that_are_not_established() {
    let connector = FakeConnector::new();
    connector.set_readings("A", &[("S1", 1.0)]);
    connector.set_readings("B", &[("S2", 2.0)]);
    let discovery = table(&[("A", "10.0.0.5"), ("B", "10.0.0.6")]);
    let mut registry = DiscoveryRegistry::new();
    registry.observe_endpoints(discovery.as_ref());
    let (_, session) = registry.entry("A").unwrap();
    session.establish(&connector, "10.0.0.5", &creds()).await;

    let results = registry.fetch_all_production().await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].0, "A");
    assert_eq!(results[0].1.as_ref().unwrap()[0].serial, "S1");
    assert_eq!(connector.production_fetches(), 1);
}

#[tokio::test]
async fn teardown_all_resets_every_session() {
    let connector = FakeConnector::new();
    let discovery = table(&[("A", "10.0.0.5"), ("B", "10.0.0.6")]);
    let mut registry = DiscoveryRegistry::new();
    registry.observe_endpoints(discovery.as_ref());
    for id in ["A", "B"] {
        let (endpoint, session) = registry.entry(id).unwrap();
        let address = endpoint.address.clone();
        session.establish(&connector, &address, &creds()).await;
    }
    assert_eq!(registry.established_ids().len(), 2);

    registry.teardown_all();

    assert!(registry.established_ids().is_empty());
    assert!(registry.contains("A"));
}

#[test]
fn ensure_endpoint_keeps_known_addresses() {
    let discovery = table(&[("A", "10.0.0.5")]);
    let mut registry = DiscoveryRegistry::new();
    registry.observe_endpoints(discovery.as_ref());

    registry.ensure_endpoint("A", "192.168.1.1");
    registry.ensure_endpoint("C", "192.168.1.2");

    assert_eq!(registry.endpoint("A").unwrap().address, "10.0.0.5");
    assert_eq!(registry.endpoint("C").unwrap().address, "192.168.1.2");
    assert_eq!(registry.len(), 2);
}
