mod common;

use common::{FakeConnector, MemoryHost, device, driver, table};
use envoy_fleet::gateway::SessionState;

#[tokio::test]
async fn failing_endpoint_does_not_stop_the_others() {
    let connector = FakeConnector::new();
    connector.set_readings("A", &[("S1", 300.0)]);
    connector.set_readings("B", &[("S2", 150.0)]);
    let discovery = table(&[("A", "10.0.0.5"), ("B", "10.0.0.6")]);
    let host = MemoryHost::new();
    let mut driver = driver(&connector, &discovery, &host);
    driver.start().await.unwrap();
    driver.add_device(device("S1", "A", "10.0.0.5")).await.unwrap();
    driver.add_device(device("S2", "B", "10.0.0.6")).await.unwrap();

    connector.fail_fetches("B");
    let report = driver.poll_once().await;

    assert_eq!(report.endpoints_polled, 1);
    assert_eq!(report.endpoints_failed, 1);
    assert_eq!(report.devices_updated, vec!["S1".to_string()]);
    assert!((driver.device("S1").unwrap().state.power_w - 300.0).abs() < 1e-9);
    assert!(matches!(driver.session_state("B"), SessionState::Failed(_)));
    // S2 keeps its last reading and availability
    let s2 = &driver.device("S2").unwrap().state;
    assert!((s2.power_w - 150.0).abs() < 1e-9);
    assert!(s2.available);
}

#[tokio::test]
async fn failed_endpoint_is_skipped_on_later_ticks() {
    let connector = FakeConnector::new();
    connector.set_readings("A", &[("S1", 300.0)]);
    connector.set_readings("B", &[("S2", 150.0)]);
    let discovery = table(&[("A", "10.0.0.5"), ("B", "10.0.0.6")]);
    let host = MemoryHost::new();
    let mut driver = driver(&connector, &discovery, &host);
    driver.start().await.unwrap();
    driver.add_device(device("S1", "A", "10.0.0.5")).await.unwrap();
    driver.add_device(device("S2", "B", "10.0.0.6")).await.unwrap();
    connector.fail_fetches("B");
    driver.poll_once().await;

    let before = connector.production_fetches();
    let report = driver.poll_once().await;

    // Only A was contacted
    assert_eq!(connector.production_fetches(), before + 1);
    assert_eq!(report.endpoints_polled, 1);
    assert_eq!(report.endpoints_failed, 0);
    assert!(driver.scheduler().is_running());
}

#[tokio::test]
async fn device_without_reading_is_left_untouched() {
    let connector = FakeConnector::new();
    connector.set_readings("A", &[("S1", 90.0)]);
    let discovery = table(&[("A", "10.0.0.5")]);
    let host = MemoryHost::new();
    let mut driver = driver(&connector, &discovery, &host);
    driver.start().await.unwrap();
    driver.add_device(device("S1", "A", "10.0.0.5")).await.unwrap();
    driver.add_device(device("S3", "A", "10.0.0.5")).await.unwrap();

    let report = driver.poll_once().await;

    assert_eq!(report.devices_updated, vec!["S1".to_string()]);
    let s3 = &driver.device("S3").unwrap().state;
    assert_eq!(s3.power_w, 0.0);
    assert_eq!(s3.energy_wh, 0.0);
    assert!(!s3.available);
    assert_eq!(host.capability("S3", "measure_power"), None);
    assert_eq!(host.is_available("S3"), None);
}

#[tokio::test]
async fn same_serial_on_two_gateways_updates_once() {
    let connector = FakeConnector::new();
    connector.set_readings("A", &[("S1", 100.0)]);
    connector.set_readings("B", &[("S1", 100.0), ("S2", 5.0)]);
    let discovery = table(&[("A", "10.0.0.5"), ("B", "10.0.0.6")]);
    let host = MemoryHost::new();
    let mut driver = driver(&connector, &discovery, &host);
    driver.start().await.unwrap();
    driver.add_device(device("S1", "A", "10.0.0.5")).await.unwrap();
    driver.add_device(device("S2", "B", "10.0.0.6")).await.unwrap();
    let before = driver.device("S1").unwrap().state.energy_wh;

    let report = driver.poll_once().await;

    assert_eq!(report.endpoints_polled, 2);
    assert_eq!(
        report.devices_updated,
        vec!["S1".to_string(), "S2".to_string()]
    );
    let after = driver.device("S1").unwrap().state.energy_wh;
    assert!((after - before - 100.0 / 60.0).abs() < 1e-9);
}

#[tokio::test]
async fn host_failures_do_not_abort_the_tick() {
    let connector = FakeConnector::new();
    connector.set_readings("A", &[("S1", 50.0), ("S2", 60.0)]);
    let discovery = table(&[("A", "10.0.0.5")]);
    let host = MemoryHost::new();
    let mut driver = driver(&connector, &discovery, &host);
    driver.start().await.unwrap();
    driver.add_device(device("S1", "A", "10.0.0.5")).await.unwrap();
    driver.add_device(device("S2", "A", "10.0.0.5")).await.unwrap();
    host.break_device("S1");

    let report = driver.poll_once().await;

    assert_eq!(report.devices_updated.len(), 2);
    assert_eq!(host.capability("S2", "measure_power"), Some(60.0));
    // In-memory state still advanced for the device the host rejected
    assert!((driver.device("S1").unwrap().state.power_w - 50.0).abs() < 1e-9);
}

#[tokio::test]
async fn poll_without_devices_contacts_nothing() {
    let connector = FakeConnector::new();
    let discovery = table(&[("A", "10.0.0.5")]);
    let host = MemoryHost::new();
    let mut driver = driver(&connector, &discovery, &host);
    driver.start().await.unwrap();

    let report = driver.poll_once().await;

    assert_eq!(report.endpoints_polled, 0);
    assert!(report.devices_updated.is_empty());
    assert_eq!(connector.production_fetches(), 0);
    assert_eq!(driver.total_polls(), 0);
}

#[tokio::test]
async fn snapshot_reflects_sessions_and_devices() {
    let connector = FakeConnector::new();
    connector.set_readings("A", &[("S1", 250.0)]);
    let discovery = table(&[("A", "10.0.0.5")]);
    let host = MemoryHost::new();
    let mut driver = driver(&connector, &discovery, &host);
    let handle = driver.handle();
    driver.start().await.unwrap();
    driver.add_device(device("S1", "A", "10.0.0.5")).await.unwrap();

    let snapshot = handle.snapshot();
    assert_eq!(snapshot.driver_state, "Running");
    assert!(snapshot.polling);
    assert_eq!(snapshot.total_polls, 1);
    assert_eq!(snapshot.endpoints.len(), 1);
    assert_eq!(snapshot.endpoints[0].session, "established");
    assert_eq!(snapshot.endpoints[0].devices, 1);
    assert_eq!(snapshot.devices[0].serial, "S1");
    assert_eq!(snapshot.devices[0].name, "IQ S1");
    assert!((snapshot.devices[0].power_w - 250.0).abs() < 1e-9);
}
