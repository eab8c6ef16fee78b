use envoy_fleet::device::DeviceState;
use std::time::Duration;

const INTERVAL: Duration = Duration::from_millis(60_000);

#[test]
fn three_ticks_at_120_watts_accumulate_six_wh() {
    let mut state = DeviceState::default();

    for tick in 1..=3 {
        let added = state.apply_reading(120.0, INTERVAL);
        assert!((added - 2.0).abs() < 1e-9);
        assert!((state.energy_wh - 2.0 * f64::from(tick)).abs() < 1e-9);
    }

    assert!((state.energy_wh - 6.0).abs() < 1e-9);
    assert!((state.energy_kwh() - 0.006).abs() < 1e-12);
    assert!((state.power_w - 120.0).abs() < 1e-9);
    assert!(state.available);
}

#[test]
fn counter_never_decreases() {
    let mut state = DeviceState::with_energy(5.0);
    let mut last = state.energy_wh;
    for watts in [300.0, 0.0, -20.0, 15.5, 0.0] {
        state.apply_reading(watts, INTERVAL);
        assert!(state.energy_wh >= last);
        last = state.energy_wh;
    }
}

#[test]
fn unavailable_keeps_values() {
    let mut state = DeviceState::default();
    state.apply_reading(42.0, INTERVAL);
    state.mark_unavailable();

    assert!(!state.available);
    assert!((state.power_w - 42.0).abs() < 1e-9);
    assert!(state.energy_wh > 0.0);

    state.reset_energy();
    assert_eq!(state.energy_wh, 0.0);
}

#[test]
fn restored_counter_is_clamped_to_zero() {
    let state = DeviceState::with_energy(-3.0);
    assert_eq!(state.energy_wh, 0.0);
    assert!(!state.available);
}
