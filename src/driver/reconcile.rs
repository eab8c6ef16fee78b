//! Reconciliation: map one tick's readings onto managed devices by serial

use super::{FleetDriver, TickReport};
use crate::host::{CAP_MEASURE_POWER, CAP_METER_POWER, STORE_METER_WH};
use std::collections::HashMap;

impl FleetDriver {
    /// Run one reconciliation pass.
    ///
    /// Production is fetched from every established session concurrently;
    /// readings are applied only once all fetches finished or failed. A
    /// failing endpoint degrades its own session and is skipped, devices
    /// without a reading this tick keep their last values.
    pub async fn poll_once(&mut self) -> TickReport {
        let mut report = TickReport::default();
        if self.devices.is_empty() {
            self.logger.trace("Poll skipped, no managed devices");
            return report;
        }

        let mut readings: HashMap<String, f64> = HashMap::new();
        for (endpoint_id, result) in self.registry.fetch_all_production().await {
            match result {
                Ok(batch) => {
                    report.endpoints_polled += 1;
                    for reading in batch {
                        // Last writer wins if two gateways report the same serial
                        readings.insert(reading.serial, reading.watts);
                    }
                }
                Err(e) => {
                    report.endpoints_failed += 1;
                    self.logger.warn(&format!(
                        "Skipping endpoint {} this tick: {}",
                        endpoint_id, e
                    ));
                }
            }
        }

        for serial in self.devices.serials() {
            let Some(&watts) = readings.get(&serial) else {
                continue;
            };
            let Some(device) = self.devices.get_mut(&serial) else {
                continue;
            };
            device.state.apply_reading(watts, self.poll_interval);
            let energy_wh = device.state.energy_wh;
            let energy_kwh = device.state.energy_kwh();

            self.push_reading(&serial, watts, energy_wh, energy_kwh)
                .await;
            report.devices_updated.push(serial);
        }

        self.total_polls = self.total_polls.saturating_add(1);
        self.logger.debug(&format!(
            "Poll {}: {} endpoints polled, {} failed, {} devices updated",
            self.total_polls,
            report.endpoints_polled,
            report.endpoints_failed,
            report.devices_updated.len()
        ));
        self.last_tick = Some(report.clone());
        self.publish_snapshot();
        report
    }

    /// Push one device's values to the host. Every failure is logged on its
    /// own and the remaining pushes still run.
    async fn push_reading(&self, serial: &str, watts: f64, energy_wh: f64, energy_kwh: f64) {
        let host = &self.host;
        self.report_propagation(
            serial,
            host.set_capability_value(serial, CAP_MEASURE_POWER, watts)
                .await,
        );
        self.report_propagation(
            serial,
            host.set_store_value(serial, STORE_METER_WH, energy_wh)
                .await,
        );
        self.report_propagation(
            serial,
            host.set_capability_value(serial, CAP_METER_POWER, energy_kwh)
                .await,
        );
        self.report_propagation(serial, host.set_available(serial).await);
    }
}
