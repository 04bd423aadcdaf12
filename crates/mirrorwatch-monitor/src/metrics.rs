//! Prometheus metrics for the monitor.
//!
//! Metric names follow `mirrorwatch_<object>_<metric>`. All updates are
//! fire-and-forget.

use std::collections::BTreeMap;

use mirrorwatch_control::{EndpointState, Machine};
use prometheus::{Encoder, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::{MonitorError, Result};

/// Monitor metrics and the registry that owns them.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    machines: IntGauge,
    machines_active: IntGauge,
    machines_by_segment: IntGaugeVec,
    machines_by_role: IntGaugeVec,
    endpoints_by_state: IntGaugeVec,
    messages: IntCounterVec,
}

impl Metrics {
    /// Create and register every metric.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Metrics` if a metric cannot be registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let machines = IntGauge::new(
            "mirrorwatch_machines_total",
            "Machines reported by the last controller poll",
        )?;
        let machines_active = IntGauge::new(
            "mirrorwatch_machines_active",
            "Active machines reported by the last controller poll",
        )?;
        let machines_by_segment = IntGaugeVec::new(
            Opts::new(
                "mirrorwatch_machines_by_segment",
                "Machines per switch in the last controller poll",
            ),
            &["segment"],
        )?;
        let machines_by_role = IntGaugeVec::new(
            Opts::new(
                "mirrorwatch_machines_by_role",
                "Machines per controller-reported role in the last poll",
            ),
            &["role"],
        )?;
        let endpoints_by_state = IntGaugeVec::new(
            Opts::new("mirrorwatch_endpoints", "Tracked endpoints per lifecycle state"),
            &["state"],
        )?;
        let messages = IntCounterVec::new(
            Opts::new("mirrorwatch_bus_messages_total", "Bus messages handled per kind"),
            &["kind"],
        )?;

        registry.register(Box::new(machines.clone()))?;
        registry.register(Box::new(machines_active.clone()))?;
        registry.register(Box::new(machines_by_segment.clone()))?;
        registry.register(Box::new(machines_by_role.clone()))?;
        registry.register(Box::new(endpoints_by_state.clone()))?;
        registry.register(Box::new(messages.clone()))?;

        Ok(Self {
            registry,
            machines,
            machines_active,
            machines_by_segment,
            machines_by_role,
            endpoints_by_state,
            messages,
        })
    }

    /// Set the machine gauges from one controller poll.
    pub fn update_metrics(&self, machines: &[Machine]) {
        let mut by_segment: BTreeMap<&str, i64> = BTreeMap::new();
        let mut by_role: BTreeMap<&str, i64> = BTreeMap::new();
        let mut active = 0_i64;

        for machine in machines {
            if machine.active {
                active += 1;
            }
            *by_segment.entry(machine.segment.as_str()).or_default() += 1;
            *by_role
                .entry(machine.role.as_deref().unwrap_or("unknown"))
                .or_default() += 1;
        }

        self.machines
            .set(i64::try_from(machines.len()).unwrap_or(i64::MAX));
        self.machines_active.set(active);

        self.machines_by_segment.reset();
        for (segment, count) in by_segment {
            self.machines_by_segment
                .with_label_values(&[segment])
                .set(count);
        }
        self.machines_by_role.reset();
        for (role, count) in by_role {
            self.machines_by_role.with_label_values(&[role]).set(count);
        }
    }

    /// Set the endpoint-by-state gauge.
    pub fn update_endpoints(&self, counts: &BTreeMap<EndpointState, usize>) {
        for (state, count) in counts {
            self.endpoints_by_state
                .with_label_values(&[state.as_str()])
                .set(i64::try_from(*count).unwrap_or(i64::MAX));
        }
    }

    /// Count one handled bus message.
    pub fn record_message(&self, kind: &str) {
        self.messages.with_label_values(&[kind]).inc();
    }

    /// Handled message count for `kind`.
    #[must_use]
    pub fn message_count(&self, kind: &str) -> u64 {
        self.messages.with_label_values(&[kind]).get()
    }

    /// Encode every metric in the Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns `MonitorError::Metrics` if encoding fails.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| MonitorError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(mac: &str, segment: &str, active: bool) -> Machine {
        Machine {
            active,
            mac: mac.into(),
            segment: segment.into(),
            ..Machine::default()
        }
    }

    #[test]
    fn machine_gauges() {
        let metrics = Metrics::new().unwrap();
        metrics.update_metrics(&[
            machine("00:00:00:00:00:01", "switch1", true),
            machine("00:00:00:00:00:02", "switch1", false),
            machine("00:00:00:00:00:03", "switch2", true),
        ]);

        let text = metrics.encode().unwrap();
        assert!(text.contains("mirrorwatch_machines_total 3"));
        assert!(text.contains("mirrorwatch_machines_active 2"));
        assert!(text.contains("mirrorwatch_machines_by_segment{segment=\"switch1\"} 2"));
        assert!(text.contains("mirrorwatch_machines_by_role{role=\"unknown\"} 3"));

        metrics.update_metrics(&[machine("00:00:00:00:00:03", "switch2", true)]);
        let text = metrics.encode().unwrap();
        assert!(!text.contains("segment=\"switch1\""));
    }

    #[test]
    fn endpoint_and_message_counters() {
        let metrics = Metrics::new().unwrap();
        let counts = EndpointState::ALL.iter().map(|s| (*s, 1)).collect();
        metrics.update_endpoints(&counts);
        metrics.record_message("ignore");
        metrics.record_message("ignore");

        assert_eq!(metrics.message_count("ignore"), 2);
        let text = metrics.encode().unwrap();
        assert!(text.contains("mirrorwatch_endpoints{state=\"known\"} 1"));
        assert!(text.contains("mirrorwatch_bus_messages_total{kind=\"ignore\"} 2"));
    }
}
