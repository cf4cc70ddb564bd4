//! The `prometheus-client` backed [`MetricsSink`](crate::zonemaintenance::store::MetricsSink)
//! implementation.

use std::sync::Mutex;

use domain::base::{Name, Serial};
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use crate::zonemaintenance::store::{AttemptOutcome, MetricsSink};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
enum OutcomeLabel {
    UpToDate,
    AxfrApplied,
    IxfrApplied,
    Fallback,
    Failed,
}

impl From<AttemptOutcome> for OutcomeLabel {
    fn from(value: AttemptOutcome) -> Self {
        match value {
            AttemptOutcome::UpToDate => OutcomeLabel::UpToDate,
            AttemptOutcome::AxfrApplied => OutcomeLabel::AxfrApplied,
            AttemptOutcome::IxfrApplied => OutcomeLabel::IxfrApplied,
            AttemptOutcome::Fallback => OutcomeLabel::Fallback,
            AttemptOutcome::Failed => OutcomeLabel::Failed,
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ZoneLabel {
    zone: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct AttemptLabels {
    zone: String,
    outcome: OutcomeLabel,
}

/// A process-wide registry of refresh-engine metrics, cheaply cloneable and
/// safe to share across every zone's controller instance.
pub struct PrometheusMetrics {
    attempts: Family<AttemptLabels, Counter>,
    bytes_transferred: Family<ZoneLabel, Counter>,
    commits: Family<ZoneLabel, Counter>,
    last_committed_serial: Mutex<foldhash::HashMap<String, u32>>,
}

impl PrometheusMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let attempts = Family::<AttemptLabels, Counter>::default();
        let bytes_transferred = Family::<ZoneLabel, Counter>::default();
        let commits = Family::<ZoneLabel, Counter>::default();

        registry.register(
            "cascade_refresh_attempts",
            "Refresh attempts by outcome",
            attempts.clone(),
        );
        registry.register(
            "cascade_refresh_bytes_transferred",
            "Cumulative bytes read from a transfer stream",
            bytes_transferred.clone(),
        );
        registry.register(
            "cascade_refresh_commits",
            "Zone content commits",
            commits.clone(),
        );

        Self {
            attempts,
            bytes_transferred,
            commits,
            last_committed_serial: Mutex::default(),
        }
    }

    pub fn last_committed_serial(&self, zone: &str) -> Option<u32> {
        self.last_committed_serial.lock().unwrap().get(zone).copied()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_attempt(&self, zone: &Name<Vec<u8>>, outcome: AttemptOutcome) {
        self.attempts
            .get_or_create(&AttemptLabels {
                zone: zone.to_string(),
                outcome: outcome.into(),
            })
            .inc();
    }

    fn record_bytes(&self, zone: &Name<Vec<u8>>, bytes: u64) {
        self.bytes_transferred
            .get_or_create(&ZoneLabel {
                zone: zone.to_string(),
            })
            .inc_by(bytes);
    }

    fn record_commit(&self, zone: &Name<Vec<u8>>, serial: Serial) {
        self.commits
            .get_or_create(&ZoneLabel {
                zone: zone.to_string(),
            })
            .inc();
        self.last_committed_serial
            .lock()
            .unwrap()
            .insert(zone.to_string(), serial.into_int());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_and_commits_are_tallied() {
        let mut registry = Registry::default();
        let metrics = PrometheusMetrics::new(&mut registry);
        let zone: Name<Vec<u8>> = "example.com.".parse().unwrap();

        metrics.record_attempt(&zone, AttemptOutcome::IxfrApplied);
        metrics.record_commit(&zone, Serial::from(42u32));

        assert_eq!(metrics.last_committed_serial("example.com."), Some(42));
    }
}
