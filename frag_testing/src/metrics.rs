//! Helpers for asserting on metrics with a debugging recorder.
//!
//! Taking a snapshot drains the recorder's counters, so a test takes one
//! [`MetricsSnapshot`] after acting and queries only that.

use metrics_util::{
    CompositeKey,
    debugging::{DebugValue, DebuggingRecorder, Snapshotter},
};

/// Creates a debugging recorder and snapshotter for metrics testing.
#[must_use]
pub fn debugging_recorder_setup() -> (Snapshotter, DebuggingRecorder) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    (snapshotter, recorder)
}

/// Metric values recorded up to the moment the snapshot was taken.
#[derive(Debug)]
pub struct MetricsSnapshot {
    entries: Vec<(CompositeKey, DebugValue)>,
}

impl MetricsSnapshot {
    /// Drain the current values from `snapshotter`.
    #[must_use]
    pub fn take(snapshotter: &Snapshotter) -> Self {
        let entries = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, value)| (key, value))
            .collect();
        Self { entries }
    }

    fn named<'a>(
        &'a self,
        name: &'a str,
        label: Option<(&'a str, &'a str)>,
    ) -> impl Iterator<Item = &'a DebugValue> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.key().name() == name)
            .filter(move |(key, _)| {
                label.is_none_or(|(k, v)| {
                    key.key()
                        .labels()
                        .any(|label| label.key() == k && label.value() == v)
                })
            })
            .map(|(_, value)| value)
    }

    /// Sum of the counters named `name`, optionally restricted to those
    /// carrying the label `key=value`.
    #[must_use]
    pub fn counter(&self, name: &str, label: Option<(&str, &str)>) -> u64 {
        self.named(name, label)
            .map(|value| match value {
                DebugValue::Counter(count) => *count,
                _ => 0,
            })
            .sum()
    }

    /// Value of the gauge named `name`, if it was ever set.
    #[must_use]
    pub fn gauge(&self, name: &str) -> Option<f64> {
        self.named(name, None).find_map(|value| match value {
            DebugValue::Gauge(level) => Some(level.into_inner()),
            _ => None,
        })
    }
}
