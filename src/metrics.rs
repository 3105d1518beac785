//! Metric helpers for `sixlowpan-frag`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. Without the
//! `metrics` feature the helpers compile to nothing.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the counter tracking fragments sent and received.
pub const FRAGMENTS_TOTAL: &str = "sixlowpan_frag_fragments_total";
/// Name of the counter tracking datagrams fully fragmented or reassembled.
pub const DATAGRAMS_TOTAL: &str = "sixlowpan_frag_datagrams_total";
/// Name of the counter tracking dropped fragments and datagrams.
pub const DROPPED_TOTAL: &str = "sixlowpan_frag_dropped_total";
/// Name of the counter tracking reassembly entries evicted before completion.
pub const EVICTIONS_TOTAL: &str = "sixlowpan_frag_reassembly_evictions_total";
/// Name of the gauge tracking active reassembly entries.
pub const REASSEMBLY_ACTIVE: &str = "sixlowpan_frag_reassembly_active";

/// Direction of fragment processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Fragments received from the link layer.
    Inbound,
    /// Fragments handed to the link layer.
    Outbound,
}

impl Direction {
    /// Label value used for the `direction` label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Record a fragment for the given direction.
pub fn inc_fragments(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a datagram whose fragmentation or reassembly finished.
pub fn inc_datagrams(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(DATAGRAMS_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record a drop with a short reason label.
pub fn inc_dropped(reason: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(DROPPED_TOTAL, "reason" => reason).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = reason;
}

/// Record `n` reassembly entries evicted before completion.
pub fn inc_evictions(n: usize) {
    #[cfg(feature = "metrics")]
    counter!(EVICTIONS_TOTAL).increment(u64::try_from(n).unwrap_or(u64::MAX));
    #[cfg(not(feature = "metrics"))]
    let _ = n;
}

/// Publish the number of active reassembly entries.
#[cfg_attr(
    feature = "metrics",
    expect(
        clippy::cast_precision_loss,
        reason = "entry counts are tiny and exact in f64"
    )
)]
pub fn set_reassembly_active(n: usize) {
    #[cfg(feature = "metrics")]
    gauge!(REASSEMBLY_ACTIVE).set(n as f64);
    #[cfg(not(feature = "metrics"))]
    let _ = n;
}
