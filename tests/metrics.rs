#![cfg(feature = "metrics")]
//! Tests for the stack's metrics.
//!
//! These tests verify that counters and gauges update as expected using
//! `metrics_util::debugging::DebuggingRecorder`.
use std::time::{Duration, Instant};

use frag_testing::{
    MetricsSnapshot,
    datagram,
    debugging_recorder_setup,
    fragment_frames,
    netif,
    stack_with,
};
use rstest::rstest;
use sixlowpan_frag::{
    FragConfig,
    ReassemblyConfig,
    metrics::{
        DATAGRAMS_TOTAL,
        DROPPED_TOTAL,
        Direction,
        EVICTIONS_TOTAL,
        FRAGMENTS_TOTAL,
        REASSEMBLY_ACTIVE,
    },
};

#[test]
fn fragmenting_counts_outbound_fragments_and_datagrams() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let mut stack = stack_with(FragConfig::default());

    metrics::with_local_recorder(&recorder, || {
        stack
            .send_datagram(netif(), &datagram(300), None)
            .expect("accepted");
        stack.run_pending();
    });
    let snapshot = MetricsSnapshot::take(&snapshotter);

    let outbound = Some(("direction", Direction::Outbound.as_str()));
    assert_eq!(snapshot.counter(FRAGMENTS_TOTAL, outbound), 4);
    assert_eq!(snapshot.counter(DATAGRAMS_TOTAL, outbound), 1);
    assert_eq!(snapshot.counter(DROPPED_TOTAL, None), 0);
}

#[test]
fn reassembly_counts_inbound_fragments_and_datagrams() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let mut stack = stack_with(FragConfig::default());
    let frames = fragment_frames(&datagram(300), 7, 100);

    metrics::with_local_recorder(&recorder, || {
        for frame in &frames {
            stack.receive_frame(netif(), frame, 0).expect("accepted");
        }
    });
    let snapshot = MetricsSnapshot::take(&snapshotter);

    let inbound = Some(("direction", Direction::Inbound.as_str()));
    assert_eq!(snapshot.counter(FRAGMENTS_TOTAL, inbound), 4);
    assert_eq!(snapshot.counter(DATAGRAMS_TOTAL, inbound), 1);
}

#[rstest]
#[case(vec![0xc1], "malformed")]
#[case(vec![0x02, 0x00], "malformed")]
fn malformed_frames_are_counted(#[case] frame: Vec<u8>, #[case] reason: &str) {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let mut stack = stack_with(FragConfig::default());

    metrics::with_local_recorder(&recorder, || {
        let _ = stack.receive_frame(netif(), &frame, 0);
    });
    let snapshot = MetricsSnapshot::take(&snapshotter);

    assert_eq!(snapshot.counter(DROPPED_TOTAL, Some(("reason", reason))), 1);
}

#[test]
fn full_table_and_timeouts_are_counted() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let reassembly = ReassemblyConfig::default()
        .with_capacity(1)
        .with_aggressive_override(false);
    let mut stack = stack_with(FragConfig::default().with_reassembly(reassembly));
    let start = Instant::now();

    metrics::with_local_recorder(&recorder, || {
        for tag in [1, 2] {
            let frames = fragment_frames(&datagram(300), tag, 100);
            let _ = stack.receive_frame_at(netif(), &frames[0], 0, start);
        }
        stack.gc_at(start + Duration::from_secs(3));
    });
    let snapshot = MetricsSnapshot::take(&snapshotter);

    assert_eq!(snapshot.counter(DROPPED_TOTAL, Some(("reason", "rbuf_full"))), 1);
    assert_eq!(snapshot.counter(EVICTIONS_TOTAL, None), 1);
    let active = snapshot.gauge(REASSEMBLY_ACTIVE);
    assert!(
        active.is_some_and(|level| level.abs() < f64::EPSILON),
        "expected an empty reassembly table, got {active:?}"
    );
}

#[test]
fn dropped_datagrams_are_counted_by_reason() {
    let (snapshotter, recorder) = debugging_recorder_setup();
    let mut stack = stack_with(FragConfig::default());

    metrics::with_local_recorder(&recorder, || {
        stack
            .send_datagram(netif(), &datagram(300), None)
            .expect("accepted");
        let _ = stack.send_datagram(netif(), &datagram(300), None);
        stack.run_pending();
    });
    let snapshot = MetricsSnapshot::take(&snapshotter);

    assert_eq!(snapshot.counter(DROPPED_TOTAL, Some(("reason", "fbuf_full"))), 1);
    let outbound = Some(("direction", Direction::Outbound.as_str()));
    assert_eq!(snapshot.counter(DATAGRAMS_TOTAL, outbound), 1);
}
