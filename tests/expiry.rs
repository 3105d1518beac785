//! Lost fragments and the reassembly timeout.

use std::time::{Duration, Instant};

use frag_testing::{TestStack, datagram, fragment_frames, netif, stack_with, test_stack};
use rstest::rstest;
use sixlowpan_frag::{
    FragConfig,
    ReassemblyConfig,
    ReassemblyError,
    Received,
    StackEvent,
};

const TIMEOUT: Duration = Duration::from_secs(3);

#[rstest]
fn missing_fragment_expires_after_timeout(mut test_stack: TestStack) {
    let frames = fragment_frames(&datagram(300), 0x0101, 100);
    let start = Instant::now();
    for (i, frame) in frames.iter().enumerate() {
        if i == 2 {
            continue;
        }
        test_stack
            .receive_frame_at(netif(), frame, 0, start)
            .expect("fragment accepted");
    }
    assert_eq!(test_stack.rbuf().len(), 1);

    assert_eq!(test_stack.gc_at(start + TIMEOUT - Duration::from_millis(1)), 0);
    assert_eq!(test_stack.rbuf().len(), 1);

    assert_eq!(test_stack.gc_at(start + TIMEOUT), 1);
    assert!(test_stack.rbuf().is_empty());
    assert!(test_stack.upstream().datagrams.is_empty());
    assert!(test_stack.pktbuf().is_empty());
}

#[rstest]
fn late_fragment_after_expiry_starts_over(mut test_stack: TestStack) {
    let frames = fragment_frames(&datagram(300), 0x0202, 100);
    let start = Instant::now();
    test_stack
        .receive_frame_at(netif(), &frames[0], 0, start)
        .expect("accepted");

    let late = start + TIMEOUT + Duration::from_secs(1);
    let status = test_stack
        .receive_frame_at(netif(), &frames[1], 0, late)
        .expect("accepted");

    assert!(matches!(status, Received::Incomplete));
    let entry = test_stack.rbuf().entries().next().expect("fresh entry");
    assert_eq!(usize::from(entry.current_size()), frames[1].len() - 5);
    assert_eq!(entry.arrival(), late);
}

#[rstest]
fn each_fragment_refreshes_the_deadline(mut test_stack: TestStack) {
    let frames = fragment_frames(&datagram(300), 0x0303, 100);
    let start = Instant::now();
    let step = Duration::from_secs(2);

    for (i, frame) in frames.iter().enumerate() {
        let at = start + step * u32::try_from(i).expect("few frames");
        test_stack.handle_at(StackEvent::GcRbuf, at);
        test_stack
            .receive_frame_at(netif(), frame, 0, at)
            .expect("accepted");
    }

    assert_eq!(test_stack.upstream().datagrams.len(), 1);
    assert_eq!(test_stack.upstream().datagrams[0].payload, datagram(300));
}

#[test]
fn full_table_without_override_rejects_new_datagrams() {
    let reassembly = ReassemblyConfig::default()
        .with_capacity(1)
        .with_aggressive_override(false);
    let mut stack = stack_with(FragConfig::default().with_reassembly(reassembly));
    let start = Instant::now();
    let first = fragment_frames(&datagram(300), 1, 100);
    let second = fragment_frames(&datagram(300), 2, 100);

    stack
        .receive_frame_at(netif(), &first[0], 0, start)
        .expect("accepted");
    let err = stack
        .receive_frame_at(netif(), &second[0], 0, start + Duration::from_secs(1))
        .expect_err("table is full");
    assert_eq!(err, ReassemblyError::TableFull);

    // Once the first entry is stale the table makes room again.
    stack
        .receive_frame_at(netif(), &second[0], 0, start + TIMEOUT)
        .expect("stale entry evicted");
    assert_eq!(stack.rbuf().len(), 1);
    assert!(stack.rbuf().entries().all(|entry| entry.key().tag.get() == 2));
}

#[test]
fn full_table_with_override_evicts_oldest() {
    let reassembly = ReassemblyConfig::default().with_capacity(2);
    let mut stack = stack_with(FragConfig::default().with_reassembly(reassembly));
    let start = Instant::now();

    for (tag, offset) in [(1_u16, 0_u64), (2, 1), (3, 2)] {
        let frames = fragment_frames(&datagram(300), tag, 100);
        stack
            .receive_frame_at(netif(), &frames[0], 0, start + Duration::from_millis(offset))
            .expect("accepted");
    }

    let mut tags: Vec<u16> = stack.rbuf().entries().map(|entry| entry.key().tag.get()).collect();
    tags.sort_unstable();
    assert_eq!(tags, vec![2, 3]);
    assert!(stack.pktbuf().used() > 0);
}
