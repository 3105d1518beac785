//! End-to-end tests for outgoing fragmentation through a [`Stack`].

use std::time::Duration;

use frag_testing::{
    SentFrame,
    TestStack,
    datagram,
    netif,
    stack_with,
    test_interface,
    test_stack,
};
use proptest::{
    prelude::*,
    test_runner::{RngAlgorithm, TestRng, TestRunner},
};
use rstest::rstest;
use sixlowpan_frag::{
    DatagramTag,
    FragConfig,
    FragmentHeader,
    Interface,
    NetType,
    Received,
    SendError,
    TxSync,
};

fn send_all(stack: &mut TestStack, data: &[u8], sync: Option<&TxSync>) -> Vec<SentFrame> {
    stack.send_datagram(netif(), data, sync).expect("datagram accepted");
    stack.run_pending();
    stack.link_mut().take()
}

fn headers(frames: &[SentFrame]) -> Vec<FragmentHeader> {
    frames
        .iter()
        .map(|frame| FragmentHeader::decode(&frame.bytes).expect("fragment header"))
        .collect()
}

#[rstest]
fn splits_300_bytes_over_100_byte_frames(mut test_stack: TestStack) {
    let data = datagram(300);
    let frames = send_all(&mut test_stack, &data, None);

    let headers = headers(&frames);
    let offsets: Vec<u16> = headers.iter().map(FragmentHeader::offset).collect();
    assert_eq!(offsets, vec![0, 88, 176, 264]);
    assert!(headers[0].is_first());
    assert!(headers.iter().all(|header| header.datagram_size() == 300));
    assert!(headers.iter().all(|header| header.tag() == DatagramTag::new(0)));

    let payloads: Vec<usize> = frames
        .iter()
        .zip(&headers)
        .map(|(frame, header)| frame.bytes.len() - header.len())
        .collect();
    // The first fragment also carries the dispatch byte.
    assert_eq!(payloads, vec![89, 88, 88, 36]);

    let more: Vec<bool> = frames.iter().map(|frame| frame.netif.more_data).collect();
    assert_eq!(more, vec![true, true, true, false]);
    assert!(test_stack.pktbuf().is_empty());
}

#[rstest]
#[case(98, 1)]
#[case(99, 1)]
#[case(100, 2)]
#[case(1280, 15)]
fn capacity_boundary_decides_fragmentation(
    mut test_stack: TestStack,
    #[case] len: usize,
    #[case] expected: usize,
) {
    let frames = send_all(&mut test_stack, &datagram(len), None);
    assert_eq!(frames.len(), expected);
    assert!(frames.iter().all(|frame| frame.bytes.len() <= 100));
    if expected == 1 {
        assert_eq!(frames[0].bytes[0], 0x41);
        assert!(!frames[0].netif.more_data);
    } else {
        assert!(headers(&frames)[0].is_first());
    }
}

#[test]
fn offsets_are_aligned_and_contiguous_for_any_frame_size() {
    let config = ProptestConfig {
        cases: 96,
        ..ProptestConfig::default()
    };
    let mut runner =
        TestRunner::new_with_rng(config, TestRng::deterministic_rng(RngAlgorithm::ChaCha));
    let strategy = (100_usize..=1280, 24_u16..=127);

    runner
        .run(&strategy, |(len, frame_size)| {
            let mut stack = stack_with(FragConfig::default());
            stack.add_interface(Interface::new(
                netif().iface,
                frame_size,
                test_interface().l2addr,
            ));
            let data = datagram(len);
            let frames = send_all(&mut stack, &data, None);
            prop_assume!(frames.len() > 1);

            let mut rebuilt = Vec::new();
            for (frame, header) in frames.iter().zip(headers(&frames)) {
                prop_assert!(frame.bytes.len() <= usize::from(frame_size));
                let payload = &frame.bytes[header.len()..];
                if header.is_first() {
                    prop_assert_eq!(payload[0], 0x41);
                    rebuilt.extend_from_slice(&payload[1..]);
                } else {
                    prop_assert_eq!(header.offset() % 8, 0);
                    prop_assert_eq!(usize::from(header.offset()), rebuilt.len());
                    rebuilt.extend_from_slice(payload);
                }
            }
            prop_assert_eq!(rebuilt, data);
            prop_assert!(stack.pktbuf().is_empty());
            Ok(())
        })
        .expect("offsets should follow the payload");
}

#[rstest]
fn tx_sync_rides_on_exactly_one_frame(mut test_stack: TestStack) {
    let sync = TxSync::new();
    let frames = send_all(&mut test_stack, &datagram(500), Some(&sync));

    let carriers: Vec<usize> = frames
        .iter()
        .enumerate()
        .filter_map(|(i, frame)| frame.carried_sync.then_some(i))
        .collect();
    assert_eq!(carriers, vec![frames.len() - 1]);
    assert!(sync.is_unlocked());
}

#[tokio::test]
async fn tx_sync_wakes_waiter_once_datagram_is_sent() {
    let mut stack = stack_with(FragConfig::default());
    let sync = TxSync::new();
    stack
        .send_datagram(netif(), &datagram(300), Some(&sync))
        .expect("accepted");

    let pending = tokio::time::timeout(Duration::from_millis(10), sync.wait()).await;
    assert!(pending.is_err(), "fragments are still queued");

    stack.run_pending();
    tokio::time::timeout(Duration::from_millis(10), sync.wait())
        .await
        .expect("sync should be unlocked after the last fragment");
}

#[rstest]
fn dropped_datagram_unlocks_sync(mut test_stack: TestStack) {
    test_stack.link_mut().reject_after = Some(2);
    let sync = TxSync::new();

    test_stack
        .send_datagram(netif(), &datagram(300), Some(&sync))
        .expect("first fragment accepted");
    test_stack.run_pending();

    assert_eq!(test_stack.link().frames.len(), 2);
    assert!(test_stack.link().frames.iter().all(|frame| !frame.carried_sync));
    assert!(sync.is_unlocked());
    assert!(test_stack.pktbuf().is_empty());
}

#[test]
fn exhausted_packet_buffer_drops_datagram() {
    let mut stack = stack_with(FragConfig::default().with_pktbuf_size(256));
    let sync = TxSync::new();

    let err = stack
        .send_datagram(netif(), &datagram(300), Some(&sync))
        .expect_err("datagram does not fit");

    assert!(matches!(err, SendError::PktBuf(_)));
    assert!(sync.is_unlocked());
    assert!(stack.link().frames.is_empty());
    assert!(stack.pktbuf().is_empty());
}

#[rstest]
#[case(300)]
#[case(1280)]
fn fragments_reassemble_on_a_peer(mut test_stack: TestStack, #[case] len: usize) {
    let data = datagram(len);
    let frames = send_all(&mut test_stack, &data, None);
    let mut peer = stack_with(FragConfig::default());

    let complete = frames
        .iter()
        .map(|frame| peer.receive_frame(frame.netif, &frame.bytes, 0).expect("accepted"))
        .filter(|status| matches!(status, Received::Delivered { accepted: true, .. }))
        .count();

    assert_eq!(complete, 1);
    let delivered = &peer.upstream().datagrams;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].nettype, NetType::Ipv6);
    assert_eq!(delivered[0].payload, data);
    assert!(peer.pktbuf().is_empty());
}
