//! Tests for outbound fragmentation.

use rstest::{fixture, rstest};

use super::{RecordingLink, netif};
use crate::{
    frag::{
        DatagramTag,
        FragmentBuffer,
        FragmentBufferPool,
        FragmentHeader,
        FragmentHint,
        FragmentProgress,
        FragmentationError,
        Fragmenter,
        LinkError,
        fragmenter::{first_fragment_capacity, subsequent_fragment_capacity},
    },
    netif::{IfaceId, Interface, L2Addr},
    pktbuf::{NetType, PacketBuffer, SnipId},
    tx_sync::{self, TxSync},
};

#[fixture]
#[allow(unused_braces)]
fn pktbuf() -> PacketBuffer { PacketBuffer::new(2048) }

fn iface(max_frag_size: u16) -> Interface {
    Interface::new(
        IfaceId::new(9),
        max_frag_size,
        L2Addr::new(&[0xa4, 0xf2]).expect("short address"),
    )
}

fn datagram(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).expect("below 251")).collect()
}

/// `[netif] -> [0x41] -> [datagram]`, as the IPv6 layer hands it down.
fn uncompressed_packet(pktbuf: &mut PacketBuffer, datagram: &[u8]) -> SnipId {
    let payload = pktbuf.add(None, datagram, NetType::Ipv6).expect("fits");
    let dispatch = pktbuf
        .add(Some(payload), &[0x41], NetType::SixLowPan)
        .expect("fits");
    pktbuf.add_netif(netif(), Some(dispatch)).expect("fits")
}

fn fbuf_for(pkt: SnipId, datagram_size: u16, hint: Option<FragmentHint>) -> FragmentBuffer {
    let mut pool = FragmentBufferPool::new(1, DatagramTag::new(0x1234));
    let id = pool
        .acquire(pkt, datagram_size, 0, hint)
        .expect("free slot");
    pool.get(id).expect("busy slot").clone()
}

fn fragment_all(
    pktbuf: &mut PacketBuffer,
    link: &mut RecordingLink,
    iface: &Interface,
    fbuf: &mut FragmentBuffer,
) -> Vec<(FragmentProgress, u16)> {
    let mut steps = Vec::new();
    loop {
        let progress = Fragmenter::new(pktbuf, link, iface)
            .send_next(fbuf)
            .expect("fragment sent");
        steps.push((progress, fbuf.offset()));
        if progress == FragmentProgress::Done {
            return steps;
        }
    }
}

#[rstest]
fn splits_300_byte_datagram_over_100_byte_frames(mut pktbuf: PacketBuffer) {
    let data = datagram(300);
    let pkt = uncompressed_packet(&mut pktbuf, &data);
    let mut fbuf = fbuf_for(pkt, 300, None);
    let mut link = RecordingLink::default();

    let steps = fragment_all(&mut pktbuf, &mut link, &iface(100), &mut fbuf);

    assert_eq!(
        steps,
        vec![
            (FragmentProgress::More, 89),
            (FragmentProgress::More, 177),
            (FragmentProgress::More, 265),
            (FragmentProgress::Done, 301),
        ]
    );
    let first = &link.frames[0].bytes;
    assert_eq!(
        FragmentHeader::decode(first).expect("valid"),
        FragmentHeader::First {
            datagram_size: 300,
            tag: DatagramTag::new(0x1234),
        }
    );
    assert!(first.len() - 4 <= 96);
    assert_eq!(first[4], 0x41);

    let mut rebuilt = first[5..].to_vec();
    for frame in &link.frames[1..] {
        let header = FragmentHeader::decode(&frame.bytes).expect("valid");
        assert_eq!(usize::from(header.offset()), rebuilt.len());
        assert!(frame.bytes.len() - 5 <= 88);
        rebuilt.extend_from_slice(&frame.bytes[5..]);
    }
    assert_eq!(rebuilt, data);
    let last = link.frames.last().expect("fragments sent");
    assert_eq!(last.bytes.len() - 5, 300 - 264);

    let more: Vec<bool> = link.frames.iter().map(|frame| frame.netif.more_data).collect();
    assert_eq!(more, vec![true, true, true, false]);
    assert!(link.frames.iter().all(|frame| frame.netif.dst == netif().dst));

    pktbuf.release(pkt).expect("fbuf still owns the packet");
    assert!(pktbuf.is_empty());
}

#[rstest]
fn wire_offsets_account_for_compression_difference(mut pktbuf: PacketBuffer) {
    let data = datagram(260);
    let payload = pktbuf.add(None, &data, NetType::SixLowPan).expect("fits");
    let pkt = pktbuf.add_netif(netif(), Some(payload)).expect("fits");
    let hint = FragmentHint {
        fragsz_uncomp: 64,
        fragsz: 24,
    };
    let mut fbuf = fbuf_for(pkt, 300, Some(hint));
    let mut link = RecordingLink::default();

    let steps = fragment_all(&mut pktbuf, &mut link, &iface(100), &mut fbuf);

    assert_eq!(steps.first(), Some(&(FragmentProgress::More, 24)));
    assert_eq!(link.frames[0].bytes.len(), 4 + 24);
    let diff = fbuf.payload_diff(260);
    assert_eq!(diff, 40);
    assert_eq!(link.frames.len(), steps.len());
    for (frame, window) in link.frames[1..].iter().zip(steps.windows(2)) {
        let header = FragmentHeader::decode(&frame.bytes).expect("valid");
        assert_eq!(header.datagram_size(), 300);
        let sent_before = i32::from(window[0].1);
        assert_eq!(i32::from(header.offset()), sent_before + diff);
    }
    pktbuf.release(pkt).expect("live");
}

#[rstest]
fn tx_sync_rides_on_last_fragment_only(mut pktbuf: PacketBuffer) {
    let pkt = uncompressed_packet(&mut pktbuf, &datagram(300));
    let sync = TxSync::new();
    tx_sync::append(&mut pktbuf, pkt, &sync).expect("marker fits");
    let mut fbuf = fbuf_for(pkt, 300, None);
    let mut link = RecordingLink::default();

    loop {
        let progress = Fragmenter::new(&mut pktbuf, &mut link, &iface(100))
            .send_next(&mut fbuf)
            .expect("fragment sent");
        if progress == FragmentProgress::Done {
            break;
        }
        assert!(!sync.is_unlocked());
        assert!(pktbuf.search_type(pkt, NetType::TxSync).is_some());
    }

    let carried: Vec<bool> = link.frames.iter().map(|frame| frame.carried_sync).collect();
    assert_eq!(carried, vec![false, false, false, true]);
    assert!(sync.is_unlocked());
    assert!(pktbuf.search_type(pkt, NetType::TxSync).is_none());
    pktbuf.release(pkt).expect("live");
    assert!(pktbuf.is_empty());
}

#[rstest]
fn link_rejection_stops_datagram_and_cleans_up(mut pktbuf: PacketBuffer) {
    let pkt = uncompressed_packet(&mut pktbuf, &datagram(300));
    let sync = TxSync::new();
    tx_sync::append(&mut pktbuf, pkt, &sync).expect("marker fits");
    let mut fbuf = fbuf_for(pkt, 300, None);
    let mut link = RecordingLink {
        reject_after: Some(1),
        ..RecordingLink::default()
    };
    let iface = iface(100);

    let first = Fragmenter::new(&mut pktbuf, &mut link, &iface).send_next(&mut fbuf);
    assert_eq!(first, Ok(FragmentProgress::More));
    let second = Fragmenter::new(&mut pktbuf, &mut link, &iface).send_next(&mut fbuf);
    assert_eq!(second, Err(FragmentationError::Link(LinkError::QueueFull)));
    assert_eq!(fbuf.offset(), 89);
    assert!(!sync.is_unlocked());

    pktbuf.release(pkt).expect("live");
    assert!(sync.is_unlocked());
    assert!(pktbuf.is_empty());
}

#[test]
fn exhaustion_leaves_no_partial_fragment() {
    let mut pktbuf = PacketBuffer::new(400);
    let pkt = uncompressed_packet(&mut pktbuf, &datagram(300));
    let used = pktbuf.used();
    let mut fbuf = fbuf_for(pkt, 300, None);
    let mut link = RecordingLink::default();

    let err = Fragmenter::new(&mut pktbuf, &mut link, &iface(100))
        .send_next(&mut fbuf)
        .expect_err("no room for the first fragment");

    assert!(matches!(err, FragmentationError::PktBuf(_)));
    assert!(link.frames.is_empty());
    assert_eq!(pktbuf.used(), used);
    assert_eq!(fbuf.offset(), 0);
}

#[rstest]
fn tiny_interface_cannot_fragment(mut pktbuf: PacketBuffer) {
    let pkt = uncompressed_packet(&mut pktbuf, &datagram(64));
    let mut fbuf = fbuf_for(pkt, 64, None);
    let mut link = RecordingLink::default();

    let err = Fragmenter::new(&mut pktbuf, &mut link, &iface(4))
        .send_next(&mut fbuf)
        .expect_err("no room for payload");
    assert_eq!(err, FragmentationError::FragmentTooSmall { budget: 4 });
    pktbuf.release(pkt).expect("live");
}

#[rstest]
fn empty_fbuf_is_rejected(mut pktbuf: PacketBuffer) {
    let mut link = RecordingLink::default();
    let mut fbuf = FragmentBuffer::default();
    let err = Fragmenter::new(&mut pktbuf, &mut link, &iface(100)).send_next(&mut fbuf);
    assert_eq!(err, Err(FragmentationError::NoPacket));
}

#[rstest]
#[case(100, -1, Some(89))]
#[case(100, 0, Some(96))]
#[case(28, 40, Some(24))]
#[case(4, -1, None)]
fn first_capacity_keeps_next_offset_aligned(
    #[case] budget: usize,
    #[case] diff: i32,
    #[case] expected: Option<usize>,
) {
    let capacity = first_fragment_capacity(budget, diff);
    assert_eq!(capacity, expected);
    if let Some(capacity) = capacity {
        let next = i32::try_from(capacity).expect("small") + diff;
        assert_eq!(next % 8, 0);
    }
}

#[test]
fn subsequent_capacity_rounds_down() {
    assert_eq!(subsequent_fragment_capacity(100), Some(88));
    assert_eq!(subsequent_fragment_capacity(127), Some(120));
    assert_eq!(subsequent_fragment_capacity(12), None);
}
