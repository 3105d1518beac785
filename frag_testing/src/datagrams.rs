//! Builders for datagrams, fragments and stacks used across tests.

use rstest::fixture;
use sixlowpan_frag::{
    DatagramTag,
    FragConfig,
    FragmentHeader,
    IfaceId,
    Interface,
    L2Addr,
    NetifHeader,
    Stack,
};

use crate::{CollectingUpstream, RecordingLink, SentFrame};

/// Interface every helper sends and receives on.
pub const TEST_IFACE: IfaceId = IfaceId::new(1);
/// Link-layer frame budget of [`test_interface`].
pub const TEST_FRAME_SIZE: u16 = 100;

/// Stack wired to the recording collaborators.
pub type TestStack = Stack<RecordingLink, CollectingUpstream>;

/// Extended source address of the sending node.
pub const SRC_ADDR: [u8; 8] = [0xb3, 0x47, 0x60, 0x49, 0x78, 0xfe, 0x95, 0x48];
/// Extended destination address of the receiving node.
pub const DST_ADDR: [u8; 8] = [0xa4, 0xf2, 0xd2, 0xc9, 0x13, 0xb9, 0xbb, 0x25];

/// Header of a frame from [`SRC_ADDR`] to [`DST_ADDR`] on [`TEST_IFACE`].
#[must_use]
pub fn netif() -> NetifHeader {
    NetifHeader::new(
        TEST_IFACE,
        L2Addr::new(&SRC_ADDR).expect("eight byte address"),
        L2Addr::new(&DST_ADDR).expect("eight byte address"),
    )
}

/// Interface with a [`TEST_FRAME_SIZE`] frame budget.
#[must_use]
pub fn test_interface() -> Interface {
    Interface::new(
        TEST_IFACE,
        TEST_FRAME_SIZE,
        L2Addr::new(&SRC_ADDR).expect("eight byte address"),
    )
}

/// Build a stack with `config` and the test interface registered.
#[must_use]
pub fn stack_with(config: FragConfig) -> TestStack {
    Stack::new(config, RecordingLink::default(), CollectingUpstream::default())
        .expect("test configuration should be valid")
        .with_interface(test_interface())
}

/// Build a stack with `config` sending over `frame_size`-byte frames on
/// [`TEST_IFACE`].
#[must_use]
pub fn stack_with_frame_size(config: FragConfig, frame_size: u16) -> TestStack {
    stack_with(config).with_interface(Interface::new(
        TEST_IFACE,
        frame_size,
        test_interface().l2addr,
    ))
}

/// Fragment `datagram` with the crate's fragmenter over `frame_size`-byte
/// frames and return what reached the link.
#[must_use]
pub fn fragmented(datagram: &[u8], frame_size: u16) -> Vec<SentFrame> {
    let mut stack = stack_with_frame_size(FragConfig::default(), frame_size);
    stack
        .send_datagram(netif(), datagram, None)
        .expect("datagram should be accepted");
    stack.run_pending();
    stack.link_mut().take()
}

/// Stack with the default configuration.
#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn test_stack() -> TestStack { stack_with(FragConfig::default()) }

/// Deterministic datagram of `len` bytes.
#[must_use]
pub fn datagram(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| u8::try_from(i % 251).expect("below 251"))
        .collect()
}

/// Split an uncompressed IPv6 `datagram` into raw fragments of at most
/// `frame_size` bytes, independently of the crate's fragmenter.
///
/// The first fragment carries the uncompressed IPv6 dispatch.
#[must_use]
pub fn fragment_frames(datagram: &[u8], tag: u16, frame_size: usize) -> Vec<Vec<u8>> {
    let size = u16::try_from(datagram.len()).expect("datagram should fit the size field");
    let tag = DatagramTag::new(tag);
    // Every chunk follows at most five header bytes and ends on a multiple of 8.
    let chunk = (frame_size - 5) & !7;

    let mut frames = Vec::new();
    let mut frame = vec![0_u8; 4];
    FragmentHeader::First {
        datagram_size: size,
        tag,
    }
    .encode(&mut frame)
    .expect("valid header");
    frame.push(0x41);
    let first_len = chunk.min(datagram.len());
    frame.extend_from_slice(&datagram[..first_len]);
    frames.push(frame);

    let mut offset = first_len;
    while offset < datagram.len() {
        let len = chunk.min(datagram.len() - offset);
        let mut frame = vec![0_u8; 5];
        FragmentHeader::subsequent(size, tag, offset)
            .expect("aligned offset")
            .encode(&mut frame)
            .expect("valid header");
        frame.extend_from_slice(&datagram[offset..offset + len]);
        frames.push(frame);
        offset += len;
    }
    frames
}
