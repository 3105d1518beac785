//! In-memory link and upstream layers recording what the stack hands them.

use sixlowpan_frag::{
    LinkError,
    LinkLayer,
    NetType,
    NetifHeader,
    PacketBuffer,
    SnipId,
    Upstream,
    tx_sync,
};

/// A frame captured by [`RecordingLink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentFrame {
    /// Link-layer metadata copied from the fragment.
    pub netif: NetifHeader,
    /// Frame bytes starting with the 6LoWPAN dispatch.
    pub bytes: Vec<u8>,
    /// Whether the frame carried a transmission marker.
    pub carried_sync: bool,
}

/// Link layer recording every frame and completing it immediately.
#[derive(Debug, Default)]
pub struct RecordingLink {
    /// Frames in transmission order.
    pub frames: Vec<SentFrame>,
    /// Refuse frames once this many were recorded.
    pub reject_after: Option<usize>,
}

impl RecordingLink {
    /// Take the recorded frames, leaving the link empty.
    pub fn take(&mut self) -> Vec<SentFrame> { std::mem::take(&mut self.frames) }
}

impl LinkLayer for RecordingLink {
    fn send(&mut self, pktbuf: &mut PacketBuffer, pkt: SnipId) -> Result<(), LinkError> {
        if self.reject_after.is_some_and(|limit| self.frames.len() >= limit) {
            let _ = pktbuf.release(pkt);
            return Err(LinkError::QueueFull);
        }
        let netif = *pktbuf
            .netif(pkt)
            .expect("frame should start with a netif header");
        self.frames.push(SentFrame {
            netif,
            bytes: pktbuf.to_vec(pkt).expect("frame should be alive"),
            carried_sync: pktbuf.search_type(pkt, NetType::TxSync).is_some(),
        });
        tx_sync::tx_complete(pktbuf, pkt);
        pktbuf.release(pkt).expect("frame should be alive");
        Ok(())
    }
}

/// A datagram captured by [`CollectingUpstream`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivered {
    /// Protocol type reported by the stack.
    pub nettype: NetType,
    /// Datagram bytes.
    pub payload: Vec<u8>,
}

/// Upstream layer collecting every datagram it is offered.
#[derive(Debug, Default)]
pub struct CollectingUpstream {
    /// Datagrams in delivery order.
    pub datagrams: Vec<Delivered>,
}

impl Upstream for CollectingUpstream {
    fn deliver(&mut self, pktbuf: &mut PacketBuffer, nettype: NetType, pkt: SnipId) -> bool {
        self.datagrams.push(Delivered {
            nettype,
            payload: pktbuf.to_vec(pkt).expect("datagram should be alive"),
        });
        pktbuf.release(pkt).expect("datagram should be alive");
        true
    }
}
