//! Channel-backed collaborators for running the stack in its own task.
//!
//! [`ChannelLink`] copies every frame out of the packet buffer and hands it
//! to a radio driver task as a [`LinkFrame`]. [`ChannelUpstream`] does the
//! same for reassembled datagrams. Both use `try_send` and never block the
//! stack; a full channel is reported as a refused frame.

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    frag::{LinkError, LinkLayer, Upstream},
    netif::NetifHeader,
    pktbuf::{NetType, PacketBuffer, SnipId},
    tx_sync::{self, TxSync},
};

/// A 6LoWPAN frame on its way to the radio.
///
/// Frames carrying the last fragment of a synchronised datagram hold its
/// [`TxSync`]. Call [`LinkFrame::complete`] once the frame was transmitted
/// or failed; dropping the frame completes it as well.
#[derive(Debug)]
pub struct LinkFrame {
    /// Link-layer metadata of the frame.
    pub netif: NetifHeader,
    /// Frame bytes starting with the 6LoWPAN dispatch.
    pub bytes: Bytes,
    sync: Option<TxSync>,
}

impl LinkFrame {
    /// Whether the frame carries a transmission marker.
    #[must_use]
    pub fn carries_sync(&self) -> bool { self.sync.is_some() }

    /// Signal the end of transmission to whoever waits on the datagram.
    pub fn complete(mut self) {
        if let Some(sync) = self.sync.take() {
            sync.unlock();
        }
    }
}

impl Drop for LinkFrame {
    fn drop(&mut self) {
        if let Some(sync) = self.sync.take() {
            sync.unlock();
        }
    }
}

/// [`LinkLayer`] forwarding frames over a bounded channel.
#[derive(Clone, Debug)]
pub struct ChannelLink {
    tx: mpsc::Sender<LinkFrame>,
}

impl ChannelLink {
    /// Create a link and the receiver a driver task reads frames from.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<LinkFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Wrap an existing sender.
    #[must_use]
    pub const fn from_sender(tx: mpsc::Sender<LinkFrame>) -> Self { Self { tx } }
}

impl LinkLayer for ChannelLink {
    fn send(&mut self, pktbuf: &mut PacketBuffer, pkt: SnipId) -> Result<(), LinkError> {
        let netif = match pktbuf.netif(pkt) {
            Ok(netif) => *netif,
            Err(err) => {
                warn!(%pkt, %err, "frame without interface header");
                let _ = pktbuf.release(pkt);
                return Err(LinkError::Closed);
            }
        };
        let sync = tx_sync::detach(pktbuf, pkt);
        let bytes = pktbuf.to_vec(pkt).map(Bytes::from).unwrap_or_default();
        let _ = pktbuf.release(pkt);

        // A refused frame is dropped here, which unlocks its marker.
        match self.tx.try_send(LinkFrame { netif, bytes, sync }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                debug!(iface = %frame.netif.iface, "link queue full");
                Err(LinkError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(LinkError::Closed),
        }
    }
}

/// A datagram delivered to the network layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Datagram {
    /// Protocol type of the datagram.
    pub nettype: NetType,
    /// Link-layer metadata of the last fragment received.
    pub netif: Option<NetifHeader>,
    /// Datagram bytes.
    pub payload: Bytes,
}

/// [`Upstream`] forwarding datagrams over a bounded channel.
#[derive(Clone, Debug)]
pub struct ChannelUpstream {
    tx: mpsc::Sender<Datagram>,
    accepts: Option<NetType>,
}

impl ChannelUpstream {
    /// Create an upstream accepting every protocol type.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Datagram>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, accepts: None }, rx)
    }

    /// Only accept datagrams of `nettype`; others are dropped by the stack.
    #[must_use]
    pub const fn accepting(mut self, nettype: NetType) -> Self {
        self.accepts = Some(nettype);
        self
    }
}

impl Upstream for ChannelUpstream {
    fn deliver(&mut self, pktbuf: &mut PacketBuffer, nettype: NetType, pkt: SnipId) -> bool {
        if self.accepts.is_some_and(|accepted| accepted != nettype) {
            return false;
        }
        let netif = pktbuf
            .search_type(pkt, NetType::Netif)
            .and_then(|hdr| pktbuf.netif(hdr).ok().copied());
        let payload = pktbuf.to_vec(pkt).map(Bytes::from).unwrap_or_default();
        let _ = pktbuf.release(pkt);

        match self.tx.try_send(Datagram {
            nettype,
            netif,
            payload,
        }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(datagram)) => {
                warn!(len = datagram.payload.len(), "upstream queue full; datagram lost");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("upstream closed; datagram lost");
            }
        }
        true
    }
}
