//! Collaborator seams of the fragmentation layer.
//!
//! The stack sends wire fragments through a [`LinkLayer`], hands reassembled
//! datagrams to an [`Upstream`] network layer and expands compressed first
//! fragments through a [`HeaderDecompressor`]. Each seam documents who owns
//! the packet handles crossing it.

use thiserror::Error;

use crate::{
    netif::NetifHeader,
    pktbuf::{NetType, PacketBuffer, SnipId},
};

/// Errors a link layer reports when refusing a frame.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    /// The transmit queue of the interface is full.
    #[error("link layer transmit queue full")]
    QueueFull,
    /// The driver side has shut down.
    #[error("link layer closed")]
    Closed,
}

/// Transmit side of the link layer.
pub trait LinkLayer {
    /// Queue the frame `pkt` for transmission.
    ///
    /// `pkt` starts with a [`NetifHeader`] snip followed by the 6LoWPAN frame
    /// and, for the last fragment of a datagram, a tx-sync snip. Takes
    /// ownership of `pkt` whether or not it succeeds; the implementation
    /// calls [`tx_complete`](crate::tx_sync::tx_complete) and releases the
    /// frame once it is done with it.
    ///
    /// # Errors
    ///
    /// Returns [`LinkError`] when the frame cannot be queued.
    fn send(&mut self, pktbuf: &mut PacketBuffer, pkt: SnipId) -> Result<(), LinkError>;
}

/// Network layer receiving reassembled datagrams.
pub trait Upstream {
    /// Deliver the datagram `pkt` of type `nettype`.
    ///
    /// `pkt` is the datagram snip followed by its [`NetifHeader`] snip.
    /// Returning `true` takes ownership of `pkt`; returning `false` means no
    /// receiver is registered for `nettype` and the caller releases it.
    fn deliver(&mut self, pktbuf: &mut PacketBuffer, nettype: NetType, pkt: SnipId) -> bool;
}

/// Reasons a compressed header could not be expanded.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum DecompressError {
    /// No decompressor is configured.
    #[error("header compression not supported")]
    Unsupported,
    /// The compressed header is invalid or references an unknown context.
    #[error("malformed compressed header")]
    Malformed,
}

/// Uncompressed header produced from the start of a first fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decompressed {
    /// Uncompressed header bytes.
    pub header: Vec<u8>,
    /// Number of compressed bytes the header replaced.
    pub consumed: usize,
}

/// Expands IPHC compressed headers found in first fragments.
pub trait HeaderDecompressor {
    /// Expand the compressed header at the start of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`DecompressError`] when the header cannot be expanded; the
    /// fragment is dropped.
    fn decompress(
        &mut self,
        data: &[u8],
        netif: &NetifHeader,
        datagram_size: u16,
    ) -> Result<Decompressed, DecompressError>;
}

/// Decompressor for stacks without IPHC; compressed fragments are dropped.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDecompression;

impl HeaderDecompressor for NoDecompression {
    fn decompress(
        &mut self,
        _data: &[u8],
        _netif: &NetifHeader,
        _datagram_size: u16,
    ) -> Result<Decompressed, DecompressError> {
        Err(DecompressError::Unsupported)
    }
}

/// Hand a reassembled datagram upstream, releasing it if nobody takes it.
///
/// Takes ownership of `pkt`. Returns whether a receiver accepted it.
pub(crate) fn dispatch_datagram<U: Upstream + ?Sized>(
    pktbuf: &mut PacketBuffer,
    upstream: &mut U,
    nettype: NetType,
    pkt: SnipId,
) -> bool {
    if upstream.deliver(pktbuf, nettype, pkt) {
        return true;
    }
    log::debug!("6lo rbuf: no receiver for {nettype:?}, dropping datagram");
    let _ = pktbuf.release(pkt);
    false
}
