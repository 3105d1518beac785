//! Error and status types emitted by the fragmentation layer.
//!
//! Neither direction surfaces these errors beyond the stack: a failed
//! datagram or fragment is dropped and counted. The enums exist so the drop
//! reason can be logged and asserted in tests.

use thiserror::Error;

use super::{
    dispatch::{DecompressError, LinkError},
    header::{DatagramTag, HeaderError},
};
use crate::pktbuf::{PktBufError, SnipId};

/// Progress reported after emitting one fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FragmentProgress {
    /// Packet bytes remain; the fragmenter must be invoked again.
    More,
    /// The last fragment was handed to the link layer.
    Done,
}

/// Errors produced while fragmenting an outgoing datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FragmentationError {
    /// The fragment buffer holds no packet.
    #[error("fragment buffer is empty")]
    NoPacket,
    /// The packet has no payload after its network interface header.
    #[error("packet {0} carries no payload")]
    EmptyDatagram(SnipId),
    /// The datagram does not fit the fragment header's size field.
    #[error("datagram of {0} bytes cannot be fragmented")]
    DatagramTooLarge(usize),
    /// The fragment budget cannot carry any payload.
    #[error("fragment budget of {budget} bytes leaves no room for payload")]
    FragmentTooSmall {
        /// Frame budget that was available.
        budget: usize,
    },
    /// Building a fragment header failed.
    #[error("failed to encode fragment header: {0}")]
    Header(#[from] HeaderError),
    /// The packet buffer rejected an operation, usually for lack of space.
    #[error("packet buffer error: {0}")]
    PktBuf(#[from] PktBufError),
    /// The link layer refused the fragment.
    #[error("link layer rejected fragment: {0}")]
    Link(#[from] LinkError),
}

/// Errors produced while adding a fragment to the reassembly buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    /// The fragment header is malformed.
    #[error("malformed fragment: {0}")]
    Header(#[from] HeaderError),
    /// The received packet carries no network interface header.
    #[error("fragment {0} has no network interface header")]
    MissingNetif(SnipId),
    /// No entry is free and none may be evicted.
    #[error("reassembly buffer full")]
    TableFull,
    /// The shared interval pool is spent.
    #[error("reassembly interval pool exhausted")]
    IntervalsExhausted,
    /// The fragment ends beyond the datagram it claims to belong to.
    #[error("fragment of datagram {tag} ends at {end}, beyond size {datagram_size}")]
    FragmentTooLarge {
        /// Tag of the discarded datagram.
        tag: DatagramTag,
        /// End offset of the fragment in bytes.
        end: usize,
        /// Advertised datagram size.
        datagram_size: u16,
    },
    /// The first fragment's compressed header could not be expanded.
    #[error("header decompression failed: {0}")]
    Decompress(#[from] DecompressError),
    /// The packet buffer rejected an operation, usually for lack of space.
    #[error("packet buffer error: {0}")]
    PktBuf(#[from] PktBufError),
}

impl ReassemblyError {
    /// Short label used for drop metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Header(_) | Self::MissingNetif(_) => "malformed",
            Self::TableFull => "rbuf_full",
            Self::IntervalsExhausted => "intervals_exhausted",
            Self::FragmentTooLarge { .. } => "too_large",
            Self::Decompress(_) => "decompress",
            Self::PktBuf(_) => "pktbuf",
        }
    }
}
