#![doc(html_root_url = "https://docs.rs/sixlowpan-frag/latest")]
//! 6LoWPAN fragmentation and reassembly (RFC 4944).
//!
//! The crate splits IPv6 datagrams that exceed a link's frame size into
//! FRAG1/FRAGN fragments and reassembles received fragments into datagrams.
//! All state lives in a [`Stack`], which is driven either synchronously or by
//! the async [`StackRuntime`](stack::runtime::StackRuntime). Datagram bytes
//! are kept in a bounded [`PacketBuffer`](pktbuf::PacketBuffer) shared by
//! both directions.

pub mod byte_order;
pub mod config;
pub mod frag;
pub mod metrics;
pub mod netif;
pub mod pktbuf;
pub mod stack;
pub mod tx_sync;

pub use config::{ConfigError, FragConfig, OverlapPolicy, ReassemblyConfig};
pub use frag::{
    DatagramTag,
    FragmentHeader,
    FragmentHint,
    FragmentProgress,
    FragmentationError,
    HeaderDecompressor,
    LinkError,
    LinkLayer,
    NoDecompression,
    ReassemblyError,
    ReassemblyStatus,
    Upstream,
};
pub use metrics::{DATAGRAMS_TOTAL, DROPPED_TOTAL, Direction, FRAGMENTS_TOTAL};
pub use netif::{IfaceId, Interface, L2Addr, NetifHeader};
pub use pktbuf::{NetType, PacketBuffer, PktBufError, SnipId};
pub use stack::{Received, SendError, Stack, StackEvent};
pub use tx_sync::TxSync;
