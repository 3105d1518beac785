//! RFC 4944 fragmentation and reassembly.
//!
//! Outgoing datagrams too large for one link-layer frame are tracked by a
//! [`FragmentBuffer`] and split by the [`Fragmenter`], one fragment per
//! invocation. Incoming fragments are collected by the
//! [`ReassemblyBuffer`] until their datagram is complete. The collaborator
//! traits in [`dispatch`] connect both directions to the surrounding stack.

pub mod dispatch;
pub mod error;
pub mod fbuf;
pub mod fragmenter;
pub mod header;
pub mod rbuf;

pub use dispatch::{
    DecompressError,
    Decompressed,
    HeaderDecompressor,
    LinkError,
    LinkLayer,
    NoDecompression,
    Upstream,
};
pub use error::{FragmentProgress, FragmentationError, ReassemblyError};
pub use fbuf::{FbufId, FragmentBuffer, FragmentBufferPool, FragmentHint};
pub use fragmenter::Fragmenter;
pub use header::{DatagramTag, FragmentHeader, HeaderError};
pub use rbuf::{
    CompletedDatagram,
    Interval,
    ReassemblyBuffer,
    ReassemblyEntry,
    ReassemblyKey,
    ReassemblyStatus,
};
