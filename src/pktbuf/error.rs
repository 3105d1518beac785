//! Errors reported by the packet buffer arena.

use thiserror::Error;

use super::{NetType, SnipId};

/// Errors produced by [`PacketBuffer`](super::PacketBuffer) operations.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum PktBufError {
    /// The byte budget of the arena cannot hold the requested snip.
    #[error("packet buffer exhausted: requested {requested} bytes, {available} available")]
    Exhausted {
        /// Bytes the new snip would occupy.
        requested: usize,
        /// Bytes still free in the arena.
        available: usize,
    },
    /// The handle refers to a snip that was already released.
    #[error("stale packet snip handle {0}")]
    StaleHandle(SnipId),
    /// The snip carries metadata rather than packet bytes.
    #[error("snip {0} carries no byte payload")]
    NoData(SnipId),
    /// The snip does not hold the kind of metadata the caller asked for.
    #[error("snip {snip} is not of type {expected:?}")]
    WrongKind {
        /// Snip that was inspected.
        snip: SnipId,
        /// Kind the caller expected.
        expected: NetType,
    },
}
