//! Fragment buffers tracking outgoing datagrams that are being fragmented.
//!
//! A [`FragmentBuffer`] holds the datagram for as long as fragments remain to
//! be sent. The [`FragmentBufferPool`] hands out a fixed number of them and
//! assigns each datagram a fresh [`DatagramTag`].

use derive_more::Display;

use super::header::{DatagramTag, FRAG1_HEADER_LEN};
use crate::{netif::Interface, pktbuf::SnipId};

/// Default number of datagrams that can be fragmented concurrently.
pub const DEFAULT_FBUF_SLOTS: usize = 1;

/// Index of a slot in a [`FragmentBufferPool`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Display)]
#[display("fbuf{_0}")]
pub struct FbufId(usize);

impl FbufId {
    /// Return the slot index.
    #[must_use]
    pub const fn index(self) -> usize { self.0 }
}

/// Fragment size hint supplied by the compression layer.
///
/// When the first fragment is compressed differently from the rest of the
/// datagram, the hint states how many uncompressed bytes the compressed
/// first fragment stands for, so later offsets stay correct from the
/// receiver's point of view.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragmentHint {
    /// Uncompressed size of the first fragment's payload.
    pub fragsz_uncomp: u16,
    /// Compressed size of the first fragment's payload.
    pub fragsz: u16,
}

/// Per-datagram fragmentation state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FragmentBuffer {
    pub(crate) pkt: Option<SnipId>,
    pub(crate) datagram_size: u16,
    pub(crate) tag: DatagramTag,
    pub(crate) offset: u16,
    pub(crate) hint: Option<FragmentHint>,
    pub(crate) page: u8,
}

impl FragmentBuffer {
    /// Packet being fragmented; `None` once the slot is free.
    #[must_use]
    pub const fn pkt(&self) -> Option<SnipId> { self.pkt }

    /// Uncompressed datagram size advertised in every fragment header.
    #[must_use]
    pub const fn datagram_size(&self) -> u16 { self.datagram_size }

    /// Tag of the datagram.
    #[must_use]
    pub const fn tag(&self) -> DatagramTag { self.tag }

    /// Number of packet bytes already sent.
    #[must_use]
    pub const fn offset(&self) -> u16 { self.offset }

    /// 6LoWPAN page the datagram is sent with.
    #[must_use]
    pub const fn page(&self) -> u8 { self.page }

    /// Compression hint, if one was supplied.
    #[must_use]
    pub const fn hint(&self) -> Option<FragmentHint> { self.hint }

    /// Whether the slot is free.
    #[must_use]
    pub const fn is_free(&self) -> bool { self.pkt.is_none() }

    /// Difference between the advertised datagram size and the bytes actually
    /// carried, given `payload_len` packet bytes.
    ///
    /// Positive when header compression shrank the datagram, negative when
    /// the packet carries extra bytes such as the uncompressed IPv6 dispatch.
    #[must_use]
    pub fn payload_diff(&self, payload_len: usize) -> i32 {
        match self.hint {
            Some(hint) if hint.fragsz_uncomp > hint.fragsz => {
                i32::from(hint.fragsz_uncomp - hint.fragsz)
            }
            _ => {
                i32::from(self.datagram_size) - i32::try_from(payload_len).unwrap_or(i32::MAX)
            }
        }
    }

    /// Largest frame the first fragment may occupy on `iface`.
    #[must_use]
    pub fn first_frag_budget(&self, iface: &Interface) -> usize {
        match self.hint {
            Some(hint) if hint.fragsz > 0 => usize::from(hint.fragsz) + FRAG1_HEADER_LEN,
            _ => usize::from(iface.max_frag_size),
        }
    }
}

/// Fixed pool of [`FragmentBuffer`] slots with datagram tag allocation.
#[derive(Debug)]
pub struct FragmentBufferPool {
    slots: Vec<FragmentBuffer>,
    next_tag: DatagramTag,
}

impl Default for FragmentBufferPool {
    fn default() -> Self { Self::new(DEFAULT_FBUF_SLOTS, DatagramTag::new(0)) }
}

impl FragmentBufferPool {
    /// Create a pool with `slots` entries whose first datagram gets `start_tag`.
    #[must_use]
    pub fn new(slots: usize, start_tag: DatagramTag) -> Self {
        Self {
            slots: vec![FragmentBuffer::default(); slots],
            next_tag: start_tag,
        }
    }

    /// Return the next datagram tag and advance the counter.
    pub fn next_tag(&mut self) -> DatagramTag {
        let tag = self.next_tag;
        self.next_tag = tag.wrapping_next();
        tag
    }

    /// Claim a free slot for `pkt`, assigning it a fresh tag.
    ///
    /// Takes ownership of `pkt` on success. Returns `None` when every slot
    /// is busy; the caller keeps `pkt` in that case.
    pub fn acquire(
        &mut self,
        pkt: SnipId,
        datagram_size: u16,
        page: u8,
        hint: Option<FragmentHint>,
    ) -> Option<FbufId> {
        let index = self.slots.iter().position(FragmentBuffer::is_free)?;
        let tag = self.next_tag();
        self.slots[index] = FragmentBuffer {
            pkt: Some(pkt),
            datagram_size,
            tag,
            offset: 0,
            hint,
            page,
        };
        Some(FbufId(index))
    }

    /// Borrow the slot `id`.
    #[must_use]
    pub fn get(&self, id: FbufId) -> Option<&FragmentBuffer> {
        self.slots.get(id.0).filter(|fbuf| !fbuf.is_free())
    }

    /// Mutably borrow the slot `id`.
    pub fn get_mut(&mut self, id: FbufId) -> Option<&mut FragmentBuffer> {
        self.slots.get_mut(id.0).filter(|fbuf| !fbuf.is_free())
    }

    /// Free the slot `id`, returning the packet it held.
    ///
    /// The caller takes ownership of the returned packet.
    pub fn release(&mut self, id: FbufId) -> Option<SnipId> {
        let fbuf = self.slots.get_mut(id.0)?;
        let pkt = fbuf.pkt.take();
        *fbuf = FragmentBuffer::default();
        pkt
    }

    /// Free every slot, returning the packets they held.
    pub fn release_all(&mut self) -> Vec<SnipId> {
        self.slots
            .iter_mut()
            .filter_map(|fbuf| std::mem::take(fbuf).pkt)
            .collect()
    }

    /// Number of slots currently fragmenting a datagram.
    #[must_use]
    pub fn in_use(&self) -> usize { self.slots.iter().filter(|fbuf| !fbuf.is_free()).count() }

    /// Total number of slots.
    #[must_use]
    pub fn capacity(&self) -> usize { self.slots.len() }
}
