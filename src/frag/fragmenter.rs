//! Outbound helper that splits datagrams into RFC 4944 fragments.
//!
//! [`Fragmenter`] emits exactly one fragment per call to
//! [`Fragmenter::send_next`]. While it reports [`FragmentProgress::More`] the
//! caller re-invokes it, normally through the stack's own message queue, so
//! fragments are paced by the scheduler instead of a tight loop.
//!
//! Offsets on the wire describe the *uncompressed* datagram. The difference
//! between the advertised datagram size and the packet bytes actually carried
//! (see [`FragmentBuffer::payload_diff`]) is folded into the first fragment's
//! size so that every later offset lands on an 8-byte boundary from the
//! receiver's point of view.

use log::debug;

use super::{
    FragmentProgress,
    FragmentationError,
    dispatch::LinkLayer,
    fbuf::FragmentBuffer,
    header::{FRAG1_HEADER_LEN, FRAGN_HEADER_LEN, FragmentHeader, HeaderError, MAX_DATAGRAM_SIZE, floor8},
};
use crate::{
    metrics::{self, Direction},
    netif::{Interface, NetifHeader},
    pktbuf::{NetType, PacketBuffer, SnipId},
    tx_sync,
};

/// Slice of the packet that goes into one fragment.
#[derive(Clone, Copy, Debug)]
struct Chunk {
    header: FragmentHeader,
    offset: usize,
    len: usize,
    last: bool,
}

/// Emits the fragments of one datagram on one interface.
pub struct Fragmenter<'a, L: LinkLayer + ?Sized> {
    pktbuf: &'a mut PacketBuffer,
    link: &'a mut L,
    iface: &'a Interface,
}

impl<'a, L: LinkLayer + ?Sized> Fragmenter<'a, L> {
    /// Create a fragmenter sending through `link` on `iface`.
    pub fn new(pktbuf: &'a mut PacketBuffer, link: &'a mut L, iface: &'a Interface) -> Self {
        Self {
            pktbuf,
            link,
            iface,
        }
    }

    /// Send the next fragment of `fbuf` and advance its offset.
    ///
    /// `fbuf.pkt` must be a [`NetifHeader`] snip followed by the 6LoWPAN
    /// payload and optionally a trailing tx-sync snip. The packet stays owned
    /// by `fbuf`: the fragmenter only copies from it. A tx-sync snip moves to
    /// the last fragment; until then it is kept at the tail of `fbuf.pkt`.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentationError`] when the fragment cannot be built or the
    /// link layer rejects it. No partially built fragment survives the error;
    /// the caller abandons the datagram by releasing `fbuf.pkt`, which also
    /// unlocks a pending tx-sync.
    pub fn send_next(
        &mut self,
        fbuf: &mut FragmentBuffer,
    ) -> Result<FragmentProgress, FragmentationError> {
        let pkt = fbuf.pkt.ok_or(FragmentationError::NoPacket)?;
        let mut sync = tx_sync::split(self.pktbuf, pkt);
        let result = self.emit(fbuf, pkt, &mut sync);
        if let Some(marker) = sync {
            if self.pktbuf.append(pkt, marker).is_err() {
                let _ = self.pktbuf.release(marker);
            }
        }
        result
    }

    fn emit(
        &mut self,
        fbuf: &mut FragmentBuffer,
        pkt: SnipId,
        sync: &mut Option<SnipId>,
    ) -> Result<FragmentProgress, FragmentationError> {
        let netif = *self.pktbuf.netif(pkt)?;
        let payload = self
            .pktbuf
            .next(pkt)?
            .ok_or(FragmentationError::EmptyDatagram(pkt))?;
        let payload_len = self.pktbuf.payload_len(payload);
        if payload_len == 0 {
            return Err(FragmentationError::EmptyDatagram(pkt));
        }
        if fbuf.datagram_size > MAX_DATAGRAM_SIZE || u16::try_from(payload_len).is_err() {
            return Err(FragmentationError::DatagramTooLarge(
                payload_len.max(usize::from(fbuf.datagram_size)),
            ));
        }

        let offset = usize::from(fbuf.offset);
        if offset >= payload_len {
            return Ok(FragmentProgress::Done);
        }
        let diff = fbuf.payload_diff(payload_len);
        let chunk = if offset == 0 {
            self.first_chunk(fbuf, payload_len, diff)?
        } else {
            self.subsequent_chunk(fbuf, offset, payload_len, diff)?
        };

        self.send_chunk(netif, payload, chunk, sync)?;
        debug!(
            "6lo frag: sent fragment (tag: {}, offset: {}, len: {}, last: {})",
            fbuf.tag, chunk.offset, chunk.len, chunk.last
        );

        let sent = chunk.offset + chunk.len;
        fbuf.offset = u16::try_from(sent).map_err(|_| FragmentationError::DatagramTooLarge(sent))?;
        if chunk.last {
            Ok(FragmentProgress::Done)
        } else {
            Ok(FragmentProgress::More)
        }
    }

    fn first_chunk(
        &self,
        fbuf: &FragmentBuffer,
        payload_len: usize,
        diff: i32,
    ) -> Result<Chunk, FragmentationError> {
        let budget = fbuf.first_frag_budget(self.iface);
        let max = first_fragment_capacity(budget, diff)
            .ok_or(FragmentationError::FragmentTooSmall { budget })?;
        let len = max.min(payload_len);
        Ok(Chunk {
            header: FragmentHeader::First {
                datagram_size: fbuf.datagram_size,
                tag: fbuf.tag,
            },
            offset: 0,
            len,
            last: len == payload_len,
        })
    }

    fn subsequent_chunk(
        &self,
        fbuf: &FragmentBuffer,
        offset: usize,
        payload_len: usize,
        diff: i32,
    ) -> Result<Chunk, FragmentationError> {
        let budget = usize::from(self.iface.max_frag_size);
        let max = subsequent_fragment_capacity(budget)
            .ok_or(FragmentationError::FragmentTooSmall { budget })?;
        let len = max.min(payload_len - offset);
        let wire_offset = i32::try_from(offset)
            .ok()
            .and_then(|offset| offset.checked_add(diff))
            .and_then(|offset| usize::try_from(offset).ok())
            .ok_or(HeaderError::InvalidOffset(offset))?;
        Ok(Chunk {
            header: FragmentHeader::subsequent(fbuf.datagram_size, fbuf.tag, wire_offset)?,
            offset,
            len,
            last: offset + len == payload_len,
        })
    }

    /// Build `[netif] -> [fragment header | chunk] (-> [tx-sync])` and hand
    /// it to the link layer.
    fn send_chunk(
        &mut self,
        mut netif: NetifHeader,
        payload: SnipId,
        chunk: Chunk,
        sync: &mut Option<SnipId>,
    ) -> Result<(), FragmentationError> {
        let header_len = chunk.header.len();
        let mut frame = vec![0_u8; header_len + chunk.len];
        chunk.header.encode(&mut frame)?;
        let copied = self
            .pktbuf
            .read_chain(payload, chunk.offset, &mut frame[header_len..]);
        frame.truncate(header_len + copied);

        let frag = self.pktbuf.add(None, &frame, NetType::SixLowPan)?;
        netif.more_data = !chunk.last;
        let out = match self.pktbuf.add_netif(netif, Some(frag)) {
            Ok(out) => out,
            Err(err) => {
                let _ = self.pktbuf.release(frag);
                return Err(err.into());
            }
        };
        if chunk.last {
            if let Some(marker) = sync.take() {
                if let Err(err) = self.pktbuf.append(out, marker) {
                    *sync = Some(marker);
                    let _ = self.pktbuf.release(out);
                    return Err(err.into());
                }
            }
        }

        self.link.send(self.pktbuf, out)?;
        metrics::inc_fragments(Direction::Outbound);
        Ok(())
    }
}

/// Payload bytes a first fragment may carry within a `budget`-byte frame.
///
/// `diff` is the compression difference of the datagram. The result keeps
/// `result + diff` a multiple of eight so the next offset is encodable.
#[must_use]
pub fn first_fragment_capacity(budget: usize, diff: i32) -> Option<usize> {
    let room = i32::try_from(budget).ok()?.checked_add(diff)?;
    let room = usize::try_from(room).ok()?.checked_sub(FRAG1_HEADER_LEN)?;
    let max = i32::try_from(floor8(room)).ok()?.checked_sub(diff)?;
    usize::try_from(max).ok().filter(|&max| max > 0)
}

/// Payload bytes a subsequent fragment may carry within a `budget`-byte frame.
#[must_use]
pub fn subsequent_fragment_capacity(budget: usize) -> Option<usize> {
    budget
        .checked_sub(FRAGN_HEADER_LEN)
        .map(floor8)
        .filter(|&max| max > 0)
}
