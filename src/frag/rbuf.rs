//! Inbound reassembly buffer.
//!
//! [`ReassemblyBuffer`] is a fixed table of datagrams being reassembled. Each
//! entry is identified by a [`ReassemblyKey`], owns an accumulator snip of
//! `datagram_size` bytes in the packet buffer and records which byte ranges
//! have arrived, merging adjacent ranges into one record. Fragments may
//! arrive in any order; completion is detected purely by counting covered
//! bytes. A fragment whose bytes have all arrived already is a duplicate.
//!
//! Stalled entries are evicted by [`ReassemblyBuffer::gc_at`], which also runs
//! before every added fragment. A full table evicts its least recently
//! updated entry when [`ReassemblyConfig::aggressive_override`] is set.

use std::time::Instant;

use log::debug;

use super::{
    ReassemblyError,
    dispatch::HeaderDecompressor,
    header::{DatagramTag, FragmentHeader, HeaderError, UNCOMPRESSED_IPV6_DISPATCH, is_iphc},
};
use crate::{
    config::{OverlapPolicy, ReassemblyConfig},
    metrics::{self, Direction},
    netif::{IfaceId, L2Addr, NetifHeader},
    pktbuf::{NetType, PacketBuffer, SnipId},
};

/// Identity of a datagram being reassembled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ReassemblyKey {
    /// Link-layer source of the fragments.
    pub src: L2Addr,
    /// Link-layer destination of the fragments.
    pub dst: L2Addr,
    /// Datagram tag chosen by the sender.
    pub tag: DatagramTag,
    /// Uncompressed datagram size.
    pub datagram_size: u16,
    /// 6LoWPAN page the fragments were received with.
    pub page: u8,
}

/// Half-open byte range `[start, end)` of received datagram bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interval {
    /// First byte of the range.
    pub start: u16,
    /// One past the last byte of the range.
    pub end: u16,
}

impl Interval {
    /// Number of bytes in the range.
    #[must_use]
    pub const fn len(self) -> u16 { self.end - self.start }

    /// Whether the range is empty.
    #[must_use]
    pub const fn is_empty(self) -> bool { self.start == self.end }

    const fn overlaps(self, other: Self) -> bool { self.start < other.end && other.start < self.end }

    /// Overlapping or directly adjacent.
    const fn touches(self, other: Self) -> bool { self.start <= other.end && other.start <= self.end }

    const fn covers(self, other: Self) -> bool { self.start <= other.start && other.end <= self.end }
}

/// A datagram being reassembled.
#[derive(Debug)]
pub struct ReassemblyEntry {
    key: ReassemblyKey,
    iface: IfaceId,
    buffer: SnipId,
    nettype: NetType,
    intervals: Vec<Interval>,
    current_size: u16,
    arrival: Instant,
}

impl ReassemblyEntry {
    /// Identity of the datagram.
    #[must_use]
    pub const fn key(&self) -> &ReassemblyKey { &self.key }

    /// Interface the fragments arrived on.
    #[must_use]
    pub const fn iface(&self) -> IfaceId { self.iface }

    /// Number of datagram bytes received so far.
    #[must_use]
    pub const fn current_size(&self) -> u16 { self.current_size }

    /// Disjoint byte ranges received so far. Adjacent ranges are merged.
    #[must_use]
    pub fn intervals(&self) -> &[Interval] { &self.intervals }

    /// Time of the last fragment added to the entry.
    #[must_use]
    pub const fn arrival(&self) -> Instant { self.arrival }
}

/// Datagram whose every byte has arrived.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletedDatagram {
    /// Datagram snip followed by its network interface header. Owned by the
    /// receiver of this value.
    pub pkt: SnipId,
    /// Protocol of the datagram.
    pub nettype: NetType,
}

/// Outcome of adding one fragment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReassemblyStatus {
    /// The fragment was stored; bytes are still missing.
    Incomplete,
    /// The fragment repeats an already received range and was ignored.
    Duplicate,
    /// The fragment completed its datagram.
    Complete(CompletedDatagram),
}

/// Fixed-size table of datagrams being reassembled.
#[derive(Debug)]
pub struct ReassemblyBuffer {
    config: ReassemblyConfig,
    entries: Vec<Option<ReassemblyEntry>>,
    intervals_in_use: usize,
}

impl Default for ReassemblyBuffer {
    fn default() -> Self { Self::new(ReassemblyConfig::default()) }
}

/// Fragment after header parsing and dispatch handling.
struct Parsed {
    key: ReassemblyKey,
    iface: IfaceId,
    offset: u16,
    payload: Vec<u8>,
    nettype: Option<NetType>,
}

impl ReassemblyBuffer {
    /// Create an empty table with the given limits.
    #[must_use]
    pub fn new(config: ReassemblyConfig) -> Self {
        let mut entries = Vec::with_capacity(config.capacity);
        entries.resize_with(config.capacity, || None);
        Self {
            config,
            entries,
            intervals_in_use: 0,
        }
    }

    /// Limits the table was created with.
    #[must_use]
    pub const fn config(&self) -> &ReassemblyConfig { &self.config }

    /// Number of datagrams being reassembled.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.iter().flatten().count() }

    /// Whether no datagram is being reassembled.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.iter().all(Option::is_none) }

    /// Received-range records currently in use across all entries.
    #[must_use]
    pub const fn intervals_in_use(&self) -> usize { self.intervals_in_use }

    /// Iterate over the entries being reassembled.
    pub fn entries(&self) -> impl Iterator<Item = &ReassemblyEntry> + '_ { self.entries.iter().flatten() }

    /// Look up the entry for `key`.
    #[must_use]
    pub fn get(&self, key: &ReassemblyKey) -> Option<&ReassemblyEntry> {
        self.entries().find(|entry| entry.key == *key)
    }

    /// Add a received fragment using the current time.
    ///
    /// # Errors
    ///
    /// See [`ReassemblyBuffer::add_at`].
    pub fn add<D: HeaderDecompressor + ?Sized>(
        &mut self,
        pktbuf: &mut PacketBuffer,
        pkt: SnipId,
        page: u8,
        decompressor: &mut D,
    ) -> Result<ReassemblyStatus, ReassemblyError> {
        self.add_at(pktbuf, pkt, page, Instant::now(), decompressor)
    }

    /// Add a received fragment using an explicit clock reading.
    ///
    /// `pkt` is the fragment snip, starting with its fragment header, followed
    /// by its [`NetifHeader`] snip. Takes ownership of `pkt` and always
    /// releases it; the payload is copied into the entry's accumulator.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError`] when the fragment is dropped: malformed
    /// headers, a full table, a fragment running past its datagram (which also
    /// discards the entry), a spent interval pool or packet buffer, or a first
    /// fragment whose compressed header cannot be expanded.
    pub fn add_at<D: HeaderDecompressor + ?Sized>(
        &mut self,
        pktbuf: &mut PacketBuffer,
        pkt: SnipId,
        page: u8,
        now: Instant,
        decompressor: &mut D,
    ) -> Result<ReassemblyStatus, ReassemblyError> {
        self.gc_at(pktbuf, now);
        let result = parse(pktbuf, pkt, page, decompressor)
            .and_then(|parsed| self.store(pktbuf, parsed, now));
        let _ = pktbuf.release(pkt);
        match &result {
            Ok(ReassemblyStatus::Complete(_)) => {
                metrics::inc_fragments(Direction::Inbound);
                metrics::inc_datagrams(Direction::Inbound);
            }
            Ok(_) => metrics::inc_fragments(Direction::Inbound),
            Err(err) => {
                debug!("6lo rbuf: dropping fragment: {err}");
                metrics::inc_dropped(err.reason());
            }
        }
        metrics::set_reassembly_active(self.len());
        result
    }

    fn store(
        &mut self,
        pktbuf: &mut PacketBuffer,
        parsed: Parsed,
        now: Instant,
    ) -> Result<ReassemblyStatus, ReassemblyError> {
        let datagram_size = parsed.key.datagram_size;
        let start = parsed.offset;
        let end = usize::from(start) + parsed.payload.len();
        let end = match u16::try_from(end) {
            Ok(end) if end <= datagram_size => end,
            _ => return Err(self.too_large(pktbuf, &parsed.key, end)),
        };
        let interval = Interval { start, end };
        let mut index = self.get_or_create(pktbuf, parsed.key, parsed.iface, now)?;

        let added = loop {
            let entry = self.entry(index)?;
            if entry.intervals.iter().any(|other| other.covers(interval)) {
                debug!("6lo rbuf: duplicate fragment (tag: {}, offset: {start})", parsed.key.tag);
                return Ok(ReassemblyStatus::Duplicate);
            }
            let overlaps = entry.intervals.iter().any(|other| other.overlaps(interval));
            if overlaps && self.config.overlap == OverlapPolicy::Restart {
                debug!(
                    "6lo rbuf: overlapping fragment (tag: {}, offset: {start}), restarting reassembly",
                    parsed.key.tag
                );
                self.evict(pktbuf, index);
                index = self.get_or_create(pktbuf, parsed.key, parsed.iface, now)?;
                continue;
            }
            break self.record_interval(index, interval)?;
        };

        let entry = self.entry_mut(index)?;
        let buffer = entry.buffer;
        entry.current_size += added;
        if let Some(nettype) = parsed.nettype {
            entry.nettype = nettype;
        }
        pktbuf.data_mut(buffer)?[usize::from(start)..usize::from(end)]
            .copy_from_slice(&parsed.payload);

        if self.entry(index)?.current_size < datagram_size {
            return Ok(ReassemblyStatus::Incomplete);
        }
        self.complete(pktbuf, index).map(ReassemblyStatus::Complete)
    }

    /// Fold every range touching `interval` into one record and return the
    /// number of bytes not covered before.
    ///
    /// Records of an entry stay disjoint and non-adjacent, so a run of
    /// in-order fragments occupies a single record.
    fn record_interval(&mut self, index: usize, interval: Interval) -> Result<u16, ReassemblyError> {
        let pool_full = self.intervals_in_use >= self.config.interval_pool;
        let entry = self.entry_mut(index)?;
        if pool_full && !entry.intervals.iter().any(|other| other.touches(interval)) {
            return Err(ReassemblyError::IntervalsExhausted);
        }
        let mut merged = interval;
        let mut covered = 0;
        let before = entry.intervals.len();
        entry.intervals.retain(|other| {
            if !other.touches(interval) {
                return true;
            }
            merged.start = merged.start.min(other.start);
            merged.end = merged.end.max(other.end);
            covered += other.len();
            false
        });
        let removed = before - entry.intervals.len();
        entry.intervals.push(merged);
        self.intervals_in_use = self.intervals_in_use + 1 - removed;
        Ok(merged.len() - covered)
    }

    /// Reject a fragment running past its datagram, discarding the entry it
    /// belongs to. Other entries are left alone.
    fn too_large(&mut self, pktbuf: &mut PacketBuffer, key: &ReassemblyKey, end: usize) -> ReassemblyError {
        if let Some(index) = self.position(key) {
            self.evict(pktbuf, index);
        }
        ReassemblyError::FragmentTooLarge {
            tag: key.tag,
            end,
            datagram_size: key.datagram_size,
        }
    }

    fn position(&self, key: &ReassemblyKey) -> Option<usize> {
        self.entries
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|entry| entry.key == *key))
    }

    fn get_or_create(
        &mut self,
        pktbuf: &mut PacketBuffer,
        key: ReassemblyKey,
        iface: IfaceId,
        now: Instant,
    ) -> Result<usize, ReassemblyError> {
        if let Some(index) = self.position(&key) {
            if let Some(entry) = self.entries[index].as_mut() {
                entry.arrival = now;
            }
            return Ok(index);
        }

        let index = match self.entries.iter().position(Option::is_none) {
            Some(index) => index,
            None => self.evict_oldest(pktbuf, now)?,
        };
        let buffer = pktbuf.alloc(usize::from(key.datagram_size), NetType::Undef)?;
        debug!(
            "6lo rbuf: new reassembly (tag: {}, size: {}, src: {:?})",
            key.tag, key.datagram_size, key.src
        );
        self.entries[index] = Some(ReassemblyEntry {
            key,
            iface,
            buffer,
            nettype: NetType::Undef,
            intervals: Vec::new(),
            current_size: 0,
            arrival: now,
        });
        Ok(index)
    }

    fn evict_oldest(&mut self, pktbuf: &mut PacketBuffer, now: Instant) -> Result<usize, ReassemblyError> {
        let (index, arrival) = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|entry| (index, entry.arrival)))
            .min_by_key(|(_, arrival)| *arrival)
            .ok_or(ReassemblyError::TableFull)?;
        let stale = now.saturating_duration_since(arrival) >= self.config.timeout;
        if !(self.config.aggressive_override || stale) {
            return Err(ReassemblyError::TableFull);
        }
        debug!("6lo rbuf: reassembly buffer full, evicting oldest entry");
        self.evict(pktbuf, index);
        metrics::inc_evictions(1);
        Ok(index)
    }

    fn complete(&mut self, pktbuf: &mut PacketBuffer, index: usize) -> Result<CompletedDatagram, ReassemblyError> {
        let entry = self.take(index).ok_or(ReassemblyError::TableFull)?;
        let netif = NetifHeader::new(entry.iface, entry.key.src, entry.key.dst);
        let header = match pktbuf.add_netif(netif, None) {
            Ok(header) => header,
            Err(err) => {
                let _ = pktbuf.release(entry.buffer);
                return Err(err.into());
            }
        };
        pktbuf.set_next(entry.buffer, Some(header))?;
        pktbuf.set_nettype(entry.buffer, entry.nettype)?;
        debug!(
            "6lo rbuf: datagram complete (tag: {}, size: {})",
            entry.key.tag, entry.key.datagram_size
        );
        Ok(CompletedDatagram {
            pkt: entry.buffer,
            nettype: entry.nettype,
        })
    }

    fn entry(&self, index: usize) -> Result<&ReassemblyEntry, ReassemblyError> {
        self.entries
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(ReassemblyError::TableFull)
    }

    fn entry_mut(&mut self, index: usize) -> Result<&mut ReassemblyEntry, ReassemblyError> {
        self.entries
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(ReassemblyError::TableFull)
    }

    /// Remove the entry at `index` without releasing its accumulator.
    fn take(&mut self, index: usize) -> Option<ReassemblyEntry> {
        let entry = self.entries.get_mut(index)?.take()?;
        self.intervals_in_use -= entry.intervals.len();
        Some(entry)
    }

    fn evict(&mut self, pktbuf: &mut PacketBuffer, index: usize) {
        if let Some(entry) = self.take(index) {
            let _ = pktbuf.release(entry.buffer);
        }
    }

    /// Evict every entry not updated for at least the configured timeout.
    ///
    /// Returns the keys of the evicted entries.
    pub fn gc_at(&mut self, pktbuf: &mut PacketBuffer, now: Instant) -> Vec<ReassemblyKey> {
        let timeout = self.config.timeout;
        let expired: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let entry = slot.as_ref()?;
                (now.saturating_duration_since(entry.arrival) >= timeout).then_some(index)
            })
            .collect();
        let mut evicted = Vec::with_capacity(expired.len());
        for index in expired {
            if let Some(entry) = self.take(index) {
                debug!("6lo rbuf: reassembly of {} timed out", entry.key.tag);
                let _ = pktbuf.release(entry.buffer);
                evicted.push(entry.key);
            }
        }
        if !evicted.is_empty() {
            metrics::inc_evictions(evicted.len());
            metrics::set_reassembly_active(self.len());
        }
        evicted
    }

    /// Evict expired entries using the current time.
    pub fn gc(&mut self, pktbuf: &mut PacketBuffer) -> Vec<ReassemblyKey> { self.gc_at(pktbuf, Instant::now()) }

    /// Discard the entry for `key`, releasing its buffer.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&mut self, pktbuf: &mut PacketBuffer, key: &ReassemblyKey) -> bool {
        let Some(index) = self.position(key) else {
            return false;
        };
        self.evict(pktbuf, index);
        metrics::set_reassembly_active(self.len());
        true
    }

    /// Discard every entry.
    pub fn reset(&mut self, pktbuf: &mut PacketBuffer) {
        for index in 0..self.entries.len() {
            self.evict(pktbuf, index);
        }
        metrics::set_reassembly_active(0);
    }
}

/// Decode the fragment `pkt` and extract the bytes it contributes.
fn parse<D: HeaderDecompressor + ?Sized>(
    pktbuf: &PacketBuffer,
    pkt: SnipId,
    page: u8,
    decompressor: &mut D,
) -> Result<Parsed, ReassemblyError> {
    let netif_snip = pktbuf
        .search_type(pkt, NetType::Netif)
        .ok_or(ReassemblyError::MissingNetif(pkt))?;
    let netif = *pktbuf.netif(netif_snip)?;
    let frame = pktbuf.data(pkt)?;
    let header = FragmentHeader::decode(frame)?;
    let datagram_size = header.datagram_size();
    if datagram_size == 0 {
        return Err(HeaderError::SizeOutOfRange(0).into());
    }
    let rest = &frame[header.len()..];
    if rest.is_empty() {
        return Err(HeaderError::Truncated {
            needed: header.len() + 1,
            available: frame.len(),
        }
        .into());
    }

    let (payload, nettype) = match header {
        FragmentHeader::First { .. } if rest[0] == UNCOMPRESSED_IPV6_DISPATCH => {
            (rest[1..].to_vec(), Some(NetType::Ipv6))
        }
        FragmentHeader::First { .. } if is_iphc(rest) => {
            let expanded = decompressor.decompress(rest, &netif, datagram_size)?;
            let mut payload = expanded.header;
            payload.extend_from_slice(rest.get(expanded.consumed..).unwrap_or_default());
            (payload, Some(NetType::Ipv6))
        }
        FragmentHeader::First { .. } => (rest.to_vec(), Some(NetType::Undef)),
        FragmentHeader::Subsequent { .. } => (rest.to_vec(), None),
    };

    Ok(Parsed {
        key: ReassemblyKey {
            src: netif.src,
            dst: netif.dst,
            tag: header.tag(),
            datagram_size,
            page,
        },
        iface: netif.iface,
        offset: header.offset(),
        payload,
        nettype,
    })
}
