//! Reference-counted packet buffer arena.
//!
//! [`PacketBuffer`] stores packet *snips*: byte slices or metadata records that
//! are linked into chains through their `next` handle. A chain usually starts
//! with a header snip and continues with payload snips, so prepending a header
//! never copies the payload.
//!
//! Snips are addressed by [`SnipId`] handles carrying a generation counter.
//! Once a snip is freed its handle goes stale and every later access reports
//! [`PktBufError::StaleHandle`] instead of touching recycled memory.
//!
//! Ownership follows a hold/release discipline: every snip counts its users,
//! [`PacketBuffer::hold`] adds users to a whole chain and
//! [`PacketBuffer::release`] drops one user from every snip of a chain,
//! freeing those that reach zero. Functions that take a [`SnipId`] document
//! whether they *take ownership* (the caller must not release the handle
//! afterwards) or merely borrow it for the duration of the call.

mod error;

use bytes::BytesMut;
use derive_more::Display;
pub use error::PktBufError;

use crate::{netif::NetifHeader, tx_sync::TxSync};

/// Bytes a network interface header snip is charged against the budget.
pub const NETIF_SNIP_SIZE: usize = 24;
/// Bytes a tx-sync snip is charged against the budget.
pub const TX_SYNC_SNIP_SIZE: usize = 8;
/// Default arena budget in bytes.
pub const DEFAULT_PKTBUF_SIZE: usize = 6144;

/// Handle to a snip stored in a [`PacketBuffer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display("#{index}.{generation}")]
pub struct SnipId {
    index: u32,
    generation: u32,
}

/// Protocol type of the data held by a snip.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetType {
    /// Unknown or raw payload.
    Undef,
    /// Network interface header ([`NetifHeader`]).
    Netif,
    /// 6LoWPAN frame (dispatch and following headers).
    SixLowPan,
    /// IPv6 datagram.
    Ipv6,
    /// Transmission synchronisation marker ([`TxSync`]).
    TxSync,
}

#[derive(Debug)]
enum SnipData {
    Bytes(BytesMut),
    Netif(NetifHeader),
    TxSync(TxSync),
}

#[derive(Debug)]
struct Snip {
    next: Option<SnipId>,
    data: SnipData,
    nettype: NetType,
    users: u32,
}

impl Snip {
    fn size(&self) -> usize {
        match &self.data {
            SnipData::Bytes(bytes) => bytes.len(),
            SnipData::Netif(_) => NETIF_SNIP_SIZE,
            SnipData::TxSync(_) => TX_SYNC_SNIP_SIZE,
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    snip: Option<Snip>,
}

/// Arena of reference-counted packet snips with a fixed byte budget.
///
/// # Examples
///
/// ```
/// use sixlowpan_frag::pktbuf::{NetType, PacketBuffer};
///
/// let mut pktbuf = PacketBuffer::new(128);
/// let payload = pktbuf.add(None, b"payload", NetType::Ipv6).expect("fits");
/// let header = pktbuf.add(Some(payload), b"hdr", NetType::SixLowPan).expect("fits");
/// assert_eq!(pktbuf.to_vec(header).expect("live chain"), b"hdrpayload");
///
/// pktbuf.release(header).expect("live chain");
/// assert!(pktbuf.is_empty());
/// ```
#[derive(Debug)]
pub struct PacketBuffer {
    slots: Vec<Slot>,
    free: Vec<u32>,
    capacity: usize,
    used: usize,
}

impl Default for PacketBuffer {
    fn default() -> Self { Self::new(DEFAULT_PKTBUF_SIZE) }
}

impl PacketBuffer {
    /// Create an arena that holds at most `capacity` bytes of snips.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            used: 0,
        }
    }

    /// Total byte budget.
    #[must_use]
    pub const fn capacity(&self) -> usize { self.capacity }

    /// Bytes currently occupied by live snips.
    #[must_use]
    pub const fn used(&self) -> usize { self.used }

    /// Whether no snip is alive.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.slots.iter().all(|slot| slot.snip.is_none()) }

    /// Copy `data` into a new snip placed in front of `next`.
    ///
    /// The new snip has one user and takes over the caller's reference to
    /// `next`, so releasing the returned handle releases `next` as well.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::Exhausted`] when the budget cannot hold `data`,
    /// or [`PktBufError::StaleHandle`] when `next` is not alive.
    pub fn add(
        &mut self,
        next: Option<SnipId>,
        data: &[u8],
        nettype: NetType,
    ) -> Result<SnipId, PktBufError> {
        self.insert(next, SnipData::Bytes(BytesMut::from(data)), nettype)
    }

    /// Allocate a zero-filled snip of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::Exhausted`] when the budget cannot hold `size`
    /// bytes.
    pub fn alloc(&mut self, size: usize, nettype: NetType) -> Result<SnipId, PktBufError> {
        self.insert(None, SnipData::Bytes(BytesMut::zeroed(size)), nettype)
    }

    /// Add a network interface header snip in front of `next`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::Exhausted`] when the budget is spent, or
    /// [`PktBufError::StaleHandle`] when `next` is not alive.
    pub fn add_netif(
        &mut self,
        header: NetifHeader,
        next: Option<SnipId>,
    ) -> Result<SnipId, PktBufError> {
        self.insert(next, SnipData::Netif(header), NetType::Netif)
    }

    /// Add a snip wrapping a transmission synchronisation marker.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::Exhausted`] when the budget is spent.
    pub fn add_tx_sync(&mut self, sync: TxSync) -> Result<SnipId, PktBufError> {
        self.insert(None, SnipData::TxSync(sync), NetType::TxSync)
    }

    fn insert(
        &mut self,
        next: Option<SnipId>,
        data: SnipData,
        nettype: NetType,
    ) -> Result<SnipId, PktBufError> {
        if let Some(next) = next {
            self.snip(next)?;
        }
        let snip = Snip {
            next,
            data,
            nettype,
            users: 1,
        };
        let requested = snip.size();
        let available = self.capacity - self.used;
        if requested > available {
            return Err(PktBufError::Exhausted {
                requested,
                available,
            });
        }
        self.used += requested;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.snip = Some(snip);
            return Ok(SnipId {
                index,
                generation: slot.generation,
            });
        }

        let Ok(index) = u32::try_from(self.slots.len()) else {
            self.used -= requested;
            return Err(PktBufError::Exhausted {
                requested,
                available,
            });
        };
        self.slots.push(Slot {
            generation: 0,
            snip: Some(snip),
        });
        Ok(SnipId {
            index,
            generation: 0,
        })
    }

    fn snip(&self, id: SnipId) -> Result<&Snip, PktBufError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.snip.as_ref())
            .ok_or(PktBufError::StaleHandle(id))
    }

    fn snip_mut(&mut self, id: SnipId) -> Result<&mut Snip, PktBufError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.snip.as_mut())
            .ok_or(PktBufError::StaleHandle(id))
    }

    /// Whether `id` refers to a live snip.
    #[must_use]
    pub fn contains(&self, id: SnipId) -> bool { self.snip(id).is_ok() }

    /// Add `n` users to every snip of the chain starting at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when a snip of the chain is not
    /// alive.
    pub fn hold(&mut self, id: SnipId, n: u32) -> Result<(), PktBufError> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let snip = self.snip_mut(current)?;
            snip.users = snip.users.saturating_add(n);
            cursor = snip.next;
        }
        Ok(())
    }

    /// Drop one user from every snip of the chain starting at `id`.
    ///
    /// Takes ownership of the caller's reference. Snips reaching zero users
    /// are freed; a freed tx-sync snip unlocks its waiter.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive.
    pub fn release(&mut self, id: SnipId) -> Result<(), PktBufError> {
        self.snip(id)?;
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Ok(snip) = self.snip_mut(current) else {
                break;
            };
            cursor = snip.next;
            snip.users = snip.users.saturating_sub(1);
            if snip.users == 0 {
                self.free_slot(current);
            }
        }
        Ok(())
    }

    fn free_slot(&mut self, id: SnipId) {
        let slot = &mut self.slots[id.index as usize];
        let Some(snip) = slot.snip.take() else {
            return;
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.used -= snip.size();
        self.free.push(id.index);
        if let SnipData::TxSync(sync) = snip.data {
            sync.unlock();
        }
    }

    /// Remove the unshared tx-sync snip `id` and return its marker still
    /// locked, so the caller can signal it later.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive or
    /// [`PktBufError::WrongKind`] when it is not a tx-sync snip with a
    /// single user.
    pub(crate) fn take_tx_sync(&mut self, id: SnipId) -> Result<TxSync, PktBufError> {
        let snip = self.snip(id)?;
        if !matches!(snip.data, SnipData::TxSync(_)) || snip.users != 1 {
            return Err(PktBufError::WrongKind {
                snip: id,
                expected: NetType::TxSync,
            });
        }
        let slot = &mut self.slots[id.index as usize];
        let Some(snip) = slot.snip.take() else {
            return Err(PktBufError::StaleHandle(id));
        };
        slot.generation = slot.generation.wrapping_add(1);
        self.used -= snip.size();
        self.free.push(id.index);
        match snip.data {
            SnipData::TxSync(sync) => Ok(sync),
            _ => Err(PktBufError::StaleHandle(id)),
        }
    }

    /// Number of users of the snip `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive.
    pub fn users(&self, id: SnipId) -> Result<u32, PktBufError> { Ok(self.snip(id)?.users) }

    /// Successor of `id` in its chain.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive.
    pub fn next(&self, id: SnipId) -> Result<Option<SnipId>, PktBufError> {
        Ok(self.snip(id)?.next)
    }

    /// Replace the successor of `id`, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` or `next` is not alive.
    pub fn set_next(
        &mut self,
        id: SnipId,
        next: Option<SnipId>,
    ) -> Result<Option<SnipId>, PktBufError> {
        if let Some(next) = next {
            self.snip(next)?;
        }
        Ok(std::mem::replace(&mut self.snip_mut(id)?.next, next))
    }

    /// Attach the chain `tail` after the last snip of `head`.
    ///
    /// Takes ownership of `tail`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when a snip of either chain is
    /// not alive.
    pub fn append(&mut self, head: SnipId, tail: SnipId) -> Result<(), PktBufError> {
        self.snip(tail)?;
        let mut last = head;
        while let Some(next) = self.snip(last)?.next {
            last = next;
        }
        self.snip_mut(last)?.next = Some(tail);
        Ok(())
    }

    /// Iterate over the handles of the chain starting at `id`.
    pub fn chain(&self, id: SnipId) -> impl Iterator<Item = SnipId> + '_ {
        std::iter::successors(Some(id), |current| {
            self.snip(*current).ok().and_then(|snip| snip.next)
        })
        .take_while(|current| self.contains(*current))
    }

    /// First snip of type `nettype` in the chain starting at `id`.
    #[must_use]
    pub fn search_type(&self, id: SnipId, nettype: NetType) -> Option<SnipId> {
        self.chain(id)
            .find(|current| self.nettype(*current).is_ok_and(|t| t == nettype))
    }

    /// Protocol type of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive.
    pub fn nettype(&self, id: SnipId) -> Result<NetType, PktBufError> {
        Ok(self.snip(id)?.nettype)
    }

    /// Change the protocol type of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive.
    pub fn set_nettype(&mut self, id: SnipId, nettype: NetType) -> Result<(), PktBufError> {
        self.snip_mut(id)?.nettype = nettype;
        Ok(())
    }

    /// Borrow the bytes of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive or
    /// [`PktBufError::NoData`] when it holds metadata.
    pub fn data(&self, id: SnipId) -> Result<&[u8], PktBufError> {
        match &self.snip(id)?.data {
            SnipData::Bytes(bytes) => Ok(bytes.as_ref()),
            _ => Err(PktBufError::NoData(id)),
        }
    }

    /// Mutably borrow the bytes of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive or
    /// [`PktBufError::NoData`] when it holds metadata.
    pub fn data_mut(&mut self, id: SnipId) -> Result<&mut [u8], PktBufError> {
        match &mut self.snip_mut(id)?.data {
            SnipData::Bytes(bytes) => Ok(bytes.as_mut()),
            _ => Err(PktBufError::NoData(id)),
        }
    }

    /// Borrow the network interface header stored in `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive or
    /// [`PktBufError::WrongKind`] when it is not a header snip.
    pub fn netif(&self, id: SnipId) -> Result<&NetifHeader, PktBufError> {
        match &self.snip(id)?.data {
            SnipData::Netif(header) => Ok(header),
            _ => Err(PktBufError::WrongKind {
                snip: id,
                expected: NetType::Netif,
            }),
        }
    }

    /// Mutably borrow the network interface header stored in `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive or
    /// [`PktBufError::WrongKind`] when it is not a header snip.
    pub fn netif_mut(&mut self, id: SnipId) -> Result<&mut NetifHeader, PktBufError> {
        match &mut self.snip_mut(id)?.data {
            SnipData::Netif(header) => Ok(header),
            _ => Err(PktBufError::WrongKind {
                snip: id,
                expected: NetType::Netif,
            }),
        }
    }

    /// Borrow the synchronisation marker stored in `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive or
    /// [`PktBufError::WrongKind`] when it is not a tx-sync snip.
    pub fn tx_sync(&self, id: SnipId) -> Result<&TxSync, PktBufError> {
        match &self.snip(id)?.data {
            SnipData::TxSync(sync) => Ok(sync),
            _ => Err(PktBufError::WrongKind {
                snip: id,
                expected: NetType::TxSync,
            }),
        }
    }

    /// Number of packet bytes in the chain starting at `id`.
    ///
    /// Header and tx-sync snips carry no packet bytes and are skipped.
    #[must_use]
    pub fn payload_len(&self, id: SnipId) -> usize {
        self.chain(id)
            .filter_map(|current| self.data(current).ok())
            .map(<[u8]>::len)
            .sum()
    }

    /// Copy packet bytes of the chain starting at `id` into `dst`, skipping
    /// the first `offset` bytes. Returns the number of bytes copied.
    #[must_use]
    pub fn read_chain(&self, id: SnipId, offset: usize, dst: &mut [u8]) -> usize {
        let mut skip = offset;
        let mut written = 0;
        for data in self.chain(id).filter_map(|current| self.data(current).ok()) {
            if written == dst.len() {
                break;
            }
            if skip >= data.len() {
                skip -= data.len();
                continue;
            }
            let available = &data[skip..];
            skip = 0;
            let n = available.len().min(dst.len() - written);
            dst[written..written + n].copy_from_slice(&available[..n]);
            written += n;
        }
        written
    }

    /// Concatenate the packet bytes of the chain starting at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`PktBufError::StaleHandle`] when `id` is not alive.
    pub fn to_vec(&self, id: SnipId) -> Result<Vec<u8>, PktBufError> {
        self.snip(id)?;
        let mut out = vec![0; self.payload_len(id)];
        let copied = self.read_chain(id, 0, &mut out);
        out.truncate(copied);
        Ok(out)
    }
}
