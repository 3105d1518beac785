//! Single-threaded 6LoWPAN fragmentation context.
//!
//! [`Stack`] owns every resource the fragmentation layer needs: the packet
//! buffer, the interfaces, the fragment buffer pool, the reassembly buffer and
//! the collaborators it talks to. It processes one message at a time and
//! never blocks. Emitting a datagram's fragments is paced through an internal
//! bounded queue of [`StackEvent`]s: after each fragment the next one is
//! queued rather than sent in a loop, so other work interleaves.
//!
//! The synchronous core is driven either directly (tests, embedded loops) or
//! by the async [`runtime::StackRuntime`].

pub mod channel;
pub mod runtime;

use std::{collections::VecDeque, time::Instant};

use log::debug;
use thiserror::Error;

use crate::{
    config::{ConfigError, FragConfig},
    frag::{
        FbufId,
        FragmentBufferPool,
        FragmentHint,
        FragmentProgress,
        FragmentationError,
        Fragmenter,
        HeaderDecompressor,
        LinkError,
        LinkLayer,
        NoDecompression,
        ReassemblyBuffer,
        ReassemblyError,
        ReassemblyStatus,
        Upstream,
        dispatch::dispatch_datagram,
        header::{DatagramTag, MAX_DATAGRAM_SIZE, UNCOMPRESSED_IPV6_DISPATCH, is_fragment},
    },
    metrics::{self, Direction},
    netif::{IfaceId, Interface, NetifHeader},
    pktbuf::{NetType, PacketBuffer, PktBufError, SnipId},
    tx_sync::{self, TxSync},
};

/// Message processed by the stack's internal queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StackEvent {
    /// Send the next fragment of the datagram held by a fragment buffer.
    FragmentNext(FbufId),
    /// Sweep stalled reassemblies.
    GcRbuf,
}

/// Outcome of a frame accepted by the stack.
///
/// Unlike [`ReassemblyStatus`], a delivered datagram carries no packet
/// handle: it already belongs to the upstream layer or has been released.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Received {
    /// The fragment was stored; bytes are still missing.
    Incomplete,
    /// The fragment repeats received bytes and was ignored.
    Duplicate,
    /// A whole datagram was handed upstream.
    Delivered {
        /// Protocol of the datagram.
        nettype: NetType,
        /// Whether a receiver took the datagram. When `false` it was released.
        accepted: bool,
    },
}

/// Reasons an outgoing datagram was dropped.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The packet names an interface the stack does not know.
    #[error("unknown interface {0}")]
    UnknownInterface(IfaceId),
    /// Every fragment buffer is busy.
    #[error("no free fragment buffer")]
    NoFragmentBuffer,
    /// A queued event refers to a fragment buffer that is no longer in use.
    #[error("{0} holds no datagram")]
    StaleFragmentBuffer(FbufId),
    /// The datagram exceeds the 11-bit size field.
    #[error("datagram of {0} bytes is too large to fragment")]
    DatagramTooLarge(usize),
    /// The internal queue cannot take the next fragment.
    #[error("stack queue full")]
    QueueFull,
    /// Fragmenting failed.
    #[error(transparent)]
    Fragmentation(#[from] FragmentationError),
    /// The link layer refused an unfragmented frame.
    #[error("link layer rejected frame: {0}")]
    Link(#[from] LinkError),
    /// The packet buffer rejected an operation.
    #[error("packet buffer error: {0}")]
    PktBuf(#[from] PktBufError),
}

impl SendError {
    /// Short label used for drop metrics.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::UnknownInterface(_) => "unknown_interface",
            Self::NoFragmentBuffer => "fbuf_full",
            Self::StaleFragmentBuffer(_) => "stale_fbuf",
            Self::DatagramTooLarge(_) => "too_large",
            Self::QueueFull => "queue_full",
            Self::Fragmentation(FragmentationError::Link(_)) | Self::Link(_) => "link",
            Self::Fragmentation(_) => "fragmentation",
            Self::PktBuf(_) => "pktbuf",
        }
    }
}

/// Fragmentation context owning all per-stack state.
pub struct Stack<L, U, D = NoDecompression> {
    config: FragConfig,
    pktbuf: PacketBuffer,
    interfaces: Vec<Interface>,
    fbufs: FragmentBufferPool,
    rbuf: ReassemblyBuffer,
    link: L,
    upstream: U,
    decompressor: D,
    queue: VecDeque<StackEvent>,
}

impl<L: LinkLayer, U: Upstream> Stack<L, U> {
    /// Create a stack without header decompression.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` is inconsistent.
    pub fn new(config: FragConfig, link: L, upstream: U) -> Result<Self, ConfigError> {
        Self::with_decompressor(config, link, upstream, NoDecompression)
    }
}

impl<L: LinkLayer, U: Upstream, D: HeaderDecompressor> Stack<L, U, D> {
    /// Create a stack expanding compressed first fragments with
    /// `decompressor`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when `config` is inconsistent.
    pub fn with_decompressor(
        config: FragConfig,
        link: L,
        upstream: U,
        decompressor: D,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            pktbuf: PacketBuffer::new(config.pktbuf_size),
            interfaces: Vec::new(),
            fbufs: FragmentBufferPool::new(config.fbuf_slots, DatagramTag::new(config.initial_tag)),
            rbuf: ReassemblyBuffer::new(config.reassembly),
            link,
            upstream,
            decompressor,
            queue: VecDeque::with_capacity(config.queue_capacity),
        })
    }

    /// Register `iface`, replacing an interface with the same id.
    #[must_use]
    pub fn with_interface(mut self, iface: Interface) -> Self {
        self.add_interface(iface);
        self
    }

    /// Register `iface`, replacing an interface with the same id.
    pub fn add_interface(&mut self, iface: Interface) {
        self.interfaces.retain(|known| known.id != iface.id);
        self.interfaces.push(iface);
    }

    /// Look up a registered interface.
    #[must_use]
    pub fn interface(&self, id: IfaceId) -> Option<&Interface> {
        self.interfaces.iter().find(|iface| iface.id == id)
    }

    /// Configuration the stack was built with.
    #[must_use]
    pub const fn config(&self) -> &FragConfig { &self.config }

    /// Borrow the packet buffer.
    #[must_use]
    pub const fn pktbuf(&self) -> &PacketBuffer { &self.pktbuf }

    /// Mutably borrow the packet buffer, e.g. to build packets for
    /// [`Stack::frag_send`].
    pub fn pktbuf_mut(&mut self) -> &mut PacketBuffer { &mut self.pktbuf }

    /// Borrow the reassembly buffer.
    #[must_use]
    pub const fn rbuf(&self) -> &ReassemblyBuffer { &self.rbuf }

    /// Borrow the fragment buffer pool.
    #[must_use]
    pub const fn fbufs(&self) -> &FragmentBufferPool { &self.fbufs }

    /// Borrow the link layer.
    #[must_use]
    pub const fn link(&self) -> &L { &self.link }

    /// Mutably borrow the link layer.
    pub fn link_mut(&mut self) -> &mut L { &mut self.link }

    /// Borrow the upstream network layer.
    #[must_use]
    pub const fn upstream(&self) -> &U { &self.upstream }

    /// Mutably borrow the upstream network layer.
    pub fn upstream_mut(&mut self) -> &mut U { &mut self.upstream }

    /// Number of queued internal events.
    #[must_use]
    pub fn pending(&self) -> usize { self.queue.len() }

    /// Whether internal events are waiting.
    #[must_use]
    pub fn has_pending(&self) -> bool { !self.queue.is_empty() }

    /// Queue an internal event.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::QueueFull`] when the queue is at capacity.
    pub fn post(&mut self, event: StackEvent) -> Result<(), SendError> {
        if self.queue.len() >= self.config.queue_capacity {
            return Err(SendError::QueueFull);
        }
        self.queue.push_back(event);
        Ok(())
    }

    /// Start fragmenting the datagram `pkt`.
    ///
    /// `pkt` is a [`NetifHeader`] snip followed by the 6LoWPAN payload and
    /// optionally a tx-sync snip; `datagram_size` is the uncompressed size
    /// advertised in every fragment header. The first fragment is sent
    /// immediately, the rest are paced through the internal queue.
    ///
    /// Takes ownership of `pkt`. On error the datagram is dropped and `pkt`
    /// released, which unlocks an attached tx-sync.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] describing why the datagram was dropped.
    pub fn frag_send(
        &mut self,
        pkt: SnipId,
        datagram_size: u16,
        page: u8,
        hint: Option<FragmentHint>,
    ) -> Result<FbufId, SendError> {
        let result = self.start_fragmentation(pkt, datagram_size, page, hint);
        if let Err(err) = &result {
            self.record_send_drop(err);
        }
        result
    }

    fn start_fragmentation(
        &mut self,
        pkt: SnipId,
        datagram_size: u16,
        page: u8,
        hint: Option<FragmentHint>,
    ) -> Result<FbufId, SendError> {
        if datagram_size > MAX_DATAGRAM_SIZE {
            let _ = self.pktbuf.release(pkt);
            return Err(SendError::DatagramTooLarge(usize::from(datagram_size)));
        }
        let Some(id) = self.fbufs.acquire(pkt, datagram_size, page, hint) else {
            let _ = self.pktbuf.release(pkt);
            return Err(SendError::NoFragmentBuffer);
        };
        debug!(
            "6lo frag: fragmenting datagram of {datagram_size} bytes in {id} (tag: {})",
            self.fbufs.get(id).map(|fbuf| fbuf.tag()).unwrap_or_default()
        );
        self.send_fragment(id).map(|_| id)
    }

    /// Emit the next fragment held by `id` and queue the one after it.
    fn send_fragment(&mut self, id: FbufId) -> Result<FragmentProgress, SendError> {
        let Some(fbuf) = self.fbufs.get_mut(id) else {
            return Err(SendError::StaleFragmentBuffer(id));
        };
        let Some(pkt) = fbuf.pkt() else {
            return Err(SendError::StaleFragmentBuffer(id));
        };
        let iface_id = match self.pktbuf.netif(pkt) {
            Ok(netif) => netif.iface,
            Err(err) => {
                self.abort(id);
                return Err(err.into());
            }
        };
        let Some(iface) = self.interfaces.iter().find(|iface| iface.id == iface_id) else {
            self.abort(id);
            return Err(SendError::UnknownInterface(iface_id));
        };

        let progress = Fragmenter::new(&mut self.pktbuf, &mut self.link, iface).send_next(fbuf);
        match progress {
            Ok(FragmentProgress::More) => {
                if let Err(err) = self.post(StackEvent::FragmentNext(id)) {
                    debug!("6lo frag: cannot queue next fragment of {id}, aborting");
                    self.abort(id);
                    return Err(err);
                }
                Ok(FragmentProgress::More)
            }
            Ok(FragmentProgress::Done) => {
                self.abort(id);
                metrics::inc_datagrams(Direction::Outbound);
                Ok(FragmentProgress::Done)
            }
            Err(err) => {
                debug!("6lo frag: fragmentation of {id} failed: {err}");
                self.abort(id);
                Err(err.into())
            }
        }
    }

    /// Free the fragment buffer `id` and release its packet.
    fn abort(&mut self, id: FbufId) {
        if let Some(pkt) = self.fbufs.release(id) {
            let _ = self.pktbuf.release(pkt);
        }
    }

    /// Send an uncompressed IPv6 `datagram`, fragmenting it when it does not
    /// fit one frame.
    ///
    /// The datagram is copied into the packet buffer behind the uncompressed
    /// IPv6 dispatch. `sync`, if given, is unlocked once the last frame has
    /// left the link layer or the datagram was dropped.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] describing why the datagram was dropped.
    pub fn send_datagram(
        &mut self,
        netif: NetifHeader,
        datagram: &[u8],
        sync: Option<&TxSync>,
    ) -> Result<(), SendError> {
        let result = self.send_uncompressed(netif, datagram, sync);
        if let Err(err) = &result {
            if let Some(sync) = sync {
                sync.unlock();
            }
            self.record_send_drop(err);
        }
        result
    }

    fn send_uncompressed(
        &mut self,
        netif: NetifHeader,
        datagram: &[u8],
        sync: Option<&TxSync>,
    ) -> Result<(), SendError> {
        let Some(iface) = self.interface(netif.iface).copied() else {
            return Err(SendError::UnknownInterface(netif.iface));
        };
        let Ok(datagram_size) = u16::try_from(datagram.len()) else {
            return Err(SendError::DatagramTooLarge(datagram.len()));
        };

        let payload = self.pktbuf.add(None, datagram, NetType::Ipv6)?;
        let dispatch = match self
            .pktbuf
            .add(Some(payload), &[UNCOMPRESSED_IPV6_DISPATCH], NetType::SixLowPan)
        {
            Ok(dispatch) => dispatch,
            Err(err) => {
                let _ = self.pktbuf.release(payload);
                return Err(err.into());
            }
        };
        let pkt = match self.pktbuf.add_netif(netif, Some(dispatch)) {
            Ok(pkt) => pkt,
            Err(err) => {
                let _ = self.pktbuf.release(dispatch);
                return Err(err.into());
            }
        };
        if let Some(sync) = sync {
            if let Err(err) = tx_sync::append(&mut self.pktbuf, pkt, sync) {
                let _ = self.pktbuf.release(pkt);
                return Err(err.into());
            }
        }

        if datagram.len() < usize::from(iface.max_frag_size) {
            self.link.send(&mut self.pktbuf, pkt)?;
            metrics::inc_datagrams(Direction::Outbound);
            return Ok(());
        }
        self.start_fragmentation(pkt, datagram_size, 0, None).map(|_| ())
    }

    /// Add a received fragment using the current time.
    ///
    /// # Errors
    ///
    /// See [`Stack::frag_recv_at`].
    pub fn frag_recv(&mut self, pkt: SnipId, page: u8) -> Result<Received, ReassemblyError> {
        self.frag_recv_at(pkt, page, Instant::now())
    }

    /// Add the received fragment `pkt` to the reassembly buffer.
    ///
    /// `pkt` is the fragment snip followed by its [`NetifHeader`] snip; the
    /// stack takes ownership of it. A completed datagram is handed to the
    /// upstream layer before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError`] when the fragment is dropped.
    pub fn frag_recv_at(
        &mut self,
        pkt: SnipId,
        page: u8,
        now: Instant,
    ) -> Result<Received, ReassemblyError> {
        let status =
            self.rbuf
                .add_at(&mut self.pktbuf, pkt, page, now, &mut self.decompressor)?;
        Ok(match status {
            ReassemblyStatus::Incomplete => Received::Incomplete,
            ReassemblyStatus::Duplicate => Received::Duplicate,
            ReassemblyStatus::Complete(done) => Received::Delivered {
                nettype: done.nettype,
                accepted: dispatch_datagram(
                    &mut self.pktbuf,
                    &mut self.upstream,
                    done.nettype,
                    done.pkt,
                ),
            },
        })
    }

    /// Accept a frame from the link layer.
    ///
    /// Fragments go through reassembly; an unfragmented frame with the
    /// uncompressed IPv6 dispatch is delivered upstream directly. Other
    /// frames are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ReassemblyError`] when the frame is dropped.
    pub fn receive_frame_at(
        &mut self,
        netif: NetifHeader,
        frame: &[u8],
        page: u8,
        now: Instant,
    ) -> Result<Received, ReassemblyError> {
        let header = self.pktbuf.add_netif(netif, None)?;
        if is_fragment(frame) {
            let pkt = match self.pktbuf.add(Some(header), frame, NetType::SixLowPan) {
                Ok(pkt) => pkt,
                Err(err) => {
                    let _ = self.pktbuf.release(header);
                    metrics::inc_dropped("pktbuf");
                    return Err(err.into());
                }
            };
            return self.frag_recv_at(pkt, page, now);
        }

        let Some((&UNCOMPRESSED_IPV6_DISPATCH, datagram)) = frame.split_first() else {
            let _ = self.pktbuf.release(header);
            metrics::inc_dropped("malformed");
            let dispatch = frame.first().copied().unwrap_or_default();
            return Err(crate::frag::HeaderError::UnknownDispatch(dispatch).into());
        };
        let pkt = match self.pktbuf.add(Some(header), datagram, NetType::Ipv6) {
            Ok(pkt) => pkt,
            Err(err) => {
                let _ = self.pktbuf.release(header);
                metrics::inc_dropped("pktbuf");
                return Err(err.into());
            }
        };
        metrics::inc_datagrams(Direction::Inbound);
        Ok(Received::Delivered {
            nettype: NetType::Ipv6,
            accepted: dispatch_datagram(
                &mut self.pktbuf,
                &mut self.upstream,
                NetType::Ipv6,
                pkt,
            ),
        })
    }

    /// Accept a frame from the link layer using the current time.
    ///
    /// # Errors
    ///
    /// See [`Stack::receive_frame_at`].
    pub fn receive_frame(
        &mut self,
        netif: NetifHeader,
        frame: &[u8],
        page: u8,
    ) -> Result<Received, ReassemblyError> {
        self.receive_frame_at(netif, frame, page, Instant::now())
    }

    /// Process one internal event.
    pub fn handle_at(&mut self, event: StackEvent, now: Instant) {
        match event {
            StackEvent::FragmentNext(id) => {
                if let Err(err) = self.send_fragment(id) {
                    self.record_send_drop(&err);
                }
            }
            StackEvent::GcRbuf => {
                self.rbuf.gc_at(&mut self.pktbuf, now);
            }
        }
    }

    /// Process one internal event using the current time.
    pub fn handle(&mut self, event: StackEvent) { self.handle_at(event, Instant::now()); }

    /// Process the oldest queued event. Returns `false` if none was queued.
    pub fn poll_at(&mut self, now: Instant) -> bool {
        let Some(event) = self.queue.pop_front() else {
            return false;
        };
        self.handle_at(event, now);
        true
    }

    /// Process the oldest queued event using the current time.
    pub fn poll(&mut self) -> bool { self.poll_at(Instant::now()) }

    /// Process queued events until the queue is empty.
    pub fn run_pending(&mut self) {
        while self.poll() {}
    }

    /// Evict reassemblies older than the configured timeout at `now`.
    /// Returns how many were evicted.
    pub fn gc_at(&mut self, now: Instant) -> usize { self.rbuf.gc_at(&mut self.pktbuf, now).len() }

    /// Evict stalled reassemblies using the current time.
    pub fn gc(&mut self) -> usize { self.gc_at(Instant::now()) }

    /// Abandon every datagram in flight and every reassembly.
    pub fn shutdown(&mut self) {
        self.queue.clear();
        for pkt in self.fbufs.release_all() {
            let _ = self.pktbuf.release(pkt);
        }
        self.rbuf.reset(&mut self.pktbuf);
    }

    fn record_send_drop(&self, err: &SendError) {
        debug!("6lo frag: dropping datagram: {err}");
        metrics::inc_dropped(err.reason());
    }
}
