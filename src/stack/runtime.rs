//! Async driver running a [`Stack`] in its own task.
//!
//! [`StackRuntime`] owns the stack and serialises everything that touches
//! it: requests from [`StackHandle`]s, the internal fragment queue and the
//! periodic reassembly sweep. Queued stack events are drained before new
//! requests are accepted, yielding to the scheduler after each one, so a
//! long datagram never monopolises the worker thread.
//!
//! ```no_run
//! use sixlowpan_frag::{
//!     config::FragConfig,
//!     stack::{
//!         Stack,
//!         channel::{ChannelLink, ChannelUpstream},
//!         runtime::StackRuntime,
//!     },
//! };
//!
//! # async fn run() {
//! let (link, _frames) = ChannelLink::new(8);
//! let (upstream, _datagrams) = ChannelUpstream::new(8);
//! let stack = Stack::new(FragConfig::default(), link, upstream).expect("valid config");
//! let (runtime, handle) = StackRuntime::new(stack);
//! let task = tokio::spawn(runtime.run());
//! drop(handle);
//! let _stack = task.await.expect("runtime task");
//! # }
//! ```

use std::time::Instant;

use bytes::Bytes;
use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Stack, StackEvent};
use crate::{
    frag::{HeaderDecompressor, LinkLayer, Upstream},
    netif::NetifHeader,
    tx_sync::TxSync,
};

/// Work submitted to a running stack.
#[derive(Debug)]
pub enum Request {
    /// Send an uncompressed IPv6 datagram.
    Send {
        /// Interface and link-layer addresses to send with.
        netif: NetifHeader,
        /// IPv6 datagram bytes.
        datagram: Bytes,
        /// Marker unlocked once the datagram has left the link layer.
        sync: Option<TxSync>,
    },
    /// Process a frame received by the radio.
    Receive {
        /// Interface and link-layer addresses the frame arrived with.
        netif: NetifHeader,
        /// Frame bytes starting with the 6LoWPAN dispatch.
        frame: Bytes,
        /// 6LoWPAN context page.
        page: u8,
    },
}

/// Errors returned by a [`StackHandle`].
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime has stopped.
    #[error("stack runtime stopped")]
    Closed,
    /// The request queue is full.
    #[error("stack request queue full")]
    Full,
}

impl<T> From<mpsc::error::SendError<T>> for RuntimeError {
    fn from(_: mpsc::error::SendError<T>) -> Self { Self::Closed }
}

impl<T> From<mpsc::error::TrySendError<T>> for RuntimeError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => Self::Full,
            mpsc::error::TrySendError::Closed(_) => Self::Closed,
        }
    }
}

/// Cloneable handle submitting requests to a [`StackRuntime`].
#[derive(Clone, Debug)]
pub struct StackHandle {
    tx: mpsc::Sender<Request>,
}

impl StackHandle {
    /// Queue `datagram` for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] when the runtime has stopped.
    pub async fn send(
        &self,
        netif: NetifHeader,
        datagram: impl Into<Bytes>,
    ) -> Result<(), RuntimeError> {
        let datagram = datagram.into();
        self.tx
            .send(Request::Send {
                netif,
                datagram,
                sync: None,
            })
            .await?;
        Ok(())
    }

    /// Queue `datagram` for transmission and return a marker that unlocks
    /// once its last frame has left the link layer or it was dropped.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] when the runtime has stopped.
    pub async fn send_synced(
        &self,
        netif: NetifHeader,
        datagram: impl Into<Bytes>,
    ) -> Result<TxSync, RuntimeError> {
        let sync = TxSync::new();
        self.tx
            .send(Request::Send {
                netif,
                datagram: datagram.into(),
                sync: Some(sync.clone()),
            })
            .await?;
        Ok(sync)
    }

    /// Submit a received frame, waiting for queue space.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Closed`] when the runtime has stopped.
    pub async fn receive(
        &self,
        netif: NetifHeader,
        frame: impl Into<Bytes>,
        page: u8,
    ) -> Result<(), RuntimeError> {
        self.tx
            .send(Request::Receive {
                netif,
                frame: frame.into(),
                page,
            })
            .await?;
        Ok(())
    }

    /// Submit a received frame without waiting, as a radio driver's receive
    /// path does.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Full`] when the request queue is full or
    /// [`RuntimeError::Closed`] when the runtime has stopped.
    pub fn try_receive(
        &self,
        netif: NetifHeader,
        frame: impl Into<Bytes>,
        page: u8,
    ) -> Result<(), RuntimeError> {
        self.tx.try_send(Request::Receive {
            netif,
            frame: frame.into(),
            page,
        })?;
        Ok(())
    }
}

/// Task driving a [`Stack`].
pub struct StackRuntime<L, U, D> {
    stack: Stack<L, U, D>,
    rx: mpsc::Receiver<Request>,
    shutdown: CancellationToken,
}

impl<L, U, D> StackRuntime<L, U, D>
where
    L: LinkLayer,
    U: Upstream,
    D: HeaderDecompressor,
{
    /// Wrap `stack` and return the handle used to reach it.
    #[must_use]
    pub fn new(stack: Stack<L, U, D>) -> (Self, StackHandle) {
        let (tx, rx) = mpsc::channel(stack.config().request_capacity);
        let runtime = Self {
            stack,
            rx,
            shutdown: CancellationToken::new(),
        };
        (runtime, StackHandle { tx })
    }

    /// Stop when `token` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Token stopping the runtime when cancelled.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken { self.shutdown.clone() }

    /// Process requests until shutdown or until every handle is dropped,
    /// then return the stack.
    ///
    /// On cancellation, all unfinished work is abandoned and its markers
    /// unlocked. When the handles are dropped, queued fragments are still
    /// sent.
    pub async fn run(mut self) -> Stack<L, U, D> {
        let mut gc = time::interval(self.stack.config().gc_interval);
        gc.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        gc.tick().await;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            if self.stack.poll_at(now()) {
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                biased;

                () = self.shutdown.cancelled() => break,
                request = self.rx.recv() => match request {
                    Some(request) => self.handle(request),
                    None => {
                        debug!("all stack handles dropped");
                        while self.stack.poll_at(now()) {}
                        break;
                    }
                },
                _ = gc.tick() => self.stack.handle_at(StackEvent::GcRbuf, now()),
            }
        }

        info!(
            abandoned_reassemblies = self.stack.rbuf().len(),
            queued_events = self.stack.pending(),
            "6lo stack runtime stopped"
        );
        self.stack.shutdown();
        self.abandon_requests();
        self.stack
    }

    /// Refuse requests still queued, unlocking any marker they carry.
    fn abandon_requests(&mut self) {
        self.rx.close();
        while let Ok(request) = self.rx.try_recv() {
            if let Request::Send {
                sync: Some(sync), ..
            } = request
            {
                sync.unlock();
            }
        }
    }

    fn handle(&mut self, request: Request) {
        match request {
            Request::Send {
                netif,
                datagram,
                sync,
            } => {
                if let Err(err) = self.stack.send_datagram(netif, &datagram, sync.as_ref()) {
                    debug!(iface = %netif.iface, %err, "datagram dropped");
                }
            }
            Request::Receive { netif, frame, page } => {
                if let Err(err) = self.stack.receive_frame_at(netif, &frame, page, now()) {
                    debug!(iface = %netif.iface, %err, "frame dropped");
                }
            }
        }
    }
}

/// Current time on the tokio clock, which tests can pause and advance.
fn now() -> Instant { time::Instant::now().into_std() }
