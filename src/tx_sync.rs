//! Transmission completion synchronisation.
//!
//! An upstream caller that wants to know when a datagram has left the radio
//! appends a [`TxSync`] marker snip to the packet before handing it to the
//! stack. The fragmenter moves that snip onto whichever physical fragment is
//! transmitted last, and the link layer signals it through [`tx_complete`]
//! once that fragment is done. Success and failure unlock the marker alike:
//! releasing a marker snip without calling [`tx_complete`] unlocks it too.
//!
//! [`TxSync::wait`] suspends the calling task until the unlock happens. It
//! must not be awaited from the task that runs the stack itself, because that
//! task is the one that eventually performs the unlock.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use tokio::sync::Notify;

use crate::pktbuf::{NetType, PacketBuffer, PktBufError, SnipId};

#[derive(Debug, Default)]
struct Inner {
    unlocked: AtomicBool,
    unlocks: AtomicUsize,
    notify: Notify,
}

/// One-shot unlock primitive shared between a waiter and a packet snip.
///
/// # Examples
///
/// ```
/// use sixlowpan_frag::{
///     pktbuf::{NetType, PacketBuffer},
///     tx_sync::{self, TxSync},
/// };
///
/// let mut pktbuf = PacketBuffer::new(256);
/// let pkt = pktbuf.add(None, b"datagram", NetType::Ipv6).expect("fits");
/// let sync = TxSync::new();
/// tx_sync::append(&mut pktbuf, pkt, &sync).expect("sync snip fits");
/// assert!(!sync.is_unlocked());
///
/// tx_sync::tx_complete(&pktbuf, pkt);
/// assert!(sync.is_unlocked());
/// ```
#[derive(Clone, Debug, Default)]
pub struct TxSync {
    inner: Arc<Inner>,
}

impl TxSync {
    /// Create a locked synchronisation object.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Whether the transmission has completed.
    #[must_use]
    pub fn is_unlocked(&self) -> bool { self.inner.unlocked.load(Ordering::Acquire) }

    /// How many times an unlock was attempted. Only the first one counts.
    #[must_use]
    pub fn unlock_attempts(&self) -> usize { self.inner.unlocks.load(Ordering::Acquire) }

    /// Unlock the waiter. Returns `true` only for the first call.
    pub(crate) fn unlock(&self) -> bool {
        self.inner.unlocks.fetch_add(1, Ordering::AcqRel);
        if self.inner.unlocked.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.inner.notify.notify_waiters();
        true
    }

    /// Wait until the transmission completes or fails.
    pub async fn wait(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent unlock is not lost.
        notified.as_mut().enable();
        if self.is_unlocked() {
            return;
        }
        notified.await;
    }
}

/// Append a marker snip for `sync` to the end of the chain `pkt`.
///
/// `pkt` is borrowed; the marker becomes part of its chain and is released
/// with it.
///
/// # Errors
///
/// Returns [`PktBufError`] when the marker cannot be allocated or `pkt` is not
/// alive. `sync` stays locked in that case.
pub fn append(pktbuf: &mut PacketBuffer, pkt: SnipId, sync: &TxSync) -> Result<(), PktBufError> {
    if !pktbuf.contains(pkt) {
        return Err(PktBufError::StaleHandle(pkt));
    }
    let snip = pktbuf.add_tx_sync(sync.clone())?;
    if let Err(err) = pktbuf.append(pkt, snip) {
        let _ = pktbuf.release(snip);
        return Err(err);
    }
    Ok(())
}

/// Detach the trailing marker snip of `pkt`, if there is one.
///
/// The caller takes ownership of the returned snip.
#[must_use]
pub fn split(pktbuf: &mut PacketBuffer, pkt: SnipId) -> Option<SnipId> {
    let mut prev = pkt;
    let mut current = pktbuf.next(pkt).ok()??;
    while let Some(next) = pktbuf.next(current).ok()? {
        prev = current;
        current = next;
    }
    if pktbuf.nettype(current).ok()? != NetType::TxSync {
        return None;
    }
    pktbuf.set_next(prev, None).ok()?;
    Some(current)
}

/// Detach the trailing marker of `pkt` and take it out of the packet buffer
/// without unlocking it.
///
/// Used by link layers that hand frames to another task: the returned
/// [`TxSync`] must be unlocked once that task is done with the frame.
pub fn detach(pktbuf: &mut PacketBuffer, pkt: SnipId) -> Option<TxSync> {
    let marker = split(pktbuf, pkt)?;
    match pktbuf.take_tx_sync(marker) {
        Ok(sync) => Some(sync),
        Err(_) => {
            let _ = pktbuf.release(marker);
            None
        }
    }
}

/// Signal completion of every marker in the chain `pkt`.
///
/// Called by the link layer once the frame carrying the marker has been
/// transmitted or has failed. `pkt` is borrowed; the link layer still
/// releases it afterwards.
pub fn tx_complete(pktbuf: &PacketBuffer, pkt: SnipId) {
    for snip in pktbuf.chain(pkt) {
        if let Ok(sync) = pktbuf.tx_sync(snip) {
            sync.unlock();
        }
    }
}
