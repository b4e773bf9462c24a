//! Single-slot handoff between the dispatch thread and the serve loop.
//!
//! Protocol handlers run inside `blocking_dispatch` and can only record
//! what happened. The dispatch thread sends into a bounded channel of
//! capacity one, the control side awaits it. A revocation or a lost
//! connection is a sticky close published beside the channel instead of
//! occupying the slot.

use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc::error::{SendError, TryRecvError, TrySendError};
use tokio::sync::{Mutex, mpsc, watch};

/// A client asked for the clipboard contents.
#[derive(Debug)]
pub struct PendingRequest {
    /// Content type the client asked for.
    pub content_type: String,
    /// Write end handed over by the compositor. Its blocking mode is
    /// whatever the requester chose.
    pub destination: OwnedFd,
}

/// Why no further requests will arrive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutcomeError {
    /// Another client owns the clipboard now. Expected end of life.
    #[error("clipboard selection was taken over by another client")]
    SelectionRevoked,
    #[error("compositor connection lost: {0}")]
    Disconnected(String),
}

#[derive(Debug)]
pub struct Mailbox {
    tx: mpsc::Sender<PendingRequest>,
    rx: Mutex<mpsc::Receiver<PendingRequest>>,
    closed: watch::Sender<Option<OutcomeError>>,
    consumer_attached: AtomicBool,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(rx),
            closed: watch::Sender::new(None),
            consumer_attached: AtomicBool::new(false),
        }
    }

    /// Mark that a consumer is draining the channel.
    ///
    /// From then on [`post`](Self::post) waits for an unread request to
    /// be taken instead of dropping the new one.
    pub fn attach_consumer(&self) {
        self.consumer_attached.store(true, Ordering::Release);
    }

    /// Hand a request to the consumer. Never overwrites an unread one.
    ///
    /// With a consumer attached this blocks the calling thread while the
    /// slot is full, so it must not run inside the async runtime. Without
    /// a consumer a second request is dropped, which closes its
    /// descriptor and gives the requester an empty read.
    pub fn post(&self, request: PendingRequest) {
        if self.is_closed() {
            tracing::debug!(
                content_type = %request.content_type,
                "mailbox closed, dropping request"
            );
            return;
        }
        if self.consumer_attached.load(Ordering::Acquire) {
            if let Err(SendError(request)) = self.tx.blocking_send(request) {
                tracing::debug!(
                    content_type = %request.content_type,
                    "mailbox closed, dropping request"
                );
            }
            return;
        }
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(request)) => {
                tracing::warn!(
                    content_type = %request.content_type,
                    "request arrived before serving started, dropping it"
                );
            }
            Err(TrySendError::Closed(request)) => {
                tracing::debug!(
                    content_type = %request.content_type,
                    "mailbox closed, dropping request"
                );
            }
        }
    }

    /// Close with a terminal outcome. The first close wins.
    pub fn close(&self, reason: OutcomeError) {
        self.closed.send_if_modified(|closed| {
            if closed.is_none() {
                *closed = Some(reason);
                true
            } else {
                false
            }
        });
        // A waiting consumer closes the receiver itself once it sees the
        // outcome. Otherwise do it here so a blocked producer returns.
        if let Ok(mut rx) = self.rx.try_lock() {
            rx.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.borrow().is_some()
    }

    /// Wait for the next request.
    ///
    /// An unread request is returned before a close is reported.
    /// Cancel safe.
    pub async fn wait_for_outcome(&self) -> Result<PendingRequest, OutcomeError> {
        let mut rx = self.rx.lock().await;
        let mut closed = self.closed.subscribe();
        loop {
            match rx.try_recv() {
                Ok(request) => return Ok(request),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => {}
            }
            let reason = closed.borrow_and_update().clone();
            if let Some(reason) = reason {
                rx.close();
                // Anything sent before the receiver closed is still owed.
                if let Ok(request) = rx.try_recv() {
                    return Ok(request);
                }
                return Err(reason);
            }
            tokio::select! {
                request = rx.recv() => {
                    if let Some(request) = request {
                        return Ok(request);
                    }
                }
                _ = closed.changed() => {}
            }
        }
    }
}
