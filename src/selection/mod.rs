//! Clipboard ownership: claiming the selection and tracking the offer.
//!
//! [`claim`] drives the ownership sequence against any
//! [`SelectionTransport`]: create a data source with its event handlers
//! already attached, advertise each content type in priority order,
//! fetch a fresh serial, then set the selection. Events for the source
//! land in [`OfferEvents`], which runs them through the revocation
//! classifier and hands requests to the mailbox.

pub mod classifier;
pub mod mailbox;

use std::os::fd::OwnedFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};

use classifier::{ClassifierState, RevocationClassifier};
use mailbox::{Mailbox, OutcomeError, PendingRequest};

/// Plain-text content types, highest priority first.
///
/// `STRING`, `UTF8_STRING` and `TEXT` are X11 target names rather than
/// MIME types, but some clients only look for those.
pub const PLAINTEXT_CONTENT_TYPES: &[&str] = &[
    "text/plain",
    "text/plain;charset=utf-8",
    "STRING",
    "UTF8_STRING",
    "TEXT",
];

/// Errors while claiming the clipboard.
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("no content types to offer")]
    NoContentTypes,
    #[error("compositor did not deliver a serial")]
    NoSerial,
    #[error("transport: {0}")]
    Transport(String),
}

/// The protocol operations a claim needs.
///
/// Implemented by the Wayland session; tests substitute a recording fake.
pub trait SelectionTransport {
    /// Handle to a data source object.
    type Source;

    /// Create a data source whose events are delivered to `events`.
    fn create_source(&mut self, events: Arc<OfferEvents>) -> Result<Self::Source, ClaimError>;

    /// Advertise one content type on the source.
    fn offer(&mut self, source: &Self::Source, content_type: &str);

    /// Obtain a serial the compositor considers current.
    fn next_serial(&mut self) -> Result<u32, ClaimError>;

    /// Make `source` the selection and wait for the compositor to process it.
    fn set_selection(&mut self, source: &Self::Source, serial: u32) -> Result<(), ClaimError>;

    /// Destroy a source that failed mid-claim.
    fn discard(&mut self, source: Self::Source);
}

/// Lifecycle of an offer as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferState {
    Unclaimed,
    Claimed,
    Revoked,
}

/// Event sink for one data source.
///
/// Shared between the protocol handlers (dispatch thread) and the serve
/// loop (control side).
pub struct OfferEvents {
    classifier: Mutex<Box<dyn RevocationClassifier>>,
    mailbox: Mailbox,
    claimed: AtomicBool,
}

impl OfferEvents {
    pub fn new(classifier: impl RevocationClassifier + 'static) -> Self {
        Self {
            classifier: Mutex::new(Box::new(classifier)),
            mailbox: Mailbox::new(),
            claimed: AtomicBool::new(false),
        }
    }

    fn classifier(&self) -> MutexGuard<'_, Box<dyn RevocationClassifier>> {
        self.classifier
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// `send` event: a client wants the data written to `destination`.
    pub fn content_requested(&self, content_type: String, destination: OwnedFd) {
        let state = self.classifier().on_content_request();
        if state == ClassifierState::Revoked {
            tracing::debug!(%content_type, "request after revocation, ignoring");
            return;
        }
        tracing::debug!(%content_type, "content requested");
        self.mailbox.post(PendingRequest {
            content_type,
            destination,
        });
    }

    /// `cancelled` event.
    pub fn revoked(&self) {
        let state = self.classifier().on_revocation();
        tracing::debug!(?state, "data source cancelled");
        if state == ClassifierState::Revoked {
            self.mailbox.close(OutcomeError::SelectionRevoked);
        }
    }

    /// The compositor connection failed; no more events will come.
    pub fn disconnected(&self, reason: String) {
        self.mailbox.close(OutcomeError::Disconnected(reason));
    }

    /// Start draining the mailbox. Call before the dispatch thread starts.
    pub fn attach_consumer(&self) {
        self.mailbox.attach_consumer();
    }

    /// Wait for the next paste request.
    ///
    /// Fails with [`OutcomeError::SelectionRevoked`] once the classifier
    /// decides ownership is gone.
    pub async fn wait_for_outcome(&self) -> Result<PendingRequest, OutcomeError> {
        self.mailbox.wait_for_outcome().await
    }

    /// True once no further events need dispatching.
    pub fn is_finished(&self) -> bool {
        self.mailbox.is_closed()
    }

    pub fn classifier_state(&self) -> ClassifierState {
        self.classifier().state()
    }

    pub fn state(&self) -> OfferState {
        if self.classifier_state() == ClassifierState::Revoked {
            OfferState::Revoked
        } else if self.claimed.load(Ordering::Acquire) {
            OfferState::Claimed
        } else {
            OfferState::Unclaimed
        }
    }
}

/// An accepted clipboard claim.
pub struct Offer<S> {
    source: S,
    content_types: Vec<String>,
    serial: u32,
    events: Arc<OfferEvents>,
}

impl<S> Offer<S> {
    pub fn content_types(&self) -> &[String] {
        &self.content_types
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn events(&self) -> &Arc<OfferEvents> {
        &self.events
    }

    pub fn state(&self) -> OfferState {
        self.events.state()
    }
}

/// Claim the clipboard with `content_types` in priority order.
///
/// On failure the half-built source is discarded; nothing is retried.
pub fn claim<T, I>(
    transport: &mut T,
    content_types: I,
    events: Arc<OfferEvents>,
) -> Result<Offer<T::Source>, ClaimError>
where
    T: SelectionTransport,
    I: IntoIterator,
    I::Item: Into<String>,
{
    let content_types: Vec<String> = content_types.into_iter().map(Into::into).collect();
    if content_types.is_empty() {
        return Err(ClaimError::NoContentTypes);
    }

    tracing::debug!("creating data source");
    let source = transport.create_source(Arc::clone(&events))?;

    for content_type in &content_types {
        tracing::debug!(%content_type, "offering content type");
        transport.offer(&source, content_type);
    }

    let serial = match transport
        .next_serial()
        .and_then(|serial| transport.set_selection(&source, serial).map(|()| serial))
    {
        Ok(serial) => serial,
        Err(e) => {
            transport.discard(source);
            return Err(e);
        }
    };

    events.claimed.store(true, Ordering::Release);
    tracing::debug!(serial, "selection set");

    Ok(Offer {
        source,
        content_types,
        serial,
        events,
    })
}
