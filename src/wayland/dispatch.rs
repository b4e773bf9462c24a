//! Dispatch thread: keeps the Wayland connection serviced.
//!
//! Event handlers run synchronously inside `blocking_dispatch` and can
//! only record what they saw in [`OfferEvents`]. The serve loop waits on
//! that from the async side, so the two never share the event queue.

use std::io;
use std::sync::Arc;
use std::thread::JoinHandle;

use wayland_client::EventQueue;

use super::WaylandState;
use crate::selection::OfferEvents;

/// Spawn the thread that owns `queue` for the rest of the process.
///
/// The thread exits once the offer is finished (revoked) or the
/// connection fails; a failure is reported to the consumer as a
/// disconnect so it stops waiting.
pub fn spawn_dispatch_thread(
    mut queue: EventQueue<WaylandState>,
    mut state: WaylandState,
    events: Arc<OfferEvents>,
) -> io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("wayland-dispatch".into())
        .spawn(move || {
            while !events.is_finished() {
                if let Err(e) = queue.blocking_dispatch(&mut state) {
                    tracing::error!(error = %e, "Wayland dispatch failed");
                    events.disconnected(e.to_string());
                    return;
                }
            }
            tracing::debug!("dispatch thread done");
        })
}
