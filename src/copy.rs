//! Copy command: claim the clipboard and serve it until someone else
//! takes it.
//!
//! Order matters: the source is opened before the compositor is
//! contacted, the claim completes before any fork, and the fork
//! happens before any thread exists.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::signal::unix::{SignalKind, signal as tokio_signal};

use crate::cli::Cli;
use crate::daemon::{self, Role};
use crate::selection::classifier::CancelCounter;
use crate::selection::mailbox::OutcomeError;
use crate::selection::{self, ClaimError, OfferEvents, PLAINTEXT_CONTENT_TYPES};
use crate::server;
use crate::source::SourceBuffer;
use crate::wayland::{Session, SessionError};

/// Fatal errors. Each maps to exit status 1.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    #[error("cannot read {path}: {source}", path = path.display())]
    Source {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to claim the clipboard: {0}")]
    Claim(#[from] ClaimError),
    #[error("failed to detach: {0}")]
    Detach(nix::Error),
    #[error("runtime: {0}")]
    Runtime(std::io::Error),
    #[error("{0}")]
    Disconnected(OutcomeError),
}

/// How serving ended without an error.
#[derive(Debug, PartialEq, Eq)]
enum Ending {
    Revoked,
    Interrupted,
}

/// Run the copy command. Returns once the clipboard has been lost, the
/// process was interrupted, or (with `--background`) in the parent
/// right after the claim.
pub fn run(cli: Cli) -> Result<(), CopyError> {
    let source = SourceBuffer::open(&cli.source).map_err(|source| CopyError::Source {
        path: cli.source.clone(),
        source,
    })?;
    tracing::debug!(
        path = %cli.source.display(),
        replayable = source.is_replayable(),
        "source opened"
    );

    let mut session = Session::connect()?;
    session.discover_capabilities()?;
    session.bind_device()?;

    let events = Arc::new(OfferEvents::new(CancelCounter::new(cli.cancel_threshold)));
    let offer = selection::claim(
        &mut session,
        PLAINTEXT_CONTENT_TYPES.iter().copied(),
        Arc::clone(&events),
    )?;
    tracing::info!(
        source = ?offer.source(),
        content_types = ?offer.content_types(),
        serial = offer.serial(),
        "clipboard claimed"
    );

    if cli.background
        && let Role::Parent(child) = daemon::detach().map_err(CopyError::Detach)?
    {
        tracing::info!(pid = child.as_raw(), "serving clipboard in the background");
        return Ok(());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CopyError::Runtime)?;

    offer.events().attach_consumer();
    let _dispatch = session
        .spawn_dispatch(Arc::clone(&events))
        .map_err(CopyError::Runtime)?;

    let ending = runtime.block_on(async {
        let shutdown = shutdown_signal().map_err(CopyError::Runtime)?;
        serve_until_done(&events, Arc::new(source), shutdown).await
    });
    // An abandoned request may still be blocked writing to a requester
    // that never reads.
    runtime.shutdown_background();
    let ending = ending?;

    if ending == Ending::Interrupted && !cli.background {
        eprintln!("waypaste: interrupted, releasing the clipboard");
    }
    tracing::info!(?ending, state = ?offer.state(), "stopped serving");
    Ok(())
}

/// Resolves with the signal name on SIGINT or SIGTERM.
///
/// The handlers are installed before this returns, so a signal raised
/// after the call is not lost.
fn shutdown_signal() -> std::io::Result<impl Future<Output = &'static str>> {
    let mut sig_int = tokio_signal(SignalKind::interrupt())?;
    let mut sig_term = tokio_signal(SignalKind::terminate())?;
    Ok(async move {
        tokio::select! {
            _ = sig_int.recv() => "SIGINT",
            _ = sig_term.recv() => "SIGTERM",
        }
    })
}

/// Answer paste requests one at a time until the offer is revoked or
/// `shutdown` resolves.
///
/// `shutdown` is also watched while a request is being written, so a
/// requester that stops reading cannot hold the process.
async fn serve_until_done(
    events: &OfferEvents,
    source: Arc<SourceBuffer>,
    shutdown: impl Future<Output = &'static str>,
) -> Result<Ending, CopyError> {
    tokio::pin!(shutdown);

    tracing::debug!("waiting for paste requests");
    loop {
        let request = tokio::select! {
            outcome = events.wait_for_outcome() => match outcome {
                Ok(request) => request,
                Err(OutcomeError::SelectionRevoked) => {
                    tracing::info!("clipboard taken over by another client");
                    return Ok(Ending::Revoked);
                }
                Err(e) => return Err(CopyError::Disconnected(e)),
            },

            signal = &mut shutdown => {
                tracing::info!(signal, "shutting down");
                return Ok(Ending::Interrupted);
            }
        };

        let content_type = request.content_type.clone();
        let shared = Arc::clone(&source);
        let serving = tokio::task::spawn_blocking(move || server::serve(request, &shared));

        tokio::select! {
            result = serving => match result {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(%content_type, error = %e, "request dropped");
                }
                Err(e) => {
                    tracing::warn!(%content_type, error = %e, "serve task failed");
                }
            },

            signal = &mut shutdown => {
                // The blocking write is left to finish or fail on its own.
                tracing::info!(signal, %content_type, "shutting down while serving");
                return Ok(Ending::Interrupted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Read;
    use std::time::Duration;

    use nix::sys::signal::{Signal, raise};

    fn pipe() -> (File, std::os::fd::OwnedFd) {
        let (read_end, write_end) = nix::unistd::pipe().unwrap();
        (File::from(read_end), write_end)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn serves_requests_until_revoked() {
        let events = Arc::new(OfferEvents::new(CancelCounter::default()));
        events.attach_consumer();
        let source = Arc::new(SourceBuffer::Materialized(b"hello".to_vec()));

        let producer = Arc::clone(&events);
        let (mut first, first_fd) = pipe();
        let (mut second, second_fd) = pipe();
        let feeder = std::thread::spawn(move || {
            producer.content_requested("text/plain".into(), first_fd);
            producer.revoked();
            producer.content_requested("STRING".into(), second_fd);
            producer.revoked();
            producer.revoked();
        });

        let ending = serve_until_done(&events, source, std::future::pending()).await.unwrap();
        feeder.join().unwrap();
        assert_eq!(ending, Ending::Revoked);

        for reader in [&mut first, &mut second] {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).unwrap();
            assert_eq!(buf, b"hello");
        }
    }

    #[tokio::test]
    async fn failed_request_does_not_stop_serving() {
        let events = Arc::new(OfferEvents::new(CancelCounter::default()));
        let source = Arc::new(SourceBuffer::Materialized(b"data".to_vec()));

        let (reader, write_end) = pipe();
        drop(reader);
        events.content_requested("text/plain".into(), write_end);
        events.revoked();
        events.revoked();

        let ending = serve_until_done(&events, source, std::future::pending()).await.unwrap();
        assert_eq!(ending, Ending::Revoked);
    }

    #[tokio::test]
    async fn disconnect_is_fatal() {
        let events = Arc::new(OfferEvents::new(CancelCounter::default()));
        events.disconnected("connection reset".into());
        let source = Arc::new(SourceBuffer::Materialized(Vec::new()));

        let err = serve_until_done(&events, source, std::future::pending()).await.unwrap_err();
        assert!(matches!(
            err,
            CopyError::Disconnected(OutcomeError::Disconnected(_))
        ));
    }

    #[tokio::test]
    async fn sigint_while_idle_ends_serving() {
        let events = Arc::new(OfferEvents::new(CancelCounter::default()));
        events.attach_consumer();
        let source = Arc::new(SourceBuffer::Materialized(b"idle".to_vec()));

        let shutdown = shutdown_signal().unwrap();
        raise(Signal::SIGINT).unwrap();

        let ending = tokio::time::timeout(
            Duration::from_secs(5),
            serve_until_done(&events, source, shutdown),
        )
        .await
        .expect("SIGINT not handled")
        .unwrap();
        assert_eq!(ending, Ending::Interrupted);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sigterm_interrupts_a_stalled_request() {
        let events = Arc::new(OfferEvents::new(CancelCounter::default()));
        // Far more than a pipe buffer holds, and nobody reads.
        let source = Arc::new(SourceBuffer::Materialized(vec![b'x'; 4 * 1024 * 1024]));
        let (reader, write_end) = pipe();
        events.content_requested("text/plain".into(), write_end);

        let shutdown = shutdown_signal().unwrap();
        let raiser = std::thread::spawn(|| {
            std::thread::sleep(Duration::from_millis(300));
            raise(Signal::SIGTERM).unwrap();
        });

        let ending = tokio::time::timeout(
            Duration::from_secs(5),
            serve_until_done(&events, source, shutdown),
        )
        .await
        .expect("SIGTERM not handled while a request was being written")
        .unwrap();
        assert_eq!(ending, Ending::Interrupted);
        raiser.join().unwrap();

        // Lets the abandoned write fail so the runtime can shut down.
        drop(reader);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn revocation_seen_after_a_slow_request_finishes() {
        let events = Arc::new(OfferEvents::new(CancelCounter::default()));
        events.attach_consumer();
        let payload = vec![b'y'; 1024 * 1024];
        let source = Arc::new(SourceBuffer::Materialized(payload.clone()));

        let (mut reader, write_end) = pipe();
        let producer = Arc::clone(&events);
        let feeder = std::thread::spawn(move || {
            producer.content_requested("text/plain".into(), write_end);
            producer.revoked();
            producer.revoked();
        });
        let slow_reader = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).unwrap();
            buf
        });

        let ending = tokio::time::timeout(
            Duration::from_secs(5),
            serve_until_done(&events, source, std::future::pending()),
        )
        .await
        .expect("serving did not end")
        .unwrap();
        assert_eq!(ending, Ending::Revoked);
        feeder.join().unwrap();
        assert_eq!(slow_reader.join().unwrap(), payload);
    }

    #[test]
    fn unreadable_source_fails_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let cli = Cli {
            source: dir.path().join("missing.txt"),
            verbose: false,
            background: false,
            cancel_threshold: 2,
        };
        assert!(matches!(run(cli), Err(CopyError::Source { .. })));
    }
}
