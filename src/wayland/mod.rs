//! Wayland session: connection, global discovery, data device, and the
//! [`SelectionTransport`] used to claim the clipboard.
//!
//! Only core protocol interfaces are used: `wl_seat`,
//! `wl_data_device_manager`, `wl_data_device` and `wl_data_source`.
//! All round-trips here run on the control thread; once the claim is
//! done the event queue moves to the dispatch thread (see
//! [`dispatch`]).

pub mod dispatch;

use std::ffi::OsString;
use std::io;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use wayland_client::protocol::{
    wl_callback, wl_data_device, wl_data_device_manager, wl_data_offer, wl_data_source,
    wl_registry, wl_seat,
};
use wayland_client::{
    ConnectError, Connection, Dispatch, DispatchError, EventQueue, QueueHandle,
    event_created_child,
};

use crate::selection::{ClaimError, OfferEvents, SelectionTransport};

const SEAT_VERSION: u32 = 1;
const DATA_DEVICE_MANAGER_VERSION: u32 = 3;

/// Session setup errors.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("WAYLAND_DISPLAY is not set; run this from inside a Wayland session")]
    NoCompositorConfigured,
    #[error("$XDG_RUNTIME_DIR is not set, cannot locate the Wayland socket")]
    NoRuntimeDir,
    #[error("failed to connect to Wayland socket {path}: {source}")]
    Unreachable { path: PathBuf, source: io::Error },
    #[error("failed to connect to the Wayland compositor: {0}")]
    Connect(#[from] ConnectError),
    #[error("Wayland protocol error: {0}")]
    Protocol(String),
    #[error("compositor does not provide {0}")]
    MissingCapability(&'static str),
}

impl SessionError {
    /// True for errors fixed by the environment, not by retrying.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::NoCompositorConfigured | Self::NoRuntimeDir)
    }
}

impl From<DispatchError> for SessionError {
    fn from(e: DispatchError) -> Self {
        Self::Protocol(e.to_string())
    }
}

/// Where the compositor listens.
#[derive(Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// `WAYLAND_SOCKET`: an already connected fd passed by the parent.
    Inherited,
    /// A Unix socket path.
    Path(PathBuf),
}

impl Endpoint {
    /// Resolve from the process environment.
    pub fn from_env() -> Result<Self, SessionError> {
        Self::resolve(
            std::env::var_os("WAYLAND_SOCKET"),
            std::env::var_os("WAYLAND_DISPLAY"),
            std::env::var_os("XDG_RUNTIME_DIR"),
        )
    }

    /// `WAYLAND_SOCKET` wins; otherwise `WAYLAND_DISPLAY` is either an
    /// absolute path or a name under `$XDG_RUNTIME_DIR`.
    pub fn resolve(
        socket: Option<OsString>,
        display: Option<OsString>,
        runtime_dir: Option<OsString>,
    ) -> Result<Self, SessionError> {
        if socket.is_some_and(|s| !s.is_empty()) {
            return Ok(Self::Inherited);
        }
        let display = display
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .ok_or(SessionError::NoCompositorConfigured)?;
        if display.is_absolute() {
            return Ok(Self::Path(display));
        }
        let runtime_dir = runtime_dir
            .filter(|d| !d.is_empty())
            .map(PathBuf::from)
            .ok_or(SessionError::NoRuntimeDir)?;
        Ok(Self::Path(runtime_dir.join(display)))
    }
}

/// Protocol state touched by event handlers.
#[derive(Debug, Default)]
pub struct WaylandState {
    seat: Option<wl_seat::WlSeat>,
    data_manager: Option<wl_data_device_manager::WlDataDeviceManager>,
    serial: Option<u32>,
}

/// One compositor connection with its bound data device.
pub struct Session {
    conn: Connection,
    queue: EventQueue<WaylandState>,
    qh: QueueHandle<WaylandState>,
    state: WaylandState,
    device: Option<wl_data_device::WlDataDevice>,
}

impl Session {
    /// Connect using the environment.
    ///
    /// A missing configuration fails before any socket is touched.
    pub fn connect() -> Result<Self, SessionError> {
        Self::connect_to(Endpoint::from_env()?)
    }

    pub fn connect_to(endpoint: Endpoint) -> Result<Self, SessionError> {
        let conn = match endpoint {
            Endpoint::Inherited => Connection::connect_to_env()?,
            Endpoint::Path(path) => {
                tracing::debug!(path = %path.display(), "connecting to Wayland display");
                let stream = UnixStream::connect(&path)
                    .map_err(|source| SessionError::Unreachable { path, source })?;
                Connection::from_socket(stream)?
            }
        };
        let queue = conn.new_event_queue();
        let qh = queue.handle();
        Ok(Self {
            conn,
            queue,
            qh,
            state: WaylandState::default(),
            device: None,
        })
    }

    /// Fetch the registry and bind the seat and data device manager.
    ///
    /// One dispatch plus a round-trip guarantees every global that
    /// existed at connect time has been announced.
    pub fn discover_capabilities(&mut self) -> Result<(), SessionError> {
        tracing::debug!("getting global registry");
        let _registry = self.conn.display().get_registry(&self.qh, ());
        self.conn.flush().map_err(|e| SessionError::Protocol(e.to_string()))?;
        self.queue.dispatch_pending(&mut self.state)?;
        self.queue.roundtrip(&mut self.state)?;

        if self.state.data_manager.is_none() {
            return Err(SessionError::MissingCapability("wl_data_device_manager"));
        }
        if self.state.seat.is_none() {
            return Err(SessionError::MissingCapability("wl_seat"));
        }
        Ok(())
    }

    /// Create the data device for the discovered seat.
    pub fn bind_device(&mut self) -> Result<(), SessionError> {
        let (Some(manager), Some(seat)) = (&self.state.data_manager, &self.state.seat) else {
            return Err(SessionError::MissingCapability("wl_data_device_manager"));
        };
        self.device = Some(manager.get_data_device(seat, &self.qh, ()));
        Ok(())
    }

    /// Move the event queue onto the dispatch thread.
    pub fn spawn_dispatch(self, events: Arc<OfferEvents>) -> io::Result<JoinHandle<()>> {
        dispatch::spawn_dispatch_thread(self.queue, self.state, events)
    }

    fn roundtrip(&mut self) -> Result<(), ClaimError> {
        self.queue
            .roundtrip(&mut self.state)
            .map(|_| ())
            .map_err(|e| ClaimError::Transport(e.to_string()))
    }
}

impl SelectionTransport for Session {
    type Source = wl_data_source::WlDataSource;

    fn create_source(&mut self, events: Arc<OfferEvents>) -> Result<Self::Source, ClaimError> {
        let manager = self
            .state
            .data_manager
            .as_ref()
            .ok_or_else(|| ClaimError::Transport("no data device manager bound".into()))?;
        Ok(manager.create_data_source(&self.qh, events))
    }

    fn offer(&mut self, source: &Self::Source, content_type: &str) {
        source.offer(content_type.to_owned());
    }

    /// `wl_display.sync` and wait for its `done`, which carries the serial.
    fn next_serial(&mut self) -> Result<u32, ClaimError> {
        self.state.serial = None;
        let _callback = self.conn.display().sync(&self.qh, ());
        self.roundtrip()?;
        let serial = self.state.serial.take().ok_or(ClaimError::NoSerial)?;
        tracing::debug!(serial, "got serial");
        Ok(serial)
    }

    fn set_selection(&mut self, source: &Self::Source, serial: u32) -> Result<(), ClaimError> {
        let device = self
            .device
            .as_ref()
            .ok_or_else(|| ClaimError::Transport("no data device bound".into()))?;
        device.set_selection(Some(source), serial);
        self.roundtrip()
    }

    fn discard(&mut self, source: Self::Source) {
        source.destroy();
        if let Err(e) = self.conn.flush() {
            tracing::debug!(error = %e, "flush after discarding data source failed");
        }
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for WaylandState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
        else {
            return;
        };
        match interface.as_str() {
            "wl_seat" if state.seat.is_none() => {
                tracing::debug!(version, "found wl_seat");
                state.seat = Some(registry.bind(name, version.min(SEAT_VERSION), qh, ()));
            }
            "wl_data_device_manager" if state.data_manager.is_none() => {
                tracing::debug!(version, "found wl_data_device_manager");
                state.data_manager = Some(registry.bind(
                    name,
                    version.min(DATA_DEVICE_MANAGER_VERSION),
                    qh,
                    (),
                ));
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_callback::WlCallback, ()> for WaylandState {
    fn event(
        state: &mut Self,
        _: &wl_callback::WlCallback,
        event: wl_callback::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { callback_data } = event {
            state.serial = Some(callback_data);
        }
    }
}

impl Dispatch<wl_seat::WlSeat, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_seat::WlSeat,
        _: wl_seat::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_data_device_manager::WlDataDeviceManager, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_data_device_manager::WlDataDeviceManager,
        _: wl_data_device_manager::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_data_device::WlDataDevice, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_data_device::WlDataDevice,
        event: wl_data_device::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        // The compositor echoes the current selection back as an offer;
        // we never read from it.
        if let wl_data_device::Event::Selection { id: Some(offer) } = event {
            offer.destroy();
        }
    }

    event_created_child!(WaylandState, wl_data_device::WlDataDevice, [
        wl_data_device::EVT_DATA_OFFER_OPCODE => (wl_data_offer::WlDataOffer, ())
    ]);
}

impl Dispatch<wl_data_offer::WlDataOffer, ()> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_data_offer::WlDataOffer,
        _: wl_data_offer::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
    }
}

impl Dispatch<wl_data_source::WlDataSource, Arc<OfferEvents>> for WaylandState {
    fn event(
        _: &mut Self,
        _: &wl_data_source::WlDataSource,
        event: wl_data_source::Event,
        events: &Arc<OfferEvents>,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        match event {
            wl_data_source::Event::Send { mime_type, fd } => {
                events.content_requested(mime_type, fd);
            }
            wl_data_source::Event::Cancelled => events.revoked(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn os(s: &str) -> Option<OsString> {
        Some(OsString::from(s))
    }

    #[test]
    fn display_name_joined_with_runtime_dir() {
        let endpoint = Endpoint::resolve(None, os("wayland-1"), os("/run/user/1000")).unwrap();
        assert_eq!(
            endpoint,
            Endpoint::Path(PathBuf::from("/run/user/1000/wayland-1"))
        );
    }

    #[test]
    fn absolute_display_used_as_is() {
        let endpoint = Endpoint::resolve(None, os("/tmp/wl.sock"), None).unwrap();
        assert_eq!(endpoint, Endpoint::Path(PathBuf::from("/tmp/wl.sock")));
    }

    #[test]
    fn inherited_socket_wins() {
        let endpoint = Endpoint::resolve(os("5"), None, None).unwrap();
        assert_eq!(endpoint, Endpoint::Inherited);
    }

    #[test]
    fn missing_display_is_configuration_error() {
        let err = Endpoint::resolve(None, None, os("/run/user/1000")).unwrap_err();
        assert!(matches!(err, SessionError::NoCompositorConfigured));
        assert!(err.is_configuration());
    }

    #[test]
    fn empty_display_is_configuration_error() {
        let err = Endpoint::resolve(os(""), os(""), os("/run/user/1000")).unwrap_err();
        assert!(matches!(err, SessionError::NoCompositorConfigured));
    }

    #[test]
    fn relative_display_without_runtime_dir() {
        let err = Endpoint::resolve(None, os("wayland-0"), None).unwrap_err();
        assert!(matches!(err, SessionError::NoRuntimeDir));
        assert!(err.is_configuration());
    }

    #[test]
    fn unreachable_socket_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wayland-404");
        let err = match Session::connect_to(Endpoint::Path(path.clone())) {
            Ok(_) => panic!("connected to a socket that does not exist"),
            Err(e) => e,
        };
        assert!(!err.is_configuration());
        match err {
            SessionError::Unreachable { path: p, source } => {
                assert_eq!(p, path);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
