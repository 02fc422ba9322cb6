/// session type wrapping a single byte stream
pub mod session;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;

use crate::decode::PhysDecodeLevel;
use crate::error::RequestError;
use crate::types::{ConnectionType, StopBits};

pub use session::Session;

/// Identity of a session, safe to copy across tasks
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    /// Unique monotonically increasing id
    pub id: u64,
    /// The wire dialect the session speaks
    pub connection_type: ConnectionType,
}

/// Lifecycle and data events surfaced by the session manager
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// A session was opened and registered
    Connected(SessionInfo),
    /// A session was closed and removed from the registry
    Disconnected(SessionInfo),
    /// Raw bytes arrived on a session. Chunks are not frames; framing
    /// happens above the transport.
    Data {
        /// Originating session
        session: SessionInfo,
        /// Received bytes, at most one read-buffer worth
        chunk: Vec<u8>,
    },
    /// A read or write on the session failed; the session is unusable
    Faulted {
        /// Originating session
        session: SessionInfo,
        /// The underlying I/O error kind
        error: std::io::ErrorKind,
    },
}

/// Serial line settings. Data bits and parity are fixed at 8/none.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialSettings {
    /// Baud rate in symbols per second
    pub baud_rate: u32,
    /// One or two stop bits
    pub stop_bits: StopBits,
}

/// Enumerates serial devices present on the system. Pluggable because port
/// discovery is platform-dependent and irrelevant to the protocol core.
pub trait SerialPortLister {
    /// Names of the serial devices currently present
    fn list(&self) -> Vec<String>;
}

/// Lists the ports the operating system reports
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemPortLister;

impl SerialPortLister for SystemPortLister {
    fn list(&self) -> Vec<String> {
        match tokio_serial::available_ports() {
            Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
            Err(err) => {
                tracing::warn!("unable to enumerate serial ports: {}", err);
                Vec::new()
            }
        }
    }
}

/// Owns every open session and surfaces their lifecycle on a single event
/// channel. The registry lock is held only for map operations; all I/O
/// happens on the sessions' background tasks.
pub struct SessionManager {
    sessions: Mutex<HashMap<u64, Arc<Session>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    decode: PhysDecodeLevel,
}

impl SessionManager {
    /// Create a manager and the receiving end of its event channel
    pub fn new(decode: PhysDecodeLevel) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                sessions: Mutex::new(HashMap::new()),
                events,
                decode,
            },
            event_rx,
        )
    }

    /// Connect to a Modbus/TCP endpoint, register the session, and start
    /// its pumps. Emits `Connected` on success and nothing on failure.
    pub async fn connect_tcp(&self, host: &str, port: u16) -> Result<Arc<Session>, RequestError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|err| RequestError::TransportOpenFailed(err.kind()))?;
        let _ = stream.set_nodelay(true);

        Ok(self.register(Session::spawn(
            stream,
            ConnectionType::Tcp,
            self.events.clone(),
            self.decode,
        )))
    }

    /// Open a serial device in RTU mode (8 data bits, no parity), register
    /// the session, and start its pumps.
    pub async fn connect_serial(
        &self,
        path: &str,
        settings: SerialSettings,
    ) -> Result<Arc<Session>, RequestError> {
        let stop_bits = match settings.stop_bits {
            StopBits::One => tokio_serial::StopBits::One,
            StopBits::Two => tokio_serial::StopBits::Two,
        };

        let stream = tokio_serial::new(path, settings.baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(stop_bits)
            .open_native_async()
            .map_err(|err| match err.kind {
                tokio_serial::ErrorKind::Io(kind) => RequestError::TransportOpenFailed(kind),
                _ => RequestError::TransportOpenFailed(std::io::ErrorKind::Other),
            })?;

        Ok(self.register(Session::spawn(
            stream,
            ConnectionType::Rtu,
            self.events.clone(),
            self.decode,
        )))
    }

    fn register(&self, session: Arc<Session>) -> Arc<Session> {
        let info = session.info();
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id(), session.clone());
        let _ = self.events.send(TransportEvent::Connected(info));
        session
    }

    /// Enqueue bytes on a registered session. Unknown ids are rejected so a
    /// stale handle cannot write to a closed stream.
    pub fn send_to(&self, session_id: u64, bytes: Vec<u8>) -> Result<(), RequestError> {
        let session = {
            let sessions = self.sessions.lock().unwrap();
            sessions.get(&session_id).cloned()
        };

        match session {
            Some(session) => {
                session.send(bytes);
                Ok(())
            }
            None => Err(RequestError::NoActiveSession),
        }
    }

    /// Close one session, remove it from the registry, and emit `Disconnected`
    pub fn disconnect_session(&self, session_id: u64) {
        let session = self.sessions.lock().unwrap().remove(&session_id);
        if let Some(session) = session {
            session.close();
            let _ = self
                .events
                .send(TransportEvent::Disconnected(session.info()));
        }
    }

    /// Close every session, clearing the registry
    pub fn disconnect_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.lock().unwrap();
            map.drain().map(|(_, session)| session).collect()
        };

        for session in sessions {
            session.close();
            let _ = self
                .events
                .send(TransportEvent::Disconnected(session.info()));
        }
    }

    /// Number of registered sessions
    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}
