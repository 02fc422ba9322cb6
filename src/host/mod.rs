pub(crate) mod correlator;

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::common::codec;
use crate::common::frame::{MbapFramer, RtuFramer};
use crate::decode::{AppDecodeLevel, DecodeLevel};
use crate::error::RequestError;
use crate::transport::{
    SerialPortLister, SerialSettings, SessionInfo, SessionManager, SystemPortLister,
    TransportEvent,
};
use crate::transport::Session;
use crate::types::{
    ConnectionType, ReadRequest, ReadResult, Request, Response, StopBits, TransportConfig,
    TransportStatus, UnitId, WriteRequest,
};

use self::correlator::Correlator;

/// Timeout applied when a configuration surface does not supply one
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2000);

/// Events surfaced to the layer above the facade (e.g. a JSON-RPC surface)
#[derive(Clone, Debug)]
pub enum HostEvent {
    /// A response PDU was decoded. Exception responses appear here with
    /// their code set; they do not complete a pending read.
    Response(Response),
    /// A transport session was opened
    Connected(SessionInfo),
    /// A transport session was closed
    Disconnected(SessionInfo),
    /// A session failed with an I/O error and was torn down
    TransportError {
        /// The failed session
        session: SessionInfo,
        /// The underlying I/O error kind
        error: std::io::ErrorKind,
    },
}

/// Receives host events. Set once during wiring and never replaced.
pub trait EventListener: Send {
    /// Called from the event pump for every host event, in order
    fn update(&mut self, event: HostEvent);
}

impl<F> EventListener for F
where
    F: FnMut(HostEvent) + Send,
{
    fn update(&mut self, event: HostEvent) {
        self(event)
    }
}

#[derive(Default)]
struct ActiveState {
    active: bool,
    config: Option<TransportConfig>,
    session: Option<Arc<Session>>,
}

/// The public operations of the Modbus master service.
///
/// The host owns the transport manager, the streaming framers, and the
/// read correlator. At most one transport is active at a time, and reads
/// are serialized so that a single request is in flight per transport.
/// Writes return as soon as the frame is enqueued for transmission.
pub struct Host {
    manager: Arc<SessionManager>,
    correlator: Arc<Correlator>,
    state: Arc<Mutex<ActiveState>>,
    request_lock: tokio::sync::Mutex<()>,
    ports: Box<dyn SerialPortLister + Send + Sync>,
    decode: DecodeLevel,
}

impl Host {
    /// Spawn the event pump and return the facade. Must be called from
    /// within a Tokio runtime.
    pub fn spawn(decode: DecodeLevel) -> Self {
        Self::spawn_with_listener(decode, Box::new(|_: HostEvent| {}))
    }

    /// Like [`Host::spawn`], but with a listener that receives every
    /// decoded response and connection lifecycle event
    pub fn spawn_with_listener(decode: DecodeLevel, listener: Box<dyn EventListener>) -> Self {
        let (manager, event_rx) = SessionManager::new(decode.physical);
        let manager = Arc::new(manager);
        let correlator = Arc::new(Correlator::new());
        let state = Arc::new(Mutex::new(ActiveState::default()));

        tokio::spawn(run_events(
            event_rx,
            Arc::downgrade(&manager),
            correlator.clone(),
            state.clone(),
            listener,
            decode,
        ));

        Self {
            manager,
            correlator,
            state,
            request_lock: tokio::sync::Mutex::new(()),
            ports: Box::new(SystemPortLister),
            decode,
        }
    }

    /// Replace the serial port enumerator (platform-dependent capability)
    pub fn set_port_lister(&mut self, ports: Box<dyn SerialPortLister + Send + Sync>) {
        self.ports = ports;
    }

    /// Open a Modbus/TCP transport and make it the active one
    pub async fn open_tcp(&self, host: &str, port: u16) -> Result<(), RequestError> {
        let session = self.manager.connect_tcp(host, port).await?;

        let mut state = self.state.lock().unwrap();
        state.session = Some(session);
        state.config = Some(TransportConfig::Tcp {
            host: host.to_string(),
            port,
        });
        state.active = true;
        Ok(())
    }

    /// Open a Modbus/RTU transport (8 data bits, no parity) and make it
    /// the active one
    pub async fn open_rtu(
        &self,
        path: &str,
        baud_rate: u32,
        stop_bits: StopBits,
    ) -> Result<(), RequestError> {
        let session = self
            .manager
            .connect_serial(
                path,
                SerialSettings {
                    baud_rate,
                    stop_bits,
                },
            )
            .await?;

        let mut state = self.state.lock().unwrap();
        state.session = Some(session);
        state.config = Some(TransportConfig::Rtu {
            path: path.to_string(),
            baud_rate,
            stop_bits,
        });
        state.active = true;
        Ok(())
    }

    /// Close the active transport, if any, and return its descriptor
    pub fn close_active(&self) -> Option<TransportConfig> {
        let config = {
            let mut state = self.state.lock().unwrap();
            if !state.active {
                return None;
            }
            state.active = false;
            state.session = None;
            state.config.clone()
        };

        self.manager.disconnect_all();
        config
    }

    /// Close the active transport and open the target one. Returns the
    /// descriptor of the previously active transport.
    pub async fn switch(
        &self,
        target: TransportConfig,
    ) -> Result<Option<TransportConfig>, RequestError> {
        let previous = self.close_active();

        match &target {
            TransportConfig::Tcp { host, port } => self.open_tcp(host, *port).await?,
            TransportConfig::Rtu {
                path,
                baud_rate,
                stop_bits,
            } => self.open_rtu(path, *baud_rate, *stop_bits).await?,
        }

        Ok(previous)
    }

    /// Snapshot of the transport configuration
    pub fn status(&self) -> TransportStatus {
        let state = self.state.lock().unwrap();
        TransportStatus {
            active: state.active,
            config: state.config.clone(),
        }
    }

    /// Names of the serial devices present on the system
    pub fn list_serial_ports(&self) -> Vec<String> {
        self.ports.list()
    }

    /// Read `count` registers starting at `address` and wait for the
    /// matching response or the timeout. `input` selects input registers
    /// over holding registers.
    pub async fn read(
        &self,
        unit_id: u8,
        address: u16,
        count: u16,
        input: bool,
        timeout: Duration,
    ) -> Result<ReadResult, RequestError> {
        let request = Request::read(UnitId::new(unit_id), address, count, input)?;

        // holding the lock for the full round trip keeps one read in
        // flight per transport, which is what FIFO correlation requires
        let _guard = self.request_lock.lock().await;

        let session = self.active_session()?;
        let frame = codec::encode(&request, session.connection_type())?;

        if self.decode.app.enabled() {
            tracing::info!("TX - {}", RequestDisplay::new(self.decode.app, &request));
        }

        let (token, reply) = self
            .correlator
            .begin(request.unit_id, request.address, request.count);

        if let Err(err) = self.manager.send_to(session.id(), frame) {
            self.correlator.abandon(token);
            return Err(err);
        }

        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => {
                self.correlator.abandon(token);
                Err(RequestError::Shutdown)
            }
            Err(_) => {
                self.correlator.abandon(token);
                Err(RequestError::ResponseTimeout)
            }
        }
    }

    /// Issue a sequence of reads one after another, stopping at the first
    /// error. Each read gets the full timeout.
    pub async fn read_group(
        &self,
        requests: &[ReadRequest],
        timeout: Duration,
    ) -> Result<Vec<ReadResult>, RequestError> {
        let mut results = Vec::with_capacity(requests.len());
        for request in requests {
            results.push(
                self.read(
                    request.unit_id,
                    request.address,
                    request.count,
                    request.input,
                    timeout,
                )
                .await?,
            );
        }
        Ok(results)
    }

    /// Write one holding register. Returns once the frame is enqueued;
    /// the confirmation echo is not awaited.
    pub fn write_single(
        &self,
        unit_id: u8,
        address: u16,
        value: u16,
    ) -> Result<(), RequestError> {
        self.send_write(&Request::write_single(UnitId::new(unit_id), address, value))
    }

    /// Write a contiguous block of holding registers. `values` must be
    /// non-empty. Returns once the frame is enqueued.
    pub fn write_multiple(
        &self,
        unit_id: u8,
        address: u16,
        values: Vec<u16>,
    ) -> Result<(), RequestError> {
        let request = Request::write_multiple(UnitId::new(unit_id), address, values)?;
        self.send_write(&request)
    }

    /// Enqueue a sequence of writes in order, stopping at the first error
    pub fn write_group(&self, requests: &[WriteRequest]) -> Result<(), RequestError> {
        for request in requests {
            match request {
                WriteRequest::Single {
                    unit_id,
                    address,
                    value,
                } => self.write_single(*unit_id, *address, *value)?,
                WriteRequest::Multiple {
                    unit_id,
                    address,
                    values,
                } => self.write_multiple(*unit_id, *address, values.clone())?,
            }
        }
        Ok(())
    }

    fn send_write(&self, request: &Request) -> Result<(), RequestError> {
        let session = self.active_session()?;
        let frame = codec::encode(request, session.connection_type())?;

        if self.decode.app.enabled() {
            tracing::info!("TX - {}", RequestDisplay::new(self.decode.app, request));
        }

        self.manager.send_to(session.id(), frame)
    }

    fn active_session(&self) -> Result<Arc<Session>, RequestError> {
        let state = self.state.lock().unwrap();
        if !state.active {
            return Err(RequestError::NoActiveSession);
        }
        state.session.clone().ok_or(RequestError::NoActiveSession)
    }
}

async fn run_events(
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    manager: Weak<SessionManager>,
    correlator: Arc<Correlator>,
    state: Arc<Mutex<ActiveState>>,
    mut listener: Box<dyn EventListener>,
    decode: DecodeLevel,
) {
    let mut tcp_framer = MbapFramer::new(decode.frame);
    let mut rtu_framer = RtuFramer::new(decode.frame);

    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Data { session, chunk } => {
                let pdus = match session.connection_type {
                    ConnectionType::Tcp => tcp_framer.push(&chunk),
                    ConnectionType::Rtu => rtu_framer.push(&chunk),
                };

                for pdu in pdus {
                    match codec::parse_pdu(&pdu) {
                        Ok(response) => {
                            if decode.app.enabled() {
                                tracing::info!(
                                    "RX - {}",
                                    ResponseDisplay::new(decode.app, &response)
                                );
                            }

                            if let Some(code) = response.exception {
                                tracing::warn!(
                                    "modbus exception from {}: {}",
                                    response.unit_id,
                                    code
                                );
                            } else if response.is_read_reply() {
                                correlator.complete_front(&response);
                            }

                            listener.update(HostEvent::Response(response));
                        }
                        Err(err) => {
                            tracing::warn!("discarding unparseable PDU: {}", err);
                        }
                    }
                }
            }
            TransportEvent::Connected(info) => {
                listener.update(HostEvent::Connected(info));
            }
            TransportEvent::Disconnected(info) => {
                deactivate_if_current(&state, info.id);
                listener.update(HostEvent::Disconnected(info));
            }
            TransportEvent::Faulted { session, error } => {
                tracing::warn!("session {} faulted: {}", session.id, error);
                if let Some(manager) = manager.upgrade() {
                    manager.disconnect_session(session.id);
                }
                deactivate_if_current(&state, session.id);
                listener.update(HostEvent::TransportError { session, error });
            }
        }
    }
}

fn deactivate_if_current(state: &Mutex<ActiveState>, session_id: u64) {
    let mut state = state.lock().unwrap();
    let is_current = state
        .session
        .as_ref()
        .map(|s| s.id() == session_id)
        .unwrap_or(false);
    if is_current {
        state.active = false;
        state.session = None;
    }
}

struct RequestDisplay<'a> {
    level: AppDecodeLevel,
    request: &'a Request,
}

impl<'a> RequestDisplay<'a> {
    fn new(level: AppDecodeLevel, request: &'a Request) -> Self {
        Self { level, request }
    }
}

impl std::fmt::Display for RequestDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{} unit: {} start: {:#06X} qty: {}",
            self.request.function, self.request.unit_id, self.request.address, self.request.count
        )?;

        if self.level.data_values() {
            for value in &self.request.values {
                write!(f, "\nvalue: {value:#06X}")?;
            }
        }

        Ok(())
    }
}

struct ResponseDisplay<'a> {
    level: AppDecodeLevel,
    response: &'a Response,
}

impl<'a> ResponseDisplay<'a> {
    fn new(level: AppDecodeLevel, response: &'a Response) -> Self {
        Self { level, response }
    }
}

impl std::fmt::Display for ResponseDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "function: {:#04X} unit: {}",
            self.response.function, self.response.unit_id
        )?;

        if let Some(code) = self.response.exception {
            write!(f, " exception: {code}")?;
        }

        if self.level.data_values() {
            for value in &self.response.values {
                write!(f, "\nvalue: {value:#06X}")?;
            }
        }

        Ok(())
    }
}
