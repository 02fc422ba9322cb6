use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use crate::decode::PhysDecodeLevel;
use crate::transport::{SessionInfo, TransportEvent};
use crate::types::ConnectionType;

/// Size of the per-session read buffer. Chunks handed to the framer are at
/// most this large; chunk boundaries carry no semantic meaning.
const READ_BUFFER_SIZE: usize = 2048;

/// Monotonic across the process lifetime
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A live byte stream to a slave endpoint.
///
/// The session owns two background tasks: a reader that pumps raw chunks
/// onto the transport event channel, and a writer that drains an ordered
/// queue so that at most one write is outstanding at any moment. `close` is
/// idempotent; once closed, sends are silently dropped and both tasks exit.
pub struct Session {
    id: u64,
    connection_type: ConnectionType,
    writes: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl Session {
    /// Split the stream and spawn the read/write pumps
    pub(crate) fn spawn<T>(
        stream: T,
        connection_type: ConnectionType,
        events: mpsc::UnboundedSender<TransportEvent>,
        decode: PhysDecodeLevel,
    ) -> Arc<Self>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let (writes, write_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let session = Arc::new(Self {
            id,
            connection_type,
            writes,
            shutdown,
            closed: AtomicBool::new(false),
        });

        let info = session.info();
        let (read_half, write_half) = tokio::io::split(stream);
        tokio::spawn(read_task(
            read_half,
            info,
            events.clone(),
            shutdown_rx.clone(),
            decode,
        ));
        tokio::spawn(write_task(write_half, info, events, write_rx, shutdown_rx, decode));

        session
    }

    /// Unique monotonically increasing session id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The wire dialect this session speaks
    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub(crate) fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            connection_type: self.connection_type,
        }
    }

    /// Enqueue a frame for transmission. Writes are serialized in FIFO
    /// order. Dropped silently after close.
    pub fn send(&self, bytes: Vec<u8>) {
        if self.closed.load(Ordering::Acquire) || bytes.is_empty() {
            return;
        }
        let _ = self.writes.send(bytes);
    }

    /// Stop both pumps. Queued writes that have not reached the wire are
    /// discarded. Safe to call more than once.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.shutdown.send(true);
        }
    }

    /// True once `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

async fn read_task<R>(
    mut io: R,
    info: SessionInfo,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut shutdown: watch::Receiver<bool>,
    decode: PhysDecodeLevel,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            result = io.read(&mut buffer) => match result {
                Ok(0) => {
                    let _ = events.send(TransportEvent::Faulted {
                        session: info,
                        error: std::io::ErrorKind::UnexpectedEof,
                    });
                    return;
                }
                Ok(count) => {
                    if decode.enabled() {
                        tracing::info!(
                            "PHYS RX - {}",
                            PhysDisplay::new(decode, &buffer[..count])
                        );
                    }
                    let _ = events.send(TransportEvent::Data {
                        session: info,
                        chunk: buffer[..count].to_vec(),
                    });
                }
                Err(err) => {
                    let _ = events.send(TransportEvent::Faulted {
                        session: info,
                        error: err.kind(),
                    });
                    return;
                }
            }
        }
    }
}

async fn write_task<W>(
    mut io: W,
    info: SessionInfo,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut queue: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
    decode: PhysDecodeLevel,
) where
    W: AsyncWrite + Send + Unpin,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            next = queue.recv() => match next {
                None => return,
                Some(bytes) => {
                    if decode.enabled() {
                        tracing::info!("PHYS TX - {}", PhysDisplay::new(decode, &bytes));
                    }
                    if let Err(err) = io.write_all(&bytes).await {
                        let _ = events.send(TransportEvent::Faulted {
                            session: info,
                            error: err.kind(),
                        });
                        return;
                    }
                }
            }
        }
    }
}

struct PhysDisplay<'a> {
    level: PhysDecodeLevel,
    data: &'a [u8],
}

impl<'a> PhysDisplay<'a> {
    fn new(level: PhysDecodeLevel, data: &'a [u8]) -> Self {
        Self { level, data }
    }
}

impl std::fmt::Display for PhysDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{} bytes", self.data.len())?;
        if self.level.data_enabled() {
            crate::common::format_bytes(f, self.data)?;
        }
        Ok(())
    }
}
