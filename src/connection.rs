//! Connection engine: state machine, reader task, transaction dispatch.
//!
//! One engine owns one link. All mutable state lives behind a single
//! `tokio::sync::Mutex`, and the state carries an epoch counter bumped on
//! every (re)connect: tasks from a previous link generation (reader, timers)
//! check the epoch before touching anything, so a stale task can never
//! disturb the current connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::DEFAULT_RECONNECT_INTERVAL_MS;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::{encode_rtu_frame, encode_tcp_frame, RtuFrameDecoder, TcpFrameDecoder};
use crate::function::{decode_response, validate_response, Request, Response};
use crate::pdu::Pdu;
use crate::transaction::{PendingTransaction, TransactionMode, TransactionTable};
use crate::transport::Transport;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted on connection lifecycle transitions.
///
/// `Connected` fires on the first successful connect, `Reconnected` on every
/// later recovery. `Disconnected` carries the error that tore the link down,
/// or `None` for a deliberate disconnect.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected { error: Option<ModbusError> },
    Reconnected,
}

struct EngineState<S> {
    conn: ConnectionState,
    writer: Option<WriteHalf<S>>,
    table: TransactionTable,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    /// Link generation. Bumped on every successful (re)connect and on
    /// deliberate disconnect.
    epoch: u64,
}

struct Shared<T: Transport> {
    transport: T,
    mode: TransactionMode,
    auto_reconnect: Option<Duration>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: Mutex<EngineState<T::Stream>>,
}

/// The protocol engine for a single link.
pub struct ModbusEngine<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> ModbusEngine<T> {
    /// Create an engine around `transport`. The returned receiver yields
    /// connection lifecycle events.
    pub fn new(
        transport: T,
        mode: TransactionMode,
        auto_reconnect: Option<Duration>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            transport,
            mode,
            auto_reconnect,
            events,
            state: Mutex::new(EngineState {
                conn: ConnectionState::Disconnected,
                writer: None,
                table: TransactionTable::new(mode),
                reader: None,
                reconnect: None,
                epoch: 0,
            }),
        });
        (Self { shared }, receiver)
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.state.lock().await.conn
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Establish the connection. Fails unless the engine is disconnected.
    pub async fn connect(&self) -> ModbusResult<()> {
        let mut state = self.shared.state.lock().await;
        if state.conn != ConnectionState::Disconnected {
            return Err(ModbusError::AlreadyConnected);
        }
        state.conn = ConnectionState::Connecting;
        // The lock is held across the connect attempt; the transport bounds
        // it with its own timeout.
        match self.shared.transport.connect().await {
            Ok(stream) => {
                install_stream(&self.shared, &mut state, stream);
                info!("Connected to {}", self.shared.transport.describe());
                let _ = self.shared.events.send(ConnectionEvent::Connected);
                Ok(())
            }
            Err(err) => {
                state.conn = ConnectionState::Disconnected;
                Err(err)
            }
        }
    }

    /// Tear the connection down, failing every pending transaction.
    pub async fn disconnect(&self) -> ModbusResult<()> {
        let mut state = self.shared.state.lock().await;
        match state.conn {
            ConnectionState::Connected => {
                if let Some(reader) = state.reader.take() {
                    reader.abort();
                }
                state.epoch += 1;
                state.writer = None;
                state.table.reject_all(ModbusError::Disconnected);
                state.conn = ConnectionState::Disconnected;
                let _ = self
                    .shared
                    .events
                    .send(ConnectionEvent::Disconnected { error: None });
                Ok(())
            }
            ConnectionState::Reconnecting => {
                if let Some(task) = state.reconnect.take() {
                    task.abort();
                }
                state.epoch += 1;
                state.conn = ConnectionState::Disconnected;
                let _ = self
                    .shared
                    .events
                    .send(ConnectionEvent::Disconnected { error: None });
                Ok(())
            }
            _ => Err(ModbusError::NoConnection),
        }
    }

    /// Start reconnecting after a failure, with an immediate first attempt.
    /// Retries use the configured auto-reconnect interval, or
    /// [`DEFAULT_RECONNECT_INTERVAL_MS`] when none was set.
    ///
    /// [`DEFAULT_RECONNECT_INTERVAL_MS`]: crate::constants::DEFAULT_RECONNECT_INTERVAL_MS
    pub async fn reconnect(&self) -> ModbusResult<()> {
        let mut state = self.shared.state.lock().await;
        match state.conn {
            ConnectionState::Connected | ConnectionState::Reconnecting => {
                Err(ModbusError::AlreadyConnected)
            }
            _ => {
                state.conn = ConnectionState::Reconnecting;
                let interval = self
                    .shared
                    .auto_reconnect
                    .unwrap_or(Duration::from_millis(DEFAULT_RECONNECT_INTERVAL_MS));
                state.reconnect = Some(tokio::spawn(reconnect_loop(
                    self.shared.clone(),
                    interval,
                    false,
                )));
                Ok(())
            }
        }
    }

    /// Send a request and await its response.
    pub async fn request(&self, request: Request) -> ModbusResult<Response> {
        let pdu = request.encode()?;
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock().await;
            if state.conn != ConnectionState::Connected {
                return Err(ModbusError::NoConnection);
            }
            let id = state.table.allocate()?;
            let frame = match self.shared.mode {
                TransactionMode::Tcp => encode_tcp_frame(id, request.unit_id(), &pdu),
                TransactionMode::Serial => encode_rtu_frame(request.unit_id(), &pdu),
            };
            debug!("TX [{:5}] {}", id, hex::encode(&frame));
            let writer = match state.writer.as_mut() {
                Some(writer) => writer,
                None => {
                    state.table.release(id);
                    return Err(ModbusError::NoConnection);
                }
            };
            // Writing under the lock keeps frames whole on the wire and the
            // id reserved until the request is actually out.
            if let Err(err) = writer.write_all(&frame).await {
                state.table.release(id);
                return Err(err.into());
            }
            let timeout = request.options.timeout();
            let timer = tokio::spawn(timeout_task(
                self.shared.clone(),
                id,
                timeout,
                state.epoch,
            ));
            state.table.insert(
                id,
                PendingTransaction {
                    request,
                    completer: tx,
                    timer,
                },
            );
        }
        rx.await.map_err(|_| ModbusError::Disconnected)?
    }

    /// Number of transactions currently awaiting a response.
    pub async fn pending_count(&self) -> usize {
        self.shared.state.lock().await.table.len()
    }
}

/// Install a fresh stream: bump the epoch, split, spawn the reader.
fn install_stream<T: Transport>(
    shared: &Arc<Shared<T>>,
    state: &mut EngineState<T::Stream>,
    stream: T::Stream,
) {
    state.epoch += 1;
    let epoch = state.epoch;
    let (reader, writer) = tokio::io::split(stream);
    state.writer = Some(writer);
    state.conn = ConnectionState::Connected;
    state.reader = Some(tokio::spawn(reader_task(shared.clone(), reader, epoch)));
}

async fn timeout_task<T: Transport>(shared: Arc<Shared<T>>, id: u16, timeout: Duration, epoch: u64) {
    tokio::time::sleep(timeout).await;
    let mut state = shared.state.lock().await;
    if state.epoch != epoch {
        return;
    }
    if let Some(pending) = state.table.take(id) {
        warn!("Transaction {id} timed out after {timeout:?}");
        let _ = pending.completer.send(Err(ModbusError::Timeout(timeout)));
    }
}

async fn reader_task<T: Transport>(
    shared: Arc<Shared<T>>,
    mut reader: ReadHalf<T::Stream>,
    epoch: u64,
) {
    let mut tcp_decoder = TcpFrameDecoder::new();
    let mut rtu_decoder = RtuFrameDecoder::new();
    let mut buf = [0u8; 512];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                handle_link_loss(&shared, epoch, None).await;
                return;
            }
            Ok(n) => n,
            Err(err) => {
                handle_link_loss(&shared, epoch, Some(err.into())).await;
                return;
            }
        };
        debug!("RX {}", hex::encode(&buf[..n]));
        match shared.mode {
            TransactionMode::Tcp => {
                tcp_decoder.extend(&buf[..n]);
                loop {
                    match tcp_decoder.next_frame() {
                        Ok(Some(frame)) => {
                            dispatch_frame(
                                &shared,
                                epoch,
                                frame.header.transaction_id,
                                frame.header.unit_id,
                                frame.pdu,
                            )
                            .await;
                        }
                        Ok(None) => break,
                        Err(err) => {
                            // The TCP stream cannot be realigned after a
                            // malformed header; drop the link.
                            handle_link_loss(&shared, epoch, Some(err)).await;
                            return;
                        }
                    }
                }
            }
            TransactionMode::Serial => {
                rtu_decoder.extend(&buf[..n]);
                loop {
                    match rtu_decoder.next_frame() {
                        Ok(Some(frame)) => {
                            dispatch_frame(&shared, epoch, 0, frame.unit_id, frame.pdu).await;
                        }
                        Ok(None) => break,
                        Err(err) => {
                            // Corrupt serial data fails the outstanding
                            // transaction but keeps the port open.
                            warn!("Serial frame error: {err}");
                            fail_serial_pending(&shared, epoch, err).await;
                            rtu_decoder.clear();
                            break;
                        }
                    }
                }
            }
        }
    }
}

async fn dispatch_frame<T: Transport>(
    shared: &Arc<Shared<T>>,
    epoch: u64,
    transaction_id: u16,
    unit_id: u8,
    pdu: Pdu,
) {
    let mut state = shared.state.lock().await;
    if state.epoch != epoch {
        return;
    }
    match state.table.take(transaction_id) {
        Some(pending) => {
            pending.timer.abort();
            let result = validate_response(&pending.request, unit_id, &pdu)
                .and_then(|_| decode_response(&pending.request, &pdu.as_slice()[1..]))
                .map(|value| Response {
                    unit_id,
                    function: pending.request.function,
                    transaction_id,
                    value,
                });
            let _ = pending.completer.send(result);
        }
        None => {
            debug!("Discarding response with unmatched transaction id {transaction_id}");
        }
    }
}

async fn fail_serial_pending<T: Transport>(shared: &Arc<Shared<T>>, epoch: u64, err: ModbusError) {
    let mut state = shared.state.lock().await;
    if state.epoch != epoch {
        return;
    }
    if let Some(pending) = state.table.take(0) {
        pending.timer.abort();
        let _ = pending.completer.send(Err(err));
    }
}

/// The link died underneath us: wipe pending transactions, emit the event,
/// and start reconnecting if configured to.
async fn handle_link_loss<T: Transport>(
    shared: &Arc<Shared<T>>,
    epoch: u64,
    err: Option<ModbusError>,
) {
    let mut state = shared.state.lock().await;
    if state.epoch != epoch {
        return;
    }
    match &err {
        Some(err) => warn!("Connection lost: {err}"),
        None => warn!("Connection closed by peer"),
    }
    state.writer = None;
    state.reader = None;
    state.table.reject_all(ModbusError::Disconnected);
    let _ = shared
        .events
        .send(ConnectionEvent::Disconnected { error: err });
    if let Some(interval) = shared.auto_reconnect {
        state.conn = ConnectionState::Reconnecting;
        state.reconnect = Some(tokio::spawn(reconnect_loop(shared.clone(), interval, true)));
    } else {
        state.conn = ConnectionState::Disconnected;
    }
}

/// Retry connecting until it works or the engine is told to stop. A single
/// loop task exists per outage, so recovery emits exactly one `Reconnected`.
async fn reconnect_loop<T: Transport>(shared: Arc<Shared<T>>, interval: Duration, delay_first: bool) {
    let mut delay = delay_first;
    loop {
        if delay {
            tokio::time::sleep(interval).await;
        }
        delay = true;
        match shared.transport.connect().await {
            Ok(stream) => {
                let mut state = shared.state.lock().await;
                if state.conn != ConnectionState::Reconnecting {
                    return;
                }
                install_stream(&shared, &mut state, stream);
                state.reconnect = None;
                info!("Reconnected to {}", shared.transport.describe());
                let _ = shared.events.send(ConnectionEvent::Reconnected);
                return;
            }
            Err(err) => {
                warn!(
                    "Reconnect to {} failed: {err}, retrying in {interval:?}",
                    shared.transport.describe()
                );
            }
        }
    }
}
