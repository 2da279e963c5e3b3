//! Serial link worker
//!
//! A [`SerialLink`] owns at most one session at a time. `connect` spawns a
//! reader thread that opens the port, reports what it reads and closes the
//! port when it stops. Everything the session does is reported through a
//! bounded event queue, in this order:
//!
//! ```text
//! Connected, (DataReceived | Error)*, Disconnected
//! ```
//!
//! `Disconnected` is emitted exactly once for every session that got as far
//! as opening, whatever ended it.
//!
//! Sending an event never blocks a caller. When the queue is full, errors
//! raised on the caller's thread are dropped and counted in
//! [`LinkStats::dropped_events`]. The reader loop waits for room but keeps
//! watching for cancellation. One slot past `event_capacity` is reserved for
//! `Disconnected`, so a session can always be closed even if nobody drains
//! the queue.

mod backend;

#[cfg(test)]
pub(crate) use backend::MockSerialBackend;
pub use backend::{PortHandles, PortInfo, SerialBackend, SystemBackend};

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Baud rates offered by default
pub const BAUD_RATES: &[u32] = &[
    300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115_200,
];

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Link lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No session
    Idle,
    /// Reader thread is opening the port
    Opening,
    /// Port open, reader loop running
    Open,
    /// Stop requested or session ending
    Closing,
}

/// Error categories, without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkErrorKind {
    /// Serial support missing
    CapabilityUnavailable,
    /// Port could not be opened
    OpenFailed,
    /// Read failed mid-session
    ReadFailed,
    /// Write failed
    WriteFailed,
    /// Write without an open session
    NotOpen,
    /// Connect while a session is active
    Busy,
}

/// Link errors. All of them are delivered as [`LinkEvent::Error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Serial support is missing in this environment
    #[error("Serial support is not available in this environment")]
    CapabilityUnavailable,

    /// Opening the port failed (bad port, baud rate or permissions)
    #[error("Failed to open {port} @ {baud_rate}: {detail}")]
    OpenFailed {
        /// Port identifier
        port: String,
        /// Requested baud rate
        baud_rate: u32,
        /// Cause
        detail: String,
    },

    /// Reading failed; the session ends
    #[error("Serial read error: {0}")]
    ReadFailed(String),

    /// Writing failed; the session continues
    #[error("Serial write error: {0}")]
    WriteFailed(String),

    /// Write attempted with no open session
    #[error("Serial port is not open")]
    NotOpen,

    /// Connect attempted while a session is still active
    #[error("A serial session is already active")]
    Busy,
}

impl LinkError {
    /// Category of this error
    pub fn kind(&self) -> LinkErrorKind {
        match self {
            Self::CapabilityUnavailable => LinkErrorKind::CapabilityUnavailable,
            Self::OpenFailed { .. } => LinkErrorKind::OpenFailed,
            Self::ReadFailed(_) => LinkErrorKind::ReadFailed,
            Self::WriteFailed(_) => LinkErrorKind::WriteFailed,
            Self::NotOpen => LinkErrorKind::NotOpen,
            Self::Busy => LinkErrorKind::Busy,
        }
    }

    /// Whether the error ends the session it occurred in
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::OpenFailed { .. } | Self::ReadFailed(_))
    }
}

/// Events emitted by the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Port opened
    Connected,
    /// One successful read, unmodified
    DataReceived(Bytes),
    /// Something failed
    Error(LinkError),
    /// Session over; always the last event of a session
    Disconnected,
}

/// Timing and sizing of the reader loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSettings {
    /// Read timeout on the port
    pub read_timeout: Duration,
    /// Pause after an empty read
    pub idle_pause: Duration,
    /// Maximum bytes per read
    pub chunk_size: usize,
    /// How long `disconnect` waits for the reader loop
    pub disconnect_timeout: Duration,
    /// Event queue capacity, not counting the slot kept for `Disconnected`
    pub event_capacity: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(100),
            idle_pause: Duration::from_millis(10),
            chunk_size: 4096,
            disconnect_timeout: Duration::from_millis(1500),
            event_capacity: 1024,
        }
    }
}

/// Traffic counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Bytes written
    pub bytes_sent: u64,
    /// Bytes read
    pub bytes_received: u64,
    /// Non-empty reads
    pub reads: u64,
    /// Successful writes
    pub writes: u64,
    /// Errors emitted
    pub errors: u64,
    /// Events dropped because the queue was full
    pub dropped_events: u64,
}

type SharedWriter = Arc<Mutex<Option<Box<dyn Write + Send>>>>;

/// State shared between the link and its reader thread
#[derive(Clone)]
struct Shared {
    state: Arc<RwLock<LinkState>>,
    writer: SharedWriter,
    stats: Arc<RwLock<LinkStats>>,
    events: Sender<LinkEvent>,
    capacity: usize,
    gate: Arc<Mutex<()>>,
}

impl Shared {
    fn count(&self, event: &LinkEvent) {
        if let LinkEvent::Error(e) = event {
            self.stats.write().errors += 1;
            tracing::debug!("Link error: {}", e);
        }
    }

    fn dropped(&self, event: &LinkEvent) {
        self.stats.write().dropped_events += 1;
        tracing::warn!("Event queue full, dropped {:?}", event);
    }

    /// Queue `event` if there is room below the reserved slot.
    /// Gives the event back when there is none.
    fn try_queue(&self, event: LinkEvent) -> Result<(), LinkEvent> {
        let _gate = self.gate.lock();
        if self.events.len() >= self.capacity {
            return Err(event);
        }
        match self.events.try_send(event) {
            // A gone receiver means nobody is listening any more
            Ok(()) | Err(TrySendError::Disconnected(_)) => Ok(()),
            Err(TrySendError::Full(event)) => Err(event),
        }
    }

    /// Queue from a caller's thread; drops the event when the queue is full
    fn notify(&self, event: LinkEvent) {
        self.count(&event);
        if let Err(event) = self.try_queue(event) {
            self.dropped(&event);
        }
    }

    /// Queue from the reader loop; waits for room until `cancel` fires
    fn deliver(&self, event: LinkEvent, cancel: &CancellationToken, pause: Duration) {
        self.count(&event);
        let mut pending = event;
        loop {
            match self.try_queue(pending) {
                Ok(()) => return,
                Err(event) if cancel.is_cancelled() => {
                    self.dropped(&event);
                    return;
                }
                Err(event) => {
                    pending = event;
                    thread::sleep(pause);
                }
            }
        }
    }

    /// Queue the session's `Disconnected` into the reserved slot
    fn close_session(&self) {
        let _gate = self.gate.lock();
        if let Err(TrySendError::Full(event)) = self.events.try_send(LinkEvent::Disconnected) {
            self.stats.write().dropped_events += 1;
            tracing::error!("No room for {:?}; the queue was not drained between sessions", event);
        }
    }

    /// True while an undelivered `Disconnected` sits in the reserved slot
    fn backlogged(&self) -> bool {
        self.events.len() > self.capacity
    }

    fn set_state(&self, state: LinkState) {
        *self.state.write() = state;
    }
}

struct Worker {
    cancel: CancellationToken,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

impl Worker {
    /// Wait for the reader loop to finish, up to `timeout`
    fn wait(&self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    fn join(self) {
        if self.handle.join().is_err() {
            tracing::error!("Serial reader thread panicked");
        }
    }
}

/// Serial connection with a background reader loop
pub struct SerialLink {
    backend: Arc<dyn SerialBackend>,
    settings: LinkSettings,
    shared: Shared,
    events_rx: Receiver<LinkEvent>,
    worker: Mutex<Option<Worker>>,
    target: RwLock<Option<(String, u32)>>,
}

impl SerialLink {
    /// Link over the host's serial ports
    pub fn system(settings: LinkSettings) -> Self {
        Self::new(Arc::new(SystemBackend), settings)
    }

    /// Link over any backend
    pub fn new(backend: Arc<dyn SerialBackend>, settings: LinkSettings) -> Self {
        let capacity = settings.event_capacity.max(1);
        let (events_tx, events_rx) = bounded(capacity + 1);
        Self {
            backend,
            settings,
            shared: Shared {
                state: Arc::new(RwLock::new(LinkState::Idle)),
                writer: Arc::new(Mutex::new(None)),
                stats: Arc::new(RwLock::new(LinkStats::default())),
                events: events_tx,
                capacity,
                gate: Arc::new(Mutex::new(())),
            },
            events_rx,
            worker: Mutex::new(None),
            target: RwLock::new(None),
        }
    }

    /// Event queue. Receivers share one queue: use a single consumer.
    pub fn events(&self) -> Receiver<LinkEvent> {
        self.events_rx.clone()
    }

    /// Current state
    pub fn state(&self) -> LinkState {
        *self.shared.state.read()
    }

    /// True while the reader loop runs on an open port
    pub fn is_open(&self) -> bool {
        self.state() == LinkState::Open
    }

    /// Traffic counters for the current or last session
    pub fn stats(&self) -> LinkStats {
        self.shared.stats.read().clone()
    }

    /// Settings in use
    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// `port @ baud` of the current or last session
    pub fn connection_info(&self) -> Option<String> {
        self.target
            .read()
            .as_ref()
            .map(|(port, baud)| format!("{port} @ {baud} baud"))
    }

    /// Available serial devices
    pub fn enumerate_ports(&self) -> io::Result<Vec<PortInfo>> {
        if !self.backend.is_available() {
            return Ok(Vec::new());
        }
        self.backend.enumerate()
    }

    /// Start a session on `port`. The outcome arrives as events.
    pub fn connect(&self, port: &str, baud_rate: u32) {
        if !self.backend.is_available() {
            self.shared.notify(LinkEvent::Error(LinkError::CapabilityUnavailable));
            return;
        }

        let mut worker = self.worker.lock();

        // A session that already emitted Disconnected may still be unwinding
        if self.state() == LinkState::Closing {
            if let Some(previous) = worker.as_ref() {
                previous.wait(self.settings.disconnect_timeout);
            }
        }

        {
            let mut state = self.shared.state.write();
            // The last session's Disconnected still holds the reserved slot
            if *state != LinkState::Idle || self.shared.backlogged() {
                drop(state);
                self.shared.notify(LinkEvent::Error(LinkError::Busy));
                return;
            }
            *state = LinkState::Opening;
        }

        if let Some(previous) = worker.take() {
            previous.join();
        }

        *self.target.write() = Some((port.to_string(), baud_rate));
        *self.shared.stats.write() = LinkStats::default();

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = bounded(1);
        let reader = ReaderLoop {
            backend: Arc::clone(&self.backend),
            settings: self.settings.clone(),
            shared: self.shared.clone(),
            cancel: cancel.clone(),
            port: port.to_string(),
            baud_rate,
            done: done_tx,
        };

        tracing::info!("Connecting to {} @ {}", port, baud_rate);
        match thread::Builder::new()
            .name(format!("serial-reader {port}"))
            .spawn(move || reader.run())
        {
            Ok(handle) => {
                *worker = Some(Worker {
                    cancel,
                    done: done_rx,
                    handle,
                });
            }
            Err(e) => {
                self.shared.notify(LinkEvent::Error(LinkError::OpenFailed {
                    port: port.to_string(),
                    baud_rate,
                    detail: format!("could not start reader: {e}"),
                }));
                self.shared.close_session();
                self.shared.set_state(LinkState::Idle);
            }
        }
    }

    /// Stop the session and wait for the reader loop to exit.
    ///
    /// Blocks for at most `disconnect_timeout`. Returns false when the loop
    /// did not exit in time; it will still emit `Disconnected` when it does.
    pub fn disconnect(&self) -> bool {
        let mut worker = self.worker.lock();
        let Some(active) = worker.as_ref() else {
            return true;
        };

        {
            let mut state = self.shared.state.write();
            if matches!(*state, LinkState::Opening | LinkState::Open) {
                *state = LinkState::Closing;
            }
        }
        active.cancel.cancel();

        if active.wait(self.settings.disconnect_timeout) {
            if let Some(finished) = worker.take() {
                finished.join();
            }
            true
        } else {
            tracing::warn!(
                "Serial reader did not stop within {:?}",
                self.settings.disconnect_timeout
            );
            false
        }
    }

    /// Write bytes to the open port.
    ///
    /// Without an open session this emits `NotOpen`, does no I/O and returns
    /// false. A failed write emits `WriteFailed` and leaves the session
    /// running; it still returns true since the port was open.
    pub fn write(&self, data: &[u8]) -> bool {
        let mut slot = self.shared.writer.lock();
        let outcome = if self.is_open() {
            slot.as_mut()
                .map(|port| port.write_all(data).and_then(|()| port.flush()))
        } else {
            None
        };
        let Some(outcome) = outcome else {
            drop(slot);
            self.shared.notify(LinkEvent::Error(LinkError::NotOpen));
            return false;
        };
        match outcome {
            Ok(()) => {
                drop(slot);
                let mut stats = self.shared.stats.write();
                stats.bytes_sent += data.len() as u64;
                stats.writes += 1;
                tracing::debug!("Wrote {} bytes", data.len());
            }
            // Queued before the writer is released so it lands ahead of the
            // session's Disconnected; `notify` never blocks
            Err(e) => self
                .shared
                .notify(LinkEvent::Error(LinkError::WriteFailed(e.to_string()))),
        }
        true
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Body of the reader thread
struct ReaderLoop {
    backend: Arc<dyn SerialBackend>,
    settings: LinkSettings,
    shared: Shared,
    cancel: CancellationToken,
    port: String,
    baud_rate: u32,
    done: Sender<()>,
}

impl ReaderLoop {
    /// Waits for room in the queue, giving up once a stop is requested
    fn emit(&self, event: LinkEvent) {
        self.shared
            .deliver(event, &self.cancel, self.settings.idle_pause);
    }

    fn run(self) {
        match self
            .backend
            .open(&self.port, self.baud_rate, self.settings.read_timeout)
        {
            Ok(handles) => self.serve(handles),
            Err(e) => {
                tracing::warn!("Failed to open {}: {}", self.port, e);
                self.emit(LinkEvent::Error(LinkError::OpenFailed {
                    port: self.port.clone(),
                    baud_rate: self.baud_rate,
                    detail: e.to_string(),
                }));
            }
        }
        self.finish();
    }

    fn serve(&self, handles: PortHandles) {
        let PortHandles { mut reader, writer } = handles;
        *self.shared.writer.lock() = Some(writer);
        {
            let mut state = self.shared.state.write();
            if *state == LinkState::Opening {
                *state = LinkState::Open;
            }
        }
        tracing::info!("Connected to {} @ {}", self.port, self.baud_rate);
        self.emit(LinkEvent::Connected);

        let mut buffer = vec![0u8; self.settings.chunk_size.max(1)];
        while !self.cancel.is_cancelled() {
            match reader.read(&mut buffer) {
                Ok(0) => thread::sleep(self.settings.idle_pause),
                Ok(n) => {
                    {
                        let mut stats = self.shared.stats.write();
                        stats.bytes_received += n as u64;
                        stats.reads += 1;
                    }
                    self.emit(LinkEvent::DataReceived(Bytes::copy_from_slice(&buffer[..n])));
                }
                Err(e) if is_idle(&e) => thread::sleep(self.settings.idle_pause),
                Err(e) => {
                    tracing::warn!("Read from {} failed: {}", self.port, e);
                    self.emit(LinkEvent::Error(LinkError::ReadFailed(e.to_string())));
                    break;
                }
            }
        }
    }

    fn finish(self) {
        self.shared.set_state(LinkState::Closing);
        if let Some(mut writer) = self.shared.writer.lock().take() {
            if let Err(e) = writer.flush() {
                tracing::debug!("Ignoring flush error on close: {}", e);
            }
        }
        tracing::info!("Disconnected from {}", self.port);
        self.shared.close_session();
        self.shared.set_state(LinkState::Idle);
        let _ = self.done.send(());
    }
}

fn is_idle(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Instant;

    enum Step {
        Data(&'static [u8]),
        Timeout,
        Fail,
    }

    /// Plays a script, then idles like a quiet port
    struct ScriptedReader {
        steps: VecDeque<Step>,
        idle: Duration,
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.steps.pop_front() {
                Some(Step::Data(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(bytes);
                    Ok(bytes.len())
                }
                Some(Step::Fail) => Err(io::Error::new(ErrorKind::BrokenPipe, "device unplugged")),
                Some(Step::Timeout) | None => {
                    thread::sleep(self.idle);
                    Err(io::Error::new(ErrorKind::TimedOut, "timed out"))
                }
            }
        }
    }

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenWriter;

    impl Write for BrokenWriter {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(ErrorKind::Other, "tx fault"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn settings() -> LinkSettings {
        LinkSettings {
            read_timeout: Duration::from_millis(20),
            idle_pause: Duration::from_millis(1),
            disconnect_timeout: Duration::from_millis(1500),
            ..LinkSettings::default()
        }
    }

    fn scripted(steps: Vec<Step>, sink: Sink) -> MockSerialBackend {
        let mut mock = MockSerialBackend::new();
        let script = Mutex::new(Some(steps));
        mock.expect_is_available().return_const(true);
        mock.expect_open().returning(move |_, _, timeout| {
            let steps = script.lock().take().unwrap_or_default();
            Ok(PortHandles {
                reader: Box::new(ScriptedReader {
                    steps: steps.into(),
                    idle: timeout,
                }),
                writer: Box::new(sink.clone()),
            })
        });
        mock
    }

    fn next(rx: &Receiver<LinkEvent>) -> LinkEvent {
        rx.recv_timeout(Duration::from_secs(3)).expect("event")
    }

    fn collect_until_disconnected(rx: &Receiver<LinkEvent>) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        loop {
            let event = next(rx);
            let done = event == LinkEvent::Disconnected;
            events.push(event);
            if done {
                return events;
            }
        }
    }

    #[test]
    fn test_capability_unavailable() {
        let mut mock = MockSerialBackend::new();
        mock.expect_is_available().return_const(false);
        mock.expect_open().never();
        let link = SerialLink::new(Arc::new(mock), settings());
        let rx = link.events();

        link.connect("/dev/ttyUSB0", 115_200);
        assert_eq!(next(&rx), LinkEvent::Error(LinkError::CapabilityUnavailable));
        assert_eq!(link.state(), LinkState::Idle);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn test_open_failed_ends_session() {
        let mut mock = MockSerialBackend::new();
        mock.expect_is_available().return_const(true);
        mock.expect_open()
            .returning(|_, _, _| Err(io::Error::new(ErrorKind::PermissionDenied, "access denied")));
        let link = SerialLink::new(Arc::new(mock), settings());
        let rx = link.events();

        link.connect("COM9", 9600);
        let events = collect_until_disconnected(&rx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            LinkEvent::Error(e) => {
                assert_eq!(e.kind(), LinkErrorKind::OpenFailed);
                assert!(e.to_string().contains("COM9 @ 9600"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(link.disconnect());
        assert_eq!(link.state(), LinkState::Idle);
    }

    #[test]
    fn test_event_order_with_read_error() {
        let backend = scripted(
            vec![
                Step::Data(b"hello"),
                Step::Timeout,
                Step::Data(b" world"),
                Step::Fail,
                Step::Data(b"never"),
            ],
            Sink::default(),
        );
        let link = SerialLink::new(Arc::new(backend), settings());
        let rx = link.events();

        link.connect("/dev/ttyACM0", 115_200);
        let events = collect_until_disconnected(&rx);
        assert_eq!(events[0], LinkEvent::Connected);
        assert_eq!(events[1], LinkEvent::DataReceived(Bytes::from_static(b"hello")));
        assert_eq!(events[2], LinkEvent::DataReceived(Bytes::from_static(b" world")));
        assert!(matches!(events[3], LinkEvent::Error(LinkError::ReadFailed(_))));
        assert_eq!(events.len(), 5);

        assert!(link.disconnect());
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        assert_eq!(link.stats().bytes_received, 11);
    }

    #[test]
    fn test_disconnect_while_reading() {
        let link = SerialLink::new(Arc::new(scripted(vec![], Sink::default())), settings());
        let rx = link.events();

        link.connect("/dev/pts/3", 115_200);
        assert_eq!(next(&rx), LinkEvent::Connected);
        assert!(link.is_open());

        let started = Instant::now();
        assert!(link.disconnect());
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(next(&rx), LinkEvent::Disconnected);
        assert_eq!(link.state(), LinkState::Idle);
        assert!(link.disconnect());
    }

    #[test]
    fn test_write_when_not_open() {
        let mut mock = MockSerialBackend::new();
        mock.expect_open().never();
        let link = SerialLink::new(Arc::new(mock), settings());
        let rx = link.events();

        assert!(!link.write(b"AT\r\n"));
        assert_eq!(next(&rx), LinkEvent::Error(LinkError::NotOpen));
        assert_eq!(link.stats().bytes_sent, 0);
    }

    #[test]
    fn test_write_reaches_device() {
        let sink = Sink::default();
        let link = SerialLink::new(Arc::new(scripted(vec![], sink.clone())), settings());
        let rx = link.events();

        link.connect("/dev/ttyUSB1", 57_600);
        assert_eq!(next(&rx), LinkEvent::Connected);
        assert!(link.write(b"ATI\r"));
        assert_eq!(sink.0.lock().as_slice(), b"ATI\r");
        assert_eq!(link.connection_info().as_deref(), Some("/dev/ttyUSB1 @ 57600 baud"));

        link.disconnect();
        assert_eq!(next(&rx), LinkEvent::Disconnected);
        assert!(!link.write(b"late"));
        assert_eq!(next(&rx), LinkEvent::Error(LinkError::NotOpen));
        assert_eq!(sink.0.lock().as_slice(), b"ATI\r");
    }

    #[test]
    fn test_write_failure_keeps_session() {
        let mut mock = MockSerialBackend::new();
        mock.expect_is_available().return_const(true);
        mock.expect_open().returning(|_, _, timeout| {
            Ok(PortHandles {
                reader: Box::new(ScriptedReader {
                    steps: VecDeque::new(),
                    idle: timeout,
                }),
                writer: Box::new(BrokenWriter),
            })
        });
        let link = SerialLink::new(Arc::new(mock), settings());
        let rx = link.events();

        link.connect("COM4", 115_200);
        assert_eq!(next(&rx), LinkEvent::Connected);
        assert!(link.write(b"x"));
        match next(&rx) {
            LinkEvent::Error(e) => assert_eq!(e.kind(), LinkErrorKind::WriteFailed),
            other => panic!("unexpected {other:?}"),
        }
        assert!(link.is_open());
        link.disconnect();
        assert_eq!(next(&rx), LinkEvent::Disconnected);
    }

    #[test]
    fn test_connect_while_open_is_busy() {
        let link = SerialLink::new(Arc::new(scripted(vec![], Sink::default())), settings());
        let rx = link.events();

        link.connect("COM1", 115_200);
        assert_eq!(next(&rx), LinkEvent::Connected);
        link.connect("COM2", 115_200);
        assert_eq!(next(&rx), LinkEvent::Error(LinkError::Busy));
        link.disconnect();
        assert_eq!(next(&rx), LinkEvent::Disconnected);
    }

    #[test]
    fn test_reconnect_after_disconnected() {
        let mut mock = MockSerialBackend::new();
        mock.expect_is_available().return_const(true);
        mock.expect_open().times(2).returning(|_, _, timeout| {
            Ok(PortHandles {
                reader: Box::new(ScriptedReader {
                    steps: VecDeque::from([Step::Fail]),
                    idle: timeout,
                }),
                writer: Box::new(Sink::default()),
            })
        });
        let link = SerialLink::new(Arc::new(mock), settings());
        let rx = link.events();

        for _ in 0..2 {
            link.connect("COM5", 115_200);
            let events = collect_until_disconnected(&rx);
            assert_eq!(events.first(), Some(&LinkEvent::Connected));
            assert_eq!(events.iter().filter(|e| **e == LinkEvent::Disconnected).count(), 1);
        }
    }

    fn small_queue() -> LinkSettings {
        LinkSettings {
            event_capacity: 4,
            ..settings()
        }
    }

    #[test]
    fn test_full_queue_never_blocks_writers() {
        let mut mock = MockSerialBackend::new();
        mock.expect_open().never();
        let link = Arc::new(SerialLink::new(Arc::new(mock), small_queue()));
        let rx = link.events();

        let (done_tx, done_rx) = bounded(1);
        let writer = {
            let link = Arc::clone(&link);
            thread::spawn(move || {
                for _ in 0..10 {
                    assert!(!link.write(b"AT"));
                }
                let _ = done_tx.send(());
            })
        };
        assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
        writer.join().unwrap();

        assert_eq!(rx.len(), 4);
        assert_eq!(link.stats().dropped_events, 6);
        assert_eq!(link.stats().errors, 10);
    }

    #[test]
    fn test_disconnect_with_undrained_queue() {
        let chatter = (0..64).map(|_| Step::Data(b"x")).collect();
        let link = SerialLink::new(Arc::new(scripted(chatter, Sink::default())), small_queue());
        let rx = link.events();

        link.connect("/dev/ttyUSB2", 115_200);
        let deadline = Instant::now() + Duration::from_secs(2);
        while rx.len() < 4 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(rx.len(), 4);

        // Writes stay prompt while the reader waits for room
        assert!(link.write(b"AT"));

        let started = Instant::now();
        assert!(link.disconnect());
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert_eq!(link.state(), LinkState::Idle);

        // The last session's Disconnected is still queued
        link.connect("/dev/ttyUSB2", 115_200);
        assert_eq!(link.state(), LinkState::Idle);

        let events: Vec<LinkEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 5);
        assert_eq!(events[0], LinkEvent::Connected);
        assert_eq!(events.last(), Some(&LinkEvent::Disconnected));
        assert!(link.stats().dropped_events >= 2);
    }
}
