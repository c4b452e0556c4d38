// ============================================================================
// discmux-core/src/bridge/mod.rs
// ============================================================================
//
// VIRTUAL INPUT BRIDGE: In-Process Byte Sources Exposed as Files
//
// A bridge pairs one OS endpoint (named pipe or loopback socket) with one
// background thread. The thread creates the endpoint, reports "listening" to
// the job's readiness gate, waits for the transcoder to connect, and then
// copies bytes from its source into the endpoint.
//
// KEY COMPONENTS:
// - VirtualInputBridge: the task + endpoint pair
// - BridgeState: lifecycle observable from other threads
// - BridgeOutcome: how the copy loop ended
// - ReadinessGate: barrier that must open before the transcoder starts
//
// A consumer that closes its end early is normal: the transcoder routinely
// abandons inputs it does not need. Only failures on the source side are
// fatal for the job.

mod endpoint;
mod gate;

pub use gate::ReadinessGate;

use crate::config::EndpointKind;
use crate::error::{CoreError, CoreResult};
use crate::stream::{DecryptError, SourceOpener};
use endpoint::{Connection, Listener, Waker, is_consumer_gone};
use log::{debug, warn};
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BridgeState {
    Created = 0,
    Listening = 1,
    Connected = 2,
    /// Source fully delivered.
    Completed = 3,
    /// Consumer closed its end, or never connected before disposal.
    Abandoned = 4,
    Failed = 5,
    Disposed = 6,
}

impl BridgeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => BridgeState::Created,
            1 => BridgeState::Listening,
            2 => BridgeState::Connected,
            3 => BridgeState::Completed,
            4 => BridgeState::Abandoned,
            5 => BridgeState::Failed,
            _ => BridgeState::Disposed,
        }
    }

    /// Whether the copy loop has ended.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BridgeState::Completed
                | BridgeState::Abandoned
                | BridgeState::Failed
                | BridgeState::Disposed
        )
    }
}

/// How a bridge's copy loop ended.
#[derive(Debug)]
pub enum BridgeOutcome {
    Completed { bytes: u64 },
    Abandoned { bytes: u64 },
    Failed(CoreError),
    /// Disposed before the task finished; the task was detached.
    TimedOut,
}

/// Settings for starting a bridge.
#[derive(Debug, Clone)]
pub struct BridgeOptions {
    pub endpoint_kind: EndpointKind,
    /// Directory for FIFO endpoints.
    pub endpoint_dir: PathBuf,
    pub copy_buffer_size: usize,
    /// How long `open` waits for the endpoint to be created.
    pub open_timeout: Duration,
}

struct Shared {
    delivered: DeliveredCounter,
    state: AtomicU8,
    cancel: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: BridgeState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// An in-process byte source exposed to an external process as a file.
pub struct VirtualInputBridge {
    name: String,
    /// Label used in `SourceReadFailed` and `DecryptionFailure` errors.
    source_label: String,
    opener: Option<SourceOpener>,
    shared: Arc<Shared>,
    address: Option<String>,
    waker: Option<Waker>,
    handle: Option<JoinHandle<BridgeOutcome>>,
    outcome: Option<BridgeOutcome>,
    disposed: bool,
}

impl VirtualInputBridge {
    /// Creates a bridge that will serve the source produced by `opener`.
    ///
    /// `name` must be unique within a job; it becomes the FIFO file name.
    pub fn new(name: impl Into<String>, source_label: impl Into<String>, opener: SourceOpener) -> Self {
        Self {
            name: name.into(),
            source_label: source_label.into(),
            opener: Some(opener),
            shared: Arc::new(Shared {
                delivered: DeliveredCounter::new(),
                state: AtomicU8::new(BridgeState::Created as u8),
                cancel: AtomicBool::new(false),
            }),
            address: None,
            waker: None,
            handle: None,
            outcome: None,
            disposed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source_label(&self) -> &str {
        &self.source_label
    }

    /// Address handed to the transcoder, once opened.
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn state(&self) -> BridgeState {
        BridgeState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    /// Bytes written to the endpoint so far. Stays stable after disposal.
    pub fn bytes_delivered(&self) -> u64 {
        self.shared.delivered.get()
    }

    /// Lock-free view of the delivered-bytes counter for progress reporting.
    pub fn delivered_counter(&self) -> DeliveredCounter {
        self.shared.delivered.clone()
    }

    /// Starts the bridge task and returns the address the transcoder should open.
    ///
    /// Returns once the endpoint exists and is listening. The consumer has not
    /// necessarily connected yet.
    pub fn open(&mut self, options: &BridgeOptions, gate: &Arc<ReadinessGate>) -> CoreResult<String> {
        if let Some(address) = &self.address {
            return Ok(address.clone());
        }
        let opener = self.opener.take().ok_or_else(|| {
            CoreError::BridgeSetup(format!("bridge {} was already started", self.name))
        })?;

        gate.expect_one();
        let (ready_tx, ready_rx) = mpsc::channel();
        let task = BridgeTask {
            name: self.name.clone(),
            source_label: self.source_label.clone(),
            options: options.clone(),
            shared: Arc::clone(&self.shared),
            gate: Arc::clone(gate),
        };
        let handle = thread::Builder::new()
            .name(format!("bridge-{}", self.name))
            .spawn(move || task.run(opener, ready_tx))
            .map_err(|e| CoreError::BridgeSetup(format!("failed to spawn bridge task: {e}")))?;
        self.handle = Some(handle);

        match ready_rx.recv_timeout(options.open_timeout) {
            Ok(Ok((address, waker))) => {
                debug!("Virtual input {} listening at {}", self.name, address);
                self.address = Some(address.clone());
                self.waker = Some(waker);
                Ok(address)
            }
            Ok(Err(reason)) => Err(CoreError::BridgeSetup(reason)),
            Err(_) => Err(CoreError::BridgeSetup(format!(
                "virtual input {} did not start listening within {:?}",
                self.name, options.open_timeout
            ))),
        }
    }

    /// Whether the copy loop hit a fatal source failure.
    pub fn has_failed(&self) -> bool {
        self.state() == BridgeState::Failed
    }

    /// Stops the bridge and releases its endpoint.
    ///
    /// Safe to call in any state and more than once. A task blocked waiting
    /// for a consumer is woken; a task that does not exit within `timeout`
    /// is detached.
    pub fn dispose(&mut self, timeout: Duration) -> Option<&BridgeOutcome> {
        if !self.disposed {
            let outcome = self.stop(timeout);
            self.outcome = Some(outcome);
            self.disposed = true;
            self.shared.set_state(BridgeState::Disposed);
        }
        self.outcome.as_ref()
    }

    /// Takes the outcome recorded by `dispose`.
    pub fn take_outcome(&mut self) -> Option<BridgeOutcome> {
        self.outcome.take()
    }

    fn stop(&mut self, timeout: Duration) -> BridgeOutcome {
        self.opener = None;
        let Some(handle) = self.handle.take() else {
            return BridgeOutcome::Abandoned { bytes: 0 };
        };

        let deadline = Instant::now() + timeout;
        if !self.state().is_terminal() {
            self.shared.cancel.store(true, Ordering::Release);
        }
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "Virtual input {} did not stop within {:?}; detaching it",
                    self.name, timeout
                );
                return BridgeOutcome::TimedOut;
            }
            if let Some(waker) = &self.waker {
                waker.wake();
            }
            thread::sleep(Duration::from_millis(10));
        }

        handle.join().unwrap_or_else(|_| {
            BridgeOutcome::Failed(CoreError::BridgeSetup(format!(
                "bridge task {} panicked",
                self.name
            )))
        })
    }
}

impl Drop for VirtualInputBridge {
    fn drop(&mut self) {
        if !self.disposed && self.handle.is_some() {
            self.dispose(crate::config::DEFAULT_DISPOSE_TIMEOUT);
        }
    }
}

/// Shared handle on a bridge's delivered-bytes counter.
///
/// Written only by the bridge task; readers may see a slightly stale value.
#[derive(Debug, Clone, Default)]
pub struct DeliveredCounter(Arc<AtomicU64>);

impl DeliveredCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub(crate) fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }
}

type Ready = Result<(String, Waker), String>;

struct BridgeTask {
    name: String,
    source_label: String,
    options: BridgeOptions,
    shared: Arc<Shared>,
    gate: Arc<ReadinessGate>,
}

impl BridgeTask {
    fn run(self, opener: SourceOpener, ready: mpsc::Sender<Ready>) -> BridgeOutcome {
        let listener = match Listener::create(
            self.options.endpoint_kind,
            &self.options.endpoint_dir,
            &self.name,
        ) {
            Ok(listener) => listener,
            Err(e) => {
                let reason = format!("failed to create endpoint for {}: {e}", self.name);
                self.shared.set_state(BridgeState::Failed);
                self.gate.fail(reason.clone());
                let _ = ready.send(Err(reason.clone()));
                return BridgeOutcome::Failed(CoreError::BridgeSetup(reason));
            }
        };

        self.shared.set_state(BridgeState::Listening);
        let _ = ready.send(Ok((listener.address(), listener.waker())));
        self.gate.arrive();

        let connection = listener.accept();
        if self.cancelled() {
            debug!("Virtual input {} disposed before its consumer connected", self.name);
            self.shared.set_state(BridgeState::Abandoned);
            return BridgeOutcome::Abandoned { bytes: 0 };
        }
        let connection = match connection {
            Ok(connection) => connection,
            Err(e) => {
                self.shared.set_state(BridgeState::Failed);
                return BridgeOutcome::Failed(CoreError::BridgeSetup(format!(
                    "accepting consumer for {} failed: {e}",
                    self.name
                )));
            }
        };
        self.shared.set_state(BridgeState::Connected);
        debug!("Consumer connected to virtual input {}", self.name);

        let source = match opener() {
            Ok(source) => source,
            Err(e) => {
                self.shared.set_state(BridgeState::Failed);
                return BridgeOutcome::Failed(e);
            }
        };

        let outcome = self.copy(source, connection);
        drop(listener);
        outcome
    }

    fn cancelled(&self) -> bool {
        self.shared.cancel.load(Ordering::Acquire)
    }

    /// Maps a source read error to the job-level failure it stands for.
    fn source_failure(&self, err: io::Error) -> CoreError {
        let decrypt = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<DecryptError>());
        match decrypt {
            Some(failure) => CoreError::DecryptionFailure {
                segment_id: self.source_label.clone(),
                unit: failure.unit,
                message: failure.message.clone(),
            },
            None => CoreError::SourceReadFailed {
                segment_id: self.source_label.clone(),
                cause: err.to_string(),
            },
        }
    }

    fn copy(&self, mut source: Box<dyn Read + Send>, mut sink: Connection) -> BridgeOutcome {
        let mut buffer = vec![0u8; self.options.copy_buffer_size];
        loop {
            if self.cancelled() {
                let bytes = self.shared.delivered.get();
                debug!("Virtual input {} cancelled after {bytes} bytes", self.name);
                self.shared.set_state(BridgeState::Abandoned);
                return BridgeOutcome::Abandoned { bytes };
            }

            let n = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Virtual input {} source read failed: {e}", self.name);
                    self.shared.set_state(BridgeState::Failed);
                    return BridgeOutcome::Failed(self.source_failure(e));
                }
            };

            if let Err(e) = sink.write_all(&buffer[..n]) {
                let bytes = self.shared.delivered.get();
                if is_consumer_gone(&e) {
                    debug!("Consumer closed virtual input {} after {bytes} bytes", self.name);
                    self.shared.set_state(BridgeState::Abandoned);
                    return BridgeOutcome::Abandoned { bytes };
                }
                warn!("Virtual input {} endpoint write failed: {e}", self.name);
                self.shared.set_state(BridgeState::Failed);
                return BridgeOutcome::Failed(CoreError::Io(e));
            }
            self.shared.delivered.add(n as u64);
        }

        // The source is released before the endpoint so the consumer sees EOF
        // only after every byte has been accounted for.
        drop(source);
        sink.finish();
        let bytes = self.shared.delivered.get();
        debug!("Virtual input {} delivered {bytes} bytes", self.name);
        self.shared.set_state(BridgeState::Completed);
        BridgeOutcome::Completed { bytes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{ByteSource, memory_source};
    use std::net::TcpStream;

    fn options(kind: EndpointKind, dir: &std::path::Path) -> BridgeOptions {
        BridgeOptions {
            endpoint_kind: kind,
            endpoint_dir: dir.to_path_buf(),
            copy_buffer_size: 1024,
            open_timeout: Duration::from_secs(5),
        }
    }

    fn connect(address: &str) -> Box<dyn Read + Send> {
        match address.strip_prefix("tcp://") {
            Some(addr) => Box::new(TcpStream::connect(addr).unwrap()),
            None => Box::new(std::fs::File::open(address).unwrap()),
        }
    }

    fn kinds() -> Vec<EndpointKind> {
        if cfg!(unix) {
            vec![EndpointKind::Fifo, EndpointKind::Tcp]
        } else {
            vec![EndpointKind::Tcp]
        }
    }

    #[test]
    fn test_bridge_delivers_whole_source() {
        for kind in kinds() {
            let dir = tempfile::tempdir().unwrap();
            let gate = Arc::new(ReadinessGate::new());
            let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
            let mut bridge = VirtualInputBridge::new("seg0", "00001.m2ts", memory_source(data.clone()));

            let address = bridge.open(&options(kind, dir.path()), &gate).unwrap();
            gate.wait(Duration::from_secs(5)).unwrap();
            assert_eq!(bridge.state(), BridgeState::Listening);

            let mut reader = connect(&address);
            let mut out = Vec::new();
            reader.read_to_end(&mut out).unwrap();
            assert_eq!(out, data);

            assert!(matches!(
                bridge.dispose(Duration::from_secs(5)),
                Some(BridgeOutcome::Completed { bytes: 10_000 })
            ));
            assert_eq!(bridge.bytes_delivered(), 10_000);
            assert_eq!(bridge.state(), BridgeState::Disposed);
        }
    }

    #[test]
    fn test_consumer_disconnect_is_not_an_error() {
        for kind in kinds() {
            let dir = tempfile::tempdir().unwrap();
            let gate = Arc::new(ReadinessGate::new());
            let data = vec![0xABu8; 4 * 1024 * 1024];
            let mut bridge = VirtualInputBridge::new("sub", "subtitle probe", memory_source(data));
            let address = bridge.open(&options(kind, dir.path()), &gate).unwrap();

            let mut reader = connect(&address);
            let mut head = vec![0u8; 4096];
            reader.read_exact(&mut head).unwrap();
            drop(reader);

            let deadline = Instant::now() + Duration::from_secs(10);
            while !bridge.state().is_terminal() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            assert_eq!(bridge.state(), BridgeState::Abandoned);

            let before = bridge.bytes_delivered();
            assert!(before >= 4096);
            assert!(matches!(
                bridge.dispose(Duration::from_secs(5)),
                Some(BridgeOutcome::Abandoned { .. })
            ));
            assert_eq!(bridge.bytes_delivered(), before);
        }
    }

    #[test]
    fn test_source_failure_is_fatal() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("unit 12: bad key"))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(ReadinessGate::new());
        let opener: SourceOpener = Box::new(|| Ok(Box::new(Failing) as ByteSource));
        let mut bridge = VirtualInputBridge::new("seg0", "00002.m2ts", opener);
        let address = bridge.open(&options(EndpointKind::Tcp, dir.path()), &gate).unwrap();

        let mut reader = connect(&address);
        let mut out = Vec::new();
        let _ = reader.read_to_end(&mut out);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !bridge.has_failed() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(bridge.has_failed());
        match bridge.dispose(Duration::from_secs(5)) {
            Some(BridgeOutcome::Failed(CoreError::SourceReadFailed { segment_id, cause })) => {
                assert_eq!(segment_id, "00002.m2ts");
                assert!(cause.contains("bad key"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_decrypt_error_becomes_decryption_failure() {
        struct Rejected;
        impl Read for Rejected {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other(DecryptError::new(12, "bad key")))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let gate = Arc::new(ReadinessGate::new());
        let opener: SourceOpener = Box::new(|| Ok(Box::new(Rejected) as ByteSource));
        let mut bridge = VirtualInputBridge::new("seg0", "00003.m2ts", opener);
        let address = bridge.open(&options(EndpointKind::Tcp, dir.path()), &gate).unwrap();

        let mut reader = connect(&address);
        let mut out = Vec::new();
        let _ = reader.read_to_end(&mut out);

        match bridge.dispose(Duration::from_secs(5)) {
            Some(BridgeOutcome::Failed(CoreError::DecryptionFailure {
                segment_id,
                unit,
                message,
            })) => {
                assert_eq!(segment_id, "00003.m2ts");
                assert_eq!(*unit, 12);
                assert_eq!(message, "bad key");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_dispose_without_consumer_is_bounded() {
        for kind in kinds() {
            let dir = tempfile::tempdir().unwrap();
            let gate = Arc::new(ReadinessGate::new());
            let mut bridges: Vec<_> = (0..3)
                .map(|i| VirtualInputBridge::new(format!("in{i}"), format!("in{i}"), memory_source(vec![1u8; 100])))
                .collect();
            for bridge in &mut bridges {
                bridge.open(&options(kind, dir.path()), &gate).unwrap();
            }
            gate.wait(Duration::from_secs(5)).unwrap();

            let started = Instant::now();
            for bridge in &mut bridges {
                assert!(matches!(
                    bridge.dispose(Duration::from_secs(5)),
                    Some(BridgeOutcome::Abandoned { bytes: 0 })
                ));
                assert_eq!(bridge.state(), BridgeState::Disposed);
            }
            assert!(started.elapsed() < Duration::from_secs(5));
        }
    }

    #[test]
    fn test_dispose_is_idempotent_and_unopened_is_fine() {
        let mut bridge = VirtualInputBridge::new("x", "x", memory_source(Vec::new()));
        assert!(matches!(
            bridge.dispose(Duration::from_millis(100)),
            Some(BridgeOutcome::Abandoned { bytes: 0 })
        ));
        assert!(bridge.take_outcome().is_some());
        assert!(bridge.dispose(Duration::from_millis(100)).is_none());
        assert_eq!(bridge.state(), BridgeState::Disposed);
    }
}
