// discmux-core/src/external/mocks.rs

// --- Mocking Infrastructure (for testing) ---

// This module is only compiled when the "test-mocks" feature is enabled.
#![cfg(feature = "test-mocks")]

use super::*;
use crate::error::{CoreError, CoreResult};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// What the fake transcoder does once spawned.
#[derive(Debug, Clone)]
pub struct MockScript {
    /// Lines written to the diagnostics stream before any input is read.
    pub diagnostics: Vec<String>,
    /// Lines written after all inputs were read.
    pub trailing_diagnostics: Vec<String>,
    pub exit_code: i32,
    /// Stop reading segment data after this many bytes.
    pub read_limit: Option<u64>,
    /// Pause after every chunk read from a segment.
    pub chunk_delay: Duration,
    /// Create every output file of the invocation before exiting.
    pub create_outputs: bool,
    /// Keep running after reading until killed.
    pub hang_until_killed: bool,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            diagnostics: Vec::new(),
            trailing_diagnostics: Vec::new(),
            exit_code: 0,
            read_limit: None,
            chunk_delay: Duration::ZERO,
            create_outputs: true,
            hang_until_killed: false,
        }
    }
}

/// Spawner whose processes read their virtual inputs the way the real
/// transcoder would: the concat manifest first, then each segment it lists.
#[derive(Clone, Default)]
pub struct MockTranscoderSpawner {
    script: MockScript,
    received_calls: Arc<Mutex<Vec<TranscoderInvocation>>>,
    bytes_read: Arc<AtomicU64>,
    fail_spawn: bool,
}

impl MockTranscoderSpawner {
    pub fn new(script: MockScript) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    /// A spawner whose every spawn fails as if the binary were missing.
    pub fn failing() -> Self {
        Self {
            fail_spawn: true,
            ..Default::default()
        }
    }

    pub fn get_received_calls(&self) -> Vec<TranscoderInvocation> {
        self.received_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Segment bytes read by all processes of this spawner so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Acquire)
    }
}

impl TranscoderSpawner for MockTranscoderSpawner {
    type Process = MockTranscoderProcess;

    fn spawn(&self, invocation: &TranscoderInvocation) -> CoreResult<MockTranscoderProcess> {
        self.received_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(invocation.clone());
        if self.fail_spawn {
            log::warn!("MockTranscoderSpawner simulating missing binary");
            return Err(CoreError::DependencyNotFound(
                invocation.program.display().to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel();
        let killed = Arc::new(AtomicBool::new(false));
        let exit = Arc::new(Mutex::new(None));
        let worker = MockWorker {
            script: self.script.clone(),
            invocation: invocation.clone(),
            diagnostics: tx,
            killed: Arc::clone(&killed),
            bytes_read: Arc::clone(&self.bytes_read),
        };
        let finished = Arc::clone(&exit);
        let handle = thread::Builder::new()
            .name("mock-transcoder".to_string())
            .spawn(move || {
                let result = worker.run();
                *finished.lock().unwrap_or_else(PoisonError::into_inner) = Some(result);
            })?;

        Ok(MockTranscoderProcess {
            diagnostics: Some(rx),
            killed,
            exit,
            worker: Some(handle),
        })
    }
}

/// A fake transcoder process backed by a worker thread.
pub struct MockTranscoderProcess {
    diagnostics: Option<Receiver<Vec<u8>>>,
    killed: Arc<AtomicBool>,
    exit: Arc<Mutex<Option<ProcessExit>>>,
    worker: Option<JoinHandle<()>>,
}

impl MockTranscoderProcess {
    fn finished(&self) -> Option<ProcessExit> {
        *self.exit.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl TranscoderProcess for MockTranscoderProcess {
    fn take_diagnostics(&mut self) -> Option<Box<dyn Read + Send>> {
        self.diagnostics
            .take()
            .map(|rx| Box::new(ChannelReader::new(rx)) as Box<dyn Read + Send>)
    }

    fn try_wait(&mut self) -> CoreResult<Option<ProcessExit>> {
        Ok(self.finished())
    }

    fn wait(&mut self) -> CoreResult<ProcessExit> {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Mock transcoder worker panicked");
            }
        }
        Ok(self.finished().unwrap_or(ProcessExit { code: None }))
    }

    fn kill(&mut self) -> CoreResult<()> {
        self.killed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MockWorker {
    script: MockScript,
    invocation: TranscoderInvocation,
    diagnostics: Sender<Vec<u8>>,
    killed: Arc<AtomicBool>,
    bytes_read: Arc<AtomicU64>,
}

impl MockWorker {
    fn run(self) -> ProcessExit {
        for line in &self.script.diagnostics {
            self.emit(line);
        }

        let mut budget = self.script.read_limit;
        let mut declared = Vec::new();
        for input in &self.invocation.inputs {
            if self.is_killed() {
                return ProcessExit { code: None };
            }
            if let Err(e) = self.read_input(input, &mut budget, &mut declared) {
                self.emit(&format!("[error] {input}: {e}"));
            }
        }

        // Concat input streams only carry the ids the manifest declares.
        if let Some(spec) = unmatched_map(&self.invocation.args, &declared) {
            self.emit(&format!("[fatal] Stream map '{spec}' matches no streams."));
            return ProcessExit { code: Some(1) };
        }

        for line in &self.script.trailing_diagnostics {
            self.emit(line);
        }
        if self.script.create_outputs {
            for output in &self.invocation.outputs {
                if let Err(e) = std::fs::write(output, b"mock output") {
                    log::error!("Mock transcoder failed to create {}: {e}", output.display());
                }
            }
        }

        while self.script.hang_until_killed && !self.is_killed() {
            thread::sleep(Duration::from_millis(5));
        }
        if self.is_killed() {
            return ProcessExit { code: None };
        }
        ProcessExit {
            code: Some(self.script.exit_code),
        }
    }

    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    fn emit(&self, line: &str) {
        // The reader side may already be gone; that only ends the stream early.
        let _ = self.diagnostics.send(format!("{line}\n").into_bytes());
    }

    /// Reads one `-i` input. A concat manifest is followed into its segments.
    fn read_input(
        &self,
        address: &str,
        budget: &mut Option<u64>,
        declared: &mut Vec<u32>,
    ) -> io::Result<()> {
        let mut contents = Vec::new();
        open_address(address)?.read_to_end(&mut contents)?;
        let text = String::from_utf8_lossy(&contents);
        if !text.starts_with("ffconcat version 1.0") {
            return Ok(());
        }
        declared.extend(text.lines().filter_map(declared_stream_id));
        for entry in text.lines().filter_map(manifest_entry) {
            if self.is_killed() || *budget == Some(0) {
                break;
            }
            self.read_segment(&entry, budget)?;
        }
        Ok(())
    }

    fn read_segment(&self, address: &str, budget: &mut Option<u64>) -> io::Result<()> {
        let mut reader = BufReader::new(open_address(address)?);
        loop {
            if self.is_killed() || *budget == Some(0) {
                return Ok(());
            }
            let chunk = reader.fill_buf()?;
            if chunk.is_empty() {
                return Ok(());
            }
            let take = match budget {
                Some(left) => (*left).min(chunk.len() as u64) as usize,
                None => chunk.len(),
            };
            reader.consume(take);
            self.bytes_read.fetch_add(take as u64, Ordering::AcqRel);
            if let Some(left) = budget.as_mut() {
                *left -= take as u64;
            }
            if !self.script.chunk_delay.is_zero() {
                thread::sleep(self.script.chunk_delay);
            }
        }
    }
}

fn open_address(address: &str) -> io::Result<Box<dyn Read>> {
    match address.strip_prefix("tcp://") {
        Some(addr) => Ok(Box::new(TcpStream::connect(addr)?)),
        None => Ok(Box::new(File::open(address)?)),
    }
}

fn declared_stream_id(line: &str) -> Option<u32> {
    let hex = line.strip_prefix("exact_stream_id 0x")?;
    u32::from_str_radix(hex, 16).ok()
}

/// The first `-map 0:i:<id>` whose id the concat input does not declare.
fn unmatched_map<'a>(args: &'a [String], declared: &[u32]) -> Option<&'a str> {
    args.windows(2)
        .filter(|pair| pair[0] == "-map")
        .map(|pair| pair[1].as_str())
        .find(|spec| {
            spec.strip_prefix("0:i:")
                .and_then(|id| id.parse::<u32>().ok())
                .is_some_and(|id| !declared.contains(&id))
        })
}

fn manifest_entry(line: &str) -> Option<String> {
    let quoted = line.strip_prefix("file '")?.strip_suffix('\'')?;
    Some(quoted.replace(r"'\''", "'"))
}

/// `Read` over chunks arriving on a channel; EOF once the sender is dropped.
struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl ChannelReader {
    fn new(rx: Receiver<Vec<u8>>) -> Self {
        Self {
            rx,
            pending: Vec::new(),
            offset: 0,
        }
    }
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.offset >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.offset);
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}
