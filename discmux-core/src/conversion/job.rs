// ============================================================================
// discmux-core/src/conversion/job.rs
// ============================================================================
//
// CONVERSION JOB: Orchestrating Bridges, Transcoder and Finalization
//
// A job moves through
//
//   Building -> Starting -> Running -> Draining -> Finalizing
//            -> Completed | Failed | Cancelled
//
// Building validates the request and derives working file names. Starting
// opens one bridge per segment (each serving its DecryptedUnitStream lazily),
// one bridge for the concat manifest and optionally one for the chapter
// document, then waits until every bridge is listening. Running spawns the
// transcoder and immediately starts the diagnostics drain thread; the job
// thread polls for exit, cancellation and failed bridges. Draining joins the
// drain thread. Finalizing renames working files, and only happens after a
// zero exit code.
//
// However the job ends, every bridge is disposed before `run` returns.

use super::command::{InputAddresses, build_invocation, build_probe_invocation};
use super::finalize::{OutputFile, finalize_outputs};
use super::progress::{ProgressAggregator, ProgressSnapshot};
use super::request::ConversionRequest;
use crate::bridge::{
    BridgeOptions, BridgeOutcome, DeliveredCounter, ReadinessGate, VirtualInputBridge,
};
use crate::catalog::SegmentSource;
use crate::config::JobConfig;
use crate::diagnostics::{
    DiagnosticLine, InputMetadata, LineObserver, MetadataExtractor, ProcessTextStreamReader,
    is_input_marker, parse_stats_line,
};
use crate::error::{CoreError, CoreResult};
use crate::external::{ProcessExit, TranscoderProcess, TranscoderSpawner};
use crate::stream::memory_source;
use crate::stream::synthetic::{chapter_metadata, concat_manifest};
use crate::utils::format_bytes;
use log::{debug, info, warn};
use serde::Serialize;
use std::io::{BufReader, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use tempfile::TempDir;

// ============================================================================
// JOB STATE
// ============================================================================

/// Lifecycle of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum JobState {
    Building = 0,
    Starting = 1,
    Running = 2,
    Draining = 3,
    Finalizing = 4,
    Completed = 5,
    Failed = 6,
    Cancelled = 7,
}

impl JobState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => JobState::Building,
            1 => JobState::Starting,
            2 => JobState::Running,
            3 => JobState::Draining,
            4 => JobState::Finalizing,
            5 => JobState::Completed,
            6 => JobState::Failed,
            _ => JobState::Cancelled,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::Cancelled)
    }
}

/// Observes and cancels a job from another thread.
#[derive(Debug, Clone)]
pub struct JobHandle {
    state: Arc<AtomicU8>,
    cancel: Arc<AtomicBool>,
}

impl JobHandle {
    fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(JobState::Building as u8)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Requests cancellation. The job stops the transcoder and releases all
    /// virtual inputs, then `run` returns [`CoreError::Cancelled`].
    pub fn cancel(&self) {
        if !self.cancel.swap(true, Ordering::AcqRel) {
            info!("Cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn set_state(&self, state: JobState) {
        debug!("Job state: {:?}", state);
        self.state.store(state as u8, Ordering::Release);
    }
}

/// What a completed job produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    /// Final paths of the produced files.
    pub outputs: Vec<PathBuf>,
    /// Declared outputs the transcoder did not produce.
    pub missing: Vec<PathBuf>,
    /// Metadata the transcoder reported for its inputs.
    pub inputs: Vec<InputMetadata>,
    /// Non-progress diagnostic lines, verbatim.
    pub diagnostics: Vec<String>,
    pub bytes_delivered: u64,
    pub total_bytes: u64,
}

// ============================================================================
// VIRTUAL INPUT SET
// ============================================================================

/// All bridges of one job plus the directory holding their endpoints.
struct VirtualInputs {
    segments: Vec<VirtualInputBridge>,
    synthetic: Vec<VirtualInputBridge>,
    addresses: InputAddresses,
    // Declared last so endpoints are gone before the directory is removed.
    _dir: TempDir,
}

impl VirtualInputs {
    /// Opens every bridge and waits until all of them are listening.
    fn open(
        config: &JobConfig,
        request: &ConversionRequest,
        source: &Arc<dyn SegmentSource>,
        handle: &JobHandle,
        with_chapters: bool,
    ) -> CoreResult<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("discmux-");
        let dir = match &config.pipe_dir {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        let options = BridgeOptions {
            endpoint_kind: config.endpoint_kind,
            endpoint_dir: dir.path().to_path_buf(),
            copy_buffer_size: config.copy_buffer_size,
            open_timeout: config.readiness_timeout,
        };
        let mut inputs = Self {
            segments: Vec::with_capacity(request.segments.len()),
            synthetic: Vec::new(),
            addresses: InputAddresses {
                manifest: String::new(),
                chapters: None,
            },
            _dir: dir,
        };

        match inputs.open_all(&options, request, source, handle, with_chapters, config) {
            Ok(()) => Ok(inputs),
            Err(e) => {
                inputs.dispose_all(config.dispose_timeout);
                Err(e)
            }
        }
    }

    fn open_all(
        &mut self,
        options: &BridgeOptions,
        request: &ConversionRequest,
        source: &Arc<dyn SegmentSource>,
        handle: &JobHandle,
        with_chapters: bool,
        config: &JobConfig,
    ) -> CoreResult<()> {
        let gate = Arc::new(ReadinessGate::new());

        let mut segment_addresses = Vec::with_capacity(request.segments.len());
        for (i, segment) in request.segments.iter().enumerate() {
            if handle.is_cancelled() {
                return Err(CoreError::Cancelled);
            }
            let source = Arc::clone(source);
            let opened = segment.clone();
            let bridge = VirtualInputBridge::new(
                format!("segment-{i:03}"),
                segment.id.clone(),
                Box::new(move || source.open_segment(&opened)),
            );
            segment_addresses.push(open_into(&mut self.segments, bridge, options, &gate)?);
        }

        let manifest = concat_manifest(&segment_addresses, &request.streams);
        let bridge = VirtualInputBridge::new("manifest", "concat manifest", memory_source(manifest));
        self.addresses.manifest = open_into(&mut self.synthetic, bridge, options, &gate)?;

        if with_chapters && !request.chapters.is_empty() {
            let document = chapter_metadata(&request.chapters);
            let bridge = VirtualInputBridge::new("chapters", "chapter markers", memory_source(document));
            self.addresses.chapters = Some(open_into(&mut self.synthetic, bridge, options, &gate)?);
        }

        gate.wait(config.readiness_timeout)?;
        if handle.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        debug!("All {} virtual inputs are listening", gate.arrived());
        Ok(())
    }

    fn all(&self) -> impl Iterator<Item = &VirtualInputBridge> {
        self.segments.iter().chain(self.synthetic.iter())
    }

    fn any_failed(&self) -> bool {
        self.all().any(VirtualInputBridge::has_failed)
    }

    /// Byte counters of the segment bridges; synthetic inputs do not count
    /// towards progress.
    fn counters(&self) -> Vec<DeliveredCounter> {
        self.segments.iter().map(VirtualInputBridge::delivered_counter).collect()
    }

    /// Disposes every bridge and returns the first fatal failure among them.
    fn dispose_all(&mut self, timeout: std::time::Duration) -> Option<CoreError> {
        let mut failure = None;
        for bridge in self.segments.iter_mut().chain(self.synthetic.iter_mut()) {
            bridge.dispose(timeout);
            match bridge.take_outcome() {
                Some(BridgeOutcome::Failed(e)) => {
                    warn!("Virtual input {} failed: {e}", bridge.name());
                    failure.get_or_insert(e);
                }
                Some(BridgeOutcome::TimedOut) => {
                    warn!("Virtual input {} was detached after {:?}", bridge.name(), timeout);
                }
                Some(BridgeOutcome::Completed { bytes }) | Some(BridgeOutcome::Abandoned { bytes }) => {
                    debug!("Virtual input {} released after {}", bridge.name(), format_bytes(bytes));
                }
                None => {}
            }
        }
        failure
    }
}

fn open_into(
    list: &mut Vec<VirtualInputBridge>,
    mut bridge: VirtualInputBridge,
    options: &BridgeOptions,
    gate: &Arc<ReadinessGate>,
) -> CoreResult<String> {
    let result = bridge.open(options, gate);
    // Kept even when opening failed so disposal covers it.
    list.push(bridge);
    result
}

// ============================================================================
// DIAGNOSTICS DRAIN
// ============================================================================

#[derive(Debug, Default)]
struct DrainOutput {
    inputs: Vec<InputMetadata>,
    metadata_errors: Vec<CoreError>,
    diagnostics: Vec<String>,
}

/// Relays a transcoder line to the log, keeping routine output at debug.
fn relay(line: &DiagnosticLine) {
    match line.level {
        Some(level) if level <= log::Level::Warn => {
            log::log!(target: "transcoder", level, "{}", line.as_str());
        }
        _ => log::debug!(target: "transcoder", "{}", line.as_str()),
    }
}

fn spawn_drain(
    stream: Box<dyn Read + Send>,
    aggregator: Option<Arc<ProgressAggregator>>,
) -> CoreResult<JoinHandle<DrainOutput>> {
    thread::Builder::new()
        .name("transcoder-diagnostics".to_string())
        .spawn(move || drain(stream, aggregator))
        .map_err(CoreError::Io)
}

fn drain(stream: Box<dyn Read + Send>, aggregator: Option<Arc<ProgressAggregator>>) -> DrainOutput {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    let stats_target = aggregator.clone();
    let observer: LineObserver = Box::new(move |line: &DiagnosticLine| {
        if let Some(stats) = parse_stats_line(line.text()) {
            if let Some(aggregator) = &stats_target {
                aggregator.observe_stats(&stats);
            }
            return;
        }
        relay(line);
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.as_str().to_string());
    });

    let mut reader = ProcessTextStreamReader::new(BufReader::new(stream)).with_observer(observer);
    let mut extractor = MetadataExtractor::new();
    let mut output = DrainOutput::default();
    loop {
        let header = match reader.read_until_block(is_input_marker, |_| {}) {
            Ok(Some(header)) => header,
            Ok(None) => break,
            Err(e) => {
                warn!("Reading transcoder diagnostics failed: {e}");
                break;
            }
        };
        let block = match reader.read_block(&header) {
            Ok(block) => block,
            Err(e) => {
                warn!("Reading transcoder diagnostics failed: {e}");
                break;
            }
        };
        match extractor.extract(&block) {
            Ok(Some(input)) => {
                if let (Some(aggregator), Some(duration), 0) =
                    (&aggregator, input.duration, input.index)
                {
                    aggregator.offer_duration(duration);
                }
                output.inputs.push(input);
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Ignoring metadata of '{}': {e}", block.name);
                output.metadata_errors.push(e);
            }
        }
    }
    drop(reader);

    output.diagnostics =
        std::mem::take(&mut *captured.lock().unwrap_or_else(PoisonError::into_inner));
    output
}

fn join_drain(handle: Option<JoinHandle<DrainOutput>>) -> DrainOutput {
    match handle {
        Some(handle) => handle.join().unwrap_or_else(|_| {
            warn!("Transcoder diagnostics reader panicked");
            DrainOutput::default()
        }),
        None => DrainOutput::default(),
    }
}

/// Starts draining the process's diagnostics with `start`. If the drain
/// cannot be started the process is stopped and reaped before returning.
fn attach_drain<P, F>(process: &mut P, start: F) -> CoreResult<Option<JoinHandle<DrainOutput>>>
where
    P: TranscoderProcess,
    F: FnOnce(Box<dyn Read + Send>) -> CoreResult<JoinHandle<DrainOutput>>,
{
    let Some(stream) = process.take_diagnostics() else {
        warn!("Transcoder diagnostics are not available; metadata will be empty");
        return Ok(None);
    };
    match start(stream) {
        Ok(handle) => Ok(Some(handle)),
        Err(e) => {
            terminate(process);
            Err(e)
        }
    }
}

/// Kills the process and reaps it.
fn terminate<P: TranscoderProcess>(process: &mut P) -> ProcessExit {
    if let Err(e) = process.kill() {
        warn!("Failed to stop transcoder: {e}");
    }
    match process.wait() {
        Ok(exit) => exit,
        Err(e) => {
            warn!("Failed to reap transcoder: {e}");
            ProcessExit { code: None }
        }
    }
}

// ============================================================================
// CONVERSION JOB
// ============================================================================

struct TranscodeRun {
    exit: ProcessExit,
    drained: DrainOutput,
}

/// One export: segments in, finalized output files out.
pub struct ConversionJob {
    config: JobConfig,
    request: ConversionRequest,
    source: Arc<dyn SegmentSource>,
    handle: JobHandle,
    progress: Option<Sender<ProgressSnapshot>>,
}

impl ConversionJob {
    pub fn new(config: JobConfig, request: ConversionRequest, source: Arc<dyn SegmentSource>) -> Self {
        Self {
            config,
            request,
            source,
            handle: JobHandle::new(),
            progress: None,
        }
    }

    /// Sends progress snapshots to `sender` while the job runs. The sender is
    /// dropped when `run` returns, ending the receiver's iteration.
    pub fn with_progress(mut self, sender: Sender<ProgressSnapshot>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn handle(&self) -> JobHandle {
        self.handle.clone()
    }

    pub fn total_input_bytes(&self) -> u64 {
        self.request.total_input_bytes()
    }

    /// Output files with their working names.
    pub fn output_files(&self) -> Vec<OutputFile> {
        self.request
            .outputs
            .iter()
            .map(|o| OutputFile::new(&o.path, &self.config.working_suffix))
            .collect()
    }

    /// Runs the job to completion on the calling thread.
    pub fn run<S: TranscoderSpawner>(self, spawner: &S) -> CoreResult<ConversionReport> {
        let result = self.execute(spawner);
        let state = match &result {
            Ok(_) => JobState::Completed,
            Err(CoreError::Cancelled) => JobState::Cancelled,
            Err(_) => JobState::Failed,
        };
        match &result {
            Ok(report) => info!(
                "Conversion completed: {} output(s), {} missing",
                report.outputs.len(),
                report.missing.len()
            ),
            Err(CoreError::Cancelled) => info!("Conversion cancelled"),
            Err(e) => log::error!("Conversion failed: {e}"),
        }
        self.handle.set_state(state);
        result
    }

    fn execute<S: TranscoderSpawner>(&self, spawner: &S) -> CoreResult<ConversionReport> {
        self.handle.set_state(JobState::Building);
        self.config.validate()?;
        self.request.validate()?;
        let outputs = self.output_files();
        if !self.config.overwrite {
            if let Some(existing) = outputs.iter().find(|o| o.final_path.exists()) {
                return Err(CoreError::Config(format!(
                    "output '{}' already exists",
                    existing.final_path.display()
                )));
            }
        }

        self.handle.set_state(JobState::Starting);
        let mut inputs = VirtualInputs::open(
            &self.config,
            &self.request,
            &self.source,
            &self.handle,
            self.request.needs_chapters(),
        )?;
        let aggregator = Arc::new(ProgressAggregator::new(
            inputs.counters(),
            self.request.total_input_bytes(),
            self.request.duration(),
            self.progress.clone(),
        ));

        let outcome = self.transcode(spawner, &inputs, &outputs, &aggregator);

        let bridge_failure = inputs.dispose_all(self.config.dispose_timeout);
        let snapshot = aggregator.emit();
        drop(inputs);

        let run = outcome?;
        if let Some(failure) = bridge_failure {
            return Err(failure);
        }
        if !run.exit.success() {
            return Err(CoreError::TranscodeFailed {
                exit_code: run.exit.code,
                diagnostics: run.drained.diagnostics.join("\n"),
            });
        }

        self.handle.set_state(JobState::Finalizing);
        let finalized = finalize_outputs(&outputs);
        Ok(ConversionReport {
            missing: finalized.missing(),
            outputs: finalized.finalized,
            inputs: run.drained.inputs,
            diagnostics: run.drained.diagnostics,
            bytes_delivered: snapshot.bytes_delivered,
            total_bytes: snapshot.total_bytes,
        })
    }

    fn transcode<S: TranscoderSpawner>(
        &self,
        spawner: &S,
        inputs: &VirtualInputs,
        outputs: &[OutputFile],
        aggregator: &Arc<ProgressAggregator>,
    ) -> CoreResult<TranscodeRun> {
        if self.handle.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        let working: Vec<PathBuf> = outputs.iter().map(|o| o.working.clone()).collect();
        let invocation = build_invocation(
            &self.config.transcoder_path,
            &self.request,
            &inputs.addresses,
            &working,
        );
        info!(
            "Starting transcoder: {} segment(s), {}, {} output(s)",
            self.request.segments.len(),
            format_bytes(self.request.total_input_bytes()),
            outputs.len()
        );
        debug!("Transcoder command: {}", invocation.command_line());

        let mut process = spawner.spawn(&invocation)?;
        let drain = attach_drain(&mut process, |stream| {
            spawn_drain(stream, Some(Arc::clone(aggregator)))
        })?;
        self.handle.set_state(JobState::Running);

        let mut cancelled = false;
        let exit = loop {
            match process.try_wait() {
                Ok(Some(exit)) => break exit,
                Ok(None) => {}
                Err(e) => {
                    warn!("Failed to poll transcoder: {e}");
                    break terminate(&mut process);
                }
            }
            if self.handle.is_cancelled() {
                info!("Stopping transcoder after cancellation");
                cancelled = true;
                break terminate(&mut process);
            }
            if inputs.any_failed() {
                warn!("A virtual input failed; stopping transcoder");
                break terminate(&mut process);
            }
            aggregator.emit();
            thread::sleep(self.config.poll_interval);
        };
        debug!("Transcoder exited with {:?}", exit.code);

        self.handle.set_state(JobState::Draining);
        let drained = join_drain(drain);
        if cancelled {
            return Err(CoreError::Cancelled);
        }
        Ok(TranscodeRun { exit, drained })
    }
}

// ============================================================================
// METADATA PROBE
// ============================================================================

/// Runs the transcoder over the request's inputs without producing outputs
/// and returns the metadata it reports for each input.
///
/// Unlike a conversion job, an unrecognised stream type is returned as an
/// error here.
pub fn probe_inputs<S: TranscoderSpawner>(
    config: &JobConfig,
    request: &ConversionRequest,
    source: Arc<dyn SegmentSource>,
    spawner: &S,
) -> CoreResult<Vec<InputMetadata>> {
    config.validate()?;
    if request.segments.is_empty() {
        return Err(CoreError::Config("no segments to probe".to_string()));
    }

    let handle = JobHandle::new();
    let mut inputs = VirtualInputs::open(config, request, &source, &handle, true)?;
    let invocation = build_probe_invocation(&config.transcoder_path, &inputs.addresses);
    debug!("Probe command: {}", invocation.command_line());

    let outcome = spawner.spawn(&invocation).and_then(|mut process| {
        let drain = attach_drain(&mut process, |stream| spawn_drain(stream, None))?;
        // The probe command has no outputs, so a non-zero exit is expected.
        let exit = process.wait()?;
        debug!("Probe exited with {:?}", exit.code);
        Ok(join_drain(drain))
    });
    let bridge_failure = inputs.dispose_all(config.dispose_timeout);
    drop(inputs);

    let drained = outcome?;
    if let Some(failure) = bridge_failure {
        return Err(failure);
    }
    if let Some(error) = drained.metadata_errors.into_iter().next() {
        return Err(error);
    }
    if drained.inputs.is_empty() {
        return Err(CoreError::MetadataParse(
            "transcoder reported no inputs".to_string(),
        ));
    }
    Ok(drained.inputs)
}
