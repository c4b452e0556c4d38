// discmux-core/tests/conversion_tests.rs
//
// End-to-end tests of ConversionJob and probe_inputs against the scripted
// fake transcoder. The fake opens the virtual inputs exactly like the real
// transcoder would (manifest first, then every segment it lists), so these
// tests exercise real pipes and sockets.

use discmux_core::catalog::{Chapter, FileSegmentSource, Segment, StreamDescriptor, StreamKind};
use discmux_core::config::{EndpointKind, JobConfig, JobConfigBuilder};
use discmux_core::conversion::{CodecChoice, OutputSpec, OutputStream};
use discmux_core::external::mocks::{MockScript, MockTranscoderSpawner};
use discmux_core::stream::{
    DecryptError, DecryptorProvider, PassthroughDecryptor, UnitDecryptor, unit_sizes,
};
use discmux_core::{ConversionJob, ConversionRequest, CoreError, CoreResult, JobState, probe_inputs};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::{TempDir, tempdir};

// --- Test Helper Functions ---

struct Fixture {
    stream_dir: TempDir,
    pipe_dir: TempDir,
    out_dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            stream_dir: tempdir().unwrap(),
            pipe_dir: tempdir().unwrap(),
            out_dir: tempdir().unwrap(),
        }
    }

    /// Writes a segment file and returns its descriptor.
    fn segment(&self, id: &str, len: usize) -> Segment {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        std::fs::write(self.stream_dir.path().join(id), data).unwrap();
        self.source().segment(id).unwrap()
    }

    fn source(&self) -> FileSegmentSource {
        FileSegmentSource::new(
            self.stream_dir.path(),
            unit_sizes::DVD_SECTOR,
            Arc::new(PassthroughDecryptor),
        )
    }

    fn config(&self, kind: EndpointKind) -> JobConfig {
        JobConfigBuilder::new()
            .transcoder_path("ffmpeg")
            .endpoint_kind(kind)
            .pipe_dir(self.pipe_dir.path())
            .poll_interval(Duration::from_millis(10))
            .dispose_timeout(Duration::from_secs(2))
            .build()
            .unwrap()
    }

    fn output(&self, name: &str) -> PathBuf {
        self.out_dir.path().join(name)
    }

    fn pipe_dir_is_empty(&self) -> bool {
        std::fs::read_dir(self.pipe_dir.path()).unwrap().count() == 0
    }
}

fn video_output(path: PathBuf) -> OutputSpec {
    OutputSpec {
        path,
        format: "matroska".to_string(),
        streams: vec![
            OutputStream {
                stream_id: 0x1011,
                codec: CodecChoice::Copy,
            },
            OutputStream {
                stream_id: 0x1100,
                codec: CodecChoice::Copy,
            },
        ],
        include_chapters: true,
    }
}

fn request(segments: Vec<Segment>, outputs: Vec<OutputSpec>) -> ConversionRequest {
    ConversionRequest {
        segments,
        streams: vec![
            StreamDescriptor {
                id: 0x1011,
                kind: StreamKind::Video,
                language: None,
                is_default: true,
            },
            StreamDescriptor {
                id: 0x1100,
                kind: StreamKind::Audio,
                language: Some("eng".to_string()),
                is_default: true,
            },
        ],
        chapters: vec![
            Chapter {
                start_seconds: 0.0,
                end_seconds: 45.0,
                name: "Opening".to_string(),
            },
            Chapter {
                start_seconds: 45.0,
                end_seconds: 90.0,
                name: String::new(),
            },
        ],
        outputs,
        duration_seconds: None,
    }
}

fn input_block() -> Vec<String> {
    [
        "[info] Input #0, concat, from 'manifest':",
        "[info]   Duration: 00:01:30.00, start: 0.000000, bitrate: N/A",
        "[info]     Stream #0:0[0x1011]: Video: h264 (High), yuv420p, 1920x1080 (default)",
        "[info]     Stream #0:1[0x1100](eng): Audio: ac3, 48000 Hz, 5.1(side)",
        "[info] Input #1, ffmetadata, from 'chapters':",
        "[info]   Duration: N/A, bitrate: N/A",
        "[info]   Chapters:",
        "[info]     Chapter #1:0: start 0.000000, end 45.000000",
        "[info]       Metadata:",
        "[info]         title           : Opening",
        "[info]     Chapter #1:1: start 45.000000, end 90.000000",
        "[info] Stream mapping:",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Fails the unit at `bad_unit` of every segment.
struct FailingProvider {
    bad_unit: u64,
}

struct FailingDecryptor {
    bad_unit: u64,
}

impl UnitDecryptor for FailingDecryptor {
    fn decrypt_unit(&mut self, unit_index: u64, _buffer: &mut [u8]) -> Result<(), DecryptError> {
        if unit_index == self.bad_unit {
            return Err(DecryptError::new(unit_index, "title key rejected"));
        }
        Ok(())
    }
}

impl DecryptorProvider for FailingProvider {
    fn decryptor_for(&self, _segment: &Segment) -> CoreResult<Box<dyn UnitDecryptor>> {
        Ok(Box::new(FailingDecryptor {
            bad_unit: self.bad_unit,
        }))
    }
}

fn run_successful_job(kind: EndpointKind) {
    let fx = Fixture::new();
    let segments = vec![fx.segment("00001.m2ts", 100_000), fx.segment("00002.m2ts", 300_000)];
    let final_path = fx.output("movie.mkv");
    let spawner = MockTranscoderSpawner::new(MockScript {
        diagnostics: input_block(),
        trailing_diagnostics: vec![
            "frame= 2160 fps=240 q=-1.0 Lsize=    4096KiB time=00:01:30.00 bitrate= 372.8kbits/s speed=  10x"
                .to_string(),
        ],
        ..MockScript::default()
    });

    let (tx, rx) = mpsc::channel();
    let job = ConversionJob::new(
        fx.config(kind),
        request(segments, vec![video_output(final_path.clone())]),
        Arc::new(fx.source()),
    )
    .with_progress(tx);
    let handle = job.handle();
    let report = job.run(&spawner).unwrap();

    // Outputs
    assert_eq!(report.outputs, vec![final_path.clone()]);
    assert!(report.missing.is_empty());
    assert!(final_path.exists());
    assert!(!fx.output("movie.mkv.part").exists());
    assert_eq!(handle.state(), JobState::Completed);

    // Bytes
    assert_eq!(report.total_bytes, 400_000);
    assert_eq!(report.bytes_delivered, 400_000);
    assert_eq!(spawner.bytes_read(), 400_000);

    // Metadata captured by the drain
    assert_eq!(report.inputs.len(), 2);
    assert_eq!(report.inputs[0].duration, Some(Duration::from_secs(90)));
    assert_eq!(report.inputs[0].streams.len(), 2);
    assert_eq!(report.inputs[1].chapters.len(), 2);
    assert!(report.diagnostics.iter().all(|l| !l.starts_with("frame=")));

    // Progress
    let snapshots: Vec<_> = rx.try_iter().collect();
    assert!(!snapshots.is_empty());
    let mut last = 0.0;
    for snapshot in &snapshots {
        let pct = snapshot.percentage.unwrap();
        assert!(pct >= last, "progress went backwards: {pct} < {last}");
        last = pct;
    }
    assert_eq!(last, 1.0);
    assert_eq!(snapshots.last().unwrap().duration, Duration::from_secs(90));

    // The command line the transcoder received
    let calls = spawner.get_received_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].inputs.len(), 2);
    assert_eq!(calls[0].outputs, vec![fx.output("movie.mkv.part")]);
    assert!(calls[0].args.windows(2).any(|w| w[0] == "-map" && w[1] == "0:i:4113"));
    assert!(calls[0].args.windows(2).any(|w| w[0] == "-map_chapters" && w[1] == "1"));

    assert!(fx.pipe_dir_is_empty());
}

// --- Tests ---

#[test]
fn test_job_over_tcp_finalizes_outputs() {
    run_successful_job(EndpointKind::Tcp);
}

#[cfg(unix)]
#[test]
fn test_job_over_fifo_finalizes_outputs() {
    run_successful_job(EndpointKind::Fifo);
}

#[test]
fn test_nonzero_exit_keeps_working_files() {
    let fx = Fixture::new();
    let segments = vec![fx.segment("00001.m2ts", 50_000)];
    let final_path = fx.output("movie.mkv");
    let spawner = MockTranscoderSpawner::new(MockScript {
        diagnostics: vec![
            "[matroska @ 0x55d0c0a3c240] [error] Invalid data found when processing input".to_string(),
        ],
        exit_code: 1,
        create_outputs: true,
        ..MockScript::default()
    });

    let job = ConversionJob::new(
        fx.config(EndpointKind::Tcp),
        request(segments, vec![video_output(final_path.clone())]),
        Arc::new(fx.source()),
    );
    let handle = job.handle();
    let err = job.run(&spawner).unwrap_err();

    match err {
        CoreError::TranscodeFailed {
            exit_code,
            diagnostics,
        } => {
            assert_eq!(exit_code, Some(1));
            assert!(diagnostics.contains("Invalid data found"));
        }
        other => panic!("expected TranscodeFailed, got {other:?}"),
    }
    assert_eq!(handle.state(), JobState::Failed);
    assert!(!final_path.exists());
    let working = fx.output("movie.mkv.part");
    assert_eq!(std::fs::read(&working).unwrap(), b"mock output");
    assert!(fx.pipe_dir_is_empty());
}

#[test]
fn test_missing_outputs_are_reported_not_fatal() {
    let fx = Fixture::new();
    let segments = vec![fx.segment("00001.m2ts", 10_000)];
    let first = fx.output("first.mkv");
    let second = fx.output("second.mkv");
    let spawner = MockTranscoderSpawner::new(MockScript {
        create_outputs: false,
        ..MockScript::default()
    });
    // Only the first output gets produced, by hand.
    std::fs::write(fx.output("first.mkv.part"), b"data").unwrap();

    let job = ConversionJob::new(
        fx.config(EndpointKind::Tcp),
        request(
            segments,
            vec![video_output(first.clone()), video_output(second.clone())],
        ),
        Arc::new(fx.source()),
    );
    let report = job.run(&spawner).unwrap();

    assert_eq!(report.outputs, vec![first.clone()]);
    assert_eq!(report.missing, vec![second.clone()]);
    assert!(first.exists());
    assert!(!second.exists());
}

#[test]
fn test_missing_segment_fails_job() {
    let fx = Fixture::new();
    let present = fx.segment("00001.m2ts", 20_000);
    let absent = Segment {
        id: "00002.m2ts".to_string(),
        raw_length: 20_000,
    };
    let final_path = fx.output("movie.mkv");
    let spawner = MockTranscoderSpawner::new(MockScript::default());

    let job = ConversionJob::new(
        fx.config(EndpointKind::Tcp),
        request(vec![present, absent], vec![video_output(final_path.clone())]),
        Arc::new(fx.source()),
    );
    let err = job.run(&spawner).unwrap_err();

    assert!(
        matches!(&err, CoreError::SourceReadFailed { segment_id, .. } if segment_id == "00002.m2ts"),
        "unexpected error: {err:?}"
    );
    assert!(!final_path.exists());
    assert!(fx.pipe_dir_is_empty());
}

#[test]
fn test_decryption_failure_mid_segment_fails_job() {
    let fx = Fixture::new();
    let segment = fx.segment("00001.m2ts", 40 * unit_sizes::DVD_SECTOR);
    let source = FileSegmentSource::new(
        fx.stream_dir.path(),
        unit_sizes::DVD_SECTOR,
        Arc::new(FailingProvider { bad_unit: 20 }),
    );
    let final_path = fx.output("movie.mkv");
    let spawner = MockTranscoderSpawner::new(MockScript::default());

    let job = ConversionJob::new(
        fx.config(EndpointKind::Tcp),
        request(vec![segment], vec![video_output(final_path.clone())]),
        Arc::new(source),
    );
    let err = job.run(&spawner).unwrap_err();

    match err {
        CoreError::DecryptionFailure {
            segment_id,
            unit,
            message,
        } => {
            assert_eq!(segment_id, "00001.m2ts");
            assert_eq!(unit, 20);
            assert_eq!(message, "title key rejected");
        }
        other => panic!("expected DecryptionFailure, got {other:?}"),
    }
    assert!(!final_path.exists());
}

fn cancel_mid_transfer(kind: EndpointKind) {
    let fx = Fixture::new();
    let segments = vec![
        fx.segment("00001.m2ts", 2_000_000),
        fx.segment("00002.m2ts", 2_000_000),
        fx.segment("00003.m2ts", 2_000_000),
    ];
    let final_path = fx.output("movie.mkv");
    let spawner = MockTranscoderSpawner::new(MockScript {
        chunk_delay: Duration::from_millis(5),
        ..MockScript::default()
    });
    let observer = spawner.clone();

    let job = ConversionJob::new(
        fx.config(kind),
        request(segments, vec![video_output(final_path.clone())]),
        Arc::new(fx.source()),
    );
    let handle = job.handle();
    let worker = thread::spawn(move || job.run(&spawner));

    let deadline = Instant::now() + Duration::from_secs(10);
    while observer.bytes_read() == 0 {
        assert!(Instant::now() < deadline, "transcoder never started reading");
        thread::sleep(Duration::from_millis(5));
    }

    let cancelled_at = Instant::now();
    handle.cancel();
    let result = worker.join().unwrap();

    assert!(cancelled_at.elapsed() < Duration::from_secs(8));
    assert!(matches!(result, Err(CoreError::Cancelled)));
    assert_eq!(handle.state(), JobState::Cancelled);
    assert!(observer.bytes_read() < 6_000_000);
    assert!(!final_path.exists());
    assert!(fx.pipe_dir_is_empty());
}

#[test]
fn test_cancel_mid_transfer_over_tcp() {
    cancel_mid_transfer(EndpointKind::Tcp);
}

#[cfg(unix)]
#[test]
fn test_cancel_mid_transfer_removes_fifos() {
    cancel_mid_transfer(EndpointKind::Fifo);
}

#[test]
fn test_spawn_failure_releases_inputs() {
    let fx = Fixture::new();
    let segments = vec![fx.segment("00001.m2ts", 10_000)];
    let spawner = MockTranscoderSpawner::failing();

    let job = ConversionJob::new(
        fx.config(EndpointKind::Tcp),
        request(segments, vec![video_output(fx.output("movie.mkv"))]),
        Arc::new(fx.source()),
    );
    let err = job.run(&spawner).unwrap_err();

    assert!(matches!(err, CoreError::DependencyNotFound(_)));
    assert!(fx.pipe_dir_is_empty());
}

#[test]
fn test_probe_inputs_returns_metadata() {
    let fx = Fixture::new();
    let segments = vec![fx.segment("00001.m2ts", 30_000)];
    let spawner = MockTranscoderSpawner::new(MockScript {
        diagnostics: input_block(),
        trailing_diagnostics: vec!["At least one output file must be specified".to_string()],
        exit_code: 1,
        ..MockScript::default()
    });

    let inputs = probe_inputs(
        &fx.config(EndpointKind::Tcp),
        &request(segments, Vec::new()),
        Arc::new(fx.source()),
        &spawner,
    )
    .unwrap();

    assert_eq!(inputs.len(), 2);
    let main = &inputs[0];
    assert_eq!(main.format.as_deref(), Some("concat"));
    assert_eq!(main.duration, Some(Duration::from_secs(90)));
    assert_eq!(main.streams[0].pid, Some(0x1011));
    assert_eq!(main.streams[0].kind, StreamKind::Video);
    assert_eq!(main.streams[1].language.as_deref(), Some("eng"));
    assert_eq!(inputs[1].chapters[0].title.as_deref(), Some("Opening"));

    let calls = spawner.get_received_calls();
    assert!(calls[0].outputs.is_empty());
    assert!(fx.pipe_dir_is_empty());
}

#[test]
fn test_probe_surfaces_unknown_stream_type() {
    let fx = Fixture::new();
    let segments = vec![fx.segment("00001.m2ts", 30_000)];
    let spawner = MockTranscoderSpawner::new(MockScript {
        diagnostics: vec![
            "Input #0, concat, from 'manifest':".to_string(),
            "  Stream #0:0[0x1400]: Unknown: none".to_string(),
        ],
        ..MockScript::default()
    });

    let err = probe_inputs(
        &fx.config(EndpointKind::Tcp),
        &request(segments, Vec::new()),
        Arc::new(fx.source()),
        &spawner,
    )
    .unwrap_err();

    assert!(matches!(err, CoreError::UnknownStreamType(_)));
}

#[test]
fn test_empty_request_is_rejected_before_spawning() {
    let fx = Fixture::new();
    let spawner = MockTranscoderSpawner::new(MockScript::default());

    let job = ConversionJob::new(
        fx.config(EndpointKind::Tcp),
        request(Vec::new(), vec![video_output(fx.output("movie.mkv"))]),
        Arc::new(fx.source()),
    );
    let err = job.run(&spawner).unwrap_err();
    assert!(matches!(err, CoreError::Config(msg) if msg.contains("no segments")));
    assert!(spawner.get_received_calls().is_empty());
    assert!(fx.pipe_dir_is_empty());
}
