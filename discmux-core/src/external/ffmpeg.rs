// ============================================================================
// discmux-core/src/external/ffmpeg.rs
// ============================================================================
//
// FFMPEG SPAWNER: TranscoderSpawner Implementation on ffmpeg-sidecar
//
// ffmpeg-sidecar locates the binary, pipes stdio and prefixes every log line
// with its level (`-loglevel level+info`). The diagnostic reader strips that
// prefix, so the stderr handle is handed to it untouched.

use super::{ProcessExit, TranscoderInvocation, TranscoderProcess, TranscoderSpawner};
use crate::error::{CoreError, CoreResult, command_start_error};
use ffmpeg_sidecar::child::FfmpegChild;
use ffmpeg_sidecar::command::FfmpegCommand;
use std::io::Read;

/// Wrapper around [`FfmpegChild`] implementing [`TranscoderProcess`].
pub struct SidecarProcess(FfmpegChild);

impl TranscoderProcess for SidecarProcess {
    fn take_diagnostics(&mut self) -> Option<Box<dyn Read + Send>> {
        self.0
            .take_stderr()
            .map(|stderr| Box::new(stderr) as Box<dyn Read + Send>)
    }

    fn try_wait(&mut self) -> CoreResult<Option<ProcessExit>> {
        Ok(self.0.as_inner_mut().try_wait()?.map(ProcessExit::from))
    }

    fn wait(&mut self) -> CoreResult<ProcessExit> {
        Ok(self.0.wait()?.into())
    }

    fn kill(&mut self) -> CoreResult<()> {
        match self.0.kill() {
            Ok(()) => Ok(()),
            // Already exited.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(CoreError::Io(e)),
        }
    }
}

/// Spawns the transcoder through `ffmpeg-sidecar`.
#[derive(Debug, Clone, Default)]
pub struct SidecarSpawner;

impl TranscoderSpawner for SidecarSpawner {
    type Process = SidecarProcess;

    fn spawn(&self, invocation: &TranscoderInvocation) -> CoreResult<Self::Process> {
        let mut cmd = FfmpegCommand::new_with_path(&invocation.program);
        cmd.args(&invocation.args);
        log::debug!("Spawning transcoder: {}", invocation.command_line());
        cmd.spawn()
            .map(SidecarProcess)
            .map_err(|e| command_start_error(invocation.program.display().to_string(), e))
    }
}
