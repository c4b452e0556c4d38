// ============================================================================
// discmux-core/src/conversion/command.rs
// ============================================================================
//
// COMMAND SYNTHESIS: Transcoder Arguments for a Conversion Request
//
// Input 0 is always the concat manifest, which names every segment's virtual
// input in order. Input 1, when present, is the chapter-marker document.
// Streams are selected by catalog id (`-map 0:i:<id>`) so the mapping does not
// depend on the order in which the demuxer discovers them. The manifest
// declares those ids with `exact_stream_id`.

use super::request::{CodecChoice, ConversionRequest, OutputSpec};
use crate::external::TranscoderInvocation;
use std::path::{Path, PathBuf};

/// Addresses of the synthetic inputs handed to the transcoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputAddresses {
    pub manifest: String,
    pub chapters: Option<String>,
}

fn input_args(inputs: &InputAddresses) -> Vec<String> {
    let mut args: Vec<String> = ["-nostdin", "-hide_banner", "-y"]
        .into_iter()
        .map(String::from)
        .collect();
    args.extend(
        ["-f", "concat", "-safe", "0", "-protocol_whitelist", "file,pipe,tcp,fd", "-i"]
            .into_iter()
            .map(String::from),
    );
    args.push(inputs.manifest.clone());
    if let Some(chapters) = &inputs.chapters {
        args.extend(["-f", "ffmetadata", "-i"].into_iter().map(String::from));
        args.push(chapters.clone());
    }
    args
}

fn output_args(
    request: &ConversionRequest,
    output: &OutputSpec,
    has_chapter_input: bool,
    working_path: &Path,
) -> Vec<String> {
    let mut args = Vec::new();
    for stream in &output.streams {
        args.push("-map".to_string());
        args.push(format!("0:i:{}", stream.stream_id));
    }
    for (n, stream) in output.streams.iter().enumerate() {
        args.push(format!("-c:{n}"));
        match &stream.codec {
            CodecChoice::Copy => args.push("copy".to_string()),
            CodecChoice::Encode { codec, options } => {
                args.push(codec.clone());
                args.extend(options.iter().cloned());
            }
        }
        if let Some(descriptor) = request.stream(stream.stream_id) {
            if let Some(language) = &descriptor.language {
                args.push(format!("-metadata:s:{n}"));
                args.push(format!("language={language}"));
            }
            args.push(format!("-disposition:{n}"));
            args.push(if descriptor.is_default { "default" } else { "0" }.to_string());
        }
    }
    args.push("-map_chapters".to_string());
    args.push(if output.include_chapters && has_chapter_input { "1" } else { "-1" }.to_string());
    args.push("-f".to_string());
    args.push(output.format.clone());
    args.push(working_path.to_string_lossy().into_owned());
    args
}

/// Builds the export command line.
///
/// `working_paths` must be parallel to `request.outputs`.
pub fn build_invocation(
    program: &Path,
    request: &ConversionRequest,
    inputs: &InputAddresses,
    working_paths: &[PathBuf],
) -> TranscoderInvocation {
    let mut args = input_args(inputs);
    for (output, working) in request.outputs.iter().zip(working_paths) {
        args.extend(output_args(request, output, inputs.chapters.is_some(), working));
    }
    TranscoderInvocation {
        program: program.to_path_buf(),
        args,
        inputs: std::iter::once(inputs.manifest.clone())
            .chain(inputs.chapters.clone())
            .collect(),
        outputs: working_paths.to_vec(),
    }
}

/// Builds a command that only opens the inputs. The transcoder reports them
/// and then exits complaining about the missing output.
pub fn build_probe_invocation(program: &Path, inputs: &InputAddresses) -> TranscoderInvocation {
    TranscoderInvocation {
        program: program.to_path_buf(),
        args: input_args(inputs),
        inputs: std::iter::once(inputs.manifest.clone())
            .chain(inputs.chapters.clone())
            .collect(),
        outputs: Vec::new(),
    }
}
