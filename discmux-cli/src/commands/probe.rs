//! Implementation of the 'probe' subcommand.
//!
//! Runs ffmpeg over the plan's segments without outputs and prints the
//! streams, chapters and duration it reports.

use super::prepare_config;
use crate::cli::ProbeArgs;
use crate::plan::JobPlan;
use anyhow::Result;
use discmux_core::diagnostics::InputMetadata;
use discmux_core::external::SidecarSpawner;
use discmux_core::{format_duration, probe_inputs};
use log::info;
use std::sync::Arc;

pub fn run_probe(args: ProbeArgs) -> Result<()> {
    let plan = JobPlan::load(&args.job.plan)?;
    let config = prepare_config(&args.job, false)?;
    let source = plan.segment_source();
    let request = plan.to_request(&source)?;

    info!(
        "Probing {} segment(s) in {}",
        request.segments.len(),
        plan.stream_dir.display()
    );
    let inputs = probe_inputs(&config, &request, Arc::new(source), &SidecarSpawner)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&inputs)?);
    } else {
        for input in &inputs {
            print!("{}", render_input(input));
        }
    }
    Ok(())
}

/// Human-readable summary of one input.
pub fn render_input(input: &InputMetadata) -> String {
    let mut out = format!(
        "Input #{} ({})\n",
        input.index,
        input.format.as_deref().unwrap_or("unknown format")
    );
    if let Some(duration) = input.duration {
        out.push_str(&format!("  Duration: {}\n", format_duration(duration.as_secs_f64())));
    }
    for stream in &input.streams {
        let pid = stream
            .pid
            .map(|pid| format!("0x{pid:04x}"))
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "  Stream {:>2}  {:<6}  {:<10}  {:<3}  {}{}\n",
            stream.index,
            pid,
            stream.kind,
            stream.language.as_deref().unwrap_or("-"),
            stream.format,
            if stream.is_default { " (default)" } else { "" }
        ));
    }
    for chapter in &input.chapters {
        out.push_str(&format!(
            "  Chapter {:>2}  {} - {}  {}\n",
            chapter.index,
            format_duration(chapter.start_seconds),
            format_duration(chapter.end_seconds),
            chapter.title.as_deref().unwrap_or("")
        ));
    }
    out
}
