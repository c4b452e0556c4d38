//! Implementation of the 'export' subcommand.
//!
//! Runs one conversion job on a worker thread and draws its progress on the
//! main thread until the job's progress channel closes.

use super::prepare_config;
use crate::cli::ExportArgs;
use crate::plan::JobPlan;
use anyhow::{Result, anyhow};
use discmux_core::external::SidecarSpawner;
use discmux_core::{
    ConversionJob, ConversionReport, ProgressSnapshot, format_bytes, format_duration,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{error, info, warn};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

pub fn run_export(args: ExportArgs) -> Result<()> {
    let start = Instant::now();
    let plan = JobPlan::load(&args.job.plan)?;
    let config = prepare_config(&args.job, args.overwrite)?;
    let source = plan.segment_source();
    let request = plan.to_request(&source)?;
    request.validate()?;

    info!(
        "Exporting {} segment(s) ({}) into {} output(s)",
        request.segments.len(),
        format_bytes(request.total_input_bytes()),
        request.outputs.len()
    );

    let (tx, rx) = mpsc::channel();
    let job = ConversionJob::new(config, request, Arc::new(source)).with_progress(tx);
    let bar = create_progress_bar(job.total_input_bytes(), args.no_progress);

    let worker = thread::Builder::new()
        .name("conversion-job".to_string())
        .spawn(move || job.run(&SidecarSpawner))?;
    for snapshot in rx {
        update_progress_bar(&bar, &snapshot);
    }
    let result = worker
        .join()
        .map_err(|_| anyhow!("conversion thread panicked"))?;
    bar.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            if let Some(diagnostics) = e.diagnostics().filter(|d| !d.is_empty()) {
                error!("ffmpeg output:\n{diagnostics}");
            }
            return Err(e.into());
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, start.elapsed());
    }
    if !report.missing.is_empty() {
        return Err(anyhow!(
            "{} of {} output(s) were not produced",
            report.missing.len(),
            report.missing.len() + report.outputs.len()
        ));
    }
    Ok(())
}

/// Creates the byte-based progress bar, hidden when disabled or when stderr
/// is not a terminal.
fn create_progress_bar(total_bytes: u64, disabled: bool) -> ProgressBar {
    if disabled {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::with_draw_target(Some(total_bytes), ProgressDrawTarget::stderr());
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{bar:40.cyan/blue}] {percent}% {bytes}/{total_bytes} {msg} ({eta})")
    {
        Ok(style) => pb.set_style(style.progress_chars("█▓▒░ ")),
        Err(e) => warn!("Invalid progress template: {e}"),
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn update_progress_bar(bar: &ProgressBar, snapshot: &ProgressSnapshot) {
    bar.set_position(snapshot.bytes_delivered.min(snapshot.total_bytes));
    if let Some(time) = snapshot.current_time {
        let message = if snapshot.duration.is_zero() {
            format_duration(time.as_secs_f64())
        } else {
            format!(
                "{} / {}",
                format_duration(time.as_secs_f64()),
                format_duration(snapshot.duration.as_secs_f64())
            )
        };
        bar.set_message(message);
    }
}

fn print_summary(report: &ConversionReport, elapsed: Duration) {
    for path in &report.outputs {
        println!("{}", path.display());
    }
    for path in &report.missing {
        warn!("Not produced: {}", path.display());
    }
    info!(
        "Delivered {} of {} in {}",
        format_bytes(report.bytes_delivered),
        format_bytes(report.total_bytes),
        format_duration(elapsed.as_secs_f64())
    );
}
