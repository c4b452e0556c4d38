// ============================================================================
// discmux-core/src/conversion/progress.rs
// ============================================================================
//
// PROGRESS AGGREGATION: Byte-Based Progress for a Conversion Job
//
// The transcoder's own time figure follows whichever output stream is
// furthest behind, which for jobs with sparse subtitle tracks makes it
// useless. Progress is therefore the fraction of segment bytes the bridges
// have delivered. Frame and time from the statistics line are passed along
// for display only.
//
// Snapshots are pushed into an mpsc channel (if the caller gave one) and can
// also be polled with `snapshot()`. The percentage never decreases within a
// job and is clamped to [0, 1].

use crate::bridge::DeliveredCounter;
use crate::diagnostics::StatsLine;
use crate::utils::{format_bytes, format_duration};
use serde::Serialize;
use std::sync::mpsc::Sender;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Progress of a running job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// Fraction in `[0, 1]`; `None` when the job has no input bytes.
    pub percentage: Option<f64>,
    pub frame: Option<i64>,
    /// Transcoder-reported output time.
    pub current_time: Option<Duration>,
    /// Expected running time, zero when unknown.
    pub duration: Duration,
    pub bytes_delivered: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Default)]
struct Latest {
    percentage: f64,
    frame: Option<i64>,
    current_time: Option<Duration>,
    duration: Duration,
    logged_decile: Option<u32>,
}

/// Combines bridge byte counters and transcoder statistics into snapshots.
pub struct ProgressAggregator {
    counters: Vec<DeliveredCounter>,
    total_bytes: u64,
    latest: Mutex<Latest>,
    sender: Option<Sender<ProgressSnapshot>>,
}

impl ProgressAggregator {
    pub fn new(
        counters: Vec<DeliveredCounter>,
        total_bytes: u64,
        duration: Option<Duration>,
        sender: Option<Sender<ProgressSnapshot>>,
    ) -> Self {
        Self {
            counters,
            total_bytes,
            latest: Mutex::new(Latest {
                duration: duration.unwrap_or_default(),
                ..Latest::default()
            }),
            sender,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Latest> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the expected duration if none is known yet.
    pub fn offer_duration(&self, duration: Duration) {
        let mut latest = self.lock();
        if latest.duration.is_zero() {
            latest.duration = duration;
        }
    }

    /// Records a statistics line and emits a snapshot.
    pub fn observe_stats(&self, stats: &StatsLine) -> ProgressSnapshot {
        {
            let mut latest = self.lock();
            if stats.frame.is_some() {
                latest.frame = stats.frame;
            }
            if stats.time.is_some() {
                latest.current_time = stats.time;
            }
        }
        self.emit()
    }

    /// Current progress without emitting it.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let mut latest = self.lock();
        self.snapshot_locked(&mut latest)
    }

    fn snapshot_locked(&self, latest: &mut Latest) -> ProgressSnapshot {
        let delivered: u64 = self.counters.iter().map(DeliveredCounter::get).sum();
        let percentage = if self.total_bytes == 0 {
            None
        } else {
            let fraction = (delivered as f64 / self.total_bytes as f64).clamp(0.0, 1.0);
            latest.percentage = latest.percentage.max(fraction);
            Some(latest.percentage)
        };
        ProgressSnapshot {
            percentage,
            frame: latest.frame,
            current_time: latest.current_time,
            duration: latest.duration,
            bytes_delivered: delivered,
            total_bytes: self.total_bytes,
        }
    }

    /// Computes a snapshot and sends it to the caller's channel.
    ///
    /// Sends happen under the lock, so the receiver sees non-decreasing
    /// percentages even when several threads emit.
    pub fn emit(&self) -> ProgressSnapshot {
        let mut latest = self.lock();
        let snapshot = self.snapshot_locked(&mut latest);
        if let Some(sender) = &self.sender {
            // A caller that stopped listening does not affect the job.
            let _ = sender.send(snapshot.clone());
        }
        self.log_milestone(&mut latest, &snapshot);
        snapshot
    }

    fn log_milestone(&self, latest: &mut Latest, snapshot: &ProgressSnapshot) {
        let Some(percentage) = snapshot.percentage else {
            return;
        };
        let decile = (percentage * 10.0).floor() as u32;
        if latest.logged_decile.is_some_and(|d| d >= decile) {
            return;
        }
        latest.logged_decile = Some(decile);

        log::info!(
            target: "discmux::progress",
            "Progress: {:.1}% | {} / {} | Time: {} / {}",
            percentage * 100.0,
            format_bytes(snapshot.bytes_delivered),
            format_bytes(snapshot.total_bytes),
            format_duration(snapshot.current_time.map_or(0.0, |t| t.as_secs_f64())),
            format_duration(snapshot.duration.as_secs_f64()),
        );
    }
}
