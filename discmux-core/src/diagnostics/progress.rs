//! Parsing of the transcoder's periodic statistics line
//! (`frame=  240 fps= 48 ... time=00:00:10.00 bitrate=... speed=2.0x`).

use crate::utils::parse_ffmpeg_duration;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\w+)=\s*(\S+)").unwrap_or_else(|e| panic!("invalid stats regex: {e}"))
});

/// Fields of one statistics line. Absent or `N/A` fields are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsLine {
    pub frame: Option<i64>,
    pub time: Option<Duration>,
    pub speed: Option<f32>,
}

/// Whether a line is a statistics line rather than a diagnostic message.
pub fn is_stats_line(text: &str) -> bool {
    (text.starts_with("frame=") || text.starts_with("size=")) && text.contains("time=")
}

/// Parses a statistics line, or returns `None` if `text` is not one.
pub fn parse_stats_line(text: &str) -> Option<StatsLine> {
    if !is_stats_line(text) {
        return None;
    }
    let mut stats = StatsLine::default();
    for caps in FIELD_RE.captures_iter(text) {
        let value = &caps[2];
        match &caps[1] {
            "frame" => stats.frame = value.parse().ok(),
            "time" => stats.time = parse_ffmpeg_duration(value),
            "speed" => stats.speed = value.trim_end_matches('x').parse().ok(),
            _ => {}
        }
    }
    Some(stats)
}
