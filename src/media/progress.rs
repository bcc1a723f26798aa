//! Parsing of ffmpeg `-progress pipe:1` output into 0-100 percentages.

use regex::Regex;
use std::sync::LazyLock;

static OUT_TIME_MS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"out_time_ms=(\d+)").expect("invalid out_time_ms regex"));

/// Parse one `-progress` output line. `out_time_ms` is microseconds of output
/// written so far; returns the corresponding seconds when present.
pub fn parse_progress_line(line: &str) -> Option<f64> {
    let caps = OUT_TIME_MS_RE.captures(line)?;
    let micros: u64 = caps[1].parse().ok()?;
    Some(micros as f64 / 1_000_000.0)
}

/// Converts processed-duration samples into a monotonically non-decreasing
/// percentage capped at 100. `update` returns the new percentage only when it
/// advanced, so observers are not flooded with duplicates.
#[derive(Debug)]
pub struct ProgressTracker {
    total_seconds: f64,
    last_percent: u8,
}

impl ProgressTracker {
    pub fn new(total_seconds: f64) -> Self {
        Self {
            total_seconds,
            last_percent: 0,
        }
    }

    pub fn update(&mut self, processed_seconds: f64) -> Option<u8> {
        if self.total_seconds <= 0.0 {
            return None;
        }
        let percent = ((processed_seconds / self.total_seconds) * 100.0).floor() as i64;
        let percent = percent.clamp(0, 100) as u8;
        if percent > self.last_percent {
            self.last_percent = percent;
            Some(percent)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_time_ms_is_microseconds() {
        assert_eq!(parse_progress_line("out_time_ms=5000000"), Some(5.0));
        assert_eq!(parse_progress_line("out_time_ms=0"), Some(0.0));
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        assert_eq!(parse_progress_line("frame=120"), None);
        assert_eq!(parse_progress_line("progress=continue"), None);
    }

    #[test]
    fn tracker_is_monotonic_and_capped() {
        let mut tracker = ProgressTracker::new(10.0);
        assert_eq!(tracker.update(2.5), Some(25));
        // A stale (smaller) sample never lowers the percentage.
        assert_eq!(tracker.update(1.0), None);
        assert_eq!(tracker.update(2.5), None);
        assert_eq!(tracker.update(9.0), Some(90));
        // Overshoot past the declared duration caps at 100.
        assert_eq!(tracker.update(12.0), Some(100));
        assert_eq!(tracker.update(15.0), None);
    }

    #[test]
    fn zero_total_never_reports() {
        let mut tracker = ProgressTracker::new(0.0);
        assert_eq!(tracker.update(5.0), None);
    }
}
