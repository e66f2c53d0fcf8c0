//! Percent-complete tracking over the engine's stderr protocol.

/// Highest percent reported while encoding. `100` is reserved for the moment
/// the result is published and recorded.
pub const ENCODE_CEILING: u8 = 99;

/// Converts `HH:MM:SS(.fraction)` to seconds. Negative or `N/A` marks yield `None`.
pub fn parse_timestamp(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.starts_with('-') {
        return None;
    }

    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }

    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    total.is_finite().then_some(total)
}

/// Rate-limited, monotonic progress for one encode.
///
/// The total duration comes from the first `Duration:` metadata line; each
/// later timemark (`out_time=` from `-progress`, or `time=` in stats lines)
/// yields a percent only once it has advanced a whole point past the last one
/// reported.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    total_seconds: Option<f64>,
    last_emitted: u8,
    ceiling: u8,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            total_seconds: None,
            last_emitted: 0,
            ceiling: ENCODE_CEILING,
        }
    }

    pub fn total_seconds(&self) -> Option<f64> {
        self.total_seconds
    }

    pub fn set_total(&mut self, seconds: f64) {
        if seconds > 0.0 && seconds.is_finite() {
            self.total_seconds = Some(seconds);
        }
    }

    /// Returns the percent to report for `current` seconds, if any.
    pub fn advance(&mut self, current: f64) -> Option<u8> {
        let total = self.total_seconds?;
        let percent = (current / total * 100.0).clamp(0.0, 100.0).floor() as u8;
        let percent = percent.min(self.ceiling);

        if percent > self.last_emitted {
            self.last_emitted = percent;
            Some(percent)
        } else {
            None
        }
    }

    /// Feeds one line of engine stderr.
    pub fn observe_line(&mut self, line: &str) -> Option<u8> {
        let line = line.trim();

        if let Some(rest) = line.strip_prefix("Duration:") {
            if self.total_seconds.is_none() {
                let stamp = rest.split(',').next().unwrap_or_default();
                if let Some(seconds) = parse_timestamp(stamp) {
                    self.set_total(seconds);
                }
            }
            return None;
        }

        if let Some(stamp) = line.strip_prefix("out_time=") {
            return parse_timestamp(stamp).and_then(|s| self.advance(s));
        }

        if let Some(micros) = line.strip_prefix("out_time_us=") {
            let micros: f64 = micros.trim().parse().ok()?;
            return self.advance(micros / 1_000_000.0);
        }

        let stamp = line
            .split_whitespace()
            .find_map(|token| token.strip_prefix("time="))?;
        parse_timestamp(stamp).and_then(|s| self.advance(s))
    }
}

/// Keys emitted by `-progress` that carry no human-readable diagnostics.
pub fn is_progress_key(line: &str) -> bool {
    const KEYS: &[&str] = &[
        "frame=", "fps=", "stream_", "bitrate=", "total_size=", "out_time", "dup_frames=",
        "drop_frames=", "speed=", "progress=",
    ];
    let line = line.trim_start();
    KEYS.iter().any(|k| line.starts_with(k))
}
