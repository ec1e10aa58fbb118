//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fixed-step simulated clock and timestamp codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use chrono::{NaiveDateTime, TimeDelta, Timelike};
use thiserror::Error;
use tracing::warn;

/// Canonical rendering used on the control channel and in config files.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const PARSE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Error, PartialEq)]
pub enum TimeError {
    #[error("time step must be positive, got {0}s")]
    NonPositiveStep(f64),
    #[error("start {start} is after end {end}")]
    InvertedWindow {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("unable to parse timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Parse a simulated timestamp.
///
/// Accepts `YYYY-MM-DD HH:MM:SS[.fff]` (or the `T` separated form) with an
/// optional trailing timezone label such as `EST` or `+00:00`, which is
/// discarded. Simulator placeholders (`INIT`, `NEVER`, empty) yield `None`.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut tokens = trimmed.split_whitespace();
    let date = tokens.next()?;
    let candidate = match tokens.next() {
        Some(time) if !date.contains('T') => format!("{date} {time}"),
        _ => date.to_owned(),
    };
    PARSE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&candidate, format).ok())
}

/// Like [`parse_timestamp`] but reports the offending text.
pub fn parse_timestamp_strict(raw: &str) -> Result<NaiveDateTime, TimeError> {
    parse_timestamp(raw).ok_or_else(|| TimeError::InvalidTimestamp(raw.to_owned()))
}

/// Render a timestamp with an optional timezone suffix.
pub fn format_timestamp(ts: NaiveDateTime, timezone: Option<&str>) -> String {
    let mut rendered = ts.format(TIMESTAMP_FORMAT).to_string();
    let nanos = ts.nanosecond();
    if nanos != 0 {
        let fraction = format!("{:09}", nanos);
        rendered.push('.');
        rendered.push_str(fraction.trim_end_matches('0'));
    }
    if let Some(tz) = timezone.filter(|tz| !tz.is_empty()) {
        rendered.push(' ');
        rendered.push_str(tz);
    }
    rendered
}

/// Convert float seconds into a chrono delta with microsecond resolution.
pub fn seconds_to_delta(seconds: f64) -> TimeDelta {
    TimeDelta::microseconds((seconds * 1_000_000.0).round() as i64)
}

/// Seconds between two timestamps as a float.
pub fn delta_seconds(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    let delta = to - from;
    delta.num_microseconds().map_or_else(
        || delta.num_milliseconds() as f64 / 1_000.0,
        |micros| micros as f64 / 1_000_000.0,
    )
}

/// Fixed-step simulated clock shared by every bus variant.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeModel {
    start: NaiveDateTime,
    end: NaiveDateTime,
    current: NaiveDateTime,
    step: TimeDelta,
    timezone: Option<String>,
}

impl TimeModel {
    pub fn new(
        start: NaiveDateTime,
        end: NaiveDateTime,
        step_seconds: f64,
        timezone: Option<String>,
    ) -> Result<Self, TimeError> {
        let step = seconds_to_delta(step_seconds);
        if step <= TimeDelta::zero() {
            return Err(TimeError::NonPositiveStep(step_seconds));
        }
        if start > end {
            return Err(TimeError::InvertedWindow { start, end });
        }
        Ok(Self {
            start,
            end,
            current: start,
            step,
            timezone,
        })
    }

    pub fn start(&self) -> NaiveDateTime {
        self.start
    }

    pub fn end(&self) -> NaiveDateTime {
        self.end
    }

    pub fn current(&self) -> NaiveDateTime {
        self.current
    }

    pub fn step(&self) -> TimeDelta {
        self.step
    }

    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.end
    }

    /// The instant the next [`advance`](Self::advance) would land on.
    pub fn next_step_time(&self) -> NaiveDateTime {
        self.current
            .checked_add_signed(self.step)
            .map_or(self.end, |next| next.min(self.end))
    }

    /// Step the clock forward, clamping at `end`.
    ///
    /// Returns whether the clock is still short of `end` afterwards. Once the
    /// clock sits at `end` every further call is a no-op returning `false`.
    pub fn advance(&mut self) -> bool {
        if self.is_finished() {
            return false;
        }
        self.current = self.next_step_time();
        !self.is_finished()
    }

    /// Move the clock to an externally supplied instant.
    ///
    /// Values past `end` are clamped. Values not after `current` are still
    /// accepted since the backend clock may legitimately lag the caller. A
    /// finished clock is frozen.
    pub fn set_current(&mut self, ts: NaiveDateTime) {
        if self.is_finished() {
            warn!(requested = %ts, end = %self.end, "time model already finished; ignoring update");
            return;
        }
        let mut target = ts;
        if target > self.end {
            warn!(requested = %ts, end = %self.end, "requested time beyond end; clamping");
            target = self.end;
        } else if target <= self.current {
            warn!(requested = %ts, current = %self.current, "requested time not after current time");
        }
        if target < self.start {
            warn!(requested = %ts, start = %self.start, "requested time before start; clamping");
            target = self.start;
        }
        self.current = target;
    }
}

impl fmt::Display for TimeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_timestamp(self.current, self.timezone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> NaiveDateTime {
        parse_timestamp(raw).expect("valid timestamp")
    }

    fn model(step: f64) -> TimeModel {
        TimeModel::new(
            ts("2020-06-01 00:00:00"),
            ts("2020-06-01 00:00:10"),
            step,
            Some("EST".into()),
        )
        .unwrap()
    }

    #[test]
    fn parses_simulator_clock_forms() {
        assert_eq!(
            parse_timestamp("2020-06-01 00:00:00 EST"),
            Some(ts("2020-06-01 00:00:00"))
        );
        assert_eq!(
            parse_timestamp("2020-06-01T00:00:05"),
            Some(ts("2020-06-01 00:00:05"))
        );
        assert!(parse_timestamp("2020-06-01 00:00:00.250").is_some());
        assert_eq!(parse_timestamp("INIT"), None);
        assert_eq!(parse_timestamp("NEVER"), None);
        assert_eq!(parse_timestamp("   "), None);
    }

    #[test]
    fn formats_with_optional_zone_and_fraction() {
        let base = ts("2020-06-01 00:00:00");
        assert_eq!(format_timestamp(base, None), "2020-06-01 00:00:00");
        assert_eq!(format_timestamp(base, Some("EST")), "2020-06-01 00:00:00 EST");
        let fractional = base + seconds_to_delta(0.25);
        assert_eq!(format_timestamp(fractional, None), "2020-06-01 00:00:00.25");
    }

    #[test]
    fn rejects_bad_windows() {
        let start = ts("2020-06-01 00:00:10");
        let end = ts("2020-06-01 00:00:00");
        assert!(matches!(
            TimeModel::new(start, end, 1.0, None),
            Err(TimeError::InvertedWindow { .. })
        ));
        assert_eq!(
            TimeModel::new(end, start, 0.0, None),
            Err(TimeError::NonPositiveStep(0.0))
        );
    }

    #[test]
    fn advance_is_monotonic_and_clamped() {
        let mut clock = model(4.0);
        let mut previous = clock.current();
        let mut results = Vec::new();
        for _ in 0..6 {
            results.push(clock.advance());
            assert!(clock.current() >= previous);
            assert!(clock.current() <= clock.end());
            previous = clock.current();
        }
        assert_eq!(results, vec![true, true, false, false, false, false]);
        assert_eq!(clock.current(), clock.end());
        assert!(clock.is_finished());
    }

    #[test]
    fn oversized_step_lands_on_end() {
        let mut clock = model(1e300);
        assert_eq!(clock.next_step_time(), clock.end());
        assert!(!clock.advance());
        assert_eq!(clock.current(), clock.end());
    }

    #[test]
    fn set_current_clamps_and_tolerates_stale_values() {
        let mut clock = model(1.0);
        clock.set_current(ts("2020-06-01 00:00:05"));
        assert_eq!(clock.current(), ts("2020-06-01 00:00:05"));

        clock.set_current(ts("2020-06-01 00:00:03"));
        assert_eq!(clock.current(), ts("2020-06-01 00:00:03"));

        clock.set_current(ts("2020-06-01 01:00:00"));
        assert_eq!(clock.current(), clock.end());

        clock.set_current(ts("2020-06-01 00:00:01"));
        assert_eq!(clock.current(), clock.end());
    }

    #[test]
    fn display_includes_timezone() {
        let clock = model(1.0);
        assert_eq!(clock.to_string(), "2020-06-01 00:00:00 EST");
        assert_eq!(clock.next_step_time(), ts("2020-06-01 00:00:01"));
    }
}
