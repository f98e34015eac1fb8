//! Duration strings such as `"30s"`, `"1m30s"` or `"250ms"`.
//!
//! A string is a sequence of decimal numbers, each with an optional
//! fraction and a unit suffix: `ns`, `us` (or `µs`), `ms`, `s`, `m`, `h`.
//! `"0"` is accepted without a unit.

use std::time::Duration;

const UNITS: &[(&str, f64)] = &[
    ("ns", 1.0),
    ("us", 1e3),
    ("µs", 1e3),
    ("ms", 1e6),
    ("s", 1e9),
    ("m", 60e9),
    ("h", 3600e9),
];

/// Parse a duration string. Returns `None` when it is malformed.
pub fn parse(input: &str) -> Option<Duration> {
    let s = input.trim();
    if s == "0" {
        return Some(Duration::ZERO);
    }
    if s.is_empty() {
        return None;
    }

    let mut rest = s;
    let mut nanos = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = &rest[..unit_len];
        let scale = UNITS.iter().find(|(name, _)| *name == unit).map(|(_, scale)| *scale)?;
        rest = &rest[unit_len..];

        nanos += value * scale;
    }

    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return None;
    }
    Some(Duration::from_nanos(nanos as u64))
}

/// Parse a duration string, falling back to `default` when it is empty or
/// malformed. Malformed input is logged.
pub fn parse_or(input: &str, default: Duration) -> Duration {
    if input.trim().is_empty() {
        return default;
    }
    parse(input).unwrap_or_else(|| {
        tracing::warn!(value = %input, default = ?default, "Invalid duration, using default");
        default
    })
}
