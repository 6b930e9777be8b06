//! Go-style duration strings ("10m", "1h30m0s", "500ms"). The fixture
//! reports its uptime in this grammar and the `--interval` flag accepts it,
//! so both sides share one parser.

use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Parse a duration of the form `<number><unit>[<number><unit>...]`.
///
/// Accepted units are `h`, `m`, `s`, `ms`, `us` and `ns`. Fractional
/// values are allowed (`1.5h`). A bare `0` is accepted as zero.
pub fn parse_go_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        bail!("empty duration");
    }
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let bytes = s.as_bytes();
    let mut total = Duration::ZERO;
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
            i += 1;
        }
        if i == start {
            bail!("invalid duration {s:?}: expected a number at offset {start}");
        }
        let value: f64 = s[start..i]
            .parse()
            .with_context(|| format!("invalid duration {s:?}: bad number {:?}", &s[start..i]))?;

        let unit_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let scale = match &s[unit_start..i] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" => 1e-6,
            "ns" => 1e-9,
            unit => bail!("invalid duration {s:?}: unknown unit {unit:?}"),
        };
        let Ok(dur) = Duration::try_from_secs_f64(value * scale) else {
            bail!("invalid duration {s:?}: out of range");
        };
        total = match total.checked_add(dur) {
            Some(t) => t,
            None => bail!("invalid duration {s:?}: out of range"),
        };
    }
    Ok(total)
}

// ===========================================================================
// Tests
// ===========================================================================
