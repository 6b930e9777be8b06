//! Decoding of the fixture's `status.xml` into a typed snapshot.
//!
//! The device reports its state as a bag of single-letter elements, each
//! holding an ad-hoc string encoding (mixed delimiters, mixed temperature
//! units, embedded day counts in the uptime, `normal` as a truthy lexeme).
//! Sub-element parse failures are logged and local: a bad temperature item
//! or timestamp never fails the whole decode. The one exception is the
//! intensities list, which is all-or-nothing so that a partially-parsed
//! channel vector can never be used to command the light.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::warn;

use crate::duration::parse_go_duration;

// ---------------------------------------------------------------------------
// Raw XML shape
// ---------------------------------------------------------------------------

/// The element names are single letters; anything we don't read (wifi
/// settings and friends) is ignored. A missing element decodes as an empty
/// string and leaves the snapshot field at its zero value.
#[derive(Debug, Default, Deserialize)]
struct RawStatus {
    #[serde(default)]
    a: String, // light time
    #[serde(default)]
    b: String, // schedule status
    #[serde(default)]
    c: String, // light status
    #[serde(default)]
    d: String, // uptime
    #[serde(default)]
    e: String, // last change time
    #[serde(default)]
    f: String, // last change reason
    #[serde(default)]
    g: String, // last change ip
    #[serde(default)]
    h: String, // last change type
    #[serde(default)]
    i: String, // panel temperatures
    #[serde(default)]
    j: String, // intensities
    #[serde(default)]
    m: String, // control mode
    #[serde(default)]
    n: String, // ui values 1
    #[serde(default)]
    o: String, // ui values 2
    #[serde(default)]
    q: String, // ntp info
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Normalized device state, produced once per tick and discarded after the
/// metrics publish.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    pub light_time: Option<NaiveDateTime>,
    pub schedule_running: bool,
    pub light_ok: bool,
    pub uptime: Option<Duration>,
    pub last_change_time: Option<NaiveDateTime>,
    pub last_change_reason: String,
    pub last_change_ip: String,
    pub last_change_type: String,
    /// Always Celsius; Fahrenheit readings are converted on decode.
    pub panel_temperatures_c: Vec<f64>,
    /// Current per-channel values; empty if any item failed to parse.
    pub intensities: Vec<i64>,
    /// What this run commanded. Stamped by the control loop, not the codec.
    pub target_intensities: Vec<i64>,
    pub control_mode: String,
    pub ui_lights_on_at_powerup: bool,
    pub ui_status_indicator_led: bool,
    pub ui_schedule_lock_on: bool,
    pub ui_schedule_lock_message: String,
    pub ui_schedule_lock_password: String,
    pub ntp_on: bool,
    pub ntp_address: String,
    pub tz_offset: String,
    /// True iff this snapshot accompanied a successful control write.
    pub executed_timepoint: bool,
}

const LIGHT_TIME_FORMAT: &str = "%Y:%m:%d:%H:%M:%S";
const LAST_CHANGE_FORMAT: &str = "%Y-%m-%d   %H:%M:%S"; // yes, three spaces

/// Decode a `status.xml` body. Only a malformed document is an error;
/// element-level problems are logged and leave their field unset.
pub fn decode_status_xml(data: &[u8]) -> Result<StatusSnapshot> {
    let raw: RawStatus = quick_xml::de::from_reader(data).context("malformed status.xml")?;
    let mut snap = StatusSnapshot::default();

    if !raw.a.is_empty() {
        match NaiveDateTime::parse_from_str(&raw.a, LIGHT_TIME_FORMAT) {
            Ok(t) => snap.light_time = Some(t),
            Err(e) => warn!("status.xml: bad light time {:?}: {e}", raw.a),
        }
    }

    snap.schedule_running = raw.b == "Running";
    snap.light_ok = raw.c == "OK";

    if !raw.d.is_empty() {
        snap.uptime = parse_uptime(&raw.d);
    }

    if !raw.e.is_empty() {
        match NaiveDateTime::parse_from_str(&raw.e, LAST_CHANGE_FORMAT) {
            Ok(t) => snap.last_change_time = Some(t),
            Err(e) => warn!("status.xml: bad last change time {:?}: {e}", raw.e),
        }
    }

    snap.last_change_reason = raw.f;
    snap.last_change_ip = raw.g;
    snap.last_change_type = raw.h;

    if !raw.i.is_empty() {
        snap.panel_temperatures_c = parse_temperatures(&raw.i);
    }
    if !raw.j.is_empty() {
        snap.intensities = parse_intensities(&raw.j);
    }

    snap.control_mode = raw.m;

    if !raw.n.is_empty() {
        let v = split_pad(&raw.n, ":", 3);
        // v[0] is the temperature display unit; not needed here.
        match v[1] {
            "on" => snap.ui_lights_on_at_powerup = true,
            "off" => snap.ui_lights_on_at_powerup = false,
            _ => {}
        }
        // The indicator LED reports "normal" rather than "on".
        match v[2] {
            "normal" => snap.ui_status_indicator_led = true,
            "off" => snap.ui_status_indicator_led = false,
            _ => {}
        }
    }

    if !raw.o.is_empty() {
        let v = split_pad(&raw.o, ":", 3);
        match v[0] {
            "on" => snap.ui_schedule_lock_on = true,
            "off" => snap.ui_schedule_lock_on = false,
            _ => {}
        }
        if !v[1].is_empty() {
            snap.ui_schedule_lock_message = v[1].to_string();
        }
        if !v[2].is_empty() {
            snap.ui_schedule_lock_password = v[2].to_string();
        }
    }

    if !raw.q.is_empty() {
        // NTP info is comma-space separated, unlike everything else.
        let v = split_pad(&raw.q, ", ", 3);
        match v[0] {
            "on" => snap.ntp_on = true,
            "off" => snap.ntp_on = false,
            _ => {}
        }
        if !v[1].is_empty() {
            snap.ntp_address = v[1].to_string();
        }
        if !v[2].is_empty() {
            snap.tz_offset = v[2].to_string();
        }
    }

    Ok(snap)
}

// ---------------------------------------------------------------------------
// Field parsers
// ---------------------------------------------------------------------------

/// Uptime arrives as `[<days>d ]HHhMMmSSs`. Spaces are stripped, the day
/// prefix (if any) contributes `days * 24h`. A bad duration tail yields
/// None; a bad day prefix after a good tail discards the whole value.
fn parse_uptime(s: &str) -> Option<Duration> {
    let compact = s.replace(' ', "");
    let parts: Vec<&str> = compact.split('d').collect();
    let tail = parts[parts.len() - 1];
    let dur = match parse_go_duration(tail) {
        Ok(d) => d,
        Err(e) => {
            warn!("status.xml: bad uptime {s:?}: {e:#}");
            return None;
        }
    };
    let mut total = dur.as_secs_f64();
    if parts.len() > 1 {
        match parts[0].parse::<i64>() {
            Ok(days) => total += days as f64 * 86_400.0,
            Err(e) => {
                warn!("status.xml: bad uptime day count {s:?}: {e}");
                return None;
            }
        }
    }
    if total <= 0.0 {
        return None;
    }
    match Duration::try_from_secs_f64(total) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!("status.xml: uptime {s:?} out of range: {e}");
            None
        }
    }
}

/// Items look like `<label>:<value><unit>` with a single trailing unit
/// letter; the value is the tail with the last two characters stripped.
/// Fahrenheit converts to Celsius. Bad items are skipped individually.
fn parse_temperatures(s: &str) -> Vec<f64> {
    let s = s.strip_suffix(',').unwrap_or(s);
    let mut out = Vec::new();
    for item in s.split(',') {
        let tail = item.rsplit(':').next().unwrap_or(item);
        if tail.len() < 2
            || !tail.is_char_boundary(tail.len() - 2)
            || !tail.is_char_boundary(tail.len() - 1)
        {
            warn!("status.xml: bad temperature item {item:?}");
            continue;
        }
        let unit = &tail[tail.len() - 1..];
        match tail[..tail.len() - 2].parse::<f64>() {
            Ok(v) => {
                let celsius = if unit == "F" { (v - 32.0) * 5.0 / 9.0 } else { v };
                out.push(celsius);
            }
            Err(e) => warn!("status.xml: bad temperature item {item:?}: {e}"),
        }
    }
    out
}

/// Items look like `<label>:<integer>`. Any bad item clears the whole
/// vector and halts, so a partial channel set can never be commanded back.
fn parse_intensities(s: &str) -> Vec<i64> {
    let s = s.strip_suffix(',').unwrap_or(s);
    let mut out = Vec::new();
    for item in s.split(',') {
        let tail = item.rsplit(':').next().unwrap_or(item);
        match tail.parse::<i64>() {
            Ok(v) => out.push(v),
            Err(e) => {
                warn!("status.xml: bad intensity item {item:?}, clearing intensities: {e}");
                return Vec::new();
            }
        }
    }
    out
}

/// Split on `sep` and pad with empty strings to exactly `n` fields.
fn split_pad<'a>(s: &'a str, sep: &str, n: usize) -> Vec<&'a str> {
    let mut v: Vec<&str> = s.split(sep).collect();
    v.truncate(n);
    while v.len() < n {
        v.push("");
    }
    v
}

// ===========================================================================
// Tests
// ===========================================================================
