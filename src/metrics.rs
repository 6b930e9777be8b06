//! Metrics publishing: a status snapshot becomes one influx line-protocol
//! datagram sent over UDP to the collector. The publisher is synchronous
//! per call; the control loop owns retry.

use std::env;

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;

use crate::device::MetricStyle;
use crate::fixture::{metric_label, FixtureFamily};
use crate::status::StatusSnapshot;

pub const DEFAULT_COLLECTOR: &str = "telegraf:8092";

// ---------------------------------------------------------------------------
// Measurement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Measurement {
    name: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
}

impl Measurement {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tags: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Tags with empty values are dropped, matching the host/group/did
    /// convention of only tagging what was configured.
    pub fn add_tag(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.tags.push((key.to_string(), value.to_string()));
        }
    }

    pub fn add_field(&mut self, key: &str, value: FieldValue) {
        self.fields.push((key.to_string(), value));
    }

    /// Serialize as one line-protocol line (no trailing newline, no
    /// timestamp; the collector stamps arrival time).
    pub fn to_line(&self) -> Result<String> {
        if self.fields.is_empty() {
            bail!("measurement {:?} has no fields", self.name);
        }
        let mut line = escape_measurement(&self.name);
        for (k, v) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(k));
            line.push('=');
            line.push_str(&escape_key(v));
        }
        line.push(' ');
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(k));
            line.push('=');
            match v {
                FieldValue::Integer(n) => line.push_str(&format!("{n}i")),
                FieldValue::Float(x) => line.push_str(&format!("{x}")),
                FieldValue::Boolean(b) => line.push_str(if *b { "true" } else { "false" }),
                FieldValue::Text(s) => {
                    line.push('"');
                    line.push_str(&s.replace('\\', "\\\\").replace('"', "\\\""));
                    line.push('"');
                }
            }
        }
        Ok(line)
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Tag keys, tag values and field keys share one escape set.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

// ---------------------------------------------------------------------------
// Snapshot mapping
// ---------------------------------------------------------------------------

/// Explicit field-by-field mapping of a snapshot. Timestamps become unix
/// seconds, the uptime whole seconds, sequences are flattened by index;
/// except intensities on the labeled (telnet) surface, which are keyed by
/// wavelength label. Empty strings are omitted.
pub fn snapshot_measurement(style: MetricStyle, snap: &StatusSnapshot) -> Measurement {
    let mut m = Measurement::new(style.measurement);

    if let Some(t) = snap.light_time {
        m.add_field("light_time", FieldValue::Integer(t.and_utc().timestamp()));
    }
    m.add_field(
        "schedule_running",
        FieldValue::Boolean(snap.schedule_running),
    );
    m.add_field("light_ok", FieldValue::Boolean(snap.light_ok));
    if let Some(u) = snap.uptime {
        m.add_field("uptime_s", FieldValue::Integer(u.as_secs() as i64));
    }
    if let Some(t) = snap.last_change_time {
        m.add_field(
            "last_change_time",
            FieldValue::Integer(t.and_utc().timestamp()),
        );
    }
    add_text(&mut m, "last_change_reason", &snap.last_change_reason);
    add_text(&mut m, "last_change_ip", &snap.last_change_ip);
    add_text(&mut m, "last_change_type", &snap.last_change_type);

    for (i, &t) in snap.panel_temperatures_c.iter().enumerate() {
        m.add_field(&format!("panel_temperature_c_{i}"), FieldValue::Float(t));
    }

    let labels = style
        .labeled_intensities
        .then(|| FixtureFamily::from_channel_count(snap.intensities.len()))
        .flatten()
        .map(|f| f.labels());
    for (i, &v) in snap.intensities.iter().enumerate() {
        let key = match labels {
            Some(labels) => metric_label(labels[i]),
            None => format!("intensity_{i}"),
        };
        m.add_field(&key, FieldValue::Integer(v));
    }
    for (i, &v) in snap.target_intensities.iter().enumerate() {
        m.add_field(&format!("target_intensity_{i}"), FieldValue::Integer(v));
    }

    add_text(&mut m, "control_mode", &snap.control_mode);
    m.add_field(
        "ui_lights_on_at_powerup",
        FieldValue::Boolean(snap.ui_lights_on_at_powerup),
    );
    m.add_field(
        "ui_status_indicator_led",
        FieldValue::Boolean(snap.ui_status_indicator_led),
    );
    m.add_field(
        "ui_schedule_lock_on",
        FieldValue::Boolean(snap.ui_schedule_lock_on),
    );
    add_text(&mut m, "ui_schedule_lock_message", &snap.ui_schedule_lock_message);
    add_text(&mut m, "ui_schedule_lock_password", &snap.ui_schedule_lock_password);
    m.add_field("ntp_on", FieldValue::Boolean(snap.ntp_on));
    add_text(&mut m, "ntp_address", &snap.ntp_address);
    add_text(&mut m, "tz_offset", &snap.tz_offset);
    m.add_field(
        "executed_timepoint",
        FieldValue::Boolean(snap.executed_timepoint),
    );

    m
}

fn add_text(m: &mut Measurement, key: &str, value: &str) {
    if !value.is_empty() {
        m.add_field(key, FieldValue::Text(value.to_string()));
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

pub struct MetricsClient {
    target: String,
    tags: Vec<(String, String)>,
}

impl MetricsClient {
    /// Collector target from `TELEGRAF_HOST` (default `telegraf:8092`),
    /// with the agent's host/group/did tags applied to every measurement.
    pub fn from_env(host_tag: &str, group_tag: &str, did_tag: &str) -> Self {
        let target = env::var("TELEGRAF_HOST").unwrap_or_else(|_| DEFAULT_COLLECTOR.to_string());
        Self::new(&target, host_tag, group_tag, did_tag)
    }

    pub fn new(target: &str, host_tag: &str, group_tag: &str, did_tag: &str) -> Self {
        Self {
            target: target.to_string(),
            tags: vec![
                ("host".to_string(), host_tag.to_string()),
                ("group".to_string(), group_tag.to_string()),
                ("did".to_string(), did_tag.to_string()),
            ],
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// One datagram per measurement; empty-valued tags are skipped.
    pub async fn publish(&self, measurement: &Measurement) -> Result<()> {
        let mut m = measurement.clone();
        for (k, v) in &self.tags {
            m.add_tag(k, v);
        }
        let line = m.to_line()?;

        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("binding metrics socket")?;
        socket
            .send_to(line.as_bytes(), &self.target)
            .await
            .with_context(|| format!("sending metrics to {}", self.target))?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
