//! Telnet line-shell adapter. The older fixtures expose an ASCII shell
//! with a `>` prompt; a command is a single line, a reply is everything up
//! to the next prompt and starts with `OK` on success. Every action dials
//! a fresh connection; the shell is not session-safe, and a failed action
//! simply fails the tick for the control loop to retry.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::device::{DeviceError, LightDevice, MetricStyle};
use crate::status::StatusSnapshot;

const DIAL_TIMEOUT: Duration = Duration::from_secs(30);
/// The shell needs a beat after accepting the connection before it prints
/// its banner; commands sent too early are eaten.
const BANNER_DELAY: Duration = Duration::from_millis(100);
const DEFAULT_PORT: u16 = 23;

pub struct TelnetLight {
    addr: String,
}

impl TelnetLight {
    pub fn new(address: &str) -> Self {
        let address = address.trim();
        let addr = if address.contains(':') {
            address.to_string()
        } else {
            format!("{address}:{DEFAULT_PORT}")
        };
        Self { addr }
    }

    /// Dial, swallow the banner, issue one command, read to the prompt.
    async fn command(&self, cmd: &str) -> Result<String, DeviceError> {
        let mut stream = tokio::time::timeout(DIAL_TIMEOUT, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| DeviceError::Transport(format!("dial {}: timed out", self.addr)))??;

        tokio::time::sleep(BANNER_DELAY).await;
        read_to_prompt(&mut stream).await?;

        stream.write_all(format!("{cmd}\n").as_bytes()).await?;
        let body = read_to_prompt(&mut stream).await?;
        expect_ok(&body)
    }
}

/// Read until the `>` prompt and return everything before it.
async fn read_to_prompt(stream: &mut TcpStream) -> Result<String, DeviceError> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 256];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(DeviceError::Transport(
                "connection closed before prompt".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.iter().position(|&b| b == b'>') {
            return Ok(String::from_utf8_lossy(&buf[..end]).into_owned());
        }
    }
}

/// A reply is successful iff it contains the word `OK`; otherwise the
/// trimmed body is the device's error text.
fn expect_ok(body: &str) -> Result<String, DeviceError> {
    if body.split_whitespace().any(|w| w == "OK") {
        Ok(body.to_string())
    } else {
        Err(DeviceError::Protocol(body.trim().to_string()))
    }
}

/// Word tokens after the leading `OK`: the channel labels from `getWl`.
fn parse_labels(body: &str) -> Vec<String> {
    body.split_whitespace()
        .skip_while(|w| *w != "OK")
        .skip(1)
        .map(str::to_string)
        .collect()
}

/// Every decimal integer in the reply, in order.
fn parse_ints(body: &str) -> Vec<i64> {
    let bytes = body.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        let bounded = (start == 0 || !is_word_byte(bytes[start - 1]))
            && (i == bytes.len() || !is_word_byte(bytes[i]));
        if bounded {
            if let Ok(v) = body[start..i].parse() {
                out.push(v);
            }
        }
    }
    out
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[async_trait]
impl LightDevice for TelnetLight {
    /// The shell has no status document; the snapshot carries the current
    /// intensities and nothing else.
    async fn read_status(&self) -> Result<StatusSnapshot, DeviceError> {
        let body = self.command("getAllRelPower").await?;
        Ok(StatusSnapshot {
            intensities: parse_ints(&body),
            light_ok: true,
            ..StatusSnapshot::default()
        })
    }

    async fn set_all(&self, values: &[i64]) -> Result<(), DeviceError> {
        let joined = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        self.command(&format!("setWlsRelPower {joined}")).await?;
        Ok(())
    }

    async fn set_one(&self, wavelength_nm: i64, value: i64) -> Result<(), DeviceError> {
        self.command(&format!("setWlRelPower {wavelength_nm} {value}"))
            .await?;
        Ok(())
    }

    fn metric_style(&self) -> MetricStyle {
        MetricStyle {
            measurement: "heliospectra-light",
            labeled_intensities: true,
        }
    }
}

impl TelnetLight {
    /// Channel labels as the device reports them (`getWl`), for callers
    /// that want to sanity-check the wavelength table.
    pub async fn wavelengths(&self) -> Result<Vec<String>, DeviceError> {
        let body = self.command("getWl").await?;
        Ok(parse_labels(&body))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
