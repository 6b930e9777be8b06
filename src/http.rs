//! HTTP/XML adapter. The fixture exposes `GET /status.xml` for state and
//! `GET /intensity.cgi?int=v1:v2:...:vN` for control; the CGI response
//! body carries nothing useful, so only the status code is checked.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Url;

use crate::device::{DeviceError, LightDevice, MetricStyle};
use crate::fixture::{label_wavelength, FixtureFamily};
use crate::status::{decode_status_xml, StatusSnapshot};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpLight {
    client: reqwest::Client,
    status_url: Url,
    intensity_url: Url,
}

impl HttpLight {
    /// Accepts a bare host (`192.168.1.3`) or a URL; the scheme is forced
    /// to plain http and any path or query is discarded.
    pub fn new(address: &str) -> Result<Self> {
        let address = address.trim();
        let base = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let mut url = Url::parse(&base).with_context(|| format!("bad device address {address:?}"))?;
        url.set_scheme("http")
            .map_err(|_| anyhow!("bad device address {address:?}"))?;
        url.set_path("/");
        url.set_query(None);

        let status_url = url.join("status.xml")?;
        let intensity_url = url.join("intensity.cgi")?;

        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("building http client")?;

        Ok(Self {
            client,
            status_url,
            intensity_url,
        })
    }
}

#[async_trait]
impl LightDevice for HttpLight {
    async fn read_status(&self) -> Result<StatusSnapshot, DeviceError> {
        let resp = self
            .client
            .get(self.status_url.clone())
            .send()
            .await?
            .error_for_status()?;
        let body = resp.bytes().await?;
        decode_status_xml(&body).map_err(|e| DeviceError::Protocol(format!("status.xml: {e:#}")))
    }

    async fn set_all(&self, values: &[i64]) -> Result<(), DeviceError> {
        let joined = values
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(":");
        self.client
            .get(self.intensity_url.clone())
            .query(&[("int", joined.as_str())])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// The CGI has no single-channel form, so this reads the current
    /// vector, swaps one slot, and writes the whole thing back.
    async fn set_one(&self, wavelength_nm: i64, value: i64) -> Result<(), DeviceError> {
        let status = self.read_status().await?;
        let family = FixtureFamily::from_channel_count(status.intensities.len()).ok_or_else(|| {
            DeviceError::Protocol(format!(
                "unrecognized channel count {} from device",
                status.intensities.len()
            ))
        })?;
        let idx = family
            .labels()
            .iter()
            .position(|l| label_wavelength(l) == Some(wavelength_nm))
            .ok_or_else(|| {
                DeviceError::Protocol(format!("no {wavelength_nm}nm channel on a {family} fixture"))
            })?;
        let mut values = status.intensities;
        values[idx] = value;
        self.set_all(&values).await
    }

    fn metric_style(&self) -> MetricStyle {
        MetricStyle {
            measurement: "heliospectra2",
            labeled_intensities: false,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host_becomes_http_urls() {
        let light = HttpLight::new("192.168.1.3").unwrap();
        assert_eq!(light.status_url.as_str(), "http://192.168.1.3/status.xml");
        assert_eq!(
            light.intensity_url.as_str(),
            "http://192.168.1.3/intensity.cgi"
        );
    }

    #[test]
    fn url_address_is_normalized() {
        let light = HttpLight::new("https://light.example.com/some/path?x=1").unwrap();
        assert_eq!(
            light.status_url.as_str(),
            "http://light.example.com/status.xml"
        );
    }

    #[test]
    fn whitespace_is_trimmed() {
        let light = HttpLight::new("  192.168.1.3 ").unwrap();
        assert_eq!(light.status_url.host_str(), Some("192.168.1.3"));
    }

    #[test]
    fn empty_address_is_rejected() {
        assert!(HttpLight::new("").is_err());
    }
}
