//! CLI flags and environment configuration. Every flag is also settable
//! by an environment variable, and the result is one immutable `Config`
//! handed to the control loop at startup.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};

use crate::duration::parse_go_duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transport {
    /// status.xml + intensity.cgi control surface.
    Http,
    /// Legacy line-shell control surface.
    Telnet,
}

#[derive(Debug, Parser)]
#[command(
    name = "helio-agent",
    about = "Control agent for Heliospectra multi-channel LED grow lights",
    version
)]
pub struct Args {
    /// Don't publish metrics to the collector.
    #[arg(long = "no-metrics", env = "NO_METRICS")]
    pub no_metrics: bool,

    /// Don't command the light, only collect metrics (implied by not
    /// specifying a conditions file).
    #[arg(long, env = "DUMMY")]
    pub dummy: bool,

    /// Loop the first day of the conditions file indefinitely.
    #[arg(long = "loop", env = "LOOP")]
    pub loop_first_day: bool,

    /// Host tag added to measurements (defaults to $NAME).
    #[arg(long = "host-tag", env = "HOST_TAG")]
    pub host_tag: Option<String>,

    /// Group tag added to measurements.
    #[arg(long = "group-tag", env = "GROUP_TAG", default_value = "nonspc")]
    pub group_tag: String,

    /// Deliverable id tag added to measurements.
    #[arg(long = "did-tag", env = "DID_TAG", default_value = "")]
    pub did_tag: String,

    /// Conditions file to run the light from.
    #[arg(long, env = "CONDITIONS_FILE")]
    pub conditions: Option<PathBuf>,

    /// Metrics cadence ("10m", "30s"); 0s reads one metric and exits.
    #[arg(long, env = "INTERVAL", default_value = "10m", value_parser = parse_interval)]
    pub interval: Duration,

    /// Scale applied to conditions channel values.
    #[arg(long, env = "MULTIPLIER", default_value_t = 10.0)]
    pub multiplier: f64,

    /// Which control surface the fixture speaks.
    #[arg(long, env = "TRANSPORT", value_enum, default_value_t = Transport::Http)]
    pub transport: Transport,

    /// Device host or URL.
    #[arg(env = "ADDRESS")]
    pub address: String,
}

fn parse_interval(s: &str) -> Result<Duration> {
    parse_go_duration(s)
}

/// Immutable runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub no_metrics: bool,
    pub dummy: bool,
    pub loop_first_day: bool,
    pub host_tag: String,
    pub group_tag: String,
    pub did_tag: String,
    pub conditions: Option<PathBuf>,
    pub interval: Duration,
    pub multiplier: f64,
    pub transport: Transport,
    pub address: String,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self> {
        if args.no_metrics && args.dummy {
            bail!("--dummy and --no-metrics specified, nothing to do");
        }
        if args.address.trim().is_empty() {
            bail!("device address is empty");
        }
        // The host tag falls back to the container/host name.
        let host_tag = args
            .host_tag
            .or_else(|| env::var("NAME").ok())
            .unwrap_or_default();

        Ok(Self {
            no_metrics: args.no_metrics,
            dummy: args.dummy,
            loop_first_day: args.loop_first_day,
            host_tag,
            group_tag: args.group_tag,
            did_tag: args.did_tag,
            conditions: args.conditions,
            interval: args.interval,
            multiplier: args.multiplier,
            transport: args.transport,
            address: args.address,
        })
    }

    /// Metrics-only mode: no conditions to run, or a dummy run that still
    /// wants metrics.
    pub fn metrics_only(&self) -> bool {
        !self.no_metrics && (self.conditions.is_none() || self.dummy)
    }

    /// Schedule-driven mode: a conditions file and permission to command.
    pub fn schedule_driven(&self) -> bool {
        self.conditions.is_some() && !self.dummy
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn minimal_invocation() {
        let cfg = Config::from_args(parse(&["helio-agent", "192.168.1.3"])).unwrap();
        assert_eq!(cfg.address, "192.168.1.3");
        assert_eq!(cfg.interval, Duration::from_secs(600));
        assert_eq!(cfg.multiplier, 10.0);
        assert_eq!(cfg.group_tag, "nonspc");
        assert_eq!(cfg.transport, Transport::Http);
        assert!(cfg.metrics_only());
        assert!(!cfg.schedule_driven());
    }

    #[test]
    fn go_style_interval() {
        let args = parse(&["helio-agent", "--interval", "1h30m0s", "192.168.1.3"]);
        assert_eq!(args.interval, Duration::from_secs(5400));
    }

    #[test]
    fn zero_interval_is_accepted() {
        let args = parse(&["helio-agent", "--interval", "0s", "192.168.1.3"]);
        assert!(args.interval.is_zero());
    }

    #[test]
    fn bad_interval_is_rejected() {
        assert!(Args::try_parse_from(["helio-agent", "--interval", "soon", "h"]).is_err());
    }

    #[test]
    fn dummy_plus_no_metrics_is_fatal() {
        let args = parse(&["helio-agent", "--dummy", "--no-metrics", "192.168.1.3"]);
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn missing_address_is_rejected() {
        assert!(Args::try_parse_from(["helio-agent"]).is_err());
    }

    #[test]
    fn conditions_without_dummy_is_schedule_driven() {
        let args = parse(&[
            "helio-agent",
            "--conditions",
            "gc03.csv",
            "192.168.1.3",
        ]);
        let cfg = Config::from_args(args).unwrap();
        assert!(cfg.schedule_driven());
        assert!(!cfg.metrics_only());
    }

    #[test]
    fn dummy_with_conditions_only_collects_metrics() {
        let args = parse(&[
            "helio-agent",
            "--dummy",
            "--conditions",
            "gc03.csv",
            "192.168.1.3",
        ]);
        let cfg = Config::from_args(args).unwrap();
        assert!(cfg.metrics_only());
        assert!(!cfg.schedule_driven());
    }

    #[test]
    fn explicit_host_tag_wins_over_env() {
        let args = parse(&["helio-agent", "--host-tag", "gc03", "192.168.1.3"]);
        let cfg = Config::from_args(args).unwrap();
        assert_eq!(cfg.host_tag, "gc03");
    }

    #[test]
    fn telnet_transport_is_selectable() {
        let args = parse(&["helio-agent", "--transport", "telnet", "192.168.1.3"]);
        assert_eq!(args.transport, Transport::Telnet);
    }
}
