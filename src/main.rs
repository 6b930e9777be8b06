//! Agent entry point: parse configuration, build the device adapter and
//! metrics client, then run exactly one of the two loop modes.

mod config;
mod control;
mod device;
mod duration;
mod fixture;
mod http;
mod metrics;
mod schedule;
mod setpoint;
mod status;
mod telnet;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::{Args, Config, Transport};
use control::Controller;
use device::LightDevice;
use http::HttpLight;
use metrics::MetricsClient;
use telnet::TelnetLight;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = Config::from_args(Args::parse())?;
    info!(
        address = %cfg.address,
        host_tag = %cfg.host_tag,
        group_tag = %cfg.group_tag,
        conditions = ?cfg.conditions,
        interval = ?cfg.interval,
        multiplier = cfg.multiplier,
        transport = ?cfg.transport,
        "starting"
    );

    let device: Box<dyn LightDevice> = match cfg.transport {
        Transport::Http => Box::new(HttpLight::new(&cfg.address)?),
        Transport::Telnet => {
            let light = TelnetLight::new(&cfg.address);
            // Best-effort: the shell can report its own channel labels.
            match light.wavelengths().await {
                Ok(wls) => info!(wavelengths = ?wls, "device channel labels"),
                Err(e) => warn!("could not read device wavelengths: {e}"),
            }
            Box::new(light)
        }
    };

    let metrics = (!cfg.no_metrics).then(|| {
        let client = MetricsClient::from_env(&cfg.host_tag, &cfg.group_tag, &cfg.did_tag);
        info!(collector = client.target(), "metrics enabled");
        client
    });

    let controller = Controller::new(device, metrics, cfg.multiplier, cfg.interval);

    if cfg.metrics_only() {
        controller.run_metrics_loop().await;
        return Ok(());
    }

    if cfg.schedule_driven() {
        if let Some(path) = &cfg.conditions {
            schedule::run_conditions(path, cfg.loop_first_day, |tp| controller.run_timepoint(tp))
                .await?;
        }
        return Ok(());
    }

    // no-metrics without a conditions file: nothing left to do.
    info!("metrics disabled and no conditions file, exiting");
    Ok(())
}
