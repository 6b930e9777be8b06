//! The control loop. Two mutually exclusive modes, chosen at startup:
//! a periodic metrics tick (read → publish), or schedule-driven dispatch
//! where the runner hands us one timepoint at a time and we answer
//! advance/retry. For a given timepoint the read precedes the writes
//! precedes the publish, and no two timepoints are ever in flight.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::device::LightDevice;
use crate::fixture::{label_wavelength, FixtureFamily};
use crate::metrics::{snapshot_measurement, MetricsClient};
use crate::schedule::TimePoint;
use crate::setpoint::project;
use crate::status::StatusSnapshot;

/// Wait before asking the runner to retry after a failed status read.
const READ_RETRY_DELAY: Duration = Duration::from_secs(5);
/// The fixture rate-limits its control surface; give it a beat between
/// consecutive single-channel writes.
const WRITE_GAP: Duration = Duration::from_millis(200);
const PUBLISH_ATTEMPTS: u32 = 5;
const PUBLISH_RETRY_DELAY: Duration = Duration::from_millis(200);

pub struct Controller {
    device: Box<dyn LightDevice>,
    metrics: Option<MetricsClient>,
    multiplier: f64,
    interval: Duration,
}

impl Controller {
    pub fn new(
        device: Box<dyn LightDevice>,
        metrics: Option<MetricsClient>,
        multiplier: f64,
        interval: Duration,
    ) -> Self {
        Self {
            device,
            metrics,
            multiplier,
            interval,
        }
    }

    // -----------------------------------------------------------------
    // Metrics-only mode
    // -----------------------------------------------------------------

    /// One tick immediately, then every `interval`. A zero interval means
    /// one tick and return. Ticks are serialized; an overrunning tick
    /// delays the next one rather than overlapping it.
    pub async fn run_metrics_loop(&self) {
        self.metrics_tick().await;
        if self.interval.is_zero() {
            info!("zero interval, single tick done");
            return;
        }

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.metrics_tick().await;
        }
    }

    /// A lone failed read is logged and skipped; the ticker carries on.
    async fn metrics_tick(&self) {
        match self.device.read_status().await {
            Ok(snap) => self.publish_with_retry(&snap).await,
            Err(e) => error!("status read failed: {e}"),
        }
    }

    // -----------------------------------------------------------------
    // Schedule-driven mode
    // -----------------------------------------------------------------

    /// Execute one schedule row. Returns true to advance the schedule
    /// cursor, false to have the runner retry this row.
    pub async fn run_timepoint(&self, tp: TimePoint) -> bool {
        // READ
        let mut snap = match self.device.read_status().await {
            Ok(s) => s,
            Err(e) => {
                error!("status read failed: {e}");
                tokio::time::sleep(READ_RETRY_DELAY).await;
                return false;
            }
        };
        let Some(family) = FixtureFamily::from_channel_count(snap.intensities.len()) else {
            error!(
                channels = snap.intensities.len(),
                "unrecognized channel count from device"
            );
            return false;
        };

        // PROJECT + WRITE
        let projection = project(&tp.channels, &snap.intensities, self.multiplier);
        if projection.use_set_all() {
            if let Err(e) = self.device.set_all(&projection.targets).await {
                error!("set_all failed: {e}");
                return false;
            }
        } else {
            // Untouched channels must keep their exact current value, so
            // write only the explicitly-commanded ones, one at a time.
            let labels = family.labels();
            let mut first = true;
            for (i, (&value, &explicit)) in
                projection.targets.iter().zip(&projection.explicit).enumerate()
            {
                if !explicit {
                    continue;
                }
                let Some(wl) = label_wavelength(labels[i]) else {
                    warn!(label = labels[i], "channel label has no wavelength, skipping");
                    continue;
                };
                if !first {
                    tokio::time::sleep(WRITE_GAP).await;
                }
                first = false;
                if let Err(e) = self.device.set_one(wl, value).await {
                    error!(wavelength = wl, "set_one failed, skipping channel: {e}");
                }
            }
        }

        // PUBLISH
        snap.target_intensities = projection.targets;
        snap.executed_timepoint = true;
        info!(
            at = %tp.datetime,
            family = %family,
            targets = ?snap.target_intensities,
            "timepoint executed"
        );
        self.publish_with_retry(&snap).await;
        true
    }

    /// Publish with a short retry budget. Exhaustion is logged but never
    /// fails the timepoint; control writes already happened.
    async fn publish_with_retry(&self, snap: &StatusSnapshot) {
        let Some(client) = &self.metrics else {
            return;
        };
        let measurement = snapshot_measurement(self.device.metric_style(), snap);
        for attempt in 1..=PUBLISH_ATTEMPTS {
            match client.publish(&measurement).await {
                Ok(()) => return,
                Err(e) => {
                    error!(attempt, "metrics publish failed: {e:#}");
                    tokio::time::sleep(PUBLISH_RETRY_DELAY).await;
                }
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceError, MetricStyle};
    use crate::schedule::NULL_TARGET_F64;
    use async_trait::async_trait;
    use chrono::NaiveDateTime;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        SetAll(Vec<i64>),
        SetOne(i64, i64),
    }

    /// Scripted device: a queue of read results plus a call recorder.
    struct MockDevice {
        reads: Mutex<Vec<Result<StatusSnapshot, DeviceError>>>,
        calls: Mutex<Vec<Call>>,
        fail_set_all: bool,
    }

    impl MockDevice {
        fn reading(intensities: Vec<i64>) -> Self {
            let snap = StatusSnapshot {
                intensities,
                light_ok: true,
                ..StatusSnapshot::default()
            };
            Self {
                reads: Mutex::new(vec![Ok(snap)]),
                calls: Mutex::new(Vec::new()),
                fail_set_all: false,
            }
        }

        fn failing_read() -> Self {
            Self {
                reads: Mutex::new(vec![Err(DeviceError::Transport("unreachable".into()))]),
                calls: Mutex::new(Vec::new()),
                fail_set_all: false,
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LightDevice for MockDevice {
        async fn read_status(&self) -> Result<StatusSnapshot, DeviceError> {
            let mut reads = self.reads.lock().unwrap();
            if reads.is_empty() {
                return Err(DeviceError::Transport("script exhausted".into()));
            }
            reads.remove(0)
        }

        async fn set_all(&self, values: &[i64]) -> Result<(), DeviceError> {
            if self.fail_set_all {
                return Err(DeviceError::Protocol("ERR".into()));
            }
            self.calls.lock().unwrap().push(Call::SetAll(values.to_vec()));
            Ok(())
        }

        async fn set_one(&self, wavelength_nm: i64, value: i64) -> Result<(), DeviceError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::SetOne(wavelength_nm, value));
            Ok(())
        }

        fn metric_style(&self) -> MetricStyle {
            MetricStyle {
                measurement: "heliospectra2",
                labeled_intensities: false,
            }
        }
    }

    fn timepoint(channels: Vec<f64>) -> TimePoint {
        TimePoint {
            datetime: NaiveDateTime::parse_from_str("2023-06-01T12:00:00", "%Y-%m-%dT%H:%M:%S")
                .unwrap(),
            channels,
        }
    }

    fn controller(device: MockDevice) -> (Controller, std::sync::Arc<MockDevice>) {
        let device = std::sync::Arc::new(device);
        let boxed: Box<dyn LightDevice> = Box::new(SharedDevice(device.clone()));
        (
            Controller::new(boxed, None, 10.0, Duration::from_secs(600)),
            device,
        )
    }

    /// Box-able handle so the test can keep inspecting the mock after
    /// handing ownership to the controller.
    struct SharedDevice(std::sync::Arc<MockDevice>);

    #[async_trait]
    impl LightDevice for SharedDevice {
        async fn read_status(&self) -> Result<StatusSnapshot, DeviceError> {
            self.0.read_status().await
        }
        async fn set_all(&self, values: &[i64]) -> Result<(), DeviceError> {
            self.0.set_all(values).await
        }
        async fn set_one(&self, wavelength_nm: i64, value: i64) -> Result<(), DeviceError> {
            self.0.set_one(wavelength_nm, value).await
        }
        fn metric_style(&self) -> MetricStyle {
            self.0.metric_style()
        }
    }

    // -- run_timepoint -----------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn read_failure_requests_retry() {
        let (ctl, device) = controller(MockDevice::failing_read());
        assert!(!ctl.run_timepoint(timepoint(vec![1.0; 7])).await);
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_channel_count_requests_retry() {
        let (ctl, device) = controller(MockDevice::reading(vec![0, 0, 0]));
        assert!(!ctl.run_timepoint(timepoint(vec![1.0; 7])).await);
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn clean_row_issues_one_set_all() {
        let (ctl, device) = controller(MockDevice::reading(vec![0; 7]));
        let ok = ctl
            .run_timepoint(timepoint(vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0]))
            .await;
        assert!(ok);
        assert_eq!(
            device.calls(),
            vec![Call::SetAll(vec![100, 200, 300, 400, 500, 600, 700])]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_row_issues_per_channel_writes() {
        // Channel 3 (450nm on an S7) says "leave unchanged".
        let mut channels = vec![10.0; 7];
        channels[2] = NULL_TARGET_F64;
        let (ctl, device) = controller(MockDevice::reading(vec![5; 7]));
        assert!(ctl.run_timepoint(timepoint(channels)).await);

        let calls = device.calls();
        assert_eq!(calls.len(), 6, "six explicit channels: {calls:?}");
        assert!(calls.contains(&Call::SetOne(400, 100)));
        assert!(calls.contains(&Call::SetOne(735, 100)));
        assert!(!calls.iter().any(|c| matches!(c, Call::SetOne(450, _))));
        assert!(!calls.iter().any(|c| matches!(c, Call::SetAll(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn fewer_targets_than_channels_commands_a_prefix_and_advances() {
        // A 5-wide row against an S7; the first five
        // channels are written individually, the rest stay untouched, and
        // the runner is told to advance.
        let (ctl, device) = controller(MockDevice::reading(vec![0; 7]));
        let ok = ctl
            .run_timepoint(timepoint(vec![1.0, 2.0, 3.0, 4.0, 5.0]))
            .await;
        assert!(ok);
        assert_eq!(
            device.calls(),
            vec![
                Call::SetOne(400, 10),
                Call::SetOne(420, 20),
                Call::SetOne(450, 30),
                Call::SetOne(530, 40),
                Call::SetOne(630, 50),
            ]
        );
    }

    #[tokio::test]
    async fn set_all_failure_requests_retry() {
        let mut device = MockDevice::reading(vec![0; 7]);
        device.fail_set_all = true;
        let (ctl, device) = controller(device);
        assert!(!ctl.run_timepoint(timepoint(vec![1.0; 7])).await);
        assert!(device.calls().is_empty());
    }

    // -- metrics loop ------------------------------------------------------

    #[tokio::test]
    async fn zero_interval_runs_one_tick_and_returns() {
        // --interval=0s means one tick, then exit.
        let device = std::sync::Arc::new(MockDevice::reading(vec![0; 7]));
        let ctl = Controller::new(
            Box::new(SharedDevice(device.clone())),
            None,
            10.0,
            Duration::ZERO,
        );
        // Must complete rather than hang on a ticker.
        ctl.run_metrics_loop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn metrics_loop_survives_failed_reads() {
        // First read fails, the loop must keep ticking to the next one.
        let device = std::sync::Arc::new(MockDevice {
            reads: Mutex::new(vec![
                Err(DeviceError::Transport("unreachable".into())),
                Ok(StatusSnapshot::default()),
            ]),
            calls: Mutex::new(Vec::new()),
            fail_set_all: false,
        });
        let ctl = Controller::new(
            Box::new(SharedDevice(device.clone())),
            None,
            10.0,
            Duration::from_secs(600),
        );
        tokio::select! {
            _ = ctl.run_metrics_loop() => panic!("metrics loop should never return"),
            _ = tokio::time::sleep(Duration::from_secs(1900)) => {}
        }
        assert!(device.reads.lock().unwrap().is_empty(), "both reads consumed");
    }
}
