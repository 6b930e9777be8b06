//! Conditions schedule: a CSV table of wall-clock timepoints with
//! per-channel targets, and the runner that walks it in real time.
//!
//! The runner owns the only active thread in schedule-driven mode. It
//! executes the most recent already-past row once at startup (so the light
//! lands in the right state after a restart), then sleeps until each future
//! row and hands it to the control loop. A `false` from the handler means
//! "retry this row after a backoff"; the runner gives up on a row once the
//! next one comes due so a dead device can never jam the cursor.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime, NaiveTime};
use tracing::{error, info, warn};

// Reserved channel values meaning "leave this channel unchanged". No real
// target is anywhere near -3.4e38, so the conditions table can use it as
// an in-band null. Negative targets mean the same thing.
pub const NULL_TARGET_F64: f64 = -(f32::MAX as f64);
pub const NULL_TARGET_I64: i64 = i32::MIN as i64;

const RETRY_BACKOFF: Duration = Duration::from_secs(5);
const FINAL_ROW_RETRIES: u32 = 5;
/// Upper bound on a single sleep so the runner re-checks the wall clock
/// (NTP steps, suspend/resume) instead of trusting one long timer.
const MAX_SLEEP_CHUNK: Duration = Duration::from_secs(60);

/// One row of the conditions table: a local wall-clock datetime plus the
/// per-channel target vector.
#[derive(Debug, Clone, PartialEq)]
pub struct TimePoint {
    pub datetime: NaiveDateTime,
    pub channels: Vec<f64>,
}

// ---------------------------------------------------------------------------
// CSV loading
// ---------------------------------------------------------------------------

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

/// Load and sort a conditions file. The header must carry a `datetime`
/// column and one or more `channel-N` columns; channels are ordered by N,
/// not by file position. Empty or unparseable cells become the null
/// sentinel; rows with a bad datetime are skipped with a warning.
pub fn load_conditions(path: &Path) -> Result<Vec<TimePoint>> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("opening conditions file {}", path.display()))?;

    let headers = rdr.headers().context("reading conditions header")?.clone();
    let datetime_col = headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case("datetime"))
        .context("conditions file has no datetime column")?;

    let mut channel_cols: Vec<(u32, usize)> = headers
        .iter()
        .enumerate()
        .filter_map(|(col, h)| {
            h.trim()
                .strip_prefix("channel-")
                .and_then(|n| n.parse().ok())
                .map(|n| (n, col))
        })
        .collect();
    channel_cols.sort_unstable();
    if channel_cols.is_empty() {
        bail!("conditions file has no channel-N columns");
    }

    let mut points = Vec::new();
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("conditions row {}", line + 2))?;
        let dt_str = record.get(datetime_col).unwrap_or("").trim();
        let Some(datetime) = parse_datetime(dt_str) else {
            warn!(row = line + 2, value = dt_str, "skipping row with bad datetime");
            continue;
        };
        let channels = channel_cols
            .iter()
            .map(|&(_, col)| {
                record
                    .get(col)
                    .map(str::trim)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(NULL_TARGET_F64)
            })
            .collect();
        points.push(TimePoint { datetime, channels });
    }

    if points.is_empty() {
        bail!("conditions file {} has no usable rows", path.display());
    }
    points.sort_by_key(|p| p.datetime);
    Ok(points)
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Walk the conditions table in wall-clock time, invoking `handler` for
/// each row. With `loop_first_day`, the first calendar day's rows are
/// re-projected onto every subsequent day, forever.
pub async fn run_conditions<F, Fut>(path: &Path, loop_first_day: bool, mut handler: F) -> Result<()>
where
    F: FnMut(TimePoint) -> Fut,
    Fut: Future<Output = bool>,
{
    let points = load_conditions(path)?;
    info!(
        rows = points.len(),
        loop_first_day,
        file = %path.display(),
        "conditions loaded"
    );

    if loop_first_day {
        run_looping(&points, &mut handler).await
    } else {
        run_once_through(&points, &mut handler).await
    }
}

async fn run_once_through<F, Fut>(points: &[TimePoint], handler: &mut F) -> Result<()>
where
    F: FnMut(TimePoint) -> Fut,
    Fut: Future<Output = bool>,
{
    let now = Local::now().naive_local();

    // Catch up: the last row already in the past defines the current state.
    let future_start = points.partition_point(|p| p.datetime <= now);
    if future_start > 0 {
        let tp = &points[future_start - 1];
        info!(at = %tp.datetime, "executing most recent past timepoint");
        let deadline = points.get(future_start).map(|p| p.datetime);
        run_with_retry(handler, tp.clone(), deadline).await;
    }

    for (i, tp) in points.iter().enumerate().skip(future_start) {
        sleep_until(tp.datetime).await;
        let deadline = points.get(i + 1).map(|p| p.datetime);
        run_with_retry(handler, tp.clone(), deadline).await;
    }

    info!("conditions finished");
    Ok(())
}

async fn run_looping<F, Fut>(points: &[TimePoint], handler: &mut F) -> Result<()>
where
    F: FnMut(TimePoint) -> Fut,
    Fut: Future<Output = bool>,
{
    let first_date = points[0].datetime.date();
    let day: Vec<(NaiveTime, Vec<f64>)> = points
        .iter()
        .take_while(|p| p.datetime.date() == first_date)
        .map(|p| (p.datetime.time(), p.channels.clone()))
        .collect();

    let mut date = Local::now().date_naive();
    let mut caught_up = false;
    loop {
        for (i, (time, channels)) in day.iter().enumerate() {
            let at = date.and_time(*time);
            let next = day
                .get(i + 1)
                .map(|(t, _)| date.and_time(*t))
                .or_else(|| date.succ_opt().map(|d| d.and_time(day[0].0)));

            let now = Local::now().naive_local();
            if at <= now {
                // Of today's already-past rows, run only the latest one.
                let next_is_past = next.map(|n| n <= now).unwrap_or(false);
                if caught_up || next_is_past {
                    continue;
                }
                info!(at = %at, "executing most recent past timepoint");
            } else {
                sleep_until(at).await;
            }
            caught_up = true;
            let tp = TimePoint {
                datetime: at,
                channels: channels.clone(),
            };
            run_with_retry(handler, tp, next).await;
        }
        date = date.succ_opt().context("schedule ran off the calendar")?;
    }
}

/// Retry a timepoint on handler failure until it succeeds or the next
/// timepoint comes due. The final row has no successor, so its retries
/// are bounded by a fixed attempt budget instead.
async fn run_with_retry<F, Fut>(handler: &mut F, tp: TimePoint, deadline: Option<NaiveDateTime>)
where
    F: FnMut(TimePoint) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut attempts: u32 = 0;
    loop {
        if handler(tp.clone()).await {
            return;
        }
        attempts += 1;
        match deadline {
            Some(d) if Local::now().naive_local() >= d => {
                error!(at = %tp.datetime, "giving up on timepoint, next one is due");
                return;
            }
            None if attempts >= FINAL_ROW_RETRIES => {
                error!(at = %tp.datetime, attempts, "giving up on final timepoint");
                return;
            }
            _ => {}
        }
        warn!(at = %tp.datetime, attempts, "timepoint failed, retrying");
        tokio::time::sleep(RETRY_BACKOFF).await;
    }
}

/// Sleep until a local wall-clock instant, in bounded chunks.
async fn sleep_until(at: NaiveDateTime) {
    loop {
        let now = Local::now().naive_local();
        if now >= at {
            return;
        }
        let remaining = (at - now).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(remaining.min(MAX_SLEEP_CHUNK)).await;
    }
}

// ===========================================================================
// Tests
// ===========================================================================
