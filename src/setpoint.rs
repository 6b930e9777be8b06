//! Projection of a schedule row onto the fixture's channels: multiplier,
//! clamp to the device's 0..=1000 range, null/negative fallback to the
//! current value, and reconciliation when the row and the fixture disagree
//! about the channel count.

use tracing::warn;

use crate::schedule::NULL_TARGET_F64;

pub const INTENSITY_MAX: i64 = 1000;

/// The projected targets plus what the writer needs to know about them.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// One entry per commanded channel (`min(len(row), len(current))`).
    /// Fallback entries hold the channel's current value unchanged.
    pub targets: Vec<i64>,
    /// `explicit[i]` is false where the row said "leave this channel
    /// alone" (null sentinel or negative target).
    pub explicit: Vec<bool>,
    pub has_fallback: bool,
    pub width_mismatch: bool,
}

impl Projection {
    /// A single `set_all` is only safe when every channel is explicitly
    /// commanded and the widths agree; otherwise untouched channels must
    /// be preserved exactly via per-channel writes.
    pub fn use_set_all(&self) -> bool {
        !self.has_fallback && !self.width_mismatch
    }
}

/// Project a schedule row `channels` onto the observed `current`
/// intensities. Values are scaled by `multiplier`, truncated toward zero,
/// and clamped to the device range.
pub fn project(channels: &[f64], current: &[i64], multiplier: f64) -> Projection {
    if channels.len() < current.len() {
        warn!(
            targets = channels.len(),
            channels = current.len(),
            "fewer targets than channels, trailing channels left unchanged"
        );
    } else if channels.len() > current.len() {
        warn!(
            targets = channels.len(),
            channels = current.len(),
            "more targets than channels, extra targets discarded"
        );
    }

    let n = channels.len().min(current.len());
    let mut targets = Vec::with_capacity(n);
    let mut explicit = Vec::with_capacity(n);
    let mut has_fallback = false;

    for i in 0..n {
        let c = channels[i];
        if c == NULL_TARGET_F64 || c < 0.0 {
            targets.push(current[i]);
            explicit.push(false);
            has_fallback = true;
        } else {
            targets.push(((c * multiplier) as i64).clamp(0, INTENSITY_MAX));
            explicit.push(true);
        }
    }

    Projection {
        targets,
        explicit,
        has_fallback,
        width_mismatch: channels.len() != current.len(),
    }
}

// ===========================================================================
// Tests
// ===========================================================================
