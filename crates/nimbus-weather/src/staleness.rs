//! Turns update timestamps into the user-facing freshness status.

use serde::{Deserialize, Serialize};

const MS_PER_MINUTE: u64 = 60_000;

/// How the fallback branch measures staleness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StalenessBasis {
    /// Count consecutive fallback ticks as minutes. Approximate, but stable
    /// when the wall clock is unreliable.
    #[default]
    Ticks,
    /// Real elapsed time since the last successful update.
    WallClock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusMessage {
    NoDataYet,
    UpdatedJustNow,
    UpdatedOneMinuteAgo,
    UpdatedMinutesAgo(u64),
    UpdateFailedNoData,
}

impl std::fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusMessage::NoDataYet => write!(f, "No data yet"),
            StatusMessage::UpdatedJustNow => write!(f, "Updated just now"),
            StatusMessage::UpdatedOneMinuteAgo => write!(f, "Updated one minute ago"),
            StatusMessage::UpdatedMinutesAgo(n) => write!(f, "Updated {} minutes ago", n),
            StatusMessage::UpdateFailedNoData => write!(f, "Update failed, no data"),
        }
    }
}

fn from_minutes(minutes: u64) -> StatusMessage {
    match minutes {
        0 => StatusMessage::UpdatedJustNow,
        1 => StatusMessage::UpdatedOneMinuteAgo,
        n => StatusMessage::UpdatedMinutesAgo(n),
    }
}

/// Classify freshness from wall-clock time. `now` before `last_success`
/// (clock skew) counts as no time elapsed.
///
/// The streak is accepted so callers can pass their full state; wall-clock
/// classification ignores it. See [`classify_streak`] for the tick-based
/// measure.
pub fn classify(
    last_success_epoch_ms: u64,
    now_epoch_ms: u64,
    _offline_streak_ticks: u32,
) -> StatusMessage {
    if last_success_epoch_ms == 0 {
        return StatusMessage::NoDataYet;
    }
    let elapsed_minutes = now_epoch_ms.saturating_sub(last_success_epoch_ms) / MS_PER_MINUTE;
    from_minutes(elapsed_minutes)
}

/// Staleness on the fallback branch, using the offline streak as the minute
/// count.
pub fn classify_streak(offline_streak_ticks: u32) -> StatusMessage {
    from_minutes(u64::from(offline_streak_ticks))
}

/// Status for a tick that redisplays cached data.
pub fn classify_fallback(
    basis: StalenessBasis,
    last_success_epoch_ms: u64,
    now_epoch_ms: u64,
    offline_streak_ticks: u32,
) -> StatusMessage {
    match basis {
        StalenessBasis::Ticks => classify_streak(offline_streak_ticks),
        StalenessBasis::WallClock => {
            classify(last_success_epoch_ms, now_epoch_ms, offline_streak_ticks)
        }
    }
}
