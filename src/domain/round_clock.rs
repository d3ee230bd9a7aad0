//! Wall-clock to round mapping.
//!
//! Rounds are consecutive fixed-length windows counted from an epoch. The
//! first window starting at the epoch is round 1. This module is pure: the
//! round the engine believes it is in lives in the store and is advanced by
//! the rollover orchestrator.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::EngineError;

/// Boundaries of a single round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct RoundWindow {
    /// Round number (1 for the window starting at the epoch).
    pub number: i64,
    /// Inclusive start of the round.
    pub starts_at: DateTime<Utc>,
    /// Exclusive end of the round.
    pub ends_at: DateTime<Utc>,
}

impl RoundWindow {
    /// Returns `true` if `t` falls inside this window.
    #[must_use]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.starts_at <= t && t < self.ends_at
    }
}

/// Deterministic round calculator built from an epoch and a round length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundClock {
    epoch: DateTime<Utc>,
    duration: TimeDelta,
}

impl RoundClock {
    /// Creates a clock with rounds of `duration` starting at `epoch`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConfig`] if `duration` is shorter than
    /// one millisecond.
    pub fn new(epoch: DateTime<Utc>, duration: TimeDelta) -> Result<Self, EngineError> {
        if duration.num_milliseconds() <= 0 {
            return Err(EngineError::InvalidConfig(
                "round duration must be at least one millisecond".to_string(),
            ));
        }
        Ok(Self { epoch, duration })
    }

    /// The instant round 1 starts.
    #[must_use]
    pub const fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }

    /// Length of every round.
    #[must_use]
    pub const fn duration(&self) -> TimeDelta {
        self.duration
    }

    /// Maps a wall-clock instant to the round containing it.
    ///
    /// Instants before the epoch map to round 0 and below.
    #[must_use]
    pub fn round_for_time(&self, t: DateTime<Utc>) -> RoundWindow {
        let elapsed_ms = (t - self.epoch).num_milliseconds();
        let index = elapsed_ms.div_euclid(self.duration.num_milliseconds());
        self.window(index.saturating_add(1))
    }

    /// Returns the window of the given round number.
    #[must_use]
    pub fn window(&self, number: i64) -> RoundWindow {
        let length_ms = self.duration.num_milliseconds();
        let offset_ms = number.saturating_sub(1).saturating_mul(length_ms);
        let starts_at = self.epoch + TimeDelta::milliseconds(offset_ms);
        RoundWindow {
            number,
            starts_at,
            ends_at: starts_at + self.duration,
        }
    }
}
