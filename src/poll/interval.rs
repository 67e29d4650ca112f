//! Polling interval policy - floors, per-tracker minimums and jitter

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;

/// No tracker is ever polled more often than this
pub const HARD_FLOOR: Duration = Duration::from_secs(900);

/// Configured intervals above this are capped
pub const MAX_INTERVAL: Duration = Duration::from_secs(30 * 24 * 3600);

/// Upper bound of the random startup spread for trackers without history
pub const STARTUP_SPREAD: Duration = Duration::from_secs(30);

/// Interval policy for a single tracker
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalPolicy {
    global: Duration,
    tracker_minimum: Duration,
    override_interval: Option<Duration>,
    jitter_ratio: f64,
}

impl IntervalPolicy {
    pub fn new(global: Duration, jitter_ratio: f64) -> Self {
        Self {
            global,
            tracker_minimum: Duration::ZERO,
            override_interval: None,
            jitter_ratio: if jitter_ratio.is_finite() {
                jitter_ratio.clamp(0.0, 0.25)
            } else {
                0.0
            },
        }
    }

    /// Same global settings, specialised for one tracker
    pub fn for_tracker(&self, minimum: Duration, override_interval: Option<Duration>) -> Self {
        Self {
            tracker_minimum: minimum,
            override_interval,
            ..self.clone()
        }
    }

    /// max(hard floor, global, tracker minimum, override), capped at [`MAX_INTERVAL`]
    pub fn effective(&self) -> Duration {
        [
            HARD_FLOOR,
            self.global,
            self.tracker_minimum,
            self.override_interval.unwrap_or(Duration::ZERO),
        ]
        .into_iter()
        .max()
        .unwrap_or(HARD_FLOOR)
        .min(MAX_INTERVAL)
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    /// Random extra delay in `[0, ratio * effective]`
    pub fn jitter_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let max = self.effective().as_secs_f64() * self.jitter_ratio;
        if max <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(rng.gen_range(0.0..=max))
    }

    /// Delay until the next cycle
    pub fn next_delay(&self) -> Duration {
        self.next_delay_with(&mut rand::thread_rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        self.effective().saturating_add(self.jitter_with(rng))
    }

    /// Delay before the first cycle after startup
    ///
    /// Honours the remainder of the interval since the last successful run,
    /// otherwise spreads trackers over a short window.
    pub fn startup_delay_with<R: Rng + ?Sized>(
        &self,
        last_run: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Duration {
        let mut spread =
            || Duration::from_secs_f64(rng.gen_range(0.0..=STARTUP_SPREAD.as_secs_f64()));

        let Some(last_run) = last_run else {
            return spread();
        };
        let elapsed = match (now - last_run).to_std() {
            Ok(elapsed) => elapsed,
            // last_run in the future (clock moved back): wait a full interval
            Err(_) => return self.effective(),
        };
        match self.effective().checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => remaining,
            _ => spread(),
        }
    }

    pub fn startup_delay(&self, last_run: Option<DateTime<Utc>>) -> Duration {
        self.startup_delay_with(last_run, Utc::now(), &mut rand::thread_rng())
    }
}
