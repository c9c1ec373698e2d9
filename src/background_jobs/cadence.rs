use chrono::{DateTime, Utc};
use std::time::Duration;

/// Upper bound on the scheduler tick.
pub const MAX_TICK: Duration = Duration::from_secs(60);

/// Per-job run bookkeeping owned by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cadence {
    pub interval: Duration,
    /// `None` until the first attempt; such a job is eligible immediately.
    pub next_eligible: Option<DateTime<Utc>>,
}

impl Cadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_eligible: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.interval.is_zero()
    }

    /// Due once `now` is strictly after the next eligible time.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_enabled() && self.next_eligible.map_or(true, |next| now > next)
    }

    /// Push the next eligible time one interval past `attempted_at`.
    pub fn advance(&mut self, attempted_at: DateTime<Utc>) {
        let interval = chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::MAX);
        self.next_eligible = Some(
            attempted_at
                .checked_add_signed(interval)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
    }
}

/// The loop period: the smallest positive interval, capped at [`MAX_TICK`].
pub fn tick_period<'a>(intervals: impl IntoIterator<Item = &'a Duration>) -> Duration {
    intervals
        .into_iter()
        .copied()
        .filter(|interval| !interval.is_zero())
        .fold(MAX_TICK, Duration::min)
}
