use chrono::{NaiveDateTime, TimeDelta};

use crate::environment::hour_of_day;

/// One advance of a [`SimClock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// 1-based tick count.
    pub index: u64,
    /// Simulated time after advancing.
    pub time: NaiveDateTime,
}

impl Tick {
    /// Fractional hour of the simulated day.
    pub fn hour(&self) -> f64 {
        hour_of_day(self.time.time())
    }

    /// Simulated time as epoch milliseconds, reading the naive time as UTC.
    pub fn timestamp_ms(&self) -> i64 {
        self.time.and_utc().timestamp_millis()
    }

    /// Whether a periodic summary is due: on the first tick and every `every`.
    pub fn is_summary(&self, every: u64) -> bool {
        self.index == 1 || (every > 0 && self.index % every == 0)
    }
}

/// A simulated wall clock advanced by a fixed step per tick.
///
/// # Examples
///
/// ```
/// use chrono::NaiveDate;
/// use der_sim::sim::clock::SimClock;
///
/// let start = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap().and_hms_opt(12, 0, 0).unwrap();
/// let mut clock = SimClock::new(start, 5.0).with_limit(3);
/// let mut indices = Vec::new();
///
/// clock.run(|tick| indices.push(tick.index));
/// assert_eq!(indices, vec![1, 2, 3]);
/// assert_eq!(clock.now(), start + chrono::TimeDelta::seconds(15));
/// ```
#[derive(Debug, Clone)]
pub struct SimClock {
    now: NaiveDateTime,
    step: TimeDelta,
    ticks: u64,
    /// Stop after this many ticks; `None` runs forever.
    limit: Option<u64>,
}

impl SimClock {
    /// Creates a clock at `start` that advances `step_seconds` per tick.
    ///
    /// # Arguments
    ///
    /// * `start` - Simulated time before the first tick
    /// * `step_seconds` - Simulated seconds per tick; non-positive values stall the clock
    pub fn new(start: NaiveDateTime, step_seconds: f64) -> Self {
        let step_ms = if step_seconds.is_finite() && step_seconds > 0.0 {
            (step_seconds * 1000.0).round() as i64
        } else {
            0
        };
        Self {
            now: start,
            step: TimeDelta::milliseconds(step_ms),
            ticks: 0,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn step_seconds(&self) -> f64 {
        self.step.num_milliseconds() as f64 / 1000.0
    }

    /// Advances by one step.
    ///
    /// # Returns
    ///
    /// * `Some(tick)` - The new tick count and simulated time
    /// * `None` - If the tick limit has been reached
    pub fn tick(&mut self) -> Option<Tick> {
        if self.limit.is_some_and(|limit| self.ticks >= limit) {
            return None;
        }
        self.now += self.step;
        self.ticks += 1;
        Some(Tick {
            index: self.ticks,
            time: self.now,
        })
    }

    /// Calls `f` for every remaining tick. Never returns without a limit.
    pub fn run(&mut self, mut f: impl FnMut(Tick)) {
        while let Some(tick) = self.tick() {
            f(tick);
        }
    }
}
