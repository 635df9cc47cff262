//! Time-of-day driven exogenous inputs: daylight, day/night profile, load bias.

use std::f64::consts::PI;
use std::fmt;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

/// Day or night operating profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Day,
    Night,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Day => f.write_str("day"),
            Profile::Night => f.write_str("night"),
        }
    }
}

/// Generator for the environmental inputs consumed by device models.
///
/// Hours are fractional hours of the local day in `[0, 24)`.
///
/// # Examples
///
/// ```
/// use der_sim::environment::{EnvironmentProfile, Profile};
///
/// let env = EnvironmentProfile::new(6.0, 18.0);
/// assert_eq!(env.daylight_fraction(12.0), 0.5);
/// assert_eq!(env.daylight_fraction(3.0), 0.0);
/// assert_eq!(env.active_profile(23.0, None), Profile::Night);
/// assert_eq!(env.active_profile(23.0, Some(Profile::Day)), Profile::Day);
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentProfile {
    /// Hour at which PV output starts.
    pub sunrise_hour: f64,
    /// Hour at which PV output ends.
    pub sunset_hour: f64,
    /// Start of the time-derived day profile (inclusive).
    pub day_start_hour: f64,
    /// End of the time-derived day profile (exclusive).
    pub day_end_hour: f64,
}

impl Default for EnvironmentProfile {
    fn default() -> Self {
        Self::new(6.0, 18.0)
    }
}

impl EnvironmentProfile {
    /// Creates a profile whose day window equals the daylight window.
    pub fn new(sunrise_hour: f64, sunset_hour: f64) -> Self {
        Self {
            sunrise_hour,
            sunset_hour,
            day_start_hour: sunrise_hour,
            day_end_hour: sunset_hour,
        }
    }

    pub fn with_day_window(mut self, start_hour: f64, end_hour: f64) -> Self {
        self.day_start_hour = start_hour;
        self.day_end_hour = end_hour;
        self
    }

    /// Linear position within the sunrise..sunset window, zero outside it.
    pub fn daylight_fraction(&self, hour: f64) -> f64 {
        let span = self.sunset_hour - self.sunrise_hour;
        if !hour.is_finite() || span <= 0.0 {
            return 0.0;
        }
        if hour <= self.sunrise_hour || hour >= self.sunset_hour {
            return 0.0;
        }
        ((hour - self.sunrise_hour) / span).clamp(0.0, 1.0)
    }

    /// The profile in force: an explicit override wins over time of day.
    pub fn active_profile(&self, hour: f64, override_profile: Option<Profile>) -> Profile {
        if let Some(profile) = override_profile {
            return profile;
        }
        if hour >= self.day_start_hour && hour < self.day_end_hour {
            Profile::Day
        } else {
            Profile::Night
        }
    }

    /// Demand bias for the given profile.
    ///
    /// Day ranges over [0.75, 1.25] peaking at 13:00; night ranges over
    /// [0.4, 0.6] peaking at 03:00 and changes slowly across the evening.
    pub fn load_multiplier(&self, hour: f64, profile: Profile) -> f64 {
        let hour = if hour.is_finite() { hour.rem_euclid(24.0) } else { 0.0 };
        match profile {
            Profile::Day => 1.0 + 0.25 * (2.0 * PI * (hour - 13.0) / 24.0).cos(),
            Profile::Night => 0.5 + 0.1 * (2.0 * PI * (hour - 3.0) / 24.0).cos(),
        }
    }
}

/// Fractional hour of day for a wall-clock time.
pub fn hour_of_day(time: NaiveTime) -> f64 {
    time.hour() as f64 + time.minute() as f64 / 60.0 + time.second() as f64 / 3600.0
}
