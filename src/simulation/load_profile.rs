//! # Load Profiles
//!
//! Diurnal demand curves per consumer class. Each curve is an hourly table,
//! linearly interpolated between hours and wrapping from 23:00 back to
//! midnight, so the multiplier is continuous and periodic over 24 hours.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

const SECONDS_PER_HOUR: f64 = 3600.0;
const HOURS_PER_DAY: f64 = 24.0;

#[rustfmt::skip]
const RESIDENTIAL: [f64; 24] = [
    0.45, 0.40, 0.35, 0.35, 0.40, 0.60, // night, slow wake-up
    1.10, 1.60, 1.50, 1.10, 0.95, 0.95, // morning peak: breakfast, showers
    1.00, 1.00, 0.95, 1.00, 1.20, 1.60, // daytime plateau
    1.90, 2.00, 1.80, 1.40, 0.90, 0.60, // evening peak: cooking, appliances
];

#[rustfmt::skip]
const COMMERCIAL: [f64; 24] = [
    0.30, 0.30, 0.30, 0.30, 0.30, 0.35,
    0.50, 0.90, 1.40, 1.70, 1.80, 1.80, // opening hours
    1.70, 1.80, 1.80, 1.70, 1.50, 1.20,
    0.90, 0.70, 0.50, 0.40, 0.35, 0.30,
];

#[rustfmt::skip]
const INDUSTRIAL: [f64; 24] = [
    0.60, 0.60, 0.60, 0.60, 0.60, 0.80,
    1.30, 1.50, 1.50, 1.50, 1.50, 1.50, // shift load is flat
    1.40, 1.50, 1.50, 1.50, 1.50, 1.40,
    1.10, 0.80, 0.70, 0.65, 0.60, 0.60,
];

#[rustfmt::skip]
const NIGHTLIFE: [f64; 24] = [
    1.80, 1.90, 1.70, 1.30, 0.80, 0.40,
    0.20, 0.20, 0.20, 0.20, 0.25, 0.30,
    0.40, 0.40, 0.40, 0.40, 0.50, 0.70,
    1.00, 1.30, 1.50, 1.70, 1.90, 2.00, // doors open late
];

/// Consumer load profile class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LoadProfile {
    /// Households: morning and evening peaks
    Residential,
    /// Shops and offices: business-hours plateau
    Commercial,
    /// Work shifts: flat and high through the day
    Industrial,
    /// Bars and venues: late-night peak
    Nightlife,
    /// Anything unrecognised, constant 1.0
    Flat,
}

impl LoadProfile {
    /// Map a profile class name onto a curve. Unknown names become [`LoadProfile::Flat`].
    pub fn from_class(class: &str) -> Self {
        class.trim().parse().unwrap_or(LoadProfile::Flat)
    }

    fn table(&self) -> Option<&'static [f64; 24]> {
        match self {
            LoadProfile::Residential => Some(&RESIDENTIAL),
            LoadProfile::Commercial => Some(&COMMERCIAL),
            LoadProfile::Industrial => Some(&INDUSTRIAL),
            LoadProfile::Nightlife => Some(&NIGHTLIFE),
            LoadProfile::Flat => None,
        }
    }

    /// Demand multiplier at a given hour of day. Always ≥ 0.
    pub fn multiplier(&self, hour: f64) -> f64 {
        let Some(table) = self.table() else {
            return 1.0;
        };
        if !hour.is_finite() {
            return table[0];
        }

        let h = hour.rem_euclid(HOURS_PER_DAY);
        // rem_euclid can round up to exactly 24.0 for tiny negative inputs
        let idx = (h.floor() as usize) % 24;
        let next = (idx + 1) % 24;
        let frac = (h - h.floor()).clamp(0.0, 1.0);

        let value = table[idx] + (table[next] - table[idx]) * frac;
        value.max(0.0)
    }
}

/// Multiplier for a profile class name at a given hour of day
pub fn multiplier(profile_class: &str, hour: f64) -> f64 {
    LoadProfile::from_class(profile_class).multiplier(hour)
}

/// Hour of day in [0, 24) for a simulation time in seconds
pub fn hour_of_day(sim_time_s: f64) -> f64 {
    let hour = (sim_time_s / SECONDS_PER_HOUR).rem_euclid(HOURS_PER_DAY);
    if hour >= HOURS_PER_DAY {
        0.0
    } else {
        hour
    }
}
