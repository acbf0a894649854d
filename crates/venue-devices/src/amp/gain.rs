//! Gain conversions.
//!
//! A zone gain has three equivalent forms: a user-facing percentage, decibels
//! interpolated over the zone's [`GainRange`], and the device lookup-table
//! index (1..=249 in 0.5 dB steps from -100 dB; 0 is hard mute).

use serde::{Deserialize, Serialize};

/// Lowest addressable lookup-table index.
pub const LUT_MIN: u8 = 1;

/// Highest addressable lookup-table index (+24 dB).
pub const LUT_MAX: u8 = 249;

/// Hard-mute index. Never written for a soft mute.
pub const LUT_HARD_MUTE: u8 = 0;

/// Gain of lookup-table index 1.
pub const DB_FLOOR: f64 = -100.0;

/// Gain step between adjacent indices.
pub const DB_STEP: f64 = 0.5;

/// Decibel range a zone's percentage maps onto.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GainRange {
    pub min_db: f64,
    pub max_db: f64,
}

impl GainRange {
    pub fn new(min_db: f64, max_db: f64) -> Self {
        Self { min_db, max_db }
    }

    fn span(&self) -> f64 {
        self.max_db - self.min_db
    }
}

impl Default for GainRange {
    fn default() -> Self {
        Self {
            min_db: -80.0,
            max_db: 10.0,
        }
    }
}

/// Percentage (clamped to 0..=100) to decibels.
pub fn pct_to_db(pct: f64, range: GainRange) -> f64 {
    let pct = pct.clamp(0.0, 100.0);
    range.min_db + (pct / 100.0) * range.span()
}

/// Decibels to percentage, clamped to 0..=100.
pub fn db_to_pct(db: f64, range: GainRange) -> f64 {
    if range.span() == 0.0 {
        return 0.0;
    }
    ((db - range.min_db) / range.span() * 100.0).clamp(0.0, 100.0)
}

/// Decibels to lookup-table index, clamped to `LUT_MIN..=LUT_MAX`.
pub fn db_to_lut_index(db: f64) -> u8 {
    let index = ((db - DB_FLOOR) / DB_STEP).round() + 1.0;
    index.clamp(LUT_MIN as f64, LUT_MAX as f64) as u8
}

/// Lookup-table index to decibels.
pub fn lut_index_to_db(lut_index: u8) -> f64 {
    (lut_index as f64 - 1.0) * DB_STEP + DB_FLOOR
}

/// Percentage to lookup-table index.
pub fn pct_to_lut_index(pct: u8, range: GainRange) -> u8 {
    db_to_lut_index(pct_to_db(pct as f64, range))
}

/// Lookup-table index to the nearest whole percentage.
pub fn lut_index_to_pct(lut_index: u8, range: GainRange) -> u8 {
    db_to_pct(lut_index_to_db(lut_index), range).round() as u8
}

/// Round to one decimal place for reporting.
pub fn round_db(db: f64) -> f64 {
    (db * 10.0).round() / 10.0
}
