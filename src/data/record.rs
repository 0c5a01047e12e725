//! One row of the controller log.

use crate::hardware::buchi::Readings;
use chrono::{DateTime, Local, SecondsFormat};

/// Column names of the CSV log.
pub const HEADER: [&str; 5] = ["Timestamp", "Power [%]", "T-J [°C]", "T-R [°C]", "T-S [°C]"];

/// Readings taken at one logging tick.
///
/// A field is `None` when its query failed during the tick.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    /// When the tick started
    pub timestamp: DateTime<Local>,
    /// Heating power being used (%)
    pub heating_power: Option<f64>,
    /// Bath temperature T-J (°C)
    pub temp_tj: Option<f64>,
    /// Pt100 sensor T-R (°C)
    pub temp_tr: Option<f64>,
    /// Safety sensor T-S (°C)
    pub temp_ts: Option<f64>,
}

impl SampleRecord {
    /// Build a record from readings, dropping failed values.
    pub fn from_readings(timestamp: DateTime<Local>, readings: &Readings) -> Self {
        Self {
            timestamp,
            heating_power: readings.heating_power.as_ref().ok().copied(),
            temp_tj: readings.temp_tj.as_ref().ok().copied(),
            temp_tr: readings.temp_tr.as_ref().ok().copied(),
            temp_ts: readings.temp_ts.as_ref().ok().copied(),
        }
    }

    /// True if every field was read.
    pub fn is_complete(&self) -> bool {
        self.heating_power.is_some()
            && self.temp_tj.is_some()
            && self.temp_tr.is_some()
            && self.temp_ts.is_some()
    }

    /// CSV cells in [`HEADER`] order; failed fields are empty.
    pub fn to_row(&self) -> [String; 5] {
        let cell = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        [
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, false),
            cell(self.heating_power),
            cell(self.temp_tj),
            cell(self.temp_tr),
            cell(self.temp_ts),
        ]
    }
}
