// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies which positioning stream produced a [`Fix`].
///
/// `Device` marks a sample from the viewer's local positioning sensor,
/// `External` marks a sample relayed from the supervised sensor helper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixSource {
    Device,
    External,
}

/// Represents one structured position sample.
///
/// A fix always carries latitude and longitude in decimal degrees. The
/// humidity and temperature readings are optional, they are only present
/// when the producing sensor line supplied them. Fixes are immutable,
/// they are created once and shared as [`std::sync::Arc`] pointers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    latitude: f64,
    longitude: f64,
    humidity: Option<f64>,
    temperature: Option<f64>,
    source: FixSource,
    #[serde(with = "crate::serde::timestamp")]
    captured_at: DateTime<Utc>,
}

impl Fix {
    /// Creates a new [`Fix`] with the specified coordinates, optional
    /// sensor readings, source tag, and capture time.
    ///
    /// # Arguments
    ///
    /// * `latitude` – Latitude in decimal degrees. Positive for northern hemisphere.
    /// * `longitude` – Longitude in decimal degrees. Positive for eastern hemisphere.
    /// * `humidity` – Relative humidity in percent, when reported.
    /// * `temperature` – Temperature in degrees Celsius, when reported.
    /// * `source` – The positioning stream that produced the sample.
    /// * `captured_at` – Capture timestamp of the sample in UTC.
    ///
    /// # Returns
    ///
    /// A new `Fix` instance.
    pub fn new(
        latitude: f64,
        longitude: f64,
        humidity: Option<f64>,
        temperature: Option<f64>,
        source: FixSource,
        captured_at: &DateTime<Utc>,
    ) -> Fix {
        Fix {
            latitude,
            longitude,
            humidity,
            temperature,
            source,
            captured_at: *captured_at,
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Returns the latitude in decimal degrees.
    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    /// Returns the longitude in decimal degrees.
    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// Returns the relative humidity in percent, if the sample carried one.
    pub fn humidity(&self) -> Option<f64> {
        self.humidity
    }

    /// Returns the temperature in degrees Celsius, if the sample carried one.
    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    /// Returns the stream that produced this fix.
    pub fn source(&self) -> FixSource {
        self.source
    }

    /// Returns the capture timestamp of this fix in UTC.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}
