// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::fix::{Fix, FixSource};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Message type tag of a broadcast position update.
pub const GPS_UPDATE_TYPE: &str = "gps_update";

/// Envelope of one fan-out wire message.
///
/// Every published [`Fix`] is sent to every open subscriber as exactly one
/// of these envelopes, serialized as JSON:
///
/// `{"type":"gps_update","payload":{"lat":..,"lng":..,"humidity":..,"temperature":..,"timestamp":..}}`
///
/// The optional fields are omitted entirely when the fix does not carry
/// them. The timestamp is transported as epoch milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsUpdate {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: GpsUpdatePayload,
}

/// Payload of a [`GpsUpdate`] envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GpsUpdatePayload {
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub timestamp: i64,
}

impl GpsUpdate {
    /// Builds the wire envelope for one published [`Fix`].
    pub fn from_fix(fix: &Fix) -> GpsUpdate {
        GpsUpdate {
            kind: GPS_UPDATE_TYPE.to_string(),
            payload: GpsUpdatePayload {
                lat: fix.latitude(),
                lng: fix.longitude(),
                humidity: fix.humidity(),
                temperature: fix.temperature(),
                timestamp: fix.captured_at().timestamp_millis(),
            },
        }
    }

    /// Converts a received envelope back into a [`Fix`] tagged as
    /// [`FixSource::External`].
    ///
    /// Returns `None` when the message type tag is not
    /// [`GPS_UPDATE_TYPE`] or the timestamp is out of range.
    pub fn to_fix(&self) -> Option<Fix> {
        if self.kind != GPS_UPDATE_TYPE {
            return None;
        }
        let captured_at = DateTime::from_timestamp_millis(self.payload.timestamp)?;
        Some(Fix::new(
            self.payload.lat,
            self.payload.lng,
            self.payload.humidity,
            self.payload.temperature,
            FixSource::External,
            &captured_at,
        ))
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
