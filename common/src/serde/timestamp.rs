// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use chrono::{DateTime, Utc};
use serde::{self, Deserialize, Deserializer, Serializer};

/// Serialize a UTC timestamp as epoch milliseconds.
///
/// The fan-out wire format transports capture times as integer epoch
/// milliseconds, so that is the representation used everywhere a
/// timestamp crosses a serialization boundary.
pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_i64(timestamp.timestamp_millis())
}

/// Deserialize epoch milliseconds into a `chrono::DateTime<Utc>`.
pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = i64::deserialize(deserializer)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid epoch milliseconds: {millis}")))
}
