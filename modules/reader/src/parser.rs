// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

use chrono::Utc;
use common::fix::{Fix, FixSource};

/// Marker that prefixes every position record on the helper's stdout.
///
/// Lines without this marker are diagnostic output of the helper and are
/// never turned into fixes.
pub const FIX_MARKER: &str = "GPS_DATA:";

/// Parses one line of helper output into a [`Fix`].
///
/// The expected record format is
/// `GPS_DATA:<lat>,<lng>[,<humidity>[,<temperature>]]` with numeric,
/// comma-separated fields. Latitude and longitude are required, the
/// trailing fields are optional and positional.
///
/// Returns `None` for lines without the marker, with fewer than two
/// fields, or with any non-numeric field. A dropped line never aborts
/// the stream, supervision simply continues with the next line.
pub fn parse_fix_line(line: &str) -> Option<Fix> {
    let data = line.trim().strip_prefix(FIX_MARKER)?;
    let fields: Vec<&str> = data.split(',').map(str::trim).collect();
    if fields.len() < 2 {
        return None;
    }
    let latitude: f64 = fields[0].parse().ok()?;
    let longitude: f64 = fields[1].parse().ok()?;
    let humidity = match fields.get(2) {
        Some(raw) => Some(raw.parse().ok()?),
        None => None,
    };
    let temperature = match fields.get(3) {
        Some(raw) => Some(raw.parse().ok()?),
        None => None,
    };
    Some(Fix::new(
        latitude,
        longitude,
        humidity,
        temperature,
        FixSource::External,
        &Utc::now(),
    ))
}
