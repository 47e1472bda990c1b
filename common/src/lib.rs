// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Common Modul for the position relay
//!
//! Provides the common data types that are used across every modul.

pub mod fix;
pub mod serde;
pub mod wire;
