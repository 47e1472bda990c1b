// SPDX-FileCopyrightText: 2026 All contributors
//
// SPDX-License-Identifier: GPL-2.0-or-later

//! Viewer library for the position relay
//!
//! Provides the viewer-side building blocks: a reconnecting WebSocket
//! subscriber for the fan-out stream and a reconciler that arbitrates
//! between the device position source and the external stream.

pub mod reconciler;
pub mod subscriber;
