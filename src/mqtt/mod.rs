// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message Fabric (component B): the single MQTT connection, topic grammar,
//! inbound dispatch, and pending-rotation tracking.

pub mod dispatch;
pub mod fabric;
pub mod topics;

pub use fabric::{Fabric, RotationOutcome};
