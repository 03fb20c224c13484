// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The OPC UA value types and service structures used by the subscription service set. Encoding
//! of these types belongs to the codec layer and is not implemented here.

pub mod attribute;
pub mod data_value;
pub mod date_time;
pub mod extension_object;
pub mod filter;
pub mod node_id;
pub mod notification_message;
pub mod numeric_range;
pub mod service_types;
pub mod status_code;
pub mod variant;

pub use self::{
    attribute::*, data_value::*, date_time::*, extension_object::*, filter::*, node_id::*,
    notification_message::*, numeric_range::*, service_types::*, status_code::*, variant::*,
};
