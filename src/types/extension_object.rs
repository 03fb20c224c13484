// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `ExtensionObject`.

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::types::{
    filter::{DataChangeFilter, DataChangeTrigger},
    node_id::{ids, NodeId},
    status_code::StatusCode,
};

/// Enumeration that holds the kinds of encoding that an ExtensionObject data may be encoded with.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum ExtensionObjectEncoding {
    /// For an extension object with nothing encoded with it
    None,
    /// For an extension object with data encoded in a ByteString
    ByteString(Vec<u8>),
    /// For an extension object with data encoded in an XML string
    XmlElement(String),
}

/// An extension object holds a serialized object identified by its node id. The subscription
/// service set carries filters in this form and leaves their decoding to the address space.
#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionObject {
    pub node_id: NodeId,
    pub body: ExtensionObjectEncoding,
}

impl Default for ExtensionObject {
    fn default() -> Self {
        Self::null()
    }
}

impl ExtensionObject {
    /// Creates a null extension object, i.e. one with no value or payload
    pub fn null() -> ExtensionObject {
        ExtensionObject {
            node_id: NodeId::null(),
            body: ExtensionObjectEncoding::None,
        }
    }

    /// Tests for null node id.
    pub fn is_null(&self) -> bool {
        self.node_id.is_null()
    }

    /// Encodes a data change filter with its default binary encoding
    pub fn from_data_change_filter(filter: &DataChangeFilter) -> ExtensionObject {
        let mut body = Vec::with_capacity(16);
        // Writing into a Vec cannot fail
        let _ = body.write_i32::<LittleEndian>(filter.trigger as i32);
        let _ = body.write_u32::<LittleEndian>(filter.deadband_type);
        let _ = body.write_f64::<LittleEndian>(filter.deadband_value);
        ExtensionObject {
            node_id: NodeId::new(0, ids::DATA_CHANGE_FILTER_ENCODING_DEFAULT_BINARY),
            body: ExtensionObjectEncoding::ByteString(body),
        }
    }

    /// Decodes the body as a binary encoded data change filter.
    pub fn decode_data_change_filter(&self) -> Result<DataChangeFilter, StatusCode> {
        if self.node_id.as_ns0_numeric() != Some(ids::DATA_CHANGE_FILTER_ENCODING_DEFAULT_BINARY) {
            return Err(StatusCode::BadFilterNotAllowed);
        }
        let ExtensionObjectEncoding::ByteString(body) = &self.body else {
            return Err(StatusCode::BadMonitoredItemFilterInvalid);
        };
        let mut stream = Cursor::new(body.as_slice());
        let decoded = (|| -> std::io::Result<(i32, u32, f64)> {
            let trigger = stream.read_i32::<LittleEndian>()?;
            let deadband_type = stream.read_u32::<LittleEndian>()?;
            let deadband_value = stream.read_f64::<LittleEndian>()?;
            Ok((trigger, deadband_type, deadband_value))
        })();
        let (trigger, deadband_type, deadband_value) = decoded.map_err(|err| {
            error!("Cannot decode data change filter, {}", err);
            StatusCode::BadMonitoredItemFilterInvalid
        })?;
        if stream.position() as usize != body.len() {
            error!("Data change filter has trailing bytes");
            return Err(StatusCode::BadMonitoredItemFilterInvalid);
        }
        let trigger = DataChangeTrigger::from_i32(trigger).ok_or_else(|| {
            error!("Data change filter has invalid trigger {}", trigger);
            StatusCode::BadMonitoredItemFilterInvalid
        })?;
        Ok(DataChangeFilter {
            trigger,
            deadband_type,
            deadband_value,
        })
    }
}

#[test]
fn data_change_filter_body() {
    let filter = DataChangeFilter {
        trigger: DataChangeTrigger::StatusValueTimestamp,
        deadband_type: 1,
        deadband_value: 2.5,
    };
    let obj = ExtensionObject::from_data_change_filter(&filter);
    assert_eq!(obj.decode_data_change_filter().unwrap(), filter);

    let truncated = ExtensionObject {
        node_id: obj.node_id.clone(),
        body: ExtensionObjectEncoding::ByteString(vec![1, 0, 0, 0]),
    };
    assert_eq!(
        truncated.decode_data_change_filter().unwrap_err(),
        StatusCode::BadMonitoredItemFilterInvalid
    );
    assert_eq!(
        ExtensionObject::null().decode_data_change_filter().unwrap_err(),
        StatusCode::BadFilterNotAllowed
    );
}
