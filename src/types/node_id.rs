// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `NodeId` and `QualifiedName`.

use std::fmt;

/// The kind of identifier held by a node id, numeric or string
#[derive(Eq, PartialEq, Clone, Debug, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Identifier {
    Numeric(u32),
    String(String),
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(v) => write!(f, "i={}", v),
            Identifier::String(v) => write!(f, "s={}", v),
        }
    }
}

impl From<u32> for Identifier {
    fn from(v: u32) -> Self {
        Identifier::Numeric(v)
    }
}

impl From<i32> for Identifier {
    fn from(v: i32) -> Self {
        Identifier::Numeric(v as u32)
    }
}

impl<'a> From<&'a str> for Identifier {
    fn from(v: &'a str) -> Self {
        Identifier::String(v.to_string())
    }
}

impl From<String> for Identifier {
    fn from(v: String) -> Self {
        Identifier::String(v)
    }
}

/// An identifier for a node in the address space of an OPC UA Server.
#[derive(PartialEq, Eq, Clone, Debug, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    /// The index for a namespace
    pub namespace: u16,
    /// The identifier for the node in the address space
    pub identifier: Identifier,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};{}", self.namespace, self.identifier)
        } else {
            write!(f, "{}", self.identifier)
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        NodeId::null()
    }
}

impl NodeId {
    pub fn new<T>(namespace: u16, value: T) -> NodeId
    where
        T: Into<Identifier>,
    {
        NodeId {
            namespace,
            identifier: value.into(),
        }
    }

    /// Returns a null node id
    pub fn null() -> NodeId {
        NodeId::new(0, 0u32)
    }

    /// Test if the node id is null, i.e. 0 namespace and 0 identifier
    pub fn is_null(&self) -> bool {
        self.namespace == 0 && self.identifier == Identifier::Numeric(0)
    }

    /// Returns the numeric value of a namespace 0 node id, if it is one.
    pub fn as_ns0_numeric(&self) -> Option<u32> {
        match self.identifier {
            Identifier::Numeric(v) if self.namespace == 0 => Some(v),
            _ => None,
        }
    }
}

/// A name qualified by a namespace.
#[derive(PartialEq, Eq, Clone, Debug, Hash, Default, Serialize, Deserialize)]
pub struct QualifiedName {
    pub namespace_index: u16,
    pub name: String,
}

impl<'a> From<&'a str> for QualifiedName {
    fn from(value: &'a str) -> Self {
        QualifiedName::new(0, value)
    }
}

impl QualifiedName {
    pub fn new<T>(namespace_index: u16, name: T) -> QualifiedName
    where
        T: Into<String>,
    {
        QualifiedName {
            namespace_index,
            name: name.into(),
        }
    }

    pub fn null() -> QualifiedName {
        QualifiedName::default()
    }

    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && self.name.is_empty()
    }
}

/// Identifiers of namespace 0 types referred to by the subscription service set.
pub mod ids {
    pub const BOOLEAN: u32 = 1;
    pub const SBYTE: u32 = 2;
    pub const BYTE: u32 = 3;
    pub const INT16: u32 = 4;
    pub const UINT16: u32 = 5;
    pub const INT32: u32 = 6;
    pub const UINT32: u32 = 7;
    pub const INT64: u32 = 8;
    pub const UINT64: u32 = 9;
    pub const FLOAT: u32 = 10;
    pub const DOUBLE: u32 = 11;
    pub const STRING: u32 = 12;
    pub const NUMBER: u32 = 26;
    pub const INTEGER: u32 = 27;
    pub const UINTEGER: u32 = 28;
    pub const DECIMAL: u32 = 50;
    pub const BASE_EVENT_TYPE: u32 = 2041;
    pub const DATA_CHANGE_FILTER_ENCODING_DEFAULT_BINARY: u32 = 724;
    pub const EVENT_FILTER_ENCODING_DEFAULT_BINARY: u32 = 727;
    pub const AGGREGATE_FILTER_ENCODING_DEFAULT_BINARY: u32 = 730;

    /// Tests if the namespace 0 data type is `Number` or one of its built-in subtypes
    pub fn is_numeric_data_type(id: u32) -> bool {
        matches!(
            id,
            SBYTE..=DOUBLE | NUMBER | INTEGER | UINTEGER | DECIMAL
        )
    }
}

#[test]
fn node_id_display() {
    assert_eq!(NodeId::new(0, 2041u32).to_string(), "i=2041");
    assert_eq!(NodeId::new(2, "Demo.Static").to_string(), "ns=2;s=Demo.Static");
    assert!(NodeId::null().is_null());
    assert!(!NodeId::new(1, 0u32).is_null());
}

#[test]
fn numeric_data_types() {
    assert!(ids::is_numeric_data_type(ids::DOUBLE));
    assert!(ids::is_numeric_data_type(ids::SBYTE));
    assert!(ids::is_numeric_data_type(ids::UINTEGER));
    assert!(!ids::is_numeric_data_type(ids::BOOLEAN));
    assert!(!ids::is_numeric_data_type(ids::STRING));
}
