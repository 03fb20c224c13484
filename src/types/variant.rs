// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `Variant`.

use std::fmt;

use crate::types::{
    date_time::DateTime,
    node_id::{NodeId, QualifiedName},
    numeric_range::NumericRange,
    status_code::StatusCode,
};

/// A `Variant` holds built-in OPC UA data types, including single and multi dimensional arrays.
/// Only the built-in types the subscription service set inspects are represented.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub enum Variant {
    /// Empty type has no value.
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(Box<DateTime>),
    NodeId(Box<NodeId>),
    QualifiedName(Box<QualifiedName>),
    StatusCode(StatusCode),
    /// Single dimension array of values
    Array(Vec<Variant>),
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Empty => write!(f, "Empty"),
            Variant::Boolean(v) => write!(f, "{}", v),
            Variant::SByte(v) => write!(f, "{}", v),
            Variant::Byte(v) => write!(f, "{}", v),
            Variant::Int16(v) => write!(f, "{}", v),
            Variant::UInt16(v) => write!(f, "{}", v),
            Variant::Int32(v) => write!(f, "{}", v),
            Variant::UInt32(v) => write!(f, "{}", v),
            Variant::Int64(v) => write!(f, "{}", v),
            Variant::UInt64(v) => write!(f, "{}", v),
            Variant::Float(v) => write!(f, "{}", v),
            Variant::Double(v) => write!(f, "{}", v),
            Variant::String(v) => write!(f, "{}", v),
            Variant::DateTime(v) => write!(f, "{}", v),
            Variant::NodeId(v) => write!(f, "{}", v),
            Variant::QualifiedName(v) => write!(f, "{}:{}", v.namespace_index, v.name),
            Variant::StatusCode(v) => write!(f, "{}", v),
            Variant::Array(v) => write!(f, "[{} elements]", v.len()),
        }
    }
}

macro_rules! from_impl {
    ($t:ty, $v:ident) => {
        impl From<$t> for Variant {
            fn from(v: $t) -> Self {
                Variant::$v(v)
            }
        }
    };
}

from_impl!(bool, Boolean);
from_impl!(i8, SByte);
from_impl!(u8, Byte);
from_impl!(i16, Int16);
from_impl!(u16, UInt16);
from_impl!(i32, Int32);
from_impl!(u32, UInt32);
from_impl!(i64, Int64);
from_impl!(u64, UInt64);
from_impl!(f32, Float);
from_impl!(f64, Double);
from_impl!(String, String);
from_impl!(StatusCode, StatusCode);

impl<'a> From<&'a str> for Variant {
    fn from(v: &'a str) -> Self {
        Variant::String(v.to_string())
    }
}

impl From<NodeId> for Variant {
    fn from(v: NodeId) -> Self {
        Variant::NodeId(Box::new(v))
    }
}

impl From<DateTime> for Variant {
    fn from(v: DateTime) -> Self {
        Variant::DateTime(Box::new(v))
    }
}

impl<T> From<Vec<T>> for Variant
where
    T: Into<Variant>,
{
    fn from(v: Vec<T>) -> Self {
        Variant::Array(v.into_iter().map(|v| v.into()).collect())
    }
}

impl Variant {
    /// Test if the variant holds a numeric scalar
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Variant::SByte(_)
                | Variant::Byte(_)
                | Variant::Int16(_)
                | Variant::UInt16(_)
                | Variant::Int32(_)
                | Variant::UInt32(_)
                | Variant::Int64(_)
                | Variant::UInt64(_)
                | Variant::Float(_)
                | Variant::Double(_)
        )
    }

    /// Converts a numeric scalar into a double, for deadband comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Variant::SByte(v) => Some(v as f64),
            Variant::Byte(v) => Some(v as f64),
            Variant::Int16(v) => Some(v as f64),
            Variant::UInt16(v) => Some(v as f64),
            Variant::Int32(v) => Some(v as f64),
            Variant::UInt32(v) => Some(v as f64),
            Variant::Int64(v) => Some(v as f64),
            Variant::UInt64(v) => Some(v as f64),
            Variant::Float(v) => Some(v as f64),
            Variant::Double(v) => Some(v),
            _ => None,
        }
    }

    /// Applies a numeric range to an array variant. Scalars are returned untouched when the
    /// range is empty and produce `BadIndexRangeNoData` otherwise.
    pub fn range_of(&self, range: &NumericRange) -> Result<Variant, StatusCode> {
        match (range, self) {
            (NumericRange::None, _) => Ok(self.clone()),
            (NumericRange::Index(idx), Variant::Array(values)) => values
                .get(*idx as usize)
                .map(|v| Variant::Array(vec![v.clone()]))
                .ok_or(StatusCode::BadIndexRangeNoData),
            (NumericRange::Range(min, max), Variant::Array(values)) => {
                let min = *min as usize;
                if min >= values.len() {
                    Err(StatusCode::BadIndexRangeNoData)
                } else {
                    let max = (*max as usize).min(values.len() - 1);
                    Ok(Variant::Array(values[min..=max].to_vec()))
                }
            }
            (NumericRange::MultipleRanges(_), Variant::Array(_)) => {
                // Only single dimension arrays are held by this variant
                Err(StatusCode::BadIndexRangeNoData)
            }
            _ => Err(StatusCode::BadIndexRangeNoData),
        }
    }
}

#[test]
fn variant_as_f64() {
    assert_eq!(Variant::from(10i32).as_f64(), Some(10.0));
    assert_eq!(Variant::from(1.5f32).as_f64(), Some(1.5));
    assert_eq!(Variant::from("x").as_f64(), None);
    assert!(!Variant::Boolean(true).is_numeric());
}

#[test]
fn variant_range_of() {
    let v = Variant::from(vec![1i32, 2, 3, 4]);
    assert_eq!(
        v.range_of(&NumericRange::Index(2)).unwrap(),
        Variant::from(vec![3i32])
    );
    assert_eq!(
        v.range_of(&NumericRange::Range(1, 10)).unwrap(),
        Variant::from(vec![2i32, 3, 4])
    );
    assert_eq!(
        v.range_of(&NumericRange::Index(4)).unwrap_err(),
        StatusCode::BadIndexRangeNoData
    );
    assert_eq!(
        Variant::from(1i32)
            .range_of(&NumericRange::Index(0))
            .unwrap_err(),
        StatusCode::BadIndexRangeNoData
    );
}
