// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Contains the implementation of `NumericRange`.

use std::{fmt, str::FromStr};

use regex::Regex;

#[derive(Debug, PartialEq)]
pub struct NumericRangeError;

impl fmt::Display for NumericRangeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NumericRangeError")
    }
}

impl std::error::Error for NumericRangeError {}

/// Numeric range describes a range within an array. See OPCUA Part 4 7.22
///
/// The string is either a single index, e.g. `6`, or a range of two indices separated by a colon
/// where the first is lower than the second, e.g. `5:7`. Multiple dimensions are separated by
/// commas, e.g. `1:2,0:1`. No other characters, including white space, are permitted.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum NumericRange {
    /// None
    #[default]
    None,
    /// A single index
    Index(u32),
    /// A range of indices
    Range(u32, u32),
    /// Multiple ranges contains any mix of Index, Range values - a multiple range containing multiple ranges is invalid
    MultipleRanges(Vec<NumericRange>),
}

// Maximum number of dimensions accepted in a range
const MAX_INDICES: usize = 10;

impl fmt::Display for NumericRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericRange::None => Ok(()),
            NumericRange::Index(idx) => write!(f, "{}", idx),
            NumericRange::Range(min, max) => write!(f, "{}:{}", min, max),
            NumericRange::MultipleRanges(ranges) => {
                let ranges: Vec<String> = ranges.iter().map(|r| r.to_string()).collect();
                write!(f, "{}", ranges.join(","))
            }
        }
    }
}

impl FromStr for NumericRange {
    type Err = NumericRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(NumericRange::None);
        }
        // <numeric-range> ::= <dimension> [',' <dimension>]
        // <dimension> ::= <index> [':' <index>]
        let parts: Vec<_> = s.split(',').collect();
        match parts.len() {
            1 => Self::parse_range(parts[0]),
            2..=MAX_INDICES => parts
                .iter()
                .map(|p| Self::parse_range(p))
                .collect::<Result<Vec<_>, _>>()
                .map(NumericRange::MultipleRanges),
            _ => Err(NumericRangeError),
        }
    }
}

impl NumericRange {
    pub fn has_range(&self) -> bool {
        *self != NumericRange::None
    }

    fn parse_range(s: &str) -> Result<NumericRange, NumericRangeError> {
        // A number must be 10 digits (sufficient for any permissible 32-bit value) or less
        // regardless of leading zeroes.
        lazy_static! {
            static ref RE: Regex =
                Regex::new("^(?P<min>[0-9]{1,10})(:(?P<max>[0-9]{1,10}))?$").unwrap();
        }
        let captures = RE.captures(s).ok_or(NumericRangeError)?;
        match (captures.name("min"), captures.name("max")) {
            (Some(min), None) => min
                .as_str()
                .parse::<u32>()
                .map(NumericRange::Index)
                .map_err(|_| NumericRangeError),
            (Some(min), Some(max)) => {
                // Parse as 64-bit but cast down
                let min = min.as_str().parse::<u64>().map_err(|_| NumericRangeError)?;
                let max = max.as_str().parse::<u64>().map_err(|_| NumericRangeError)?;
                if min >= max || max > u32::MAX as u64 {
                    Err(NumericRangeError)
                } else {
                    Ok(NumericRange::Range(min as u32, max as u32))
                }
            }
            _ => Err(NumericRangeError),
        }
    }
}

#[test]
fn valid_numeric_ranges() {
    let valid_ranges = vec![
        ("", NumericRange::None, ""),
        ("0", NumericRange::Index(0), "0"),
        ("0000", NumericRange::Index(0), "0"),
        ("4294967295", NumericRange::Index(4294967295), "4294967295"),
        ("1:2", NumericRange::Range(1, 2), "1:2"),
        (
            "0:1,0:2,3",
            NumericRange::MultipleRanges(vec![
                NumericRange::Range(0, 1),
                NumericRange::Range(0, 2),
                NumericRange::Index(3),
            ]),
            "0:1,0:2,3",
        ),
    ];
    for (s, expected, formatted) in valid_ranges {
        let range = s.parse::<NumericRange>().unwrap();
        assert_eq!(range, expected);
        assert_eq!(range.to_string(), formatted);
    }
}

#[test]
fn invalid_numeric_ranges() {
    let invalid_ranges = vec![
        " ",
        " 1",
        "-1",
        "1:1",
        "2:1",
        "1:",
        ":1",
        "1,",
        "a",
        "4294967296",
        "0:4294967296",
        "0,1,2,3,4,5,6,7,8,9,10",
    ];
    for s in invalid_ranges {
        assert_eq!(s.parse::<NumericRange>(), Err(NumericRangeError), "{}", s);
    }
}
