// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The `StatusCode` type and the subset of status codes used by the subscription service set.

use std::{error::Error, fmt};

/// A 32-bit OPC UA status code. The top 16 bits hold the code, the bottom 16 bits hold the
/// info type and info bits.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StatusCode(u32);

macro_rules! status_codes {
    ( $( $name:ident = $value:literal ),* $(,)? ) => {
        #[allow(non_upper_case_globals)]
        impl StatusCode {
            $( pub const $name: StatusCode = StatusCode($value); )*

            /// Returns the symbolic name of the code portion of the status code.
            pub fn name(&self) -> &'static str {
                match self.status().0 {
                    $( $value => stringify!($name), )*
                    _ => "Unrecognized",
                }
            }
        }
    };
}

status_codes! {
    Good = 0x0000_0000,
    GoodSubscriptionTransferred = 0x002D_0000,
    Uncertain = 0x4000_0000,
    Bad = 0x8000_0000,
    BadUnexpectedError = 0x8001_0000,
    BadInternalError = 0x8002_0000,
    BadOutOfMemory = 0x8003_0000,
    BadResourceUnavailable = 0x8004_0000,
    BadTimeout = 0x800A_0000,
    BadShutdown = 0x800C_0000,
    BadNothingToDo = 0x800F_0000,
    BadTooManyOperations = 0x8010_0000,
    BadSessionClosed = 0x8026_0000,
    BadSubscriptionIdInvalid = 0x8028_0000,
    BadTimestampsToReturnInvalid = 0x802B_0000,
    BadWaitingForInitialData = 0x8032_0000,
    BadNodeIdInvalid = 0x8033_0000,
    BadNodeIdUnknown = 0x8034_0000,
    BadAttributeIdInvalid = 0x8035_0000,
    BadIndexRangeInvalid = 0x8036_0000,
    BadIndexRangeNoData = 0x8037_0000,
    BadDataEncodingInvalid = 0x8038_0000,
    BadDataEncodingUnsupported = 0x8039_0000,
    BadNotReadable = 0x803A_0000,
    BadMonitoringModeInvalid = 0x8041_0000,
    BadMonitoredItemIdInvalid = 0x8042_0000,
    BadMonitoredItemFilterInvalid = 0x8043_0000,
    BadMonitoredItemFilterUnsupported = 0x8044_0000,
    BadFilterNotAllowed = 0x8045_0000,
    BadEventFilterInvalid = 0x8047_0000,
    BadTooManySubscriptions = 0x8077_0000,
    BadTooManyPublishRequests = 0x8078_0000,
    BadNoSubscription = 0x8079_0000,
    BadSequenceNumberUnknown = 0x807A_0000,
    BadMessageNotAvailable = 0x807B_0000,
    BadDeadbandFilterInvalid = 0x808E_0000,
    BadTooManyMonitoredItems = 0x80DB_0000,
}

impl StatusCode {
    /// Mask for the code portion of the status code
    pub const STATUS_MASK: u32 = 0xFFFF_0000;
    /// Mask for the info type and info bits
    pub const BIT_MASK: u32 = 0x0000_FFFF;

    const IS_ERROR: u32 = 0x8000_0000;
    const IS_UNCERTAIN: u32 = 0x4000_0000;
    const INFO_TYPE_DATA_VALUE: u32 = 0x0000_0400;
    const OVERFLOW: u32 = 0x0000_0080;

    pub const fn from_bits(bits: u32) -> StatusCode {
        StatusCode(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Returns the status only, i.e. it masks out any bit flags that come with the status code
    pub fn status(&self) -> StatusCode {
        StatusCode(self.0 & Self::STATUS_MASK)
    }

    /// Returns the bit flags of the status code, i.e. it masks out the actual status code value
    pub fn bitflags(&self) -> u32 {
        self.0 & Self::BIT_MASK
    }

    /// Tests if the status code is bad
    pub fn is_bad(&self) -> bool {
        self.0 & Self::IS_ERROR != 0
    }

    /// Tests if the status code is uncertain
    pub fn is_uncertain(&self) -> bool {
        self.0 & Self::IS_UNCERTAIN != 0
    }

    /// Tests if the status code is good (i.e. not bad or uncertain)
    pub fn is_good(&self) -> bool {
        !self.is_bad() && !self.is_uncertain()
    }

    /// Sets or clears the overflow bit. Setting it also marks the info type as data value.
    pub fn set_overflow(self, overflow: bool) -> StatusCode {
        if overflow {
            StatusCode(self.0 | Self::INFO_TYPE_DATA_VALUE | Self::OVERFLOW)
        } else {
            StatusCode(self.0 & !Self::OVERFLOW)
        }
    }

    pub fn overflow(&self) -> bool {
        self.0 & Self::INFO_TYPE_DATA_VALUE != 0 && self.0 & Self::OVERFLOW != 0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Displays the StatusCode as it's name, or its name+bitflags
        let bits = self.bitflags();
        if bits == 0 {
            write!(f, "{}", self.name())
        } else {
            write!(f, "{}+{:#06x}", self.name(), bits)
        }
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#010x})", self, self.0)
    }
}

impl Error for StatusCode {}

impl From<StatusCode> for u32 {
    fn from(v: StatusCode) -> u32 {
        v.0
    }
}

#[test]
fn status_code() {
    assert!(StatusCode::Good.is_good());
    assert!(!StatusCode::Good.is_bad());
    assert!(StatusCode::BadTimeout.is_bad());
    assert!(!StatusCode::BadTimeout.is_uncertain());
    assert!(StatusCode::Uncertain.is_uncertain());
    assert_eq!(StatusCode::BadNoSubscription.name(), "BadNoSubscription");
    assert_eq!(format!("{}", StatusCode::BadTimeout), "BadTimeout");
}

#[test]
fn status_code_overflow() {
    let s = StatusCode::Good.set_overflow(true);
    assert!(s.overflow());
    assert!(s.is_good());
    assert_eq!(s.status(), StatusCode::Good);
    assert_eq!(s.bitflags(), 0x480);
    assert_eq!(format!("{}", s), "Good+0x0480");
    assert!(!s.set_overflow(false).overflow());
}
