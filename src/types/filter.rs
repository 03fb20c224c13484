// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Monitoring filters: the data change filter with its deadband comparison and the event filter
//! with its select clauses.

use crate::types::{
    attribute::AttributeId,
    data_value::DataValue,
    date_time::DateTime,
    node_id::{NodeId, QualifiedName},
    notification_message::EventFieldList,
    numeric_range::NumericRange,
    status_code::StatusCode,
    variant::Variant,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataChangeTrigger {
    Status = 0,
    StatusValue = 1,
    StatusValueTimestamp = 2,
}

impl DataChangeTrigger {
    pub fn from_i32(value: i32) -> Option<DataChangeTrigger> {
        match value {
            0 => Some(DataChangeTrigger::Status),
            1 => Some(DataChangeTrigger::StatusValue),
            2 => Some(DataChangeTrigger::StatusValueTimestamp),
            _ => None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeadbandType {
    None = 0,
    Absolute = 1,
    Percent = 2,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeFilter {
    pub trigger: DataChangeTrigger,
    pub deadband_type: u32,
    pub deadband_value: f64,
}

impl Default for DataChangeFilter {
    fn default() -> Self {
        DataChangeFilter {
            trigger: DataChangeTrigger::StatusValue,
            deadband_type: DeadbandType::None as u32,
            deadband_value: 0f64,
        }
    }
}

impl DataChangeFilter {
    /// Compares one data value to another and returns true if they are the "same" according to
    /// the trigger type of status, status/value or status/value/timestamp
    pub fn compare(&self, v1: &DataValue, v2: &DataValue) -> bool {
        match self.trigger {
            DataChangeTrigger::Status => v1.status() == v2.status(),
            DataChangeTrigger::StatusValue => {
                v1.status() == v2.status() && self.compare_value_option(&v1.value, &v2.value)
            }
            DataChangeTrigger::StatusValueTimestamp => {
                v1.status() == v2.status()
                    && self.compare_value_option(&v1.value, &v2.value)
                    && v1.source_timestamp == v2.source_timestamp
            }
        }
    }

    /// Compares two variant values to each other. Returns true if they are considered the "same".
    pub fn compare_value_option(&self, v1: &Option<Variant>, v2: &Option<Variant>) -> bool {
        match (v1, v2) {
            (Some(_), None) | (None, Some(_)) => false,
            // If it's always none then it hasn't changed
            (None, None) => true,
            (Some(v1), Some(v2)) => self.compare_value(v1, v2),
        }
    }

    /// Compares two values, either a straight value compare or a numeric comparison against the
    /// absolute deadband. Arrays are the same if every element is within the deadband. Values that
    /// cannot be converted to numbers are compared for equality.
    pub fn compare_value(&self, v1: &Variant, v2: &Variant) -> bool {
        if self.deadband_type != DeadbandType::Absolute as u32 {
            return v1 == v2;
        }
        match (v1, v2) {
            (Variant::Array(a1), Variant::Array(a2)) => {
                a1.len() == a2.len()
                    && a1.iter().zip(a2.iter()).all(|(v1, v2)| self.compare_value(v1, v2))
            }
            _ => match (v1.as_f64(), v2.as_f64()) {
                (Some(v1), Some(v2)) => Self::abs_compare(v1, v2, self.deadband_value),
                _ => v1 == v2,
            },
        }
    }

    /// Compares the difference between v1 and v2 to the threshold. The two values are considered
    /// equal if their difference is less than or equal to the threshold.
    pub fn abs_compare(v1: f64, v2: f64, threshold_diff: f64) -> bool {
        (v1 - v2).abs() <= threshold_diff
    }

    /// Validates the deadband settings of the filter.
    pub fn validate(&self) -> Result<(), StatusCode> {
        if self.deadband_type == DeadbandType::None as u32 {
            Ok(())
        } else if self.deadband_type == DeadbandType::Absolute as u32 {
            if self.deadband_value < 0f64 || !self.deadband_value.is_finite() {
                Err(StatusCode::BadDeadbandFilterInvalid)
            } else {
                Ok(())
            }
        } else if self.deadband_type == DeadbandType::Percent as u32 {
            // Percent deadbands need an EURange, which is not supported
            Err(StatusCode::BadMonitoredItemFilterUnsupported)
        } else {
            Err(StatusCode::BadDeadbandFilterInvalid)
        }
    }

    pub fn uses_deadband(&self) -> bool {
        self.deadband_type != DeadbandType::None as u32
    }
}

/// Selects a field of an event by the browse path from an event type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleAttributeOperand {
    pub type_definition_id: NodeId,
    pub browse_path: Vec<QualifiedName>,
    pub attribute_id: u32,
    pub index_range: String,
}

impl SimpleAttributeOperand {
    pub fn new<T>(type_definition_id: NodeId, browse_path: T, attribute_id: AttributeId) -> Self
    where
        T: Into<String>,
    {
        let browse_path: String = browse_path.into();
        SimpleAttributeOperand {
            type_definition_id,
            browse_path: browse_path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(QualifiedName::from)
                .collect(),
            attribute_id: attribute_id as u32,
            index_range: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventFilter {
    pub select_clauses: Option<Vec<SimpleAttributeOperand>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EventFilterResult {
    pub select_clause_results: Option<Vec<StatusCode>>,
}

/// An event as seen by event monitored items, giving access to the fields selected by a filter.
pub trait Event: Send + Sync {
    fn get_field(
        &self,
        type_definition_id: &NodeId,
        browse_path: &[QualifiedName],
        attribute_id: AttributeId,
        index_range: &NumericRange,
    ) -> Variant;

    fn time(&self) -> &DateTime;
}

/// A select clause which has been validated.
#[derive(Debug, Clone, PartialEq)]
struct ParsedSelectClause {
    type_definition_id: NodeId,
    browse_path: Vec<QualifiedName>,
    attribute_id: AttributeId,
    index_range: NumericRange,
}

/// An event filter whose select clauses have been validated, ready to evaluate events.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEventFilter {
    select_clauses: Vec<ParsedSelectClause>,
}

impl ParsedEventFilter {
    /// Validates the filter. The result holds a status per select clause; the filter is an
    /// error if there are no select clauses or any of them is invalid.
    pub fn new(filter: EventFilter) -> (EventFilterResult, Result<ParsedEventFilter, StatusCode>) {
        let clauses = filter.select_clauses.unwrap_or_default();
        if clauses.is_empty() {
            return (
                EventFilterResult::default(),
                Err(StatusCode::BadEventFilterInvalid),
            );
        }
        let mut results = Vec::with_capacity(clauses.len());
        let mut parsed = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let attribute_id = AttributeId::from_u32(clause.attribute_id);
            let index_range = clause.index_range.parse::<NumericRange>();
            match (attribute_id, index_range) {
                (Err(_), _) => results.push(StatusCode::BadAttributeIdInvalid),
                (_, Err(_)) => results.push(StatusCode::BadIndexRangeInvalid),
                (Ok(attribute_id), Ok(index_range)) => {
                    results.push(StatusCode::Good);
                    parsed.push(ParsedSelectClause {
                        type_definition_id: clause.type_definition_id,
                        browse_path: clause.browse_path,
                        attribute_id,
                        index_range,
                    });
                }
            }
        }
        let failed = results.iter().any(|r| r.is_bad());
        let result = EventFilterResult {
            select_clause_results: Some(results),
        };
        if failed {
            (result, Err(StatusCode::BadEventFilterInvalid))
        } else {
            (
                result,
                Ok(ParsedEventFilter {
                    select_clauses: parsed,
                }),
            )
        }
    }

    /// Produces the event field list of an event for a monitored item.
    pub fn evaluate(&self, event: &dyn Event, client_handle: u32) -> EventFieldList {
        let fields = self
            .select_clauses
            .iter()
            .map(|c| {
                event.get_field(
                    &c.type_definition_id,
                    &c.browse_path,
                    c.attribute_id,
                    &c.index_range,
                )
            })
            .collect();
        EventFieldList {
            client_handle,
            event_fields: Some(fields),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::node_id::ids;

    #[test]
    fn deadband_abs() {
        assert!(DataChangeFilter::abs_compare(100f64, 100f64, 0f64));
        assert!(DataChangeFilter::abs_compare(100f64, 100f64, 1f64));
        assert!(DataChangeFilter::abs_compare(100f64, 101f64, 1f64));
        assert!(!DataChangeFilter::abs_compare(100f64, 101.001f64, 1f64));
    }

    #[test]
    fn data_change_filter_compare() {
        let filter = DataChangeFilter {
            trigger: DataChangeTrigger::StatusValue,
            deadband_type: DeadbandType::Absolute as u32,
            deadband_value: 0.5,
        };
        let v1 = DataValue::new_now(10.0f64);
        let mut v2 = v1.clone();
        v2.value = Some(Variant::Double(10.4));
        assert!(filter.compare(&v1, &v2));
        v2.value = Some(Variant::Double(10.6));
        assert!(!filter.compare(&v1, &v2));
        v2.value = v1.value.clone();
        v2.status = Some(StatusCode::BadNotReadable);
        assert!(!filter.compare(&v1, &v2));

        let status_only = DataChangeFilter {
            trigger: DataChangeTrigger::Status,
            ..Default::default()
        };
        let mut v3 = v1.clone();
        v3.value = Some(Variant::Double(999.0));
        assert!(status_only.compare(&v1, &v3));
    }

    #[test]
    fn data_change_filter_missing_status_is_good() {
        let v1 = DataValue::value_only(Variant::Double(1.0));
        let mut v2 = v1.clone();
        v2.status = Some(StatusCode::Good);
        for trigger in [
            DataChangeTrigger::Status,
            DataChangeTrigger::StatusValue,
            DataChangeTrigger::StatusValueTimestamp,
        ] {
            let filter = DataChangeFilter {
                trigger,
                ..Default::default()
            };
            assert!(filter.compare(&v1, &v2));
            assert!(filter.compare(&v2, &v1));
        }
    }

    #[test]
    fn data_change_filter_validate() {
        let mut filter = DataChangeFilter::default();
        assert!(filter.validate().is_ok());
        filter.deadband_type = DeadbandType::Percent as u32;
        filter.deadband_value = 10.0;
        assert_eq!(
            filter.validate(),
            Err(StatusCode::BadMonitoredItemFilterUnsupported)
        );
        filter.deadband_type = DeadbandType::Absolute as u32;
        filter.deadband_value = -1.0;
        assert_eq!(filter.validate(), Err(StatusCode::BadDeadbandFilterInvalid));
        filter.deadband_type = 7;
        assert_eq!(filter.validate(), Err(StatusCode::BadDeadbandFilterInvalid));
    }

    #[test]
    fn event_filter_validation() {
        let (_, res) = ParsedEventFilter::new(EventFilter::default());
        assert_eq!(res.unwrap_err(), StatusCode::BadEventFilterInvalid);

        let base = NodeId::new(0, ids::BASE_EVENT_TYPE);
        let mut bad = SimpleAttributeOperand::new(base.clone(), "Message", AttributeId::Value);
        bad.attribute_id = 99;
        let (result, res) = ParsedEventFilter::new(EventFilter {
            select_clauses: Some(vec![
                SimpleAttributeOperand::new(base, "EventId", AttributeId::Value),
                bad,
            ]),
        });
        assert!(res.is_err());
        assert_eq!(
            result.select_clause_results,
            Some(vec![StatusCode::Good, StatusCode::BadAttributeIdInvalid])
        );
    }
}
