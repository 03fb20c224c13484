// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Notification structures and helpers for building `NotificationMessage`s.

use crate::types::{
    data_value::DataValue, date_time::DateTime, status_code::StatusCode, variant::Variant,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoredItemNotification {
    pub client_handle: u32,
    pub value: DataValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFieldList {
    pub client_handle: u32,
    pub event_fields: Option<Vec<Variant>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChangeNotification {
    pub monitored_items: Option<Vec<MonitoredItemNotification>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotificationList {
    pub events: Option<Vec<EventFieldList>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangeNotification {
    pub status: StatusCode,
}

/// One element of the notification data of a message. The codec layer encodes each of these
/// as an extension object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NotificationData {
    DataChange(DataChangeNotification),
    Events(EventNotificationList),
    StatusChange(StatusChangeNotification),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub sequence_number: u32,
    pub publish_time: DateTime,
    pub notification_data: Option<Vec<NotificationData>>,
}

impl NotificationMessage {
    /// Create a notification message which contains data change AND / OR events. Notification
    /// data can have up to 2 elements to covers the case in table 158 where a subscription
    /// contains monitored items for events and data.
    pub fn data_change(
        sequence_number: u32,
        publish_time: DateTime,
        data_change_notifications: Vec<MonitoredItemNotification>,
        event_notifications: Vec<EventFieldList>,
    ) -> NotificationMessage {
        let mut notification_data = Vec::with_capacity(2);
        if !data_change_notifications.is_empty() {
            notification_data.push(NotificationData::DataChange(DataChangeNotification {
                monitored_items: Some(data_change_notifications),
            }));
        }
        if !event_notifications.is_empty() {
            notification_data.push(NotificationData::Events(EventNotificationList {
                events: Some(event_notifications),
            }));
        }
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: Some(notification_data),
        }
    }

    /// Create a status change notification message
    pub fn status_change(
        sequence_number: u32,
        publish_time: DateTime,
        status: StatusCode,
    ) -> NotificationMessage {
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: Some(vec![NotificationData::StatusChange(
                StatusChangeNotification { status },
            )]),
        }
    }

    /// Create a keep-alive notification message
    pub fn keep_alive(sequence_number: u32, publish_time: DateTime) -> NotificationMessage {
        NotificationMessage {
            sequence_number,
            publish_time,
            notification_data: Some(Vec::new()),
        }
    }

    /// Tests if the message is a keep-alive, i.e. it carries no notification data
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data
            .as_ref()
            .map(|d| d.is_empty())
            .unwrap_or(true)
    }

    /// Returns the data change notifications of the message, if any
    pub fn data_changes(&self) -> Vec<&MonitoredItemNotification> {
        self.notification_data
            .iter()
            .flatten()
            .filter_map(|d| match d {
                NotificationData::DataChange(d) => d.monitored_items.as_ref(),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Returns the event notifications of the message, if any
    pub fn events(&self) -> Vec<&EventFieldList> {
        self.notification_data
            .iter()
            .flatten()
            .filter_map(|d| match d {
                NotificationData::Events(e) => e.events.as_ref(),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// Returns the status of a status change notification, if the message holds one
    pub fn status_change_status(&self) -> Option<StatusCode> {
        self.notification_data.iter().flatten().find_map(|d| match d {
            NotificationData::StatusChange(s) => Some(s.status),
            _ => None,
        })
    }
}
