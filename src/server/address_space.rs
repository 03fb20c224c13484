// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The interface to the address space that backs monitored items.

use async_trait::async_trait;

use crate::{
    server::subscriptions::{CreateMonitoredItem, ModifyMonitoredItem, MonitoredItemRef},
    types::{
        node_id::ids, DataChangeFilter, DataValue, EventFilter, ExtensionObject, MonitoringMode,
        ReadValueId, StatusCode,
    },
};

/// A filter decoded from the extension object of a monitoring request.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitoringFilter {
    DataChange(DataChangeFilter),
    Event(EventFilter),
}

/// The address space as seen by the subscription service set. It supplies node attributes while
/// monitored items are validated, provisions sampling or event sources for them, and
/// is told when items come and go. Samples flow back through
/// [`SubscriptionServer::notify_data_change`] and [`SubscriptionServer::notify_event`].
///
/// Methods are called from tokio tasks. Avoid making blocking calls in them.
///
/// [`SubscriptionServer::notify_data_change`]: super::subscription_server::SubscriptionServer::notify_data_change
/// [`SubscriptionServer::notify_event`]: super::subscription_server::SubscriptionServer::notify_event
#[allow(unused_variables)]
#[async_trait]
pub trait AddressSpace: Send + Sync {
    /// Reads attributes. The result must hold one value per requested node, in order. A failed
    /// read is a value with a bad status.
    async fn read(&self, nodes_to_read: &[ReadValueId]) -> Vec<DataValue>;

    /// Decodes the filter of a monitoring request. A null filter is no filter at all.
    fn decode_filter(
        &self,
        filter: &ExtensionObject,
    ) -> Result<Option<MonitoringFilter>, StatusCode> {
        if filter.is_null() {
            Ok(None)
        } else if filter.node_id.as_ns0_numeric()
            == Some(ids::DATA_CHANGE_FILTER_ENCODING_DEFAULT_BINARY)
        {
            filter
                .decode_data_change_filter()
                .map(|f| Some(MonitoringFilter::DataChange(f)))
        } else {
            error!(
                "Requested data filter type is not supported, {:?}",
                filter.node_id
            );
            Err(StatusCode::BadFilterNotAllowed)
        }
    }

    /// Provisions sampling for a new data item. The sampling interval and queue size have
    /// been revised to server limits already, but can be revised further. An error becomes the
    /// status of the item.
    async fn on_create_data_item(&self, item: &mut CreateMonitoredItem) -> Result<(), StatusCode> {
        Ok(())
    }

    async fn on_modify_data_item(&self, item: &mut ModifyMonitoredItem) -> Result<(), StatusCode> {
        Ok(())
    }

    /// Provisions an event source for a new event item.
    async fn on_create_event_item(
        &self,
        item: &mut CreateMonitoredItem,
    ) -> Result<(), StatusCode> {
        Ok(())
    }

    async fn on_modify_event_item(
        &self,
        item: &mut ModifyMonitoredItem,
    ) -> Result<(), StatusCode> {
        Ok(())
    }

    // The notification hooks below are informative. Errors are logged and go no further.

    async fn on_data_items_created(&self, items: &[MonitoredItemRef]) -> Result<(), StatusCode> {
        Ok(())
    }

    async fn on_data_items_modified(&self, items: &[MonitoredItemRef]) -> Result<(), StatusCode> {
        Ok(())
    }

    async fn on_data_items_deleted(&self, items: &[MonitoredItemRef]) -> Result<(), StatusCode> {
        Ok(())
    }

    async fn on_event_items_created(&self, items: &[MonitoredItemRef]) -> Result<(), StatusCode> {
        Ok(())
    }

    async fn on_event_items_modified(
        &self,
        items: &[MonitoredItemRef],
    ) -> Result<(), StatusCode> {
        Ok(())
    }

    async fn on_event_items_deleted(&self, items: &[MonitoredItemRef]) -> Result<(), StatusCode> {
        Ok(())
    }

    /// Sampling should continue so long as the mode is not `Disabled`, the difference between
    /// `Reporting` and `Sampling` is handled by the subscription.
    async fn on_monitoring_mode_changed(
        &self,
        mode: MonitoringMode,
        items: &[MonitoredItemRef],
    ) -> Result<(), StatusCode> {
        Ok(())
    }
}
