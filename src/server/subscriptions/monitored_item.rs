use std::{
    collections::{BTreeSet, VecDeque},
    sync::Arc,
};

use crate::{
    server::{
        config::ServerLimits,
        resources::{ResourcePermit, SessionResources},
    },
    types::{
        DataChangeFilter, DataValue, DateTime, Event, EventFieldList, EventFilterResult,
        MonitoredItemNotification, MonitoringMode, NumericRange, ParsedEventFilter, ReadValueId,
        StatusCode, TimestampsToReturn, Variant,
    },
};

/// Identifies a monitored item across the server.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitoredItemHandle {
    pub subscription_id: u32,
    pub monitored_item_id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    MonitoredItemNotification(MonitoredItemNotification),
    Event(EventFieldList),
}

impl From<MonitoredItemNotification> for Notification {
    fn from(v: MonitoredItemNotification) -> Self {
        Notification::MonitoredItemNotification(v)
    }
}

impl From<EventFieldList> for Notification {
    fn from(v: EventFieldList) -> Self {
        Notification::Event(v)
    }
}

impl Notification {
    fn set_overflow(&mut self) {
        if let Notification::MonitoredItemNotification(n) = self {
            n.value.status = Some(n.value.status().set_overflow(true));
        }
    }
}

/// The filter installed on a monitored item.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterType {
    None,
    DataChangeFilter(DataChangeFilter),
    EventFilter(ParsedEventFilter),
}

/// Takes the requested sampling interval and ensures it is within the range supported by the
/// server and the node. A node with a minimum sampling interval of 0 reports by exception, so a
/// request of 0 is kept.
pub(crate) fn revise_sampling_interval(
    limits: &ServerLimits,
    publishing_interval: f64,
    minimum_sampling_interval: f64,
    requested: f64,
) -> f64 {
    // Any negative number means the publishing interval
    let mut sampling_interval = if requested.is_nan() || requested < 0f64 {
        publishing_interval
    } else {
        requested
    };
    let minimum_sampling_interval = if minimum_sampling_interval.is_finite() {
        minimum_sampling_interval.max(0f64)
    } else {
        0f64
    };
    if sampling_interval == 0f64 && minimum_sampling_interval == 0f64 {
        return 0f64;
    }
    if sampling_interval < minimum_sampling_interval {
        sampling_interval = minimum_sampling_interval;
    }
    if sampling_interval < limits.min_sampling_interval_ms {
        sampling_interval = limits.min_sampling_interval_ms;
    } else if sampling_interval > limits.max_sampling_interval_ms {
        sampling_interval = limits.max_sampling_interval_ms;
    }
    sampling_interval
}

/// Takes the requested queue size and ensures it is within the range supported by the server
pub(crate) fn revise_queue_size(limits: &ServerLimits, is_event: bool, requested: u32) -> usize {
    let requested = requested as usize;
    if is_event {
        if requested == 0 {
            limits.default_event_queue_size
        } else {
            requested.min(limits.max_event_queue_size)
        }
    } else if requested == 0 {
        1
    } else {
        requested.min(limits.max_monitored_item_queue_size)
    }
}

/// A monitored item that has passed validation and is about to be created. The address space
/// sees it in its provisioning hook and may revise the sampling interval, queue size or set the
/// initial value.
#[derive(Debug)]
pub struct CreateMonitoredItem {
    id: u32,
    subscription_id: u32,
    item_to_monitor: ReadValueId,
    index_range: NumericRange,
    monitoring_mode: MonitoringMode,
    client_handle: u32,
    discard_oldest: bool,
    queue_size: usize,
    sampling_interval: f64,
    initial_value: Option<DataValue>,
    filter: FilterType,
    filter_res: Option<EventFilterResult>,
    timestamps_to_return: TimestampsToReturn,
}

impl CreateMonitoredItem {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handle: MonitoredItemHandle,
        item_to_monitor: ReadValueId,
        index_range: NumericRange,
        monitoring_mode: MonitoringMode,
        client_handle: u32,
        discard_oldest: bool,
        sampling_interval: f64,
        queue_size: usize,
        filter: FilterType,
        timestamps_to_return: TimestampsToReturn,
    ) -> Self {
        Self {
            id: handle.monitored_item_id,
            subscription_id: handle.subscription_id,
            item_to_monitor,
            index_range,
            monitoring_mode,
            client_handle,
            discard_oldest,
            queue_size,
            sampling_interval,
            initial_value: None,
            filter,
            filter_res: None,
            timestamps_to_return,
        }
    }

    pub fn handle(&self) -> MonitoredItemHandle {
        MonitoredItemHandle {
            monitored_item_id: self.id,
            subscription_id: self.subscription_id,
        }
    }

    pub fn set_initial_value(&mut self, value: DataValue) {
        self.initial_value = Some(value);
    }

    pub(crate) fn set_filter_res(&mut self, filter_res: Option<EventFilterResult>) {
        self.filter_res = filter_res;
    }

    pub fn item_to_monitor(&self) -> &ReadValueId {
        &self.item_to_monitor
    }

    pub fn monitoring_mode(&self) -> MonitoringMode {
        self.monitoring_mode
    }

    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn filter(&self) -> &FilterType {
        &self.filter
    }

    pub fn is_event(&self) -> bool {
        matches!(self.filter, FilterType::EventFilter(_))
    }

    pub fn revise_queue_size(&mut self, queue_size: usize) {
        if queue_size > 0 {
            self.queue_size = queue_size;
        }
    }

    pub fn revise_sampling_interval(&mut self, sampling_interval: f64) {
        if sampling_interval.is_finite() && sampling_interval >= 0f64 {
            self.sampling_interval = sampling_interval;
        }
    }

    pub fn timestamps_to_return(&self) -> TimestampsToReturn {
        self.timestamps_to_return
    }

    pub(crate) fn filter_res(&self) -> Option<&EventFilterResult> {
        self.filter_res.as_ref()
    }
}

/// The new parameters of an existing monitored item, seen by the address space in its
/// provisioning hook before they are applied.
#[derive(Debug)]
pub struct ModifyMonitoredItem {
    handle: MonitoredItemHandle,
    item_to_monitor: ReadValueId,
    client_handle: u32,
    discard_oldest: bool,
    queue_size: usize,
    sampling_interval: f64,
    filter: FilterType,
    timestamps_to_return: TimestampsToReturn,
}

impl ModifyMonitoredItem {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        handle: MonitoredItemHandle,
        item_to_monitor: ReadValueId,
        client_handle: u32,
        discard_oldest: bool,
        sampling_interval: f64,
        queue_size: usize,
        filter: FilterType,
        timestamps_to_return: TimestampsToReturn,
    ) -> Self {
        Self {
            handle,
            item_to_monitor,
            client_handle,
            discard_oldest,
            queue_size,
            sampling_interval,
            filter,
            timestamps_to_return,
        }
    }

    pub fn handle(&self) -> MonitoredItemHandle {
        self.handle
    }

    pub fn item_to_monitor(&self) -> &ReadValueId {
        &self.item_to_monitor
    }

    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn filter(&self) -> &FilterType {
        &self.filter
    }

    pub fn revise_queue_size(&mut self, queue_size: usize) {
        if queue_size > 0 {
            self.queue_size = queue_size;
        }
    }

    pub fn revise_sampling_interval(&mut self, sampling_interval: f64) {
        if sampling_interval.is_finite() && sampling_interval >= 0f64 {
            self.sampling_interval = sampling_interval;
        }
    }
}

/// A summary of a monitored item handed to the address space when items are created, modified,
/// deleted or change monitoring mode.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredItemRef {
    pub handle: MonitoredItemHandle,
    pub item_to_monitor: ReadValueId,
    pub monitoring_mode: MonitoringMode,
    pub sampling_interval: f64,
    pub queue_size: usize,
}

/// What a monitored item watches, with the state that is specific to it.
#[derive(Debug)]
enum MonitoredItemKind {
    Data {
        filter: Option<DataChangeFilter>,
        index_range: NumericRange,
        last_data_value: Option<DataValue>,
    },
    Event {
        filter: ParsedEventFilter,
    },
}

#[derive(Debug)]
pub struct MonitoredItem {
    id: u32,
    subscription_id: u32,
    item_to_monitor: ReadValueId,
    monitoring_mode: MonitoringMode,
    // Triggered items are other monitored items in the same subscription which are reported if this
    // monitored item changes.
    triggered_items: BTreeSet<u32>,
    // Set when a triggering item fired, until the queue has been delivered
    triggered: bool,
    client_handle: u32,
    sampling_interval: f64,
    discard_oldest: bool,
    queue_size: usize,
    notification_queue: VecDeque<Notification>,
    queue_overflow: bool,
    timestamps_to_return: TimestampsToReturn,
    kind: MonitoredItemKind,
    permit: Option<ResourcePermit>,
}

impl MonitoredItem {
    pub fn new(request: &CreateMonitoredItem) -> Self {
        let kind = match &request.filter {
            FilterType::EventFilter(filter) => MonitoredItemKind::Event {
                filter: filter.clone(),
            },
            FilterType::DataChangeFilter(filter) => MonitoredItemKind::Data {
                filter: Some(filter.clone()),
                index_range: request.index_range.clone(),
                last_data_value: None,
            },
            FilterType::None => MonitoredItemKind::Data {
                filter: None,
                index_range: request.index_range.clone(),
                last_data_value: None,
            },
        };
        let mut v = Self {
            id: request.id,
            subscription_id: request.subscription_id,
            item_to_monitor: request.item_to_monitor.clone(),
            monitoring_mode: request.monitoring_mode,
            triggered_items: BTreeSet::new(),
            triggered: false,
            client_handle: request.client_handle,
            sampling_interval: request.sampling_interval,
            discard_oldest: request.discard_oldest,
            queue_size: request.queue_size,
            notification_queue: VecDeque::new(),
            queue_overflow: false,
            timestamps_to_return: request.timestamps_to_return,
            kind,
            permit: None,
        };
        if !v.is_event() {
            let initial_value = request.initial_value.clone().unwrap_or_else(|| {
                let now = DateTime::now();
                DataValue {
                    value: Some(Variant::Empty),
                    status: Some(StatusCode::BadWaitingForInitialData),
                    source_timestamp: Some(now),
                    source_picoseconds: None,
                    server_timestamp: Some(now),
                    server_picoseconds: None,
                }
            });
            if v.monitoring_mode == MonitoringMode::Disabled {
                v.set_last_data_value(initial_value);
            } else {
                v.notify_data_value(initial_value);
            }
        }
        v
    }

    /// Attaches the resource permit which releases the item from the counters when dropped.
    pub(crate) fn set_permit(&mut self, permit: ResourcePermit) {
        self.permit = Some(permit);
    }

    pub(crate) fn has_permit(&self) -> bool {
        self.permit.is_some()
    }

    pub(crate) fn rebind_session(&mut self, session: &Arc<SessionResources>) {
        if let Some(permit) = self.permit.as_mut() {
            permit.rebind_session(session);
        }
    }

    /// Applies the revised parameters of a modify request
    pub(crate) fn modify(&mut self, request: &ModifyMonitoredItem) {
        self.timestamps_to_return = request.timestamps_to_return;
        self.sampling_interval = request.sampling_interval;
        self.queue_size = request.queue_size;
        self.client_handle = request.client_handle;
        self.discard_oldest = request.discard_oldest;
        match (&mut self.kind, &request.filter) {
            (MonitoredItemKind::Data { filter, .. }, FilterType::DataChangeFilter(f)) => {
                *filter = Some(f.clone())
            }
            (MonitoredItemKind::Data { filter, .. }, FilterType::None) => *filter = None,
            (MonitoredItemKind::Event { filter }, FilterType::EventFilter(f)) => {
                *filter = f.clone()
            }
            (kind, filter) => {
                error!(
                    "Monitored item {} of kind {:?} cannot take filter {:?}",
                    self.id, kind, filter
                );
            }
        }

        // Shrink the notification queue to the new threshold
        while self.notification_queue.len() > self.queue_size {
            if self.discard_oldest {
                let _ = self.notification_queue.pop_front();
            } else {
                let _ = self.notification_queue.pop_back();
            }
        }
    }

    // The initial value is remembered even by a disabled item, for when it is triggered later
    fn set_last_data_value(&mut self, value: DataValue) {
        if let MonitoredItemKind::Data {
            last_data_value, ..
        } = &mut self.kind
        {
            *last_data_value = Some(value);
        }
    }

    /// Takes a sample of the monitored value. Returns true if the value was a change and was
    /// queued.
    pub fn notify_data_value(&mut self, mut value: DataValue) -> bool {
        if self.monitoring_mode == MonitoringMode::Disabled {
            return false;
        }
        let MonitoredItemKind::Data {
            filter,
            index_range,
            last_data_value,
        } = &mut self.kind
        else {
            return false;
        };

        if index_range.has_range() {
            if let Some(v) = value.value.as_ref() {
                match v.range_of(index_range) {
                    Ok(v) => value.value = Some(v),
                    Err(status) => {
                        value.value = None;
                        value.status = Some(status);
                    }
                }
            }
        }

        let data_change = match (last_data_value.as_ref(), filter.as_ref()) {
            (Some(last_dv), Some(filter)) => !filter.compare(&value, last_dv),
            (Some(last_dv), None) => {
                value.value != last_dv.value || value.status() != last_dv.status()
            }
            (None, _) => true,
        };
        if !data_change {
            return false;
        }
        *last_data_value = Some(value.clone());

        value.strip_timestamps(self.timestamps_to_return);
        let client_handle = self.client_handle;
        self.enqueue_notification(MonitoredItemNotification {
            client_handle,
            value,
        });
        true
    }

    /// Filters an event through the select clauses. Returns true if the event was queued.
    pub fn notify_event(&mut self, event: &dyn Event) -> bool {
        if self.monitoring_mode == MonitoringMode::Disabled {
            return false;
        }
        let MonitoredItemKind::Event { filter } = &self.kind else {
            return false;
        };
        let notification = filter.evaluate(event, self.client_handle);
        self.enqueue_notification(notification);
        true
    }

    fn enqueue_notification(&mut self, notification: impl Into<Notification>) {
        let mut notification = notification.into();
        let overflow = self.notification_queue.len() >= self.queue_size;
        if overflow {
            self.queue_overflow = true;
            // A queue of 1 never reports an overflow
            let mark_overflow = self.queue_size > 1;
            if self.discard_oldest {
                while self.notification_queue.len() >= self.queue_size {
                    let _ = self.notification_queue.pop_front();
                }
                self.notification_queue.push_back(notification);
                if mark_overflow {
                    if let Some(oldest) = self.notification_queue.front_mut() {
                        oldest.set_overflow();
                    }
                }
            } else {
                while self.notification_queue.len() >= self.queue_size {
                    let _ = self.notification_queue.pop_back();
                }
                if mark_overflow {
                    notification.set_overflow();
                }
                self.notification_queue.push_back(notification);
            }
        } else {
            self.notification_queue.push_back(notification);
        }
    }

    /// Queues the last sampled value, if it isn't the newest value in the queue already.
    pub fn add_current_value_to_queue(&mut self) {
        let MonitoredItemKind::Data {
            last_data_value: Some(last_data_value),
            ..
        } = &self.kind
        else {
            return;
        };
        let mut value = last_data_value.clone();
        value.strip_timestamps(self.timestamps_to_return);

        if let Some(Notification::MonitoredItemNotification(it)) = self.notification_queue.back()
        {
            if it.value == value {
                return;
            }
        }
        let client_handle = self.client_handle;
        self.enqueue_notification(MonitoredItemNotification {
            client_handle,
            value,
        });
    }

    /// Marks the item as triggered by a linked item, so its queue is reported regardless of its
    /// monitoring mode. An item with an empty queue reports its last value.
    pub fn trigger(&mut self) {
        if self.monitoring_mode == MonitoringMode::Disabled {
            return;
        }
        if self.notification_queue.is_empty() {
            self.add_current_value_to_queue();
        }
        self.triggered = true;
    }

    /// Moves queued notifications into `notifications` until it holds `max` entries. Returns true
    /// if the item has nothing left to report.
    pub fn get_notifications(&mut self, notifications: &mut Vec<Notification>, max: usize) -> bool {
        if !(self.is_reporting() || self.triggered) {
            return true;
        }
        while notifications.len() < max {
            let Some(notification) = self.notification_queue.pop_front() else {
                break;
            };
            notifications.push(notification);
        }
        if self.notification_queue.is_empty() {
            self.triggered = false;
            self.queue_overflow = false;
            true
        } else {
            false
        }
    }

    pub fn add_trigger(&mut self, id: u32) {
        self.triggered_items.insert(id);
    }

    /// Removes a link, returning true if it existed
    pub fn remove_dead_trigger(&mut self, id: u32) -> bool {
        self.triggered_items.remove(&id)
    }

    pub fn is_reporting(&self) -> bool {
        matches!(self.monitoring_mode, MonitoringMode::Reporting)
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    pub fn is_event(&self) -> bool {
        matches!(self.kind, MonitoredItemKind::Event { .. })
    }

    pub fn triggered_items(&self) -> &BTreeSet<u32> {
        &self.triggered_items
    }

    /// Tests if the item has queued notifications that are due for reporting
    pub fn has_notifications(&self) -> bool {
        self.is_reporting() && !self.notification_queue.is_empty()
    }

    pub fn queue_len(&self) -> usize {
        self.notification_queue.len()
    }

    pub fn queue_overflow(&self) -> bool {
        self.queue_overflow
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn handle(&self) -> MonitoredItemHandle {
        MonitoredItemHandle {
            subscription_id: self.subscription_id,
            monitored_item_id: self.id,
        }
    }

    pub fn client_handle(&self) -> u32 {
        self.client_handle
    }

    pub fn sampling_interval(&self) -> f64 {
        self.sampling_interval
    }

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    pub fn item_to_monitor(&self) -> &ReadValueId {
        &self.item_to_monitor
    }

    pub fn monitoring_mode(&self) -> MonitoringMode {
        self.monitoring_mode
    }

    /// Changes the monitoring mode. Disabling an item discards its queue.
    pub fn set_monitoring_mode(&mut self, monitoring_mode: MonitoringMode) {
        self.monitoring_mode = monitoring_mode;
        if monitoring_mode == MonitoringMode::Disabled {
            self.notification_queue.clear();
            self.triggered = false;
            self.queue_overflow = false;
        }
    }

    pub fn to_ref(&self) -> MonitoredItemRef {
        MonitoredItemRef {
            handle: self.handle(),
            item_to_monitor: self.item_to_monitor.clone(),
            monitoring_mode: self.monitoring_mode,
            sampling_interval: self.sampling_interval,
            queue_size: self.queue_size,
        }
    }
}
