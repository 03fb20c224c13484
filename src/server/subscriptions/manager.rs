use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
    time::Duration,
};

use hashbrown::{HashMap, HashSet};
use tokio::{sync::oneshot, time::Instant};

use crate::{
    server::{
        address_space::{AddressSpace, MonitoringFilter},
        resources::SessionResources,
        subscription_server::SubscriptionServer,
    },
    sync::{Mutex, RwLock},
    types::{
        node_id::ids, AttributeId, CreateMonitoredItemsRequest, CreateMonitoredItemsResponse,
        CreateSubscriptionRequest, CreateSubscriptionResponse, DataValue, DeadbandType,
        DeleteMonitoredItemsRequest, DeleteMonitoredItemsResponse, DeleteSubscriptionsRequest,
        DeleteSubscriptionsResponse, EventFilterResult, EventNotifier, ExtensionObject,
        ModifyMonitoredItemsRequest, ModifyMonitoredItemsResponse, ModifySubscriptionRequest,
        ModifySubscriptionResponse, MonitoredItemCreateRequest, MonitoredItemCreateResult,
        MonitoredItemModifyRequest, MonitoredItemModifyResult, NodeId, NumericRange,
        ParsedEventFilter, PublishRequest, ReadValueId, RepublishRequest, RepublishResponse,
        ResponseHeader, SetMonitoringModeRequest, SetMonitoringModeResponse,
        SetPublishingModeRequest, SetPublishingModeResponse, SetTriggeringRequest,
        SetTriggeringResponse, StatusCode, TimestampsToReturn, Variant,
    },
};

use super::{
    monitored_item::{
        revise_queue_size, revise_sampling_interval, CreateMonitoredItem, FilterType,
        ModifyMonitoredItem, MonitoredItem, MonitoredItemHandle, MonitoredItemRef,
    },
    publish_queue::PublishQueue,
    state::SubscriptionState,
    subscription::{StateListener, Subscription, SubscriptionParameters},
    PendingPublish, PublishResult,
};

/// The attributes read from a node to decide what may be monitored on it, in read order.
const NODE_ATTRIBUTES: [AttributeId; 4] = [
    AttributeId::NodeClass,
    AttributeId::EventNotifier,
    AttributeId::DataType,
    AttributeId::MinimumSamplingInterval,
];

struct NodeAttributes {
    node_class: DataValue,
    event_notifier: DataValue,
    data_type: DataValue,
    minimum_sampling_interval: DataValue,
}

/// A monitoring request that passed validation against its node.
struct ValidatedItem {
    index_range: NumericRange,
    filter: FilterType,
    filter_res: Option<EventFilterResult>,
    minimum_sampling_interval: f64,
}

/// The status of a failed item, with the filter result when the filter was an event filter.
type ItemError = (StatusCode, Option<EventFilterResult>);

#[derive(Debug, Copy, Clone)]
pub(crate) enum ItemsChange {
    Created,
    Modified,
    Deleted,
}

fn take_value(values: &mut impl Iterator<Item = DataValue>) -> DataValue {
    values
        .next()
        .unwrap_or_else(|| DataValue::from_status(StatusCode::BadInternalError))
}

/// Reads the attributes of every distinct node in one call, along with any extra values.
async fn read_node_attributes(
    address_space: &dyn AddressSpace,
    nodes: Vec<NodeId>,
    values: Vec<ReadValueId>,
) -> (HashMap<NodeId, NodeAttributes>, Vec<DataValue>) {
    let mut seen = HashSet::new();
    let nodes: Vec<NodeId> = nodes.into_iter().filter(|n| seen.insert(n.clone())).collect();

    let mut to_read = Vec::with_capacity(nodes.len() * NODE_ATTRIBUTES.len() + values.len());
    for node in &nodes {
        for attribute_id in NODE_ATTRIBUTES {
            to_read.push(ReadValueId::new(node.clone(), attribute_id as u32));
        }
    }
    let value_count = values.len();
    to_read.extend(values);

    let results = address_space.read(&to_read).await;
    if results.len() != to_read.len() {
        error!(
            "Address space returned {} values when {} were read",
            results.len(),
            to_read.len()
        );
    }
    let mut results = results.into_iter();
    let mut attributes = HashMap::with_capacity(nodes.len());
    for node in nodes {
        let node_attributes = NodeAttributes {
            node_class: take_value(&mut results),
            event_notifier: take_value(&mut results),
            data_type: take_value(&mut results),
            minimum_sampling_interval: take_value(&mut results),
        };
        attributes.insert(node, node_attributes);
    }
    let values = (0..value_count).map(|_| take_value(&mut results)).collect();
    (attributes, values)
}

/// Splits items into references to data items and to event items
pub(crate) fn split_refs<'a>(
    items: impl IntoIterator<Item = &'a MonitoredItem>,
) -> (Vec<MonitoredItemRef>, Vec<MonitoredItemRef>) {
    let mut data_items = Vec::new();
    let mut event_items = Vec::new();
    for item in items {
        if item.is_event() {
            event_items.push(item.to_ref());
        } else {
            data_items.push(item.to_ref());
        }
    }
    (data_items, event_items)
}

/// Tells the address space about changed items. Failures are logged only.
pub(crate) async fn notify_items_changed(
    address_space: &dyn AddressSpace,
    change: ItemsChange,
    data_items: &[MonitoredItemRef],
    event_items: &[MonitoredItemRef],
) {
    if !data_items.is_empty() {
        let result = match change {
            ItemsChange::Created => address_space.on_data_items_created(data_items).await,
            ItemsChange::Modified => address_space.on_data_items_modified(data_items).await,
            ItemsChange::Deleted => address_space.on_data_items_deleted(data_items).await,
        };
        if let Err(e) = result {
            warn!(
                "Address space failed to handle {} {:?} data items, {}",
                data_items.len(),
                change,
                e
            );
        }
    }
    if !event_items.is_empty() {
        let result = match change {
            ItemsChange::Created => address_space.on_event_items_created(event_items).await,
            ItemsChange::Modified => address_space.on_event_items_modified(event_items).await,
            ItemsChange::Deleted => address_space.on_event_items_deleted(event_items).await,
        };
        if let Err(e) = result {
            warn!(
                "Address space failed to handle {} {:?} event items, {}",
                event_items.len(),
                change,
                e
            );
        }
    }
}

/// The subscriptions of one session, and the entry point of the subscription services for it.
/// Whole request failures are returned as `Err`, the equivalent of a service fault.
pub struct SubscriptionManager {
    session_id: u32,
    server: Arc<SubscriptionServer>,
    publish_queue: Arc<PublishQueue>,
    /// Map from subscription id to the subscriptions of this session
    subscriptions: Arc<RwLock<HashMap<u32, Arc<Subscription>>>>,
    session_resources: Arc<SessionResources>,
    /// Status changes of subscriptions that moved to another session, for the next requests
    status_changes: Mutex<VecDeque<(Arc<Subscription>, StatusCode)>>,
}

impl SubscriptionManager {
    pub(crate) fn new(session_id: u32, server: Arc<SubscriptionServer>) -> Self {
        let publish_queue = Arc::new(PublishQueue::new(
            server.limits().max_pending_publish_requests,
            server.runtime().clone(),
        ));
        Self {
            session_id,
            server,
            publish_queue,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            session_resources: Arc::new(SessionResources::default()),
            status_changes: Mutex::new(VecDeque::new()),
        }
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn session_resources(&self) -> &Arc<SessionResources> {
        &self.session_resources
    }

    pub fn publish_queue(&self) -> &Arc<PublishQueue> {
        &self.publish_queue
    }

    pub fn subscription_count(&self) -> usize {
        trace_read_lock!(self.subscriptions).len()
    }

    pub fn subscription_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = trace_read_lock!(self.subscriptions)
            .keys()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn get_subscription(&self, subscription_id: u32) -> Option<Arc<Subscription>> {
        trace_read_lock!(self.subscriptions)
            .get(&subscription_id)
            .cloned()
    }

    /// Cleans up after a subscription which closes on its own, i.e. its lifetime expired.
    fn state_listener(&self) -> StateListener {
        let server: Weak<SubscriptionServer> = Arc::downgrade(&self.server);
        let subscriptions = Arc::downgrade(&self.subscriptions);
        let publish_queue = Arc::downgrade(&self.publish_queue);
        Arc::new(move |subscription, _previous, current| {
            if current != SubscriptionState::Closed {
                return;
            }
            let subscription_id = subscription.subscription_id();
            let remaining = match subscriptions.upgrade() {
                Some(subscriptions) => {
                    let mut lck = trace_write_lock!(subscriptions);
                    if lck.remove(&subscription_id).is_none() {
                        // Deleted through the manager, which does its own cleanup
                        return;
                    }
                    lck.len()
                }
                None => 0,
            };
            let Some(server) = server.upgrade() else {
                return;
            };
            server.deregister(subscription_id);
            info!("Subscription {} has expired and was removed", subscription_id);

            server.release_items(subscription.drain_monitored_items());
            if remaining == 0 {
                if let Some(publish_queue) = publish_queue.upgrade() {
                    publish_queue.fault_all(StatusCode::BadNoSubscription);
                }
            }
        })
    }

    fn check_batch<'a, T>(&self, items: Option<&'a [T]>) -> Result<&'a [T], StatusCode> {
        let max_per_call = self.server.limits().max_monitored_items_per_call;
        match items {
            None | Some([]) => Err(StatusCode::BadNothingToDo),
            Some(items) if max_per_call > 0 && items.len() > max_per_call => {
                Err(StatusCode::BadTooManyOperations)
            }
            Some(items) => Ok(items),
        }
    }

    fn subscription_or_invalid(&self, subscription_id: u32) -> Result<Arc<Subscription>, StatusCode> {
        self.get_subscription(subscription_id)
            .ok_or(StatusCode::BadSubscriptionIdInvalid)
    }

    // SUBSCRIPTIONS

    pub fn create_subscription(
        &self,
        request: &CreateSubscriptionRequest,
    ) -> Result<CreateSubscriptionResponse, StatusCode> {
        let permit = self
            .server
            .resources()
            .try_acquire_subscription(&self.session_resources)?;
        let limits = self.server.limits();
        let parameters = SubscriptionParameters::revise(
            limits,
            request.requested_publishing_interval,
            request.requested_max_keep_alive_count,
            request.requested_lifetime_count,
            request.max_notifications_per_publish,
            request.priority,
        );
        let subscription_id = self.server.next_subscription_id();
        let subscription = Subscription::new(
            subscription_id,
            self.session_id,
            parameters,
            request.publishing_enabled,
            limits.max_queued_notifications,
            self.publish_queue.clone(),
        );
        subscription.set_permit(permit);
        subscription.set_state_listener(Some(self.state_listener()));
        {
            let mut lck = trace_write_lock!(self.subscriptions);
            lck.insert(subscription_id, subscription.clone());
        }
        self.server.register(subscription.clone());
        subscription.spawn_publishing_timer(self.server.runtime());

        info!(
            "Session {} created subscription {}, publishing interval {}ms, keep alive count {}, lifetime count {}",
            self.session_id,
            subscription_id,
            parameters.publishing_interval,
            parameters.max_keep_alive_count,
            parameters.lifetime_count
        );

        Ok(CreateSubscriptionResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            subscription_id,
            revised_publishing_interval: parameters.publishing_interval,
            revised_lifetime_count: parameters.lifetime_count,
            revised_max_keep_alive_count: parameters.max_keep_alive_count,
        })
    }

    pub fn modify_subscription(
        &self,
        request: &ModifySubscriptionRequest,
    ) -> Result<ModifySubscriptionResponse, StatusCode> {
        let subscription = self.subscription_or_invalid(request.subscription_id)?;
        let parameters = SubscriptionParameters::revise(
            self.server.limits(),
            request.requested_publishing_interval,
            request.requested_max_keep_alive_count,
            request.requested_lifetime_count,
            request.max_notifications_per_publish,
            request.priority,
        );
        subscription.modify(parameters);
        Ok(ModifySubscriptionResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            revised_publishing_interval: parameters.publishing_interval,
            revised_lifetime_count: parameters.lifetime_count,
            revised_max_keep_alive_count: parameters.max_keep_alive_count,
        })
    }

    pub fn set_publishing_mode(
        &self,
        request: &SetPublishingModeRequest,
    ) -> Result<SetPublishingModeResponse, StatusCode> {
        let ids = match request.subscription_ids.as_deref() {
            None | Some([]) => return Err(StatusCode::BadNothingToDo),
            Some(ids) => ids,
        };
        let results = ids
            .iter()
            .map(|id| match self.get_subscription(*id) {
                Some(subscription) => {
                    subscription.set_publishing_enabled(request.publishing_enabled);
                    StatusCode::Good
                }
                None => StatusCode::BadSubscriptionIdInvalid,
            })
            .collect();
        Ok(SetPublishingModeResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            results: Some(results),
        })
    }

    /// Removes a subscription from the session and the server, and takes its items.
    fn remove_subscription(&self, subscription_id: u32) -> Option<Vec<MonitoredItem>> {
        let subscription = {
            let mut lck = trace_write_lock!(self.subscriptions);
            lck.remove(&subscription_id)
        }?;
        self.server.deregister(subscription_id);
        info!(
            "Session {} deleted subscription {}",
            self.session_id, subscription_id
        );
        Some(subscription.delete())
    }

    pub async fn delete_subscriptions(
        &self,
        request: &DeleteSubscriptionsRequest,
    ) -> Result<DeleteSubscriptionsResponse, StatusCode> {
        let ids = match request.subscription_ids.as_deref() {
            None | Some([]) => return Err(StatusCode::BadNothingToDo),
            Some(ids) => ids,
        };
        let mut results = Vec::with_capacity(ids.len());
        let mut data_items = Vec::new();
        let mut event_items = Vec::new();
        for id in ids {
            match self.remove_subscription(*id) {
                Some(items) => {
                    let (data, events) = split_refs(&items);
                    data_items.extend(data);
                    event_items.extend(events);
                    results.push(StatusCode::Good);
                }
                None => results.push(StatusCode::BadSubscriptionIdInvalid),
            }
        }
        notify_items_changed(
            &**self.server.address_space(),
            ItemsChange::Deleted,
            &data_items,
            &event_items,
        )
        .await;
        if self.subscription_count() == 0 {
            self.publish_queue.fault_all(StatusCode::BadNoSubscription);
        }
        Ok(DeleteSubscriptionsResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            results: Some(results),
        })
    }

    /// Ends the subscriptions of the session when it closes. Parked publish requests are
    /// faulted with `BadSessionClosed`. Subscriptions that are not deleted stay alive without a
    /// session until another session adopts them or their lifetime runs out.
    pub async fn delete_all(&self, delete_subscriptions: bool) {
        if delete_subscriptions {
            let mut data_items = Vec::new();
            let mut event_items = Vec::new();
            for id in self.subscription_ids() {
                if let Some(items) = self.remove_subscription(id) {
                    let (data, events) = split_refs(&items);
                    data_items.extend(data);
                    event_items.extend(events);
                }
            }
            notify_items_changed(
                &**self.server.address_space(),
                ItemsChange::Deleted,
                &data_items,
                &event_items,
            )
            .await;
        } else {
            let subscriptions: Vec<Arc<Subscription>> = {
                let mut lck = trace_write_lock!(self.subscriptions);
                lck.drain().map(|(_, s)| s).collect()
            };
            for subscription in subscriptions {
                subscription.set_state_listener(None);
                self.publish_queue
                    .remove_subscription(subscription.subscription_id());
                self.server.detach(&subscription);
                info!(
                    "Session {} closed, subscription {} is kept for transfer",
                    self.session_id,
                    subscription.subscription_id()
                );
            }
        }
        trace_lock!(self.status_changes).clear();
        self.publish_queue.fault_all(StatusCode::BadSessionClosed);
    }

    /// Detaches a subscription so another session can adopt it. The session is told with a
    /// `GoodSubscriptionTransferred` status change, on a parked request or the next one to
    /// arrive.
    pub fn take_subscription(&self, subscription_id: u32) -> Option<Arc<Subscription>> {
        let subscription = {
            let mut lck = trace_write_lock!(self.subscriptions);
            lck.remove(&subscription_id)
        }?;
        subscription.set_state_listener(None);
        self.publish_queue.remove_subscription(subscription_id);
        let status = StatusCode::GoodSubscriptionTransferred;
        match self.publish_queue.poll() {
            Some(request) => subscription.send_status_change(request, status),
            None => trace_lock!(self.status_changes).push_back((subscription.clone(), status)),
        }
        self.server.detach(&subscription);
        info!(
            "Session {} gave up subscription {}",
            self.session_id, subscription_id
        );
        if self.subscription_count() == 0 && trace_lock!(self.status_changes).is_empty() {
            self.publish_queue.fault_all(StatusCode::BadNoSubscription);
        }
        Some(subscription)
    }

    /// Adopts a subscription that was detached from its session, returning the sequence
    /// numbers available for republishing. With `send_initial_values` the last value of every
    /// reporting data item is queued again.
    pub fn adopt_subscription(
        &self,
        subscription: &Arc<Subscription>,
        send_initial_values: bool,
    ) -> Result<Vec<u32>, StatusCode> {
        let subscription_id = subscription.subscription_id();
        if !self.server.take_detached(subscription_id) {
            return Err(StatusCode::BadSubscriptionIdInvalid);
        }
        let result = subscription.rebind(
            self.session_id,
            &self.session_resources,
            self.server.resources(),
            self.publish_queue.clone(),
            self.state_listener(),
            send_initial_values,
        );
        match result {
            Ok(available_sequence_numbers) => {
                {
                    let mut lck = trace_write_lock!(self.subscriptions);
                    lck.insert(subscription_id, subscription.clone());
                }
                info!(
                    "Session {} adopted subscription {}",
                    self.session_id, subscription_id
                );
                Ok(available_sequence_numbers)
            }
            Err(e) => {
                if matches!(
                    subscription.state(),
                    SubscriptionState::Closing | SubscriptionState::Closed
                ) {
                    self.server.close_detached(subscription);
                    Err(StatusCode::BadSubscriptionIdInvalid)
                } else {
                    self.server.detach(subscription);
                    Err(e)
                }
            }
        }
    }

    // PUBLISH

    /// Acknowledges the sequence numbers of the request and queues it for a subscription to
    /// answer. The response arrives on the returned channel.
    pub fn enqueue_publish(
        &self,
        request: PublishRequest,
    ) -> Result<oneshot::Receiver<PublishResult>, StatusCode> {
        let transferred = trace_lock!(self.status_changes).pop_front();
        if let Some((subscription, status)) = transferred {
            let (pending, receiver) = self.pending_publish(request, None);
            subscription.send_status_change(pending, status);
            return Ok(receiver);
        }
        if self.subscription_count() == 0 {
            return Err(StatusCode::BadNoSubscription);
        }
        let ack_results = request.subscription_acknowledgements.as_ref().map(|acks| {
            acks.iter()
                .map(|ack| match self.get_subscription(ack.subscription_id) {
                    Some(subscription) => subscription.acknowledge(ack.sequence_number),
                    None => StatusCode::BadSubscriptionIdInvalid,
                })
                .collect()
        });
        let (pending, receiver) = self.pending_publish(request, ack_results);
        self.publish_queue.add_request(pending);
        Ok(receiver)
    }

    fn pending_publish(
        &self,
        request: PublishRequest,
        ack_results: Option<Vec<StatusCode>>,
    ) -> (PendingPublish, oneshot::Receiver<PublishResult>) {
        let publish_timeout_ms = self.server.limits().publish_timeout_ms;
        let timeout_hint = request.request_header.timeout_hint as u64;
        let timeout_ms = if timeout_hint == 0 || timeout_hint > publish_timeout_ms {
            publish_timeout_ms
        } else {
            timeout_hint
        };

        let (response, receiver) = oneshot::channel();
        let received = Instant::now();
        let pending = PendingPublish {
            response,
            request: Box::new(request),
            ack_results,
            received,
            deadline: received + Duration::from_millis(timeout_ms),
        };
        (pending, receiver)
    }

    /// Publishes and waits for the response, which may take up to the timeout of the request.
    pub async fn publish(&self, request: PublishRequest) -> PublishResult {
        let receiver = self.enqueue_publish(request)?;
        receiver.await.unwrap_or(Err(StatusCode::BadSessionClosed))
    }

    pub fn republish(&self, request: &RepublishRequest) -> Result<RepublishResponse, StatusCode> {
        let subscription = self.subscription_or_invalid(request.subscription_id)?;
        let Some(notification_message) = subscription.republish(request.retransmit_sequence_number)
        else {
            return Err(StatusCode::BadMessageNotAvailable);
        };
        Ok(RepublishResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            notification_message,
        })
    }

    // MONITORED ITEMS

    fn minimum_sampling_interval(&self, attributes: &NodeAttributes) -> f64 {
        let value = &attributes.minimum_sampling_interval;
        let from_node = if value.status().is_good() {
            value.value.as_ref().and_then(|v| v.as_f64())
        } else {
            None
        };
        from_node.unwrap_or(self.server.limits().min_sampling_interval_ms)
    }

    /// Validates a monitoring request against the attributes of its node, decoding the filter.
    fn validate_item(
        &self,
        item_to_monitor: &ReadValueId,
        attributes: Option<&NodeAttributes>,
        filter: &ExtensionObject,
    ) -> Result<ValidatedItem, ItemError> {
        let Ok(attribute_id) = AttributeId::from_u32(item_to_monitor.attribute_id) else {
            return Err((StatusCode::BadAttributeIdInvalid, None));
        };
        let Some(attributes) = attributes else {
            error!(
                "Attributes of node {} were not read",
                item_to_monitor.node_id
            );
            return Err((StatusCode::BadInternalError, None));
        };
        let node_class_status = attributes.node_class.status();
        if node_class_status.is_bad() {
            return Err((node_class_status, None));
        }

        let encoding = &item_to_monitor.data_encoding;
        if !encoding.is_null() {
            if attribute_id != AttributeId::Value {
                return Err((StatusCode::BadDataEncodingInvalid, None));
            }
            if encoding.namespace_index != 0
                || !(encoding.name == "DefaultBinary" || encoding.name == "DefaultXML")
            {
                return Err((StatusCode::BadDataEncodingUnsupported, None));
            }
        }

        let Ok(index_range) = item_to_monitor.index_range.parse::<NumericRange>() else {
            return Err((StatusCode::BadIndexRangeInvalid, None));
        };

        let filter = self
            .server
            .address_space()
            .decode_filter(filter)
            .map_err(|e| (e, None))?;

        let (filter, filter_res) = if attribute_id == AttributeId::EventNotifier {
            let notifier = match &attributes.event_notifier.value {
                Some(Variant::Byte(v)) if attributes.event_notifier.status().is_good() => {
                    EventNotifier::from_bits_truncate(*v)
                }
                _ => EventNotifier::empty(),
            };
            if !notifier.contains(EventNotifier::SUBSCRIBE_TO_EVENTS) {
                return Err((StatusCode::BadAttributeIdInvalid, None));
            }
            let Some(MonitoringFilter::Event(filter)) = filter else {
                return Err((StatusCode::BadFilterNotAllowed, None));
            };
            let (filter_res, parsed) = ParsedEventFilter::new(filter);
            match parsed {
                Ok(parsed) => (FilterType::EventFilter(parsed), Some(filter_res)),
                Err(e) => return Err((e, Some(filter_res))),
            }
        } else {
            match filter {
                None => (FilterType::None, None),
                Some(MonitoringFilter::Event(_)) => {
                    return Err((StatusCode::BadFilterNotAllowed, None));
                }
                Some(MonitoringFilter::DataChange(filter)) => {
                    if attribute_id != AttributeId::Value {
                        return Err((StatusCode::BadFilterNotAllowed, None));
                    }
                    filter.validate().map_err(|e| (e, None))?;
                    if filter.deadband_type == DeadbandType::Absolute as u32 {
                        let is_numeric = match &attributes.data_type.value {
                            Some(Variant::NodeId(id)) => id
                                .as_ns0_numeric()
                                .map(ids::is_numeric_data_type)
                                .unwrap_or(false),
                            _ => false,
                        };
                        if !is_numeric {
                            return Err((StatusCode::BadFilterNotAllowed, None));
                        }
                    }
                    (FilterType::DataChangeFilter(filter), None)
                }
            }
        };

        Ok(ValidatedItem {
            index_range,
            filter,
            filter_res,
            minimum_sampling_interval: self.minimum_sampling_interval(attributes),
        })
    }

    pub async fn create_monitored_items(
        &self,
        request: &CreateMonitoredItemsRequest,
    ) -> Result<CreateMonitoredItemsResponse, StatusCode> {
        let subscription = self.subscription_or_invalid(request.subscription_id)?;
        if request.timestamps_to_return == TimestampsToReturn::Invalid {
            return Err(StatusCode::BadTimestampsToReturnInvalid);
        }
        let items_to_create = self.check_batch(request.items_to_create.as_deref())?;

        // The current value of every data item is read for its initial value
        let is_event_attribute = |item: &MonitoredItemCreateRequest| {
            item.item_to_monitor.attribute_id == AttributeId::EventNotifier as u32
        };
        let nodes = items_to_create
            .iter()
            .map(|i| i.item_to_monitor.node_id.clone())
            .collect();
        let values = items_to_create
            .iter()
            .filter(|i| !is_event_attribute(*i))
            .map(|i| ReadValueId::new(i.item_to_monitor.node_id.clone(), i.item_to_monitor.attribute_id))
            .collect();
        let address_space = self.server.address_space().clone();
        let (attributes, values) = read_node_attributes(&*address_space, nodes, values).await;
        let mut values = values.into_iter();

        let publishing_interval = subscription.parameters().publishing_interval;
        let mut results = Vec::with_capacity(items_to_create.len());
        let mut created = Vec::new();
        for item in items_to_create {
            let initial_value = if is_event_attribute(item) {
                None
            } else {
                values.next()
            };
            let result = self
                .create_monitored_item(
                    &subscription,
                    item,
                    attributes.get(&item.item_to_monitor.node_id),
                    initial_value,
                    publishing_interval,
                    request.timestamps_to_return,
                )
                .await;
            match result {
                Ok((result, monitored_item)) => {
                    results.push(result);
                    created.push(monitored_item);
                }
                Err((status_code, filter_result)) => {
                    debug!(
                        "Monitored item on {} in subscription {} was not created, {}",
                        item.item_to_monitor.node_id, request.subscription_id, status_code
                    );
                    results.push(MonitoredItemCreateResult {
                        status_code,
                        monitored_item_id: 0,
                        revised_sampling_interval: 0f64,
                        revised_queue_size: 0,
                        filter_result,
                    });
                }
            }
        }

        // The address space hears of the items before they can be deleted
        let (data_items, event_items) = split_refs(&created);
        notify_items_changed(
            &*address_space,
            ItemsChange::Created,
            &data_items,
            &event_items,
        )
        .await;
        if let Err(refused) = subscription.add_monitored_items(self.session_id, created) {
            warn!(
                "Subscription {} went away while {} monitored items were created",
                request.subscription_id,
                refused.len()
            );
            for result in results.iter_mut().filter(|r| r.status_code.is_good()) {
                *result = MonitoredItemCreateResult {
                    status_code: StatusCode::BadSubscriptionIdInvalid,
                    monitored_item_id: 0,
                    revised_sampling_interval: 0f64,
                    revised_queue_size: 0,
                    filter_result: None,
                };
            }
            drop(refused);
            notify_items_changed(
                &*address_space,
                ItemsChange::Deleted,
                &data_items,
                &event_items,
            )
            .await;
        }

        Ok(CreateMonitoredItemsResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            results: Some(results),
        })
    }

    async fn create_monitored_item(
        &self,
        subscription: &Subscription,
        item: &MonitoredItemCreateRequest,
        attributes: Option<&NodeAttributes>,
        initial_value: Option<DataValue>,
        publishing_interval: f64,
        timestamps_to_return: TimestampsToReturn,
    ) -> Result<(MonitoredItemCreateResult, MonitoredItem), ItemError> {
        let limits = self.server.limits();
        let ValidatedItem {
            index_range,
            filter,
            filter_res,
            minimum_sampling_interval,
        } = self.validate_item(
            &item.item_to_monitor,
            attributes,
            &item.requested_parameters.filter,
        )?;
        let is_event = matches!(filter, FilterType::EventFilter(_));
        let sampling_interval = if is_event {
            0f64
        } else {
            revise_sampling_interval(
                limits,
                publishing_interval,
                minimum_sampling_interval,
                item.requested_parameters.sampling_interval,
            )
        };
        let queue_size = revise_queue_size(limits, is_event, item.requested_parameters.queue_size);

        // Slots are taken before provisioning and given back if it fails
        let permit = match self
            .server
            .resources()
            .try_acquire_monitored_item(&self.session_resources, subscription.item_slots())
        {
            Ok(permit) => permit,
            Err(e) => return Err((e, filter_res)),
        };

        let handle = MonitoredItemHandle {
            subscription_id: subscription.subscription_id(),
            monitored_item_id: subscription.next_monitored_item_id(),
        };
        let mut create = CreateMonitoredItem::new(
            handle,
            item.item_to_monitor.clone(),
            index_range,
            item.monitoring_mode,
            item.requested_parameters.client_handle,
            item.requested_parameters.discard_oldest,
            sampling_interval,
            queue_size,
            filter,
            timestamps_to_return,
        );
        create.set_filter_res(filter_res);
        if let Some(initial_value) = initial_value {
            create.set_initial_value(initial_value);
        }

        let address_space = self.server.address_space();
        let provisioned = if is_event {
            address_space.on_create_event_item(&mut create).await
        } else {
            address_space.on_create_data_item(&mut create).await
        };
        if let Err(e) = provisioned {
            let status = if e.is_bad() {
                e
            } else {
                error!(
                    "Address space failed to provision item {:?} with a status {} that is not bad",
                    handle, e
                );
                StatusCode::BadInternalError
            };
            return Err((status, create.filter_res().cloned()));
        }

        let mut monitored_item = MonitoredItem::new(&create);
        monitored_item.set_permit(permit);
        let result = MonitoredItemCreateResult {
            status_code: StatusCode::Good,
            monitored_item_id: handle.monitored_item_id,
            revised_sampling_interval: create.sampling_interval(),
            revised_queue_size: create.queue_size() as u32,
            filter_result: create.filter_res().cloned(),
        };
        Ok((result, monitored_item))
    }

    pub async fn modify_monitored_items(
        &self,
        request: &ModifyMonitoredItemsRequest,
    ) -> Result<ModifyMonitoredItemsResponse, StatusCode> {
        let subscription = self.subscription_or_invalid(request.subscription_id)?;
        if request.timestamps_to_return == TimestampsToReturn::Invalid {
            return Err(StatusCode::BadTimestampsToReturnInvalid);
        }
        let items_to_modify = self.check_batch(request.items_to_modify.as_deref())?;

        let existing: Vec<Option<(ReadValueId, bool)>> = items_to_modify
            .iter()
            .map(|i| {
                subscription.with_monitored_item(i.monitored_item_id, |item| {
                    (item.item_to_monitor().clone(), item.is_event())
                })
            })
            .collect();
        let nodes = existing
            .iter()
            .flatten()
            .map(|(item_to_monitor, _)| item_to_monitor.node_id.clone())
            .collect();
        let address_space = self.server.address_space().clone();
        let (attributes, _) = read_node_attributes(&*address_space, nodes, Vec::new()).await;

        let publishing_interval = subscription.parameters().publishing_interval;
        let mut results = Vec::with_capacity(items_to_modify.len());
        let mut data_items = Vec::new();
        let mut event_items = Vec::new();
        for (item, existing) in items_to_modify.iter().zip(existing) {
            let result = match existing {
                Some((item_to_monitor, is_event)) => {
                    let attributes = attributes.get(&item_to_monitor.node_id);
                    self.modify_monitored_item(
                        &subscription,
                        item,
                        item_to_monitor,
                        is_event,
                        attributes,
                        publishing_interval,
                        request.timestamps_to_return,
                    )
                    .await
                    .map(|(result, item_ref)| {
                        if is_event {
                            event_items.push(item_ref);
                        } else {
                            data_items.push(item_ref);
                        }
                        result
                    })
                }
                None => Err((StatusCode::BadMonitoredItemIdInvalid, None)),
            };
            results.push(result.unwrap_or_else(|(status_code, filter_result)| {
                MonitoredItemModifyResult {
                    status_code,
                    revised_sampling_interval: 0f64,
                    revised_queue_size: 0,
                    filter_result,
                }
            }));
        }

        if !data_items.is_empty() || !event_items.is_empty() {
            subscription.reset_lifetime_counter();
        }
        notify_items_changed(
            &*address_space,
            ItemsChange::Modified,
            &data_items,
            &event_items,
        )
        .await;

        Ok(ModifyMonitoredItemsResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            results: Some(results),
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn modify_monitored_item(
        &self,
        subscription: &Subscription,
        item: &MonitoredItemModifyRequest,
        item_to_monitor: ReadValueId,
        is_event: bool,
        attributes: Option<&NodeAttributes>,
        publishing_interval: f64,
        timestamps_to_return: TimestampsToReturn,
    ) -> Result<(MonitoredItemModifyResult, MonitoredItemRef), ItemError> {
        let limits = self.server.limits();
        let ValidatedItem {
            filter,
            filter_res,
            minimum_sampling_interval,
            ..
        } = self.validate_item(
            &item_to_monitor,
            attributes,
            &item.requested_parameters.filter,
        )?;
        let sampling_interval = if is_event {
            0f64
        } else {
            revise_sampling_interval(
                limits,
                publishing_interval,
                minimum_sampling_interval,
                item.requested_parameters.sampling_interval,
            )
        };
        let queue_size = revise_queue_size(limits, is_event, item.requested_parameters.queue_size);

        let handle = MonitoredItemHandle {
            subscription_id: subscription.subscription_id(),
            monitored_item_id: item.monitored_item_id,
        };
        let mut modify = ModifyMonitoredItem::new(
            handle,
            item_to_monitor,
            item.requested_parameters.client_handle,
            item.requested_parameters.discard_oldest,
            sampling_interval,
            queue_size,
            filter,
            timestamps_to_return,
        );

        let address_space = self.server.address_space();
        let provisioned = if is_event {
            address_space.on_modify_event_item(&mut modify).await
        } else {
            address_space.on_modify_data_item(&mut modify).await
        };
        if let Err(e) = provisioned {
            let status = if e.is_bad() {
                e
            } else {
                StatusCode::BadInternalError
            };
            return Err((status, filter_res));
        }

        let item_ref = match subscription.modify_monitored_item(&modify) {
            Ok(item_ref) => item_ref,
            // Deleted while the address space was consulted
            Err(e) => return Err((e, filter_res)),
        };
        let result = MonitoredItemModifyResult {
            status_code: StatusCode::Good,
            revised_sampling_interval: item_ref.sampling_interval,
            revised_queue_size: item_ref.queue_size as u32,
            filter_result: filter_res,
        };
        Ok((result, item_ref))
    }

    pub async fn delete_monitored_items(
        &self,
        request: &DeleteMonitoredItemsRequest,
    ) -> Result<DeleteMonitoredItemsResponse, StatusCode> {
        let subscription = self.subscription_or_invalid(request.subscription_id)?;
        let ids = self.check_batch(request.monitored_item_ids.as_deref())?;
        let (results, deleted) = subscription.delete_monitored_items(ids);
        let (data_items, event_items) = split_refs(&deleted);
        // Dropping the items gives their slots back
        drop(deleted);
        notify_items_changed(
            &**self.server.address_space(),
            ItemsChange::Deleted,
            &data_items,
            &event_items,
        )
        .await;
        Ok(DeleteMonitoredItemsResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            results: Some(results),
        })
    }

    pub async fn set_monitoring_mode(
        &self,
        request: &SetMonitoringModeRequest,
    ) -> Result<SetMonitoringModeResponse, StatusCode> {
        let subscription = self.subscription_or_invalid(request.subscription_id)?;
        let ids = self.check_batch(request.monitored_item_ids.as_deref())?;
        let (results, changed) = subscription.set_monitoring_mode(request.monitoring_mode, ids);
        if !changed.is_empty() {
            if let Err(e) = self
                .server
                .address_space()
                .on_monitoring_mode_changed(request.monitoring_mode, &changed)
                .await
            {
                warn!(
                    "Address space failed to handle monitoring mode {:?} on {} items, {}",
                    request.monitoring_mode,
                    changed.len(),
                    e
                );
            }
        }
        Ok(SetMonitoringModeResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            results: Some(results),
        })
    }

    pub fn set_triggering(
        &self,
        request: &SetTriggeringRequest,
    ) -> Result<SetTriggeringResponse, StatusCode> {
        let links_to_add = request.links_to_add.as_deref().unwrap_or_default();
        let links_to_remove = request.links_to_remove.as_deref().unwrap_or_default();
        if links_to_add.is_empty() && links_to_remove.is_empty() {
            return Err(StatusCode::BadNothingToDo);
        }
        let subscription = self.subscription_or_invalid(request.subscription_id)?;
        let (add_results, remove_results) = subscription.set_triggering(
            request.triggering_item_id,
            links_to_add,
            links_to_remove,
        )?;
        Ok(SetTriggeringResponse {
            response_header: ResponseHeader::new_good(&request.request_header),
            add_results: Some(add_results),
            remove_results: Some(remove_results),
        })
    }
}
