use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    sync::{
        atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use tokio::{runtime::Handle as RuntimeHandle, time::Instant};

use crate::{
    core::handle::Handle,
    deregister_runtime_component, register_runtime_component,
    server::{
        config::ServerLimits,
        resources::{ResourceAccounting, ResourcePermit, SessionResources},
    },
    sync::{Mutex, RwLock},
    types::{
        DataValue, DateTime, Event, MonitoringMode, NotificationMessage, StatusCode,
    },
};

use super::{
    monitored_item::{ModifyMonitoredItem, MonitoredItem, MonitoredItemRef, Notification},
    publish_queue::PublishQueue,
    state::{
        self, StateAction, SubscriptionState, SubscriptionStateParams, TickReason, Transition,
    },
    PendingPublish,
};

/// Called with the previous and the new state whenever a subscription changes state. It is
/// invoked without any of the subscription's locks held.
pub type StateListener =
    Arc<dyn Fn(&Arc<Subscription>, SubscriptionState, SubscriptionState) + Send + Sync>;

/// What the publishing timer should do after a tick.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PublishingTimer {
    Reschedule(Duration),
    Stop,
}

/// The parameters of a subscription after revision against the server limits.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SubscriptionParameters {
    pub publishing_interval: f64,
    pub max_keep_alive_count: u32,
    pub lifetime_count: u32,
    pub max_notifications_per_publish: usize,
    pub priority: u8,
}

/// Divides the limit by the interval, rounding up when inexact
fn count_for_limit(limit_ms: f64, interval_ms: f64) -> u64 {
    let count = (limit_ms / interval_ms) as u64;
    if count < u32::MAX as u64 && limit_ms % interval_ms != 0f64 {
        count + 1
    } else {
        count
    }
}

impl SubscriptionParameters {
    /// Revises the requested parameters against the server limits. Create and modify revise the
    /// same way.
    pub fn revise(
        limits: &ServerLimits,
        requested_publishing_interval: f64,
        requested_max_keep_alive_count: u32,
        requested_lifetime_count: u32,
        requested_max_notifications_per_publish: u32,
        priority: u8,
    ) -> SubscriptionParameters {
        let publishing_interval =
            Self::revise_publishing_interval(limits, requested_publishing_interval);
        let max_keep_alive_count = Self::revise_max_keep_alive_count(
            limits,
            publishing_interval,
            requested_max_keep_alive_count,
        );
        let lifetime_count = Self::revise_lifetime_count(
            limits,
            publishing_interval,
            max_keep_alive_count,
            requested_lifetime_count,
        );
        let max_notifications_per_publish = Self::revise_max_notifications_per_publish(
            limits,
            requested_max_notifications_per_publish,
        );
        SubscriptionParameters {
            publishing_interval,
            max_keep_alive_count,
            lifetime_count,
            max_notifications_per_publish,
            priority,
        }
    }

    pub(crate) fn revise_publishing_interval(limits: &ServerLimits, requested: f64) -> f64 {
        if !requested.is_finite() || requested < limits.min_publishing_interval_ms {
            limits.min_publishing_interval_ms
        } else if requested > limits.max_publishing_interval_ms {
            limits.max_publishing_interval_ms
        } else {
            requested
        }
    }

    pub(crate) fn revise_max_keep_alive_count(
        limits: &ServerLimits,
        publishing_interval: f64,
        requested: u32,
    ) -> u32 {
        let mut keep_alive_count = if requested == 0 { 3 } else { requested as u64 };
        if keep_alive_count as f64 * publishing_interval > limits.max_lifetime_ms {
            keep_alive_count = count_for_limit(limits.max_lifetime_ms, publishing_interval);
        }
        if keep_alive_count as f64 * publishing_interval > limits.max_publishing_interval_ms {
            keep_alive_count =
                count_for_limit(limits.max_publishing_interval_ms, publishing_interval);
        }
        keep_alive_count.clamp(1, u32::MAX as u64) as u32
    }

    pub(crate) fn revise_lifetime_count(
        limits: &ServerLimits,
        publishing_interval: f64,
        max_keep_alive_count: u32,
        requested: u32,
    ) -> u32 {
        let mut lifetime_count = requested as u64;
        if lifetime_count as f64 * publishing_interval > limits.max_lifetime_ms {
            lifetime_count = count_for_limit(limits.max_lifetime_ms, publishing_interval);
        }
        let lifetime_interval = if (max_keep_alive_count as u64) < u32::MAX as u64 / 3 {
            lifetime_count = lifetime_count.max(max_keep_alive_count as u64 * 3);
            lifetime_count as f64 * publishing_interval
        } else {
            lifetime_count = u32::MAX as u64;
            f64::MAX
        };
        if limits.min_lifetime_ms > publishing_interval && limits.min_lifetime_ms > lifetime_interval
        {
            lifetime_count = count_for_limit(limits.min_lifetime_ms, publishing_interval);
        }
        lifetime_count.min(u32::MAX as u64) as u32
    }

    pub(crate) fn revise_max_notifications_per_publish(
        limits: &ServerLimits,
        requested: u32,
    ) -> usize {
        let requested = requested as usize;
        if requested == 0 || requested > limits.max_notifications_per_publish {
            limits.max_notifications_per_publish
        } else {
            requested
        }
    }

    fn publishing_interval_duration(&self) -> Duration {
        Duration::from_millis(self.publishing_interval.ceil() as u64)
    }
}

type StateChange = (SubscriptionState, SubscriptionState);

#[derive(Debug)]
struct SubscriptionInner {
    state: SubscriptionState,
    parameters: SubscriptionParameters,
    publishing_enabled: bool,
    keep_alive_counter: u32,
    lifetime_counter: u32,
    // Set once the first message has been sent
    message_sent: bool,
    more_notifications: bool,
    sequence_number: Handle,
    // Notification messages that have not been acknowledged yet, oldest first
    retransmission_queue: VecDeque<NotificationMessage>,
    max_queued_notifications: usize,
    // Items that still had notifications when the last message was full
    last_gathered: VecDeque<u32>,
    permit: Option<ResourcePermit>,
}

#[derive(Debug)]
struct MonitoredItems {
    items: BTreeMap<u32, MonitoredItem>,
    next_monitored_item_id: Handle,
}

/// A subscription. State is held behind a mutex and only changes through the state table, the
/// monitored items are behind a second mutex which is always taken after the first.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Subscription {
    subscription_id: u32,
    session_id: AtomicU32,
    priority: AtomicU8,
    inner: Mutex<SubscriptionInner>,
    items: Mutex<MonitoredItems>,
    // Monitored items and reservations for items being created
    item_slots: Arc<AtomicUsize>,
    #[derivative(Debug = "ignore")]
    publish_queue: RwLock<Arc<PublishQueue>>,
    #[derivative(Debug = "ignore")]
    state_listener: Mutex<Option<StateListener>>,
}

impl Subscription {
    pub fn new(
        subscription_id: u32,
        session_id: u32,
        parameters: SubscriptionParameters,
        publishing_enabled: bool,
        max_queued_notifications: usize,
        publish_queue: Arc<PublishQueue>,
    ) -> Arc<Self> {
        debug!(
            "Subscription {} created, {:?}, publishing enabled {}",
            subscription_id, parameters, publishing_enabled
        );
        Arc::new(Self {
            subscription_id,
            session_id: AtomicU32::new(session_id),
            priority: AtomicU8::new(parameters.priority),
            inner: Mutex::new(SubscriptionInner {
                state: SubscriptionState::Normal,
                parameters,
                publishing_enabled,
                keep_alive_counter: parameters.max_keep_alive_count,
                lifetime_counter: parameters.lifetime_count,
                message_sent: false,
                more_notifications: false,
                sequence_number: Handle::new(1),
                retransmission_queue: VecDeque::new(),
                max_queued_notifications,
                last_gathered: VecDeque::new(),
                permit: None,
            }),
            items: Mutex::new(MonitoredItems {
                items: BTreeMap::new(),
                next_monitored_item_id: Handle::new(1),
            }),
            item_slots: Arc::new(AtomicUsize::new(0)),
            publish_queue: RwLock::new(publish_queue),
            state_listener: Mutex::new(None),
        })
    }

    pub fn subscription_id(&self) -> u32 {
        self.subscription_id
    }

    pub fn session_id(&self) -> u32 {
        self.session_id.load(Ordering::Acquire)
    }

    pub fn priority(&self) -> u8 {
        self.priority.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> SubscriptionState {
        trace_lock!(self.inner).state
    }

    pub fn parameters(&self) -> SubscriptionParameters {
        trace_lock!(self.inner).parameters
    }

    pub fn publishing_enabled(&self) -> bool {
        trace_lock!(self.inner).publishing_enabled
    }

    pub fn keep_alive_counter(&self) -> u32 {
        trace_lock!(self.inner).keep_alive_counter
    }

    pub fn lifetime_counter(&self) -> u32 {
        trace_lock!(self.inner).lifetime_counter
    }

    /// The sequence numbers of messages that have not been acknowledged
    pub fn available_sequence_numbers(&self) -> Vec<u32> {
        let inner = trace_lock!(self.inner);
        Self::sequence_numbers(&inner)
    }

    fn sequence_numbers(inner: &SubscriptionInner) -> Vec<u32> {
        inner
            .retransmission_queue
            .iter()
            .map(|m| m.sequence_number)
            .collect()
    }

    fn publish_queue(&self) -> Arc<PublishQueue> {
        trace_read_lock!(self.publish_queue).clone()
    }

    pub fn set_state_listener(&self, listener: Option<StateListener>) {
        *trace_lock!(self.state_listener) = listener;
    }

    pub(crate) fn set_permit(&self, permit: ResourcePermit) {
        trace_lock!(self.inner).permit = Some(permit);
    }

    /// Applies revised parameters. Only the lifetime counter is reset.
    pub fn modify(&self, parameters: SubscriptionParameters) {
        let mut inner = trace_lock!(self.inner);
        inner.parameters = parameters;
        inner.lifetime_counter = parameters.lifetime_count;
        inner.keep_alive_counter = inner
            .keep_alive_counter
            .min(parameters.max_keep_alive_count);
        self.priority.store(parameters.priority, Ordering::Relaxed);
        debug!(
            "Subscription {} modified, {:?}",
            self.subscription_id, parameters
        );
    }

    pub fn set_publishing_enabled(&self, publishing_enabled: bool) {
        let mut inner = trace_lock!(self.inner);
        inner.publishing_enabled = publishing_enabled;
        inner.lifetime_counter = inner.parameters.lifetime_count;
    }

    pub(crate) fn reset_lifetime_counter(&self) {
        let mut inner = trace_lock!(self.inner);
        inner.lifetime_counter = inner.parameters.lifetime_count;
    }

    /// Removes an acknowledged message from the retransmission queue
    pub fn acknowledge(&self, sequence_number: u32) -> StatusCode {
        let mut inner = trace_lock!(self.inner);
        let idx = inner
            .retransmission_queue
            .iter()
            .position(|m| m.sequence_number == sequence_number);
        if let Some(idx) = idx {
            inner.retransmission_queue.remove(idx);
            debug!(
                "Subscription {} acknowledged sequence number {}",
                self.subscription_id, sequence_number
            );
            StatusCode::Good
        } else {
            debug!(
                "Subscription {} has no sequence number {} to acknowledge",
                self.subscription_id, sequence_number
            );
            StatusCode::BadSequenceNumberUnknown
        }
    }

    /// Finds an unacknowledged message to send again
    pub fn republish(&self, sequence_number: u32) -> Option<NotificationMessage> {
        let mut inner = trace_lock!(self.inner);
        inner.lifetime_counter = inner.parameters.lifetime_count;
        inner
            .retransmission_queue
            .iter()
            .find(|m| m.sequence_number == sequence_number)
            .cloned()
    }

    // MONITORED ITEMS

    pub(crate) fn next_monitored_item_id(&self) -> u32 {
        let mut lck = trace_lock!(self.items);
        let MonitoredItems {
            items,
            next_monitored_item_id,
        } = &mut *lck;
        next_monitored_item_id.next_unused(|id| items.contains_key(&id))
    }

    /// Counts the monitored items of the subscription against its limit
    pub(crate) fn item_slots(&self) -> &Arc<AtomicUsize> {
        &self.item_slots
    }

    pub fn monitored_item_count(&self) -> usize {
        trace_lock!(self.items).items.len()
    }

    pub fn contains_monitored_item(&self, monitored_item_id: u32) -> bool {
        trace_lock!(self.items)
            .items
            .contains_key(&monitored_item_id)
    }

    /// Calls the function with the monitored item if it exists
    pub fn with_monitored_item<T>(
        &self,
        monitored_item_id: u32,
        f: impl FnOnce(&MonitoredItem) -> T,
    ) -> Option<T> {
        let items = trace_lock!(self.items);
        items.items.get(&monitored_item_id).map(f)
    }

    /// Adds newly created items. They are handed back when the subscription closed or moved to
    /// another session while they were being created.
    pub(crate) fn add_monitored_items(
        &self,
        session_id: u32,
        new_items: Vec<MonitoredItem>,
    ) -> Result<(), Vec<MonitoredItem>> {
        if new_items.is_empty() {
            return Ok(());
        }
        let mut inner = trace_lock!(self.inner);
        if matches!(
            inner.state,
            SubscriptionState::Closing | SubscriptionState::Closed
        ) || self.session_id() != session_id
        {
            debug!(
                "Subscription {} no longer takes monitored items from session {}",
                self.subscription_id, session_id
            );
            return Err(new_items);
        }
        {
            let mut items = trace_lock!(self.items);
            for item in new_items {
                items.items.insert(item.id(), item);
            }
        }
        inner.lifetime_counter = inner.parameters.lifetime_count;
        Ok(())
    }

    pub(crate) fn modify_monitored_item(
        &self,
        request: &ModifyMonitoredItem,
    ) -> Result<MonitoredItemRef, StatusCode> {
        let mut items = trace_lock!(self.items);
        let Some(item) = items.items.get_mut(&request.handle().monitored_item_id) else {
            return Err(StatusCode::BadMonitoredItemIdInvalid);
        };
        item.modify(request);
        Ok(item.to_ref())
    }

    /// Deletes monitored items, giving a status per id and the deleted items. Deleted items are
    /// removed as link targets from the remaining items.
    pub(crate) fn delete_monitored_items(&self, ids: &[u32]) -> (Vec<StatusCode>, Vec<MonitoredItem>) {
        let (results, deleted) = {
            let mut items = trace_lock!(self.items);
            let mut results = Vec::with_capacity(ids.len());
            let mut deleted = Vec::new();
            for id in ids {
                if let Some(item) = items.items.remove(id) {
                    deleted.push(item);
                    results.push(StatusCode::Good);
                } else {
                    results.push(StatusCode::BadMonitoredItemIdInvalid);
                }
            }
            for item in items.items.values_mut() {
                for d in &deleted {
                    item.remove_dead_trigger(d.id());
                }
            }
            (results, deleted)
        };
        self.reset_lifetime_counter();
        (results, deleted)
    }

    pub(crate) fn drain_monitored_items(&self) -> Vec<MonitoredItem> {
        let mut items = trace_lock!(self.items);
        std::mem::take(&mut items.items).into_values().collect()
    }

    pub(crate) fn set_monitoring_mode(
        &self,
        monitoring_mode: MonitoringMode,
        ids: &[u32],
    ) -> (Vec<StatusCode>, Vec<MonitoredItemRef>) {
        let result = {
            let mut items = trace_lock!(self.items);
            let mut results = Vec::with_capacity(ids.len());
            let mut changed = Vec::new();
            for id in ids {
                if let Some(item) = items.items.get_mut(id) {
                    item.set_monitoring_mode(monitoring_mode);
                    changed.push(item.to_ref());
                    results.push(StatusCode::Good);
                } else {
                    results.push(StatusCode::BadMonitoredItemIdInvalid);
                }
            }
            (results, changed)
        };
        self.reset_lifetime_counter();
        result
    }

    /// Adds and removes triggering links of an item, removes first. Returns the add results
    /// and the remove results.
    pub(crate) fn set_triggering(
        &self,
        triggering_item_id: u32,
        links_to_add: &[u32],
        links_to_remove: &[u32],
    ) -> Result<(Vec<StatusCode>, Vec<StatusCode>), StatusCode> {
        let mut items = trace_lock!(self.items);
        if !items.items.contains_key(&triggering_item_id) {
            return Err(StatusCode::BadMonitoredItemIdInvalid);
        }
        let mut remove_results = Vec::with_capacity(links_to_remove.len());
        for id in links_to_remove {
            let exists = items.items.contains_key(id);
            let removed = items
                .items
                .get_mut(&triggering_item_id)
                .map(|item| item.remove_dead_trigger(*id))
                .unwrap_or(false);
            remove_results.push(if exists && removed {
                StatusCode::Good
            } else {
                StatusCode::BadMonitoredItemIdInvalid
            });
        }
        let mut add_results = Vec::with_capacity(links_to_add.len());
        for id in links_to_add {
            if items.items.contains_key(id) {
                if let Some(item) = items.items.get_mut(&triggering_item_id) {
                    item.add_trigger(*id);
                }
                add_results.push(StatusCode::Good);
            } else {
                add_results.push(StatusCode::BadMonitoredItemIdInvalid);
            }
        }
        Ok((add_results, remove_results))
    }

    /// Samples a data value on an item. When the sample is a change, the items linked to it are
    /// triggered.
    pub fn notify_data_value(&self, monitored_item_id: u32, value: DataValue) {
        let mut items = trace_lock!(self.items);
        let Some(item) = items.items.get_mut(&monitored_item_id) else {
            return;
        };
        if item.notify_data_value(value) {
            Self::fire_triggers(&mut items.items, monitored_item_id);
        }
    }

    pub fn notify_event(&self, monitored_item_id: u32, event: &dyn Event) {
        let mut items = trace_lock!(self.items);
        let Some(item) = items.items.get_mut(&monitored_item_id) else {
            return;
        };
        if item.notify_event(event) {
            Self::fire_triggers(&mut items.items, monitored_item_id);
        }
    }

    fn fire_triggers(items: &mut BTreeMap<u32, MonitoredItem>, monitored_item_id: u32) {
        let Some(item) = items.get_mut(&monitored_item_id) else {
            return;
        };
        if item.triggered_items().is_empty() {
            return;
        }
        let linked: Vec<u32> = item.triggered_items().iter().copied().collect();
        // A sampling item reports its own sample when it triggers
        if !item.is_reporting() {
            item.trigger();
        }
        for id in linked {
            if let Some(linked_item) = items.get_mut(&id) {
                linked_item.trigger();
            }
        }
    }

    // PUBLISHING

    /// Takes a publish request, answering it or parking it as the state table says.
    pub(crate) fn on_publish(self: &Arc<Self>, request: PendingPublish) {
        let change = {
            let mut inner = trace_lock!(self.inner);
            let params = self.state_params(&inner, true);
            let transition =
                state::transition(inner.state, TickReason::ReceivePublishRequest, &params);
            self.apply_transition(&mut inner, transition, Some(request))
        };
        self.notify_state_change(change);
    }

    /// Called once when the subscription is created, the lifetime starts counting down.
    pub(crate) fn start_publishing_timer(self: &Arc<Self>) -> PublishingTimer {
        let (change, timer) = {
            let mut inner = trace_lock!(self.inner);
            let interval = inner.parameters.publishing_interval_duration();
            self.count_down_lifetime(&mut inner, interval)
        };
        self.notify_state_change(change);
        timer
    }

    /// Handles a tick of the publishing timer
    pub fn on_publishing_timer(self: &Arc<Self>) -> PublishingTimer {
        let started = Instant::now();
        let mut changes = Vec::with_capacity(2);
        let timer = {
            let mut inner = trace_lock!(self.inner);
            if matches!(
                inner.state,
                SubscriptionState::Closing | SubscriptionState::Closed
            ) {
                return PublishingTimer::Stop;
            }
            let mut publishing_req_queued = self.publish_queue().is_not_empty();
            loop {
                let params = self.state_params(&inner, publishing_req_queued);
                let transition =
                    state::transition(inner.state, TickReason::TickTimerFired, &params);
                let request = if transition.pops_request() {
                    match self.publish_queue().poll() {
                        Some(request) => Some(request),
                        None => {
                            // Drained since the check, evaluate again without a request
                            publishing_req_queued = false;
                            continue;
                        }
                    }
                } else {
                    None
                };
                changes.extend(self.apply_transition(&mut inner, transition, request));
                break;
            }
            let delay = inner
                .parameters
                .publishing_interval_duration()
                .saturating_sub(started.elapsed());
            let (change, timer) = self.count_down_lifetime(&mut inner, delay);
            changes.extend(change);
            timer
        };
        self.notify_state_change(changes);
        timer
    }

    /// Spawns the task that drives the publishing timer until the subscription closes.
    pub(crate) fn spawn_publishing_timer(self: &Arc<Self>, runtime: &RuntimeHandle) {
        let PublishingTimer::Reschedule(mut delay) = self.start_publishing_timer() else {
            return;
        };
        let subscription: Weak<Subscription> = Arc::downgrade(self);
        let component = format!("subscription-timer-{}", self.subscription_id);
        runtime.spawn(async move {
            register_runtime_component!(&component);
            loop {
                tokio::time::sleep(delay).await;
                let Some(subscription) = subscription.upgrade() else {
                    break;
                };
                match subscription.on_publishing_timer() {
                    PublishingTimer::Reschedule(next) => delay = next,
                    PublishingTimer::Stop => break,
                }
            }
            deregister_runtime_component!(&component);
        });
    }

    /// Marks the subscription closed and takes its items. The caller tells the address space
    /// about them.
    pub(crate) fn delete(self: &Arc<Self>) -> Vec<MonitoredItem> {
        let change = {
            let mut inner = trace_lock!(self.inner);
            let previous = inner.state;
            inner.state = SubscriptionState::Closed;
            inner.permit = None;
            (previous != SubscriptionState::Closed).then_some((previous, SubscriptionState::Closed))
        };
        self.publish_queue().remove_subscription(self.subscription_id);
        let items = self.drain_monitored_items();
        self.notify_state_change(change);
        items
    }

    /// Moves the subscription to another session. Its session slots move with it, the publish
    /// requests of the new session answer it from now on and the listener replaces the old one.
    /// Returns the sequence numbers available for republishing.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn rebind(
        self: &Arc<Self>,
        session_id: u32,
        session: &Arc<SessionResources>,
        accounting: &ResourceAccounting,
        publish_queue: Arc<PublishQueue>,
        listener: StateListener,
        send_initial_values: bool,
    ) -> Result<Vec<u32>, StatusCode> {
        let (late, available_sequence_numbers) = {
            let mut inner = trace_lock!(self.inner);
            if matches!(
                inner.state,
                SubscriptionState::Closing | SubscriptionState::Closed
            ) {
                return Err(StatusCode::BadSubscriptionIdInvalid);
            }
            {
                let mut items = trace_lock!(self.items);
                let from = inner.permit.as_ref().map(|p| p.session().clone());
                if let Some(from) = from {
                    let item_count = items.items.values().filter(|i| i.has_permit()).count();
                    accounting.move_session_slots(&from, session, 1, item_count)?;
                    if let Some(permit) = inner.permit.as_mut() {
                        permit.rebind_session(session);
                    }
                    for item in items.items.values_mut() {
                        item.rebind_session(session);
                    }
                }
                if send_initial_values {
                    for item in items.items.values_mut().filter(|i| i.is_reporting()) {
                        item.add_current_value_to_queue();
                    }
                }
            }
            let previous_session = self.session_id.swap(session_id, Ordering::AcqRel);
            let previous_queue = std::mem::replace(
                &mut *trace_write_lock!(self.publish_queue),
                publish_queue.clone(),
            );
            previous_queue.remove_subscription(self.subscription_id);
            *trace_lock!(self.state_listener) = Some(listener);
            inner.lifetime_counter = inner.parameters.lifetime_count;
            info!(
                "Subscription {} moved from session {} to session {}",
                self.subscription_id, previous_session, session_id
            );
            (
                inner.state == SubscriptionState::Late,
                Self::sequence_numbers(&inner),
            )
        };
        if late {
            publish_queue.add_subscription(self);
        }
        Ok(available_sequence_numbers)
    }

    fn state_params(
        &self,
        inner: &SubscriptionInner,
        publishing_req_queued: bool,
    ) -> SubscriptionStateParams {
        let notifications_available = {
            let items = trace_lock!(self.items);
            items
                .items
                .values()
                .any(|item| item.has_notifications() || item.is_triggered())
        };
        SubscriptionStateParams {
            publishing_enabled: inner.publishing_enabled,
            notifications_available,
            more_notifications: inner.more_notifications,
            publishing_req_queued,
            message_sent: inner.message_sent,
            keep_alive_counter: inner.keep_alive_counter,
        }
    }

    fn apply_transition(
        self: &Arc<Self>,
        inner: &mut SubscriptionInner,
        transition: Transition,
        mut request: Option<PendingPublish>,
    ) -> Option<StateChange> {
        let previous = inner.state;
        trace!(
            "Subscription {} handled {:?} in state {:?}",
            self.subscription_id,
            transition.handled,
            previous
        );
        inner.state = transition.next_state;
        for action in transition.actions {
            match action {
                // The caller took the request
                StateAction::PopRequest => {}
                StateAction::ParkRequest => {
                    if let Some(request) = request.take() {
                        self.publish_queue().add_request(request);
                    }
                }
                StateAction::ResetLifetimeCounter => {
                    inner.lifetime_counter = inner.parameters.lifetime_count;
                }
                StateAction::ResetKeepAliveCounter => {
                    inner.keep_alive_counter = inner.parameters.max_keep_alive_count;
                }
                StateAction::DecrementKeepAliveCounter => {
                    inner.keep_alive_counter = inner.keep_alive_counter.saturating_sub(1);
                }
                StateAction::SetMessageSent => inner.message_sent = true,
                StateAction::ReturnNotifications => {
                    if let Some(request) = request.take() {
                        self.return_notifications(inner, request);
                    }
                }
                StateAction::ReturnKeepAlive => {
                    if let Some(request) = request.take() {
                        self.return_keep_alive(inner, request);
                    }
                }
                StateAction::ReturnStatusChange => {
                    if let Some(request) = request.take() {
                        self.return_status_change(inner, request, StatusCode::BadTimeout);
                    }
                }
                StateAction::RegisterWaiting => self.publish_queue().add_subscription(self),
            }
        }
        if let Some(request) = request {
            error!(
                "Subscription {} left publish request {} unanswered in {:?}, parking it",
                self.subscription_id,
                request.request_handle(),
                transition.handled
            );
            self.publish_queue().add_request(request);
        }
        if inner.state == SubscriptionState::Closed {
            inner.permit = None;
        }
        (previous != inner.state).then_some((previous, inner.state))
    }

    /// Decrements the lifetime counter; when it runs out the subscription closes.
    fn count_down_lifetime(
        self: &Arc<Self>,
        inner: &mut SubscriptionInner,
        delay: Duration,
    ) -> (Option<StateChange>, PublishingTimer) {
        if matches!(
            inner.state,
            SubscriptionState::Closing | SubscriptionState::Closed
        ) {
            return (None, PublishingTimer::Stop);
        }
        inner.lifetime_counter = inner.lifetime_counter.saturating_sub(1);
        if inner.lifetime_counter < 1 {
            debug!("Subscription {} lifetime expired", self.subscription_id);
            (self.enter_closing(inner), PublishingTimer::Stop)
        } else {
            (None, PublishingTimer::Reschedule(delay))
        }
    }

    fn enter_closing(self: &Arc<Self>, inner: &mut SubscriptionInner) -> Option<StateChange> {
        let previous = inner.state;
        let transition = Transition::lifetime_expired();
        trace!(
            "Subscription {} handled {:?} in state {:?}",
            self.subscription_id,
            transition.handled,
            previous
        );
        inner.state = transition.next_state;
        if let Some(request) = self.publish_queue().poll() {
            self.return_status_change(inner, request, StatusCode::BadTimeout);
            inner.state = SubscriptionState::Closed;
            inner.permit = None;
        } else {
            // The next request to arrive gets the status change
            self.publish_queue().add_subscription(self);
        }
        Some((previous, inner.state))
    }

    fn notify_state_change(self: &Arc<Self>, changes: impl IntoIterator<Item = StateChange>) {
        for (previous, current) in changes {
            debug!(
                "Subscription {} changed state from {:?} to {:?}",
                self.subscription_id, previous, current
            );
            if current == SubscriptionState::Closed {
                info!("Subscription {} is closed", self.subscription_id);
            }
            let listener = trace_lock!(self.state_listener).clone();
            if let Some(listener) = listener {
                listener(self, previous, current);
            }
        }
    }

    /// Gathers notifications round-robin from where the last message left off and sends them.
    /// While there is more to send, further queued requests are taken in the same go.
    fn return_notifications(
        self: &Arc<Self>,
        inner: &mut SubscriptionInner,
        request: PendingPublish,
    ) {
        let max_notifications = inner.parameters.max_notifications_per_publish;
        let mut items = trace_lock!(self.items);

        let mut seen = BTreeSet::new();
        let mut to_visit = VecDeque::new();
        for id in inner.last_gathered.drain(..) {
            if items.items.contains_key(&id) && seen.insert(id) {
                to_visit.push_back(id);
            }
        }
        for (id, item) in items.items.iter() {
            if (item.has_notifications() || item.is_triggered()) && seen.insert(*id) {
                to_visit.push_back(*id);
            }
        }

        let mut request = Some(request);
        while let Some(current) = request.take() {
            let mut notifications = Vec::new();
            while notifications.len() < max_notifications {
                let Some(id) = to_visit.front().copied() else {
                    break;
                };
                let gathered_all = items
                    .items
                    .get_mut(&id)
                    .map(|item| item.get_notifications(&mut notifications, max_notifications))
                    .unwrap_or(true);
                if gathered_all {
                    to_visit.pop_front();
                }
            }
            let more_notifications = !to_visit.is_empty();
            inner.more_notifications = more_notifications;

            if notifications.is_empty() {
                self.return_keep_alive(inner, current);
                break;
            }
            self.send_notifications(inner, current, notifications, more_notifications);

            if more_notifications {
                request = self.publish_queue().poll();
                if request.is_none() {
                    self.publish_queue().add_subscription(self);
                }
            }
        }
        inner.last_gathered = to_visit;
    }

    fn send_notifications(
        &self,
        inner: &mut SubscriptionInner,
        request: PendingPublish,
        notifications: Vec<Notification>,
        more_notifications: bool,
    ) {
        let mut data_changes = Vec::new();
        let mut events = Vec::new();
        for notification in notifications {
            match notification {
                Notification::MonitoredItemNotification(n) => data_changes.push(n),
                Notification::Event(e) => events.push(e),
            }
        }
        let sequence_number = inner.sequence_number.next();
        debug!(
            "Subscription {} sending message {} with {} data changes and {} events",
            self.subscription_id,
            sequence_number,
            data_changes.len(),
            events.len()
        );
        let message =
            NotificationMessage::data_change(sequence_number, DateTime::now(), data_changes, events);
        if inner.max_queued_notifications > 0
            && inner.retransmission_queue.len() >= inner.max_queued_notifications
        {
            if let Some(dropped) = inner.retransmission_queue.pop_front() {
                warn!(
                    "Subscription {} retransmission queue is full, dropping message {}",
                    self.subscription_id, dropped.sequence_number
                );
            }
        }
        inner.retransmission_queue.push_back(message.clone());
        request.respond(
            self.subscription_id,
            Self::sequence_numbers(inner),
            more_notifications,
            message,
        );
    }

    fn return_keep_alive(&self, inner: &mut SubscriptionInner, request: PendingPublish) {
        // A keep alive carries the next sequence number without using it up
        let sequence_number = inner.sequence_number.peek();
        debug!(
            "Subscription {} sending keep alive {}",
            self.subscription_id, sequence_number
        );
        request.respond(
            self.subscription_id,
            Self::sequence_numbers(inner),
            inner.more_notifications,
            NotificationMessage::keep_alive(sequence_number, DateTime::now()),
        );
    }

    /// Answers the request with a status change notification
    pub(crate) fn send_status_change(&self, request: PendingPublish, status: StatusCode) {
        let mut inner = trace_lock!(self.inner);
        self.return_status_change(&mut inner, request, status);
    }

    fn return_status_change(
        &self,
        inner: &mut SubscriptionInner,
        request: PendingPublish,
        status: StatusCode,
    ) {
        let sequence_number = inner.sequence_number.next();
        debug!(
            "Subscription {} sending status change {} with {}",
            self.subscription_id, sequence_number, status
        );
        request.respond(
            self.subscription_id,
            Vec::new(),
            false,
            NotificationMessage::status_change(sequence_number, DateTime::now(), status),
        );
    }
}
