// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The server wide state of the subscription service set.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use tokio::runtime::Handle;

use crate::{
    core::{
        config::{Config, ConfigError},
        handle::AtomicHandle,
    },
    server::{
        address_space::AddressSpace,
        config::ServerLimits,
        resources::ResourceAccounting,
        subscriptions::{
            manager::{notify_items_changed, split_refs, ItemsChange},
            MonitoredItem, MonitoredItemHandle, StateListener, Subscription,
            SubscriptionManager, SubscriptionState,
        },
    },
    sync::{Mutex, RwLock},
    types::{DataValue, Event},
};

/// Holds the limits, the resource counters and the registry of every subscription in the
/// server, and routes samples from the address space to monitored items.
pub struct SubscriptionServer {
    limits: ServerLimits,
    resources: Arc<ResourceAccounting>,
    /// Map from subscription id to subscription, across all sessions
    subscriptions: RwLock<HashMap<u32, Arc<Subscription>>>,
    /// Subscriptions without a session, waiting to be adopted
    detached: Mutex<HashSet<u32>>,
    subscription_id_handle: AtomicHandle,
    session_id_handle: AtomicHandle,
    address_space: Arc<dyn AddressSpace>,
    runtime: Handle,
}

impl SubscriptionServer {
    /// Creates the server. Timers and publish hand-off run on the supplied runtime.
    pub fn new(
        limits: ServerLimits,
        address_space: Arc<dyn AddressSpace>,
        runtime: Handle,
    ) -> Result<Arc<Self>, ConfigError> {
        if !limits.is_valid() {
            error!("Server limits are invalid, the subscription server cannot start");
            return Err(ConfigError::Invalid);
        }
        Ok(Arc::new(Self {
            resources: Arc::new(ResourceAccounting::new(&limits)),
            limits,
            subscriptions: RwLock::new(HashMap::new()),
            detached: Mutex::new(HashSet::new()),
            subscription_id_handle: AtomicHandle::new(1),
            session_id_handle: AtomicHandle::new(1),
            address_space,
            runtime,
        }))
    }

    /// Creates the subscription manager of a new session
    pub fn new_session(self: &Arc<Self>) -> SubscriptionManager {
        let session_id = self.session_id_handle.next();
        debug!("Subscription manager for session {} created", session_id);
        SubscriptionManager::new(session_id, self.clone())
    }

    pub fn limits(&self) -> &ServerLimits {
        &self.limits
    }

    pub fn resources(&self) -> &Arc<ResourceAccounting> {
        &self.resources
    }

    pub fn address_space(&self) -> &Arc<dyn AddressSpace> {
        &self.address_space
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn subscription_count(&self) -> usize {
        trace_read_lock!(self.subscriptions).len()
    }

    pub fn get_subscription(&self, subscription_id: u32) -> Option<Arc<Subscription>> {
        trace_read_lock!(self.subscriptions)
            .get(&subscription_id)
            .cloned()
    }

    /// The ids of the subscriptions that have no session
    pub fn detached_subscription_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = trace_lock!(self.detached).iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Delivers sampled values. Each value goes to every monitored item in its list of
    /// handles.
    pub fn notify_data_change(
        &self,
        items: impl IntoIterator<Item = (DataValue, Vec<MonitoredItemHandle>)>,
    ) {
        let mut by_subscription: HashMap<u32, Vec<(u32, DataValue)>> = HashMap::new();
        for (value, handles) in items {
            for handle in handles {
                by_subscription
                    .entry(handle.subscription_id)
                    .or_default()
                    .push((handle.monitored_item_id, value.clone()));
            }
        }
        for (subscription_id, values) in by_subscription {
            let Some(subscription) = self.get_subscription(subscription_id) else {
                trace!(
                    "Data change for subscription {} which does not exist",
                    subscription_id
                );
                continue;
            };
            for (monitored_item_id, value) in values {
                subscription.notify_data_value(monitored_item_id, value);
            }
        }
    }

    /// Delivers an event to the monitored items of the handles
    pub fn notify_event(&self, event: &dyn Event, handles: &[MonitoredItemHandle]) {
        for handle in handles {
            if let Some(subscription) = self.get_subscription(handle.subscription_id) {
                subscription.notify_event(handle.monitored_item_id, event);
            }
        }
    }

    pub(crate) fn next_subscription_id(&self) -> u32 {
        let subscriptions = trace_read_lock!(self.subscriptions);
        self.subscription_id_handle
            .next_unused(|id| subscriptions.contains_key(&id))
    }

    pub(crate) fn register(&self, subscription: Arc<Subscription>) {
        let mut lck = trace_write_lock!(self.subscriptions);
        lck.insert(subscription.subscription_id(), subscription);
    }

    pub(crate) fn deregister(&self, subscription_id: u32) -> Option<Arc<Subscription>> {
        let mut lck = trace_write_lock!(self.subscriptions);
        lck.remove(&subscription_id)
    }

    /// Keeps a subscription that has left its session. It is closed when its lifetime runs out
    /// before a session adopts it.
    pub(crate) fn detach(self: &Arc<Self>, subscription: &Arc<Subscription>) {
        trace_lock!(self.detached).insert(subscription.subscription_id());
        let server = Arc::downgrade(self);
        let listener: StateListener = Arc::new(
            move |subscription: &Arc<Subscription>,
                  _previous: SubscriptionState,
                  current: SubscriptionState| {
                if !matches!(
                    current,
                    SubscriptionState::Closing | SubscriptionState::Closed
                ) {
                    return;
                }
                if let Some(server) = server.upgrade() {
                    if server.take_detached(subscription.subscription_id()) {
                        server.close_detached(subscription);
                    }
                }
            },
        );
        subscription.set_state_listener(Some(listener));
    }

    /// Takes the subscription off the detached list, returning false if it wasn't on it
    pub(crate) fn take_detached(&self, subscription_id: u32) -> bool {
        trace_lock!(self.detached).remove(&subscription_id)
    }

    pub(crate) fn close_detached(&self, subscription: &Arc<Subscription>) {
        self.deregister(subscription.subscription_id());
        info!(
            "Subscription {} expired without a session and was removed",
            subscription.subscription_id()
        );
        self.release_items(subscription.delete());
    }

    /// Tells the address space about the items of a subscription that went away
    pub(crate) fn release_items(&self, items: Vec<MonitoredItem>) {
        if items.is_empty() {
            return;
        }
        let (data_items, event_items) = split_refs(&items);
        // Dropping the items gives their slots back
        drop(items);
        let address_space = self.address_space.clone();
        self.runtime.spawn(async move {
            notify_items_changed(
                &*address_space,
                ItemsChange::Deleted,
                &data_items,
                &event_items,
            )
            .await;
        });
    }
}
