// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Counting of subscriptions and monitored items against the server wide and per session
//! limits. A slot is taken with an atomic check and increment, and given back when the
//! [`ResourcePermit`] that represents it is dropped.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use crate::{server::config::ServerLimits, types::StatusCode};

/// Takes `n` slots on the counter if that stays within max, 0 meaning no limit.
fn try_add(counter: &AtomicUsize, n: usize, max: usize) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
            if max == 0 || v + n <= max {
                Some(v + n)
            } else {
                None
            }
        })
        .is_ok()
}

fn try_increment(counter: &AtomicUsize, max: usize) -> bool {
    try_add(counter, 1, max)
}

fn subtract(counter: &AtomicUsize, n: usize) {
    if counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(n))
        .is_err()
    {
        error!("Resource counter released more often than it was taken");
    }
}

fn decrement(counter: &AtomicUsize) {
    subtract(counter, 1)
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    Subscription,
    MonitoredItem,
}

/// Usage counters of one session.
#[derive(Debug, Default)]
pub struct SessionResources {
    subscriptions: AtomicUsize,
    monitored_items: AtomicUsize,
}

impl SessionResources {
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::Acquire)
    }

    pub fn monitored_item_count(&self) -> usize {
        self.monitored_items.load(Ordering::Acquire)
    }
}

/// Server wide usage counters and the limits they are checked against.
#[derive(Debug)]
pub struct ResourceAccounting {
    max_subscriptions: usize,
    max_subscriptions_per_session: usize,
    max_monitored_items: usize,
    max_monitored_items_per_session: usize,
    max_monitored_items_per_sub: usize,
    subscriptions: AtomicUsize,
    monitored_items: AtomicUsize,
}

impl ResourceAccounting {
    pub fn new(limits: &ServerLimits) -> Self {
        Self {
            max_subscriptions: limits.max_subscriptions,
            max_subscriptions_per_session: limits.max_subscriptions_per_session,
            max_monitored_items: limits.max_monitored_items,
            max_monitored_items_per_session: limits.max_monitored_items_per_session,
            max_monitored_items_per_sub: limits.max_monitored_items_per_sub,
            subscriptions: AtomicUsize::new(0),
            monitored_items: AtomicUsize::new(0),
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.load(Ordering::Acquire)
    }

    pub fn monitored_item_count(&self) -> usize {
        self.monitored_items.load(Ordering::Acquire)
    }

    /// Takes a subscription slot for the session, or fails with `BadTooManySubscriptions`
    pub fn try_acquire_subscription(
        self: &Arc<Self>,
        session: &Arc<SessionResources>,
    ) -> Result<ResourcePermit, StatusCode> {
        if !try_increment(&self.subscriptions, self.max_subscriptions) {
            debug!("Server limit of {} subscriptions reached", self.max_subscriptions);
            return Err(StatusCode::BadTooManySubscriptions);
        }
        if !try_increment(&session.subscriptions, self.max_subscriptions_per_session) {
            debug!(
                "Session limit of {} subscriptions reached",
                self.max_subscriptions_per_session
            );
            decrement(&self.subscriptions);
            return Err(StatusCode::BadTooManySubscriptions);
        }
        Ok(ResourcePermit {
            kind: ResourceKind::Subscription,
            accounting: self.clone(),
            session: session.clone(),
            subscription_items: None,
        })
    }

    /// Takes a monitored item slot in the subscription, the server and the session, or fails
    /// with `BadTooManyMonitoredItems`. `subscription_items` counts the items of one
    /// subscription.
    pub fn try_acquire_monitored_item(
        self: &Arc<Self>,
        session: &Arc<SessionResources>,
        subscription_items: &Arc<AtomicUsize>,
    ) -> Result<ResourcePermit, StatusCode> {
        let status = StatusCode::BadTooManyMonitoredItems;
        if !try_increment(subscription_items, self.max_monitored_items_per_sub) {
            debug!(
                "Subscription limit of {} monitored items reached",
                self.max_monitored_items_per_sub
            );
            return Err(status);
        }
        if !try_increment(&self.monitored_items, self.max_monitored_items) {
            debug!("Server limit of {} monitored items reached", self.max_monitored_items);
            decrement(subscription_items);
            return Err(status);
        }
        if !try_increment(&session.monitored_items, self.max_monitored_items_per_session) {
            debug!(
                "Session limit of {} monitored items reached",
                self.max_monitored_items_per_session
            );
            decrement(&self.monitored_items);
            decrement(subscription_items);
            return Err(status);
        }
        Ok(ResourcePermit {
            kind: ResourceKind::MonitoredItem,
            accounting: self.clone(),
            session: session.clone(),
            subscription_items: Some(subscription_items.clone()),
        })
    }

    /// Moves the session slots of one subscription and its monitored items to another session.
    /// Fails without moving anything when the other session has no room for them.
    pub fn move_session_slots(
        &self,
        from: &Arc<SessionResources>,
        to: &Arc<SessionResources>,
        subscriptions: usize,
        monitored_items: usize,
    ) -> Result<(), StatusCode> {
        if Arc::ptr_eq(from, to) {
            return Ok(());
        }
        if !try_add(&to.subscriptions, subscriptions, self.max_subscriptions_per_session) {
            return Err(StatusCode::BadTooManySubscriptions);
        }
        if !try_add(
            &to.monitored_items,
            monitored_items,
            self.max_monitored_items_per_session,
        ) {
            subtract(&to.subscriptions, subscriptions);
            return Err(StatusCode::BadTooManyMonitoredItems);
        }
        subtract(&from.subscriptions, subscriptions);
        subtract(&from.monitored_items, monitored_items);
        Ok(())
    }
}

/// A taken slot in the server and session counters, given back on drop.
pub struct ResourcePermit {
    kind: ResourceKind,
    accounting: Arc<ResourceAccounting>,
    session: Arc<SessionResources>,
    subscription_items: Option<Arc<AtomicUsize>>,
}

impl std::fmt::Debug for ResourcePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResourcePermit({:?})", self.kind)
    }
}

impl ResourcePermit {
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// The session the slot is counted against
    pub fn session(&self) -> &Arc<SessionResources> {
        &self.session
    }

    /// Points the permit at the session its slot was moved to with
    /// [`ResourceAccounting::move_session_slots`].
    pub(crate) fn rebind_session(&mut self, session: &Arc<SessionResources>) {
        self.session = session.clone();
    }
}

impl Drop for ResourcePermit {
    fn drop(&mut self) {
        match self.kind {
            ResourceKind::Subscription => {
                decrement(&self.accounting.subscriptions);
                decrement(&self.session.subscriptions);
            }
            ResourceKind::MonitoredItem => {
                decrement(&self.accounting.monitored_items);
                decrement(&self.session.monitored_items);
                if let Some(subscription_items) = &self.subscription_items {
                    decrement(subscription_items);
                }
            }
        }
    }
}
