use std::{
    collections::VecDeque,
    sync::{Arc, Weak},
};

use tokio::{runtime::Handle, time::Instant};

use crate::{sync::Mutex, types::StatusCode};

use super::{subscription::Subscription, PendingPublish};

/// A subscription waiting for the next publish request.
struct WaitingSubscription {
    subscription_id: u32,
    priority: u8,
    since: Instant,
    subscription: Weak<Subscription>,
}

struct PublishQueueInner {
    /// Parked publish requests, oldest first
    requests: VecDeque<PendingPublish>,
    /// Subscriptions that have something to send and no request to send it with
    waiting: Vec<WaitingSubscription>,
}

/// The publish requests of one session, matched against its subscriptions. Requests are parked
/// until a subscription takes one, subscriptions with nothing to send it with wait for the next
/// request to come in.
pub struct PublishQueue {
    inner: Mutex<PublishQueueInner>,
    max_pending_publish_requests: usize,
    runtime: Handle,
}

impl PublishQueue {
    pub fn new(max_pending_publish_requests: usize, runtime: Handle) -> Self {
        Self {
            inner: Mutex::new(PublishQueueInner {
                requests: VecDeque::new(),
                waiting: Vec::new(),
            }),
            max_pending_publish_requests,
            runtime,
        }
    }

    /// Hands a publish request to the waiting subscription with the highest priority, the one
    /// that has waited longest among equals. With nobody waiting the request is parked.
    pub(crate) fn add_request(&self, request: PendingPublish) {
        let subscription = {
            let mut inner = trace_lock!(self.inner);
            loop {
                let best = inner
                    .waiting
                    .iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| {
                        a.priority.cmp(&b.priority).then(b.since.cmp(&a.since))
                    })
                    .map(|(idx, _)| idx);
                let Some(idx) = best else {
                    self.park(&mut inner, request);
                    return;
                };
                let waiting = inner.waiting.remove(idx);
                if let Some(subscription) = waiting.subscription.upgrade() {
                    break subscription;
                }
                trace!(
                    "Waiting subscription {} has gone away",
                    waiting.subscription_id
                );
            }
        };
        trace!(
            "Handing publish request {} to waiting subscription {}",
            request.request.request_header.request_handle,
            subscription.subscription_id()
        );
        self.hand_off(subscription, request);
    }

    fn park(&self, inner: &mut PublishQueueInner, request: PendingPublish) {
        if self.max_pending_publish_requests > 0
            && inner.requests.len() >= self.max_pending_publish_requests
        {
            if let Some(oldest) = inner.requests.pop_front() {
                warn!(
                    "Too many publish requests, discarding request {}",
                    oldest.request.request_header.request_handle
                );
                oldest.fault(StatusCode::BadTooManyPublishRequests);
            }
        }
        inner.requests.push_back(request);
    }

    /// Gives the subscription the oldest parked request when nobody else is waiting, otherwise
    /// puts the subscription on the wait-list. A subscription is only on the list once.
    pub(crate) fn add_subscription(&self, subscription: &Arc<Subscription>) {
        let request = {
            let mut inner = trace_lock!(self.inner);
            let request = if inner.waiting.is_empty() {
                Self::poll_inner(&mut inner)
            } else {
                None
            };
            if request.is_none() {
                let subscription_id = subscription.subscription_id();
                if !inner
                    .waiting
                    .iter()
                    .any(|w| w.subscription_id == subscription_id)
                {
                    inner.waiting.push(WaitingSubscription {
                        subscription_id,
                        priority: subscription.priority(),
                        since: Instant::now(),
                        subscription: Arc::downgrade(subscription),
                    });
                }
            }
            request
        };
        if let Some(request) = request {
            self.hand_off(subscription.clone(), request);
        }
    }

    pub(crate) fn remove_subscription(&self, subscription_id: u32) {
        let mut inner = trace_lock!(self.inner);
        inner
            .waiting
            .retain(|w| w.subscription_id != subscription_id);
    }

    /// Takes the oldest parked request that hasn't expired. Expired requests are faulted.
    pub(crate) fn poll(&self) -> Option<PendingPublish> {
        let mut inner = trace_lock!(self.inner);
        Self::poll_inner(&mut inner)
    }

    fn poll_inner(inner: &mut PublishQueueInner) -> Option<PendingPublish> {
        let now = Instant::now();
        while let Some(request) = inner.requests.pop_front() {
            if request.is_expired(now) {
                warn!(
                    "Publish request {} has expired, sending a timeout",
                    request.request.request_header.request_handle
                );
                request.fault(StatusCode::BadTimeout);
            } else {
                return Some(request);
            }
        }
        None
    }

    pub fn is_not_empty(&self) -> bool {
        let inner = trace_lock!(self.inner);
        !inner.requests.is_empty()
    }

    pub fn len(&self) -> usize {
        let inner = trace_lock!(self.inner);
        inner.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn waiting_count(&self) -> usize {
        let inner = trace_lock!(self.inner);
        inner.waiting.len()
    }

    /// Faults every parked request with the status
    pub fn fault_all(&self, status: StatusCode) {
        let requests: Vec<_> = {
            let mut inner = trace_lock!(self.inner);
            inner.requests.drain(..).collect()
        };
        if !requests.is_empty() {
            debug!("Faulting {} publish requests with {}", requests.len(), status);
        }
        for request in requests {
            request.fault(status);
        }
    }

    fn hand_off(&self, subscription: Arc<Subscription>, request: PendingPublish) {
        self.runtime.spawn(async move {
            subscription.on_publish(request);
        });
    }
}
