//! Subscriptions, their monitored items and the publish machinery of a session.

pub(crate) mod manager;
mod monitored_item;
mod publish_queue;
pub(crate) mod state;
mod subscription;

use tokio::{sync::oneshot, time::Instant};

pub use manager::SubscriptionManager;
pub use monitored_item::{
    CreateMonitoredItem, FilterType, ModifyMonitoredItem, MonitoredItem, MonitoredItemHandle,
    MonitoredItemRef, Notification,
};
#[cfg(test)]
pub(crate) use monitored_item::{revise_queue_size, revise_sampling_interval};
pub use publish_queue::PublishQueue;
pub use state::SubscriptionState;
pub use subscription::{PublishingTimer, StateListener, Subscription, SubscriptionParameters};

use crate::types::{NotificationMessage, PublishRequest, PublishResponse, ResponseHeader, StatusCode};

/// The result of a publish request, a response or a service fault.
pub type PublishResult = Result<PublishResponse, StatusCode>;

/// A publish request waiting for a subscription to answer it.
#[derive(Debug)]
pub(crate) struct PendingPublish {
    pub response: oneshot::Sender<PublishResult>,
    pub request: Box<PublishRequest>,
    pub ack_results: Option<Vec<StatusCode>>,
    pub received: Instant,
    pub deadline: Instant,
}

impl PendingPublish {
    pub fn request_handle(&self) -> u32 {
        self.request.request_header.request_handle
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }

    /// Answers the request with a notification message from the subscription.
    pub fn respond(
        self,
        subscription_id: u32,
        available_sequence_numbers: Vec<u32>,
        more_notifications: bool,
        notification_message: NotificationMessage,
    ) {
        trace!(
            "Publish request {} answered by subscription {} after {:?}",
            self.request_handle(),
            subscription_id,
            self.received.elapsed()
        );
        let response = PublishResponse {
            response_header: ResponseHeader::new_good(&self.request.request_header),
            subscription_id,
            available_sequence_numbers: Some(available_sequence_numbers),
            more_notifications,
            notification_message,
            results: self.ack_results,
        };
        if self.response.send(Ok(response)).is_err() {
            debug!("Publish response could not be delivered, the receiver is gone");
        }
    }

    /// Answers the request with a service fault.
    pub fn fault(self, status: StatusCode) {
        if self.response.send(Err(status)).is_err() {
            debug!("Publish fault {} could not be delivered, the receiver is gone", status);
        }
    }
}
