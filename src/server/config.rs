// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Provides configuration settings for the subscription server.

use crate::core::config::Config;

/// Limits on subscriptions, monitored items and publishing. Counts of 0 mean there is no limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerLimits {
    /// Maximum number of subscriptions in the server
    #[serde(default = "defaults::max_subscriptions")]
    pub max_subscriptions: usize,
    #[serde(default = "defaults::max_subscriptions_per_session")]
    pub max_subscriptions_per_session: usize,
    /// Maximum number of monitored items in the server
    #[serde(default = "defaults::max_monitored_items")]
    pub max_monitored_items: usize,
    #[serde(default = "defaults::max_monitored_items_per_session")]
    pub max_monitored_items_per_session: usize,
    /// Maximum number of monitored items per subscription, 0 for no limit
    #[serde(default = "defaults::max_monitored_items_per_sub")]
    pub max_monitored_items_per_sub: usize,
    /// Maximum number of monitored items in a single create, modify, delete or set mode call
    #[serde(default = "defaults::max_monitored_items_per_call")]
    pub max_monitored_items_per_call: usize,
    /// Maximum number of publish requests parked by a session
    #[serde(default = "defaults::max_pending_publish_requests")]
    pub max_pending_publish_requests: usize,
    #[serde(default = "defaults::min_publishing_interval_ms")]
    pub min_publishing_interval_ms: f64,
    #[serde(default = "defaults::max_publishing_interval_ms")]
    pub max_publishing_interval_ms: f64,
    #[serde(default = "defaults::min_sampling_interval_ms")]
    pub min_sampling_interval_ms: f64,
    #[serde(default = "defaults::max_sampling_interval_ms")]
    pub max_sampling_interval_ms: f64,
    /// Shortest time in millis a subscription may live without activity
    #[serde(default = "defaults::min_lifetime_ms")]
    pub min_lifetime_ms: f64,
    /// Longest time in millis a subscription may live without activity
    #[serde(default = "defaults::max_lifetime_ms")]
    pub max_lifetime_ms: f64,
    /// Maximum number of notifications per publish message.
    #[serde(default = "defaults::max_notifications_per_publish")]
    pub max_notifications_per_publish: usize,
    /// Maximum number of unacknowledged messages kept per subscription for republish.
    #[serde(default = "defaults::max_queued_notifications")]
    pub max_queued_notifications: usize,
    /// Maximum number of values in a data monitored item queue
    #[serde(default = "defaults::max_monitored_item_queue_size")]
    pub max_monitored_item_queue_size: usize,
    #[serde(default = "defaults::default_event_queue_size")]
    pub default_event_queue_size: usize,
    #[serde(default = "defaults::max_event_queue_size")]
    pub max_event_queue_size: usize,
    /// Timeout in millis of publish requests that arrive without a usable timeout hint
    #[serde(default = "defaults::publish_timeout_ms")]
    pub publish_timeout_ms: u64,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            max_subscriptions: defaults::max_subscriptions(),
            max_subscriptions_per_session: defaults::max_subscriptions_per_session(),
            max_monitored_items: defaults::max_monitored_items(),
            max_monitored_items_per_session: defaults::max_monitored_items_per_session(),
            max_monitored_items_per_sub: defaults::max_monitored_items_per_sub(),
            max_monitored_items_per_call: defaults::max_monitored_items_per_call(),
            max_pending_publish_requests: defaults::max_pending_publish_requests(),
            min_publishing_interval_ms: defaults::min_publishing_interval_ms(),
            max_publishing_interval_ms: defaults::max_publishing_interval_ms(),
            min_sampling_interval_ms: defaults::min_sampling_interval_ms(),
            max_sampling_interval_ms: defaults::max_sampling_interval_ms(),
            min_lifetime_ms: defaults::min_lifetime_ms(),
            max_lifetime_ms: defaults::max_lifetime_ms(),
            max_notifications_per_publish: defaults::max_notifications_per_publish(),
            max_queued_notifications: defaults::max_queued_notifications(),
            max_monitored_item_queue_size: defaults::max_monitored_item_queue_size(),
            default_event_queue_size: defaults::default_event_queue_size(),
            max_event_queue_size: defaults::max_event_queue_size(),
            publish_timeout_ms: defaults::publish_timeout_ms(),
        }
    }
}

impl Config for ServerLimits {
    fn is_valid(&self) -> bool {
        let mut valid = true;
        if !(self.min_publishing_interval_ms > 0f64
            && self.min_publishing_interval_ms <= self.max_publishing_interval_ms)
        {
            error!(
                "Publishing interval range {} - {} ms is invalid",
                self.min_publishing_interval_ms, self.max_publishing_interval_ms
            );
            valid = false;
        }
        if !(self.min_sampling_interval_ms >= 0f64
            && self.min_sampling_interval_ms <= self.max_sampling_interval_ms)
        {
            error!(
                "Sampling interval range {} - {} ms is invalid",
                self.min_sampling_interval_ms, self.max_sampling_interval_ms
            );
            valid = false;
        }
        if !(self.min_lifetime_ms >= 0f64 && self.min_lifetime_ms <= self.max_lifetime_ms) {
            error!(
                "Lifetime range {} - {} ms is invalid",
                self.min_lifetime_ms, self.max_lifetime_ms
            );
            valid = false;
        }
        if self.max_notifications_per_publish == 0 {
            error!("Max notifications per publish must be greater than 0");
            valid = false;
        }
        if self.max_monitored_item_queue_size == 0 {
            error!("Max monitored item queue size must be greater than 0");
            valid = false;
        }
        if self.default_event_queue_size == 0
            || self.default_event_queue_size > self.max_event_queue_size
        {
            error!(
                "Default event queue size {} must be between 1 and {}",
                self.default_event_queue_size, self.max_event_queue_size
            );
            valid = false;
        }
        if self.publish_timeout_ms == 0 {
            error!("Publish timeout must be greater than 0");
            valid = false;
        }
        valid
    }
}

mod defaults {
    use crate::server::constants;

    pub fn max_subscriptions() -> usize {
        constants::DEFAULT_MAX_SUBSCRIPTIONS
    }
    pub fn max_subscriptions_per_session() -> usize {
        constants::MAX_SUBSCRIPTIONS_PER_SESSION
    }
    pub fn max_monitored_items() -> usize {
        constants::DEFAULT_MAX_MONITORED_ITEMS
    }
    pub fn max_monitored_items_per_session() -> usize {
        constants::DEFAULT_MAX_MONITORED_ITEMS_PER_SESSION
    }
    pub fn max_monitored_items_per_sub() -> usize {
        constants::DEFAULT_MAX_MONITORED_ITEMS_PER_SUB
    }
    pub fn max_monitored_items_per_call() -> usize {
        constants::MAX_MONITORED_ITEMS_PER_CALL
    }
    pub fn max_pending_publish_requests() -> usize {
        constants::MAX_PENDING_PUBLISH_REQUESTS
    }
    pub fn min_publishing_interval_ms() -> f64 {
        constants::MIN_PUBLISHING_INTERVAL_MS
    }
    pub fn max_publishing_interval_ms() -> f64 {
        constants::MAX_PUBLISHING_INTERVAL_MS
    }
    pub fn min_sampling_interval_ms() -> f64 {
        constants::MIN_SAMPLING_INTERVAL_MS
    }
    pub fn max_sampling_interval_ms() -> f64 {
        constants::MAX_SAMPLING_INTERVAL_MS
    }
    pub fn min_lifetime_ms() -> f64 {
        constants::MIN_LIFETIME_MS
    }
    pub fn max_lifetime_ms() -> f64 {
        constants::MAX_LIFETIME_MS
    }
    pub fn max_notifications_per_publish() -> usize {
        constants::MAX_NOTIFICATIONS_PER_PUBLISH
    }
    pub fn max_queued_notifications() -> usize {
        constants::MAX_QUEUED_NOTIFICATIONS
    }
    pub fn max_monitored_item_queue_size() -> usize {
        constants::MAX_DATA_CHANGE_QUEUE_SIZE
    }
    pub fn default_event_queue_size() -> usize {
        constants::DEFAULT_EVENT_QUEUE_SIZE
    }
    pub fn max_event_queue_size() -> usize {
        constants::MAX_EVENT_QUEUE_SIZE
    }
    pub fn publish_timeout_ms() -> u64 {
        constants::DEFAULT_PUBLISH_TIMEOUT_MS
    }
}
