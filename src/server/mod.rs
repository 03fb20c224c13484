// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The server side of the subscription service set. A [`SubscriptionServer`] holds the server
//! wide limits and registries, each session talks to it through a [`SubscriptionManager`].
//!
//! [`SubscriptionServer`]: subscription_server::SubscriptionServer
//! [`SubscriptionManager`]: subscriptions::SubscriptionManager

pub mod constants {
    //! Provides constants that govern the internal workings of the server implementation.

    /// Default maximum number of subscriptions in the server
    pub const DEFAULT_MAX_SUBSCRIPTIONS: usize = 100;
    /// Default maximum number of subscriptions in a session
    pub const MAX_SUBSCRIPTIONS_PER_SESSION: usize = 10;
    /// Default maximum number of monitored items in the server
    pub const DEFAULT_MAX_MONITORED_ITEMS: usize = 10000;
    /// Default maximum number of monitored items in a session
    pub const DEFAULT_MAX_MONITORED_ITEMS_PER_SESSION: usize = 5000;
    /// Default maximum number of monitored items per subscription
    pub const DEFAULT_MAX_MONITORED_ITEMS_PER_SUB: usize = 1000;
    pub const MAX_MONITORED_ITEMS_PER_CALL: usize = 10;
    pub const MAX_PENDING_PUBLISH_REQUESTS: usize = 20;

    /// Minimum publishing interval for subscriptions
    pub const MIN_PUBLISHING_INTERVAL_MS: f64 = 100f64;
    /// Maximum publishing interval for subscriptions
    pub const MAX_PUBLISHING_INTERVAL_MS: f64 = 60000f64;
    /// Minimum sampling interval on monitored items
    pub const MIN_SAMPLING_INTERVAL_MS: f64 = 100f64;
    /// Maximum sampling interval on monitored items, one hour
    pub const MAX_SAMPLING_INTERVAL_MS: f64 = 3600000f64;
    /// Minimum time a subscription lives without activity
    pub const MIN_LIFETIME_MS: f64 = 10000f64;
    /// Maximum time a subscription lives without activity, one hour
    pub const MAX_LIFETIME_MS: f64 = 3600000f64;

    /// Maximum number of notifications in a single publish response
    pub const MAX_NOTIFICATIONS_PER_PUBLISH: usize = 0xFFFF;
    /// Maximum number of unacknowledged notification messages retained for republish
    pub const MAX_QUEUED_NOTIFICATIONS: usize = 20;
    /// Maximum data change queue allowed by clients on monitored items
    pub const MAX_DATA_CHANGE_QUEUE_SIZE: usize = 10;
    /// Queue size of event monitored items when the client asks for 0
    pub const DEFAULT_EVENT_QUEUE_SIZE: usize = 10;
    pub const MAX_EVENT_QUEUE_SIZE: usize = 1000;

    pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 30000;
}

pub mod address_space;
pub mod config;
pub mod resources;
pub mod subscription_server;
pub mod subscriptions;

#[cfg(test)]
mod tests;

pub mod prelude {
    pub use super::{
        address_space::*, config::*, resources::*, subscription_server::*, subscriptions::*,
    };
}
