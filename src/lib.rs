// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The OPC UA subscription service set.
//!
//! A [`server::SubscriptionServer`] holds the server-wide limits, resource counters and
//! subscription registry. Each session owns a [`server::subscriptions::SubscriptionManager`]
//! that answers the CreateSubscription, ModifySubscription, SetPublishingMode,
//! DeleteSubscriptions, CreateMonitoredItems, ModifyMonitoredItems, DeleteMonitoredItems,
//! SetMonitoringMode, SetTriggering, Publish and Republish services. The address space is
//! reached through the [`server::address_space::AddressSpace`] trait.

#![allow(clippy::float_cmp)]
#![allow(clippy::result_unit_err)]

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate serde_derive;
#[macro_use]
extern crate derivative;
#[cfg(test)]
extern crate serde_json;
#[cfg(test)]
extern crate tempdir;

/// Tracing macro for obtaining a lock on a `Mutex`. Sometimes deadlocks can happen in code,
/// and if they do, this macro is useful for finding out where they happened.
#[macro_export]
macro_rules! trace_lock {
    ( $x:expr ) => {
        {
//            use std::thread;
//            trace!("Thread {:?}, {} locking at {}, line {}", thread::current().id(), stringify!($x), file!(), line!());
            let v = $x.lock();
//            trace!("Thread {:?}, {} lock completed", thread::current().id(), stringify!($x));
            v
        }
    }
}

/// Tracing macro for obtaining a read lock on a `RwLock`.
#[macro_export]
macro_rules! trace_read_lock {
    ( $x:expr ) => {
        {
//            use std::thread;
//            trace!("Thread {:?}, {} read locking at {}, line {}", thread::current().id(), stringify!($x), file!(), line!());
            let v = $x.read();
//            trace!("Thread {:?}, {} read lock completed", thread::current().id(), stringify!($x));
            v
        }
    }
}

/// Tracing macro for obtaining a write lock on a `RwLock`.
#[macro_export]
macro_rules! trace_write_lock {
    ( $x:expr ) => {
        {
//            use std::thread;
//            trace!("Thread {:?}, {} write locking at {}, line {}", thread::current().id(), stringify!($x), file!(), line!());
            let v = $x.write();
//            trace!("Thread {:?}, {} write lock completed", thread::current().id(), stringify!($x));
            v
        }
    }
}

#[cfg(feature = "console-logging")]
pub mod console_logging;
pub mod core;
pub mod server;
pub mod sync;
pub mod types;

pub mod prelude {
    pub use crate::core::prelude::*;
    pub use crate::server::prelude::*;
    pub use crate::types::*;
}
