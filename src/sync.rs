// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Synchronization primitives used throughout the crate. These are `parking_lot` locks, which
//! do not poison and are cheap to take uncontended.

pub type RwLock<T> = parking_lot::RwLock<T>;
pub type Mutex<T> = parking_lot::Mutex<T>;
