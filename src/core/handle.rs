// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Handle factories for ids and sequence numbers that wrap back to their first value.

use std::sync::atomic::{AtomicU32, Ordering};

/// A handle factory for an incrementing sequence of numbers. Used for notification sequence
/// numbers and monitored item ids which are owned by a single subscription.
#[derive(Debug, Clone)]
pub struct Handle {
    next: u32,
    first: u32,
}

impl Handle {
    /// Creates a new handle factory, that starts with the supplied number
    pub fn new(first: u32) -> Handle {
        Handle { next: first, first }
    }

    /// Returns the next handle to be issued without consuming it
    pub fn peek(&self) -> u32 {
        self.next
    }

    /// Returns the next handle, wrapping back to the first after `u32::MAX`
    pub fn next(&mut self) -> u32 {
        let next = self.next;
        self.next = Self::successor(next, self.first);
        next
    }

    /// Returns the next handle that is not in use. Only matters once the handle has wrapped.
    pub fn next_unused(&mut self, in_use: impl Fn(u32) -> bool) -> u32 {
        loop {
            let next = self.next();
            if !in_use(next) {
                return next;
            }
        }
    }

    pub fn set_next(&mut self, next: u32) {
        self.next = next;
    }

    fn successor(value: u32, first: u32) -> u32 {
        if value == u32::MAX {
            first
        } else {
            value + 1
        }
    }
}

/// Thread safe variant of the handle factory, shared by every session of a server for
/// subscription ids.
#[derive(Debug)]
pub struct AtomicHandle {
    next: AtomicU32,
    first: u32,
}

impl AtomicHandle {
    pub fn new(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
            first,
        }
    }

    /// Returns the next handle that is not in use
    pub fn next_unused(&self, in_use: impl Fn(u32) -> bool) -> u32 {
        loop {
            let next = self.next();
            if !in_use(next) {
                return next;
            }
        }
    }

    pub fn next(&self) -> u32 {
        let first = self.first;
        // fetch_update only fails if the closure returns None
        match self
            .next
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                Some(Handle::successor(v, first))
            }) {
            Ok(v) | Err(v) => v,
        }
    }
}

#[test]
fn handle_sequence() {
    let mut h = Handle::new(1);
    assert_eq!(h.peek(), 1);
    assert_eq!(h.next(), 1);
    assert_eq!(h.next(), 2);
    assert_eq!(h.peek(), 3);
}

#[test]
fn handle_wraps_to_first() {
    let mut h = Handle::new(1);
    h.next = u32::MAX;
    assert_eq!(h.next(), u32::MAX);
    assert_eq!(h.next(), 1);
}

#[test]
fn handle_skips_ids_in_use_after_wrap() {
    let mut h = Handle::new(1);
    h.set_next(u32::MAX);
    let in_use = [1, 2, 4];
    assert_eq!(h.next_unused(|id| in_use.contains(&id)), u32::MAX);
    assert_eq!(h.next_unused(|id| in_use.contains(&id)), 3);
    assert_eq!(h.next_unused(|id| in_use.contains(&id)), 5);

    let h = AtomicHandle::new(1);
    assert_eq!(h.next_unused(|id| id < 3), 3);
}

#[test]
fn atomic_handle_sequence() {
    let h = AtomicHandle::new(u32::MAX - 1);
    assert_eq!(h.next(), u32::MAX - 1);
    assert_eq!(h.next(), u32::MAX);
    assert_eq!(h.next(), u32::MAX - 1);
}

#[test]
fn atomic_handle_threads() {
    use std::{collections::HashSet, sync::Arc, thread};
    let h = Arc::new(AtomicHandle::new(1));
    let threads: Vec<_> = (0..4)
        .map(|_| {
            let h = h.clone();
            thread::spawn(move || (0..100).map(|_| h.next()).collect::<Vec<_>>())
        })
        .collect();
    let mut all = HashSet::new();
    for t in threads {
        for v in t.join().unwrap() {
            assert!(all.insert(v));
        }
    }
    assert_eq!(all.len(), 400);
}
