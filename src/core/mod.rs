// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Functionality shared by the rest of the crate: handle factories, configuration loading and
//! the registry of running components.

lazy_static! {
    pub static ref RUNTIME: crate::core::runtime::Runtime =
        crate::core::runtime::Runtime::default();
}

/// Returns a vector of all currently existing runtime components as a vector of strings.
#[macro_export]
macro_rules! runtime_components {
    () => {{
        use $crate::core::RUNTIME;
        RUNTIME.components()
    }};
}

/// Code registers a running component (e.g. tokio task) when it starts and calls the
/// corresponding deregister macro when it finishes.
#[macro_export]
macro_rules! register_runtime_component {
    ( $component_name:expr ) => {
        $crate::core::RUNTIME.register_component($component_name);
    };
}

/// See `register_runtime_component`
#[macro_export]
macro_rules! deregister_runtime_component {
    ( $component_name:expr ) => {
        $crate::core::RUNTIME.deregister_component($component_name);
    };
}

pub mod config;
pub mod handle;
pub mod runtime;

pub mod prelude {
    pub use super::config::*;
    pub use super::handle::*;
}
