// OPCUA for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

use std::{
    fmt,
    io::Write,
    sync::atomic::{AtomicBool, Ordering},
};

use env_logger::{fmt::Color, Builder};

struct Pad<T> {
    value: T,
    width: usize,
}

impl<T: fmt::Display> fmt::Display for Pad<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{: <width$}", self.value, width = self.width)
    }
}

/// Initialises console logging, filtered by the `RUST_OPCUA_LOG` environment variable. Calling
/// it more than once does nothing.
pub fn init() {
    lazy_static! {
        static ref INITIALISED: AtomicBool = AtomicBool::new(false);
    }

    if INITIALISED.swap(true, Ordering::Relaxed) {
        return;
    }
    // RUST_LOG is used by cargo and other rust tools, so a separate variable keeps the
    // console free of their output.
    let mut builder = Builder::from_env("RUST_OPCUA_LOG");
    builder.format(|f, record| {
        let time_fmt = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");

        let mut style = f.style();
        match record.level() {
            log::Level::Error => {
                style.set_color(Color::White).set_bg(Color::Red);
            }
            log::Level::Warn => {
                style.set_color(Color::Yellow);
            }
            log::Level::Info => {
                style.set_color(Color::Cyan);
            }
            log::Level::Debug => {
                style.set_color(Color::Green);
            }
            log::Level::Trace => {
                style.set_color(Color::Ansi256(8));
            }
        }
        let level = style.value(Pad {
            value: record.level(),
            width: 5,
        });

        let mut style = f.style();
        let target = style.set_bold(true).value(Pad {
            value: record.target(),
            width: 40,
        });

        writeln!(f, "{} {} {} {}", time_fmt, level, target, record.args())
    });
    // Another logger may already be installed by the application
    if builder.try_init().is_ok() {
        info!("Logging is enabled, use RUST_OPCUA_LOG environment variable to control filtering, logging level");
    }
}
