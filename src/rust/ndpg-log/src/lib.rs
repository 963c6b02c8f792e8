// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Logging macros shared by the pulse generator crates.
//!
//! All records are emitted through the `log` facade with a target of the form
//! `ndpg.rust::<module path>`, so a host application can route or filter the
//! driver output independently of its own logs.

use std::sync::{atomic::AtomicBool, atomic::Ordering};

#[doc(hidden)]
pub use log as _log;

#[macro_export]
macro_rules! info {
    ($msg:literal, $($arg:tt)+) => {
        ndpg_log::_log::info!(target: concat!("ndpg.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        ndpg_log::_log::info!(target: concat!("ndpg.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! warn {
    ($msg:literal, $($arg:tt)+) => {
        ndpg_log::_log::warn!(target: concat!("ndpg.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        ndpg_log::_log::warn!(target: concat!("ndpg.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! error {
    ($msg:literal, $($arg:tt)+) => {
        ndpg_log::_log::error!(target: concat!("ndpg.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        ndpg_log::_log::error!(target: concat!("ndpg.rust::", module_path!()), $msg);
    };
}

#[macro_export]
macro_rules! debug {
    ($msg:literal, $($arg:tt)+) => {
        ndpg_log::_log::debug!(target: concat!("ndpg.rust::", module_path!()), $msg, $($arg)+);
    };
    ($msg:literal) => {
        ndpg_log::_log::debug!(target: concat!("ndpg.rust::", module_path!()), $msg);
    };
}

/// Log a diagnostic message at debug level if diagnostics logging is enabled.
///
/// Used for per-instruction and per-notification traces that would flood the
/// log during a normal run.
#[macro_export]
macro_rules! diagnostic {
    ($msg:literal, $($arg:tt)+) => {
        if ndpg_log::is_diagnostics_enabled() {
            ndpg_log::_log::debug!(target: concat!("ndpg.rust::", module_path!()), $msg, $($arg)+);
        }
    };
    ($msg:literal) => {
        if ndpg_log::is_diagnostics_enabled() {
            ndpg_log::_log::debug!(target: concat!("ndpg.rust::", module_path!()), $msg);
        }
    };
}

static DIAGNOSTICS_ENABLED: AtomicBool = AtomicBool::new(false);

#[inline]
pub fn is_diagnostics_enabled() -> bool {
    DIAGNOSTICS_ENABLED.load(Ordering::Acquire)
}

/// Initialize the logging.
///
/// Only the diagnostics switch lives here. Installing a concrete logger is up to
/// the host binary (the CLI uses `env_logger`).
pub fn init_logging(with_diagnostics: bool) {
    DIAGNOSTICS_ENABLED.store(with_diagnostics, Ordering::Release);
}
