// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use ndpg_compiler::Address;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A query produced no answer in time. The next poll cycle may succeed.
    #[error("No {what} received within {timeout:?}")]
    Timeout {
        what: &'static str,
        timeout: Duration,
    },
    #[error("Pulse Generator reported a fault: {0}")]
    Device(String),
    #[error("Communication with the Pulse Generator failed: {0}")]
    Transport(String),
    #[error(
        "Pulse Generator failed to return its current state. A likely cause is the host computer failing to read all the messages sent to it. This can happen when the serial buffer overflows, likely because the Pulse Generator is sending notifications faster than they can be read. Check that you are not sending many notifications."
    )]
    StateUnavailable,
    #[error(
        "Pulse Generator did not return to manual mode after {attempts} attempts (running: {running}, current address: {current_address}, expected final address: {sentinel_address})"
    )]
    ManualTransition {
        attempts: usize,
        running: bool,
        current_address: Address,
        sentinel_address: Address,
    },
    #[error("Could not acquire the discovery lock {} within {timeout:?}", path.display())]
    Lock { path: PathBuf, timeout: Duration },
    #[error("Cannot {operation} while the device is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
    #[error(transparent)]
    Compile(#[from] ndpg_compiler::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn new<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }

    /// Whether retrying on a later cycle is reasonable, as opposed to aborting the shot.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout { .. } | Error::Lock { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
