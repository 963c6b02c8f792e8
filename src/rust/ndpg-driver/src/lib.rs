// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Host-side control of a connected pulse generator: shot lifecycle, status
//! polling and wait correlation.

pub mod discovery;
mod error;
pub mod lifecycle;
pub mod messages;
pub mod monitor;
pub mod options;
pub mod poller;
pub mod session;
pub mod settings;
pub mod simulator;
#[cfg(test)]
mod testing;
pub mod transport;
pub mod waits;

pub use error::{Error, Result};
pub use lifecycle::RunState;
pub use monitor::{Cadence, StatusMonitor};
pub use poller::{PollResult, RunEvent};
pub use session::Session;
pub use settings::DriverSettings;
pub use simulator::{SimulatedPulseGenerator, SimulatorConnector, SimulatorHandle};
pub use transport::{Connector, Transport};
