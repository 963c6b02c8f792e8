// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Messages received from the Pulse Generator.
use ndpg_compiler::Address;
use serde::{Deserialize, Serialize};

use crate::options::{RunMode, TriggerAcceptance};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSource {
    Internal,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub running: bool,
    pub software_run_enable: bool,
    pub hardware_run_enable: bool,
    pub current_address: Address,
    pub final_address: Address,
    pub run_mode: RunMode,
    pub accept_hardware_trigger: TriggerAcceptance,
    pub clock_source: ClockSource,
    pub notify_on_main_trig_out: bool,
    pub notify_when_run_finished: bool,
    /// Live output level of every channel.
    pub channel_state: Vec<bool>,
}

impl DeviceState {
    /// Halted on a stop-and-wait instruction at `address`.
    pub fn is_halted_at(&self, address: Address) -> bool {
        !self.running && self.current_address == address
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerlineState {
    pub trigger_on_powerline: bool,
    pub powerline_locked: bool,
    /// Mains period in clock cycles.
    pub powerline_period: u32,
    /// Clock cycles.
    pub powerline_trigger_delay: u32,
}

impl PowerlineState {
    /// Mains frequency in Hz, or 0 while the device is not locked.
    pub fn frequency(&self, resolution_seconds: f64) -> f64 {
        if !self.powerline_locked || self.powerline_period == 0 {
            return 0.0;
        }
        1.0 / (self.powerline_period as f64 * resolution_seconds)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateExtras {
    /// Clock cycles since the run started, including time spent halted.
    pub run_time: u64,
    pub trigger_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub address: Address,
    /// Run time counter when the notification was raised.
    pub run_time: u64,
    pub address_notify: bool,
    pub trigger_notify: bool,
    pub finished_notify: bool,
}

/// The device failed to parse a message from the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommsError {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BytesDropped {
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial_number: u32,
    pub firmware_version: String,
    pub hardware_version: String,
    pub port: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    State(DeviceState),
    Powerline(PowerlineState),
    Extras(StateExtras),
    Notification(Notification),
    Error(CommsError),
    BytesDropped(BytesDropped),
    Echo(DeviceInfo),
}

/// Inbound queue a [`Message`] is delivered to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    State,
    Powerline,
    Extras,
    Notification,
    Error,
    BytesDropped,
    Echo,
}

impl MessageKind {
    pub fn describe(self) -> &'static str {
        match self {
            MessageKind::State => "device state",
            MessageKind::Powerline => "powerline state",
            MessageKind::Extras => "state extras",
            MessageKind::Notification => "notification",
            MessageKind::Error => "comms error",
            MessageKind::BytesDropped => "dropped bytes report",
            MessageKind::Echo => "echo",
        }
    }
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::State(_) => MessageKind::State,
            Message::Powerline(_) => MessageKind::Powerline,
            Message::Extras(_) => MessageKind::Extras,
            Message::Notification(_) => MessageKind::Notification,
            Message::Error(_) => MessageKind::Error,
            Message::BytesDropped(_) => MessageKind::BytesDropped,
            Message::Echo(_) => MessageKind::Echo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_powerline_frequency() {
        let state = PowerlineState {
            trigger_on_powerline: true,
            powerline_locked: true,
            powerline_period: 2_000_000,
            powerline_trigger_delay: 0,
        };
        assert!((state.frequency(10e-9) - 50.0).abs() < 1e-9);
        let unlocked = PowerlineState {
            powerline_locked: false,
            ..state
        };
        assert_eq!(unlocked.frequency(10e-9), 0.0);
    }
}
