// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::Result;
use crate::messages::{Message, MessageKind};
use crate::options::{Action, DeviceOptions, PowerlineTriggerOptions};

/// Link to one connected Pulse Generator.
///
/// Writes are fire-and-forget. Inbound messages are sorted into one queue per
/// [`MessageKind`] by the implementation.
pub trait Transport: Send {
    fn write_device_options(&mut self, options: &DeviceOptions) -> Result<()>;

    fn write_powerline_trigger_options(&mut self, options: &PowerlineTriggerOptions) -> Result<()>;

    fn write_action(&mut self, action: &Action) -> Result<()>;

    /// Upload encoded instruction records, see [`ndpg_compiler::encoding`].
    fn write_instructions(&mut self, records: &[u8]) -> Result<()>;

    fn write_static_state(&mut self, channel_state: &[bool]) -> Result<()>;

    fn write_echo(&mut self, byte: u8) -> Result<()>;

    /// Drop everything queued of `kind`.
    fn clear(&mut self, kind: MessageKind);

    /// Wait up to `timeout` for the next message of `kind`.
    fn recv_timeout(&mut self, kind: MessageKind, timeout: Duration) -> Option<Message>;

    fn try_recv(&mut self, kind: MessageKind) -> Option<Message> {
        self.recv_timeout(kind, Duration::ZERO)
    }
}

/// Opens a [`Transport`] to a device by serial number.
pub trait Connector {
    type Link: Transport;

    /// `None` connects to the first available device.
    fn connect(&mut self, serial_number: Option<u32>) -> Result<Self::Link>;
}
