// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! An open connection to one Pulse Generator.
use ndpg_compiler::device_traits::NDPG_TRAITS;
use ndpg_compiler::encoding::{encode_program, resolve_hold};
use ndpg_compiler::{Address, PulseProgram, Role, WaitTable};
use ndpg_log::{debug, info};
use ndpg_units::{ClockCycles, Duration, Seconds, seconds_to_cycles};

use crate::discovery::DiscoveryLock;
use crate::lifecycle::RunState;
use crate::messages::{DeviceInfo, DeviceState, Message, MessageKind};
use crate::options::{
    Action, DeviceOptions, PowerlineTriggerOptions, RunMode, TriggerAcceptance,
};
use crate::settings::DriverSettings;
use crate::transport::{Connector, Transport};
use crate::waits::WaitMonitor;
use crate::{Error, Result};

/// Byte echoed back by the device together with its identity.
const ECHO_BYTE: u8 = b'N';

/// State of the shot currently loaded on the device.
#[derive(Debug)]
pub(crate) struct ArmedShot {
    pub sentinel_address: Address,
    pub waits: WaitMonitor,
}

pub struct Session<T: Transport> {
    pub(crate) link: T,
    pub(crate) settings: DriverSettings,
    device_info: DeviceInfo,
    pub(crate) role: Role,
    pub(crate) run_state: RunState,
    pub(crate) shot: Option<ArmedShot>,
    pub(crate) completed_waits: Option<WaitTable>,
    pub(crate) cease_fast_polling: bool,
}

impl<T: Transport> Session<T> {
    /// Connect to a device and put it into manual mode.
    ///
    /// The discovery lock is held only while the connector searches for the device.
    pub fn open<C>(connector: &mut C, serial_number: Option<u32>, settings: DriverSettings) -> Result<Self>
    where
        C: Connector<Link = T>,
    {
        let link = {
            let _lock =
                DiscoveryLock::acquire(&settings.discovery_lock_path, settings.discovery_lock_timeout)?;
            connector.connect(serial_number)?
        };
        Self::with_link(link, settings)
    }

    /// Take over an already connected link.
    pub fn with_link(mut link: T, settings: DriverSettings) -> Result<Self> {
        link.clear(MessageKind::Echo);
        link.write_echo(ECHO_BYTE)?;
        let device_info = match link.recv_timeout(MessageKind::Echo, settings.echo_timeout) {
            Some(Message::Echo(info)) => info,
            _ => {
                return Err(Error::Timeout {
                    what: MessageKind::Echo.describe(),
                    timeout: settings.echo_timeout,
                });
            }
        };
        info!(
            "Connected to Pulse Generator {} on {} (firmware {}, hardware {})",
            device_info.serial_number,
            device_info.port,
            device_info.firmware_version,
            device_info.hardware_version
        );
        // Manual controls may have changed anything; never assume the device defaults.
        link.write_device_options(&DeviceOptions::manual_defaults())?;
        Ok(Session {
            link,
            settings,
            device_info,
            role: Role::Master,
            run_state: RunState::Manual,
            shot: None,
            completed_waits: None,
            cease_fast_polling: false,
        })
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn run_state(&self) -> RunState {
        self.run_state
    }

    pub fn settings(&self) -> &DriverSettings {
        &self.settings
    }

    pub fn link(&self) -> &T {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut T {
        &mut self.link
    }

    /// Waits of the loaded shot, or of the last completed one.
    pub fn waits(&self) -> Option<&WaitTable> {
        self.shot
            .as_ref()
            .map(|s| s.waits.table())
            .or(self.completed_waits.as_ref())
    }

    pub fn sentinel_address(&self) -> Option<Address> {
        self.shot.as_ref().map(|s| s.sentinel_address)
    }

    /// Resolve HOLD channels against `front_panel` and write the program to the device.
    pub fn upload(&mut self, program: &PulseProgram, front_panel: &[bool]) -> Result<()> {
        let resolved = resolve_hold(program, front_panel)?;
        let records = encode_program(&resolved)?;
        debug!("Uploading {} instructions", resolved.len());
        self.link.write_instructions(&records)
    }

    pub fn trigger(&mut self) -> Result<()> {
        self.link.write_action(&Action::trigger_now())
    }

    pub fn reset_run(&mut self) -> Result<()> {
        self.link.write_action(&Action::reset_run())
    }

    /// Stop accepting hardware triggers and return the run pointer to the start.
    pub fn disarm(&mut self) -> Result<()> {
        self.link
            .write_device_options(&DeviceOptions::accept_hardware_trigger(TriggerAcceptance::Never))?;
        self.reset_run()
    }

    /// Request a fresh state snapshot. `None` if the device did not answer in time.
    pub fn query_state(&mut self) -> Result<Option<DeviceState>> {
        self.link.clear(MessageKind::State);
        self.link.write_action(&Action {
            request_state: true,
            ..Default::default()
        })?;
        Ok(
            match self
                .link
                .recv_timeout(MessageKind::State, self.settings.state_timeout)
            {
                Some(Message::State(state)) => Some(state),
                _ => None,
            },
        )
    }

    /// Set the outputs directly. Only valid outside of a shot.
    pub fn program_manual(&mut self, channel_state: &[bool]) -> Result<()> {
        self.require_manual("program the front panel")?;
        if channel_state.len() != NDPG_TRAITS.n_channels as usize {
            return Err(Error::new(format!(
                "Expected {} channel values, got {}",
                NDPG_TRAITS.n_channels,
                channel_state.len()
            )));
        }
        self.link.write_static_state(channel_state)
    }

    /// Read back the live output levels.
    pub fn check_remote_values(&mut self) -> Result<Vec<bool>> {
        let state = self.query_state()?.ok_or(Error::StateUnavailable)?;
        Ok(state.channel_state)
    }

    pub fn set_software_run_enable(&mut self, enable: bool) -> Result<()> {
        self.link
            .write_device_options(&DeviceOptions::software_run_enable(enable))
    }

    pub fn disable_after_current_run(&mut self) -> Result<()> {
        self.link.write_action(&Action {
            disable_after_current_run: true,
            ..Default::default()
        })
    }

    pub fn set_run_mode(&mut self, run_mode: RunMode) -> Result<()> {
        self.link.write_device_options(&DeviceOptions {
            run_mode: Some(run_mode),
            ..Default::default()
        })
    }

    pub fn set_accept_hardware_trigger(&mut self, acceptance: TriggerAcceptance) -> Result<()> {
        self.link
            .write_device_options(&DeviceOptions::accept_hardware_trigger(acceptance))
    }

    pub fn set_trigger_on_powerline(&mut self, enable: bool) -> Result<()> {
        self.link
            .write_powerline_trigger_options(&PowerlineTriggerOptions {
                trigger_on_powerline: Some(enable),
                ..Default::default()
            })
    }

    pub fn set_powerline_trigger_delay(&mut self, delay: Duration<Seconds>) -> Result<()> {
        let cycles = self.to_cycles("powerline_trigger_delay", delay, NDPG_TRAITS.max_powerline_trigger_delay)?;
        self.link
            .write_powerline_trigger_options(&PowerlineTriggerOptions {
                powerline_trigger_delay: Some(narrow(cycles)?),
                ..Default::default()
            })
    }

    pub fn set_trigger_out_length(&mut self, length: Duration<Seconds>) -> Result<()> {
        let cycles = self.to_cycles("trigger_out_length", length, NDPG_TRAITS.max_trigger_out_length)?;
        self.link.write_device_options(&DeviceOptions {
            trigger_out_length: Some(narrow(cycles)?),
            ..Default::default()
        })
    }

    pub fn set_trigger_out_delay(&mut self, delay: Duration<Seconds>) -> Result<()> {
        let cycles = self.to_cycles("trigger_out_delay", delay, NDPG_TRAITS.max_trigger_out_delay)?;
        self.link.write_device_options(&DeviceOptions {
            trigger_out_delay: Some(cycles),
            ..Default::default()
        })
    }

    pub fn set_notify_when_run_finished(&mut self, notify: bool) -> Result<()> {
        self.link.write_device_options(&DeviceOptions {
            notify_when_run_finished: Some(notify),
            ..Default::default()
        })
    }

    pub fn set_notify_on_main_trig_out(&mut self, notify: bool) -> Result<()> {
        self.link.write_device_options(&DeviceOptions {
            notify_on_main_trig_out: Some(notify),
            ..Default::default()
        })
    }

    /// Round `value` to the nearest clock cycle and check it against `max`.
    pub(crate) fn to_cycles(
        &self,
        field: &str,
        value: Duration<Seconds>,
        max: ClockCycles,
    ) -> Result<u64> {
        let cycles = seconds_to_cycles(value, self.settings.clock_resolution);
        if value.value() < 0.0 || cycles > max {
            return Err(Error::new(format!(
                "{field} of {value} is outside the range of 0 to {} clock cycles",
                max.value()
            )));
        }
        u64::try_from(cycles.value()).map_err(|_| Error::new(format!("{field} of {value} is negative")))
    }

    pub(crate) fn require_manual(&self, operation: &'static str) -> Result<()> {
        if self.run_state != RunState::Manual {
            return Err(Error::InvalidState {
                operation,
                state: self.run_state.as_str(),
            });
        }
        Ok(())
    }
}

pub(crate) fn narrow<N: TryFrom<u64>>(cycles: u64) -> Result<N> {
    N::try_from(cycles).map_err(|_| Error::new(format!("{cycles} clock cycles out of range")))
}
