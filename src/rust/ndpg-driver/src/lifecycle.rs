// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Manual / buffered transitions of a shot.
//!
//! ```text
//! Manual -> Armed -> Running -> Finished -> Manual
//!             \_________\____ abort ____/
//! ```
use std::thread;

use ndpg_compiler::device_traits::NDPG_TRAITS;
use ndpg_compiler::{Role, ShotFile};
use ndpg_log::{info, warn};

use crate::messages::DeviceState;
use crate::options::{DeviceOptions, PowerlineTriggerOptions, RunMode, TriggerAcceptance};
use crate::session::{ArmedShot, Session, narrow};
use crate::transport::Transport;
use crate::waits::WaitMonitor;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Outputs follow the front panel.
    Manual,
    /// Program uploaded, waiting for the start trigger.
    Armed,
    Running,
    /// Idle at the terminal instruction.
    Finished,
}

impl RunState {
    pub fn as_str(self) -> &'static str {
        match self {
            RunState::Manual => "manual",
            RunState::Armed => "armed",
            RunState::Running => "running",
            RunState::Finished => "finished",
        }
    }
}

impl<T: Transport> Session<T> {
    /// Load a shot and arm the device for it.
    ///
    /// Returns the channel values the outputs will hold once the shot completed.
    pub fn transition_to_buffered(&mut self, shot: &ShotFile, front_panel: &[bool]) -> Result<Vec<bool>> {
        self.require_manual("load a shot")?;
        let properties = &shot.properties;
        properties.validate()?;
        let sentinel_address = shot
            .program
            .sentinel_address()
            .ok_or_else(|| Error::new("Shot has an empty program"))?;
        let waits = WaitMonitor::new(&shot.program, shot.waits.clone(), self.settings.clock_resolution)?;

        // Someone may have been running the device from the manual controls.
        self.disarm()?;
        self.upload(&shot.program, front_panel)?;

        let powerline_delay = self.to_cycles(
            "powerline_trigger_delay",
            properties.powerline_trigger_delay,
            NDPG_TRAITS.max_powerline_trigger_delay,
        )?;
        self.link
            .write_powerline_trigger_options(&PowerlineTriggerOptions {
                trigger_on_powerline: Some(properties.trigger_on_powerline),
                powerline_trigger_delay: Some(narrow(powerline_delay)?),
            })?;

        let trigger_out_length = self.to_cycles(
            "trigger_out_length",
            properties.trigger_out_length,
            NDPG_TRAITS.max_trigger_out_length,
        )?;
        let trigger_out_delay = self.to_cycles(
            "trigger_out_delay",
            properties.trigger_out_delay,
            NDPG_TRAITS.max_trigger_out_delay,
        )?;
        // The master ignores triggers until start_run; slaves wait for the master's trigger.
        self.link.write_device_options(&DeviceOptions {
            final_address: Some(sentinel_address),
            run_mode: Some(RunMode::Single),
            accept_hardware_trigger: Some(TriggerAcceptance::SingleRun),
            trigger_out_length: Some(narrow(trigger_out_length)?),
            trigger_out_delay: Some(trigger_out_delay),
            notify_on_main_trig_out: Some(true),
            notify_when_run_finished: Some(true),
            software_run_enable: Some(properties.role == Role::Slave),
        })?;

        self.role = properties.role;
        self.shot = Some(ArmedShot {
            sentinel_address,
            waits,
        });
        self.completed_waits = None;
        self.cease_fast_polling = false;
        self.run_state = RunState::Armed;
        info!(
            "Armed {:?} for a shot of {} instructions and {} waits",
            self.role,
            shot.program.len(),
            shot.waits.len()
        );

        Ok(shot
            .program
            .final_channel_state()
            .unwrap_or_default()
            .iter()
            .zip(front_panel)
            .map(|(state, panel)| state.resolve(*panel))
            .collect())
    }

    /// Start the shot with a software trigger. Only the master starts runs.
    pub fn start_run(&mut self) -> Result<()> {
        if self.run_state != RunState::Armed {
            return Err(Error::InvalidState {
                operation: "start a run",
                state: self.run_state.as_str(),
            });
        }
        if self.role != Role::Master {
            return Err(Error::InvalidState {
                operation: "start a run",
                state: "a slave",
            });
        }
        self.set_software_run_enable(true)?;
        self.trigger()?;
        self.run_state = RunState::Running;
        Ok(())
    }

    fn try_transition_to_manual(&mut self) -> Result<Option<DeviceState>> {
        let sentinel_address = self.sentinel_address().ok_or(Error::InvalidState {
            operation: "return to manual",
            state: self.run_state.as_str(),
        })?;
        let state = self.query_state()?.ok_or(Error::StateUnavailable)?;
        if state.running || state.current_address != sentinel_address {
            return Ok(Some(state));
        }
        self.disarm()?;
        if let Some(shot) = self.shot.take() {
            self.completed_waits = Some(shot.waits.into_table());
        }
        self.run_state = RunState::Manual;
        Ok(None)
    }

    /// Return to manual mode once the run is idle at its terminal instruction.
    ///
    /// `Ok(false)` if the device is still running or stopped elsewhere.
    pub fn transition_to_manual(&mut self) -> Result<bool> {
        Ok(self.try_transition_to_manual()?.is_none())
    }

    /// [`Session::transition_to_manual`], retried at the configured interval.
    pub fn transition_to_manual_with_retry(&mut self) -> Result<()> {
        let attempts = self.settings.manual_transition_attempts.max(1);
        let mut last = None;
        for attempt in 0..attempts {
            match self.try_transition_to_manual()? {
                None => return Ok(()),
                Some(state) => last = Some(state),
            }
            if attempt + 1 < attempts {
                thread::sleep(self.settings.manual_transition_interval);
            }
        }
        let (running, current_address) = last
            .map(|s| (s.running, s.current_address))
            .unwrap_or_default();
        Err(Error::ManualTransition {
            attempts,
            running,
            current_address,
            sentinel_address: self.sentinel_address().unwrap_or_default(),
        })
    }

    /// Abort after a successful transition_to_buffered, before the run was triggered.
    pub fn abort_transition_to_buffered(&mut self) -> Result<()> {
        self.abort()
    }

    /// Abort a running shot.
    pub fn abort_buffered(&mut self) -> Result<()> {
        self.abort()?;
        self.cease_fast_polling = true;
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        self.disarm()?;
        if let Some(shot) = self.shot.take() {
            warn!("Shot aborted while {}", self.run_state.as_str());
            self.completed_waits = Some(shot.waits.into_table());
        }
        self.run_state = RunState::Manual;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::poller::RunEvent;
    use crate::testing::{FRONT_PANEL, armed, open, shot_with_wait};

    #[test]
    fn test_run_with_wait() {
        let (mut session, handle) = armed(1.0);
        assert_eq!(session.run_state(), RunState::Armed);
        assert_eq!(handle.program().len(), 3);
        assert!(handle.program()[0].stop_and_wait);

        session.start_run().unwrap();
        assert_eq!(session.run_state(), RunState::Running);
        let result = session.poll().unwrap();
        assert_eq!(
            result.events,
            vec![RunEvent::WaitStarted {
                index: 0,
                label: "load".to_string()
            }]
        );

        // 100 cycles of the halting instruction, then 500 halted.
        handle.advance(600);
        assert!(handle.state().is_halted_at(0));
        handle.hardware_trigger();
        handle.run_until_idle(1_000);

        let result = session.poll().unwrap();
        assert!(result.run_finished());
        let measured = result.events.iter().find_map(|e| match e {
            RunEvent::WaitCompleted { measured, .. } => Some(measured.value()),
            _ => None,
        });
        assert!((measured.unwrap() - 5e-6).abs() < 1e-12);
        assert_eq!(session.run_state(), RunState::Finished);

        assert!(session.transition_to_manual().unwrap());
        assert_eq!(session.run_state(), RunState::Manual);
        let record = session.waits().unwrap().get(0).unwrap();
        assert!((record.measured_duration.unwrap().value() - 5e-6).abs() < 1e-12);
        assert!(!record.timed_out);
        assert_eq!(
            handle.state().accept_hardware_trigger,
            TriggerAcceptance::Never
        );
    }

    #[test]
    fn test_final_values_resolve_hold() {
        let (mut session, _handle) = open();
        let mut front_panel = FRONT_PANEL;
        front_panel[2] = true;
        front_panel[5] = true;
        let final_values = session
            .transition_to_buffered(&shot_with_wait(Role::Master, 1.0), &front_panel)
            .unwrap();
        assert_eq!(final_values.len(), 24);
        assert!(!final_values[2]);
        assert!(final_values[5]);
    }

    #[test]
    fn test_manual_while_running() {
        let (mut session, handle) = armed(1.0);
        session.start_run().unwrap();
        handle.advance(50);
        assert!(!session.transition_to_manual().unwrap());
        assert_eq!(session.run_state(), RunState::Running);

        session.settings.manual_transition_interval = Duration::ZERO;
        session.settings.manual_transition_attempts = 3;
        let err = session.transition_to_manual_with_retry().unwrap_err();
        assert!(matches!(
            err,
            Error::ManualTransition {
                attempts: 3,
                running: true,
                current_address: 0,
                sentinel_address: 2
            }
        ));
    }

    #[test]
    fn test_state_unavailable() {
        let (mut session, handle) = armed(1.0);
        handle.set_answer_state_requests(false);
        assert!(matches!(
            session.transition_to_manual(),
            Err(Error::StateUnavailable)
        ));
        assert!(matches!(
            session.check_remote_values(),
            Err(Error::StateUnavailable)
        ));
        assert_eq!(session.run_state(), RunState::Armed);
    }

    #[test]
    fn test_abort_buffered() {
        let (mut session, handle) = armed(1.0);
        session.start_run().unwrap();
        handle.advance(50);
        session.abort_buffered().unwrap();
        assert_eq!(session.run_state(), RunState::Manual);
        assert!(!handle.state().running);
        assert!(session.poll().unwrap().stop_fast_polling);
        assert!(!session.poll().unwrap().stop_fast_polling);
        assert!(session.waits().is_some());
    }

    #[test]
    fn test_abort_transition_to_buffered() {
        let (mut session, _handle) = armed(1.0);
        session.abort_transition_to_buffered().unwrap();
        assert_eq!(session.run_state(), RunState::Manual);
        assert!(!session.poll().unwrap().stop_fast_polling);
        assert!(session.sentinel_address().is_none());
    }

    #[test]
    fn test_slave_waits_for_hardware_trigger() {
        let (mut session, handle) = open();
        session
            .transition_to_buffered(&shot_with_wait(Role::Slave, 1.0), &FRONT_PANEL)
            .unwrap();
        assert_eq!(session.role(), Role::Slave);
        assert!(handle.state().software_run_enable);
        assert!(matches!(
            session.start_run(),
            Err(Error::InvalidState { .. })
        ));
        handle.hardware_trigger();
        assert!(handle.state().running);
        session.poll().unwrap();
        assert_eq!(session.run_state(), RunState::Running);
    }

    #[test]
    fn test_operations_require_manual() {
        let (mut session, handle) = armed(1.0);
        assert!(matches!(
            session.program_manual(&[true; 24]),
            Err(Error::InvalidState { .. })
        ));
        assert!(matches!(
            session.transition_to_buffered(&shot_with_wait(Role::Master, 1.0), &FRONT_PANEL),
            Err(Error::InvalidState { .. })
        ));
        session.abort_transition_to_buffered().unwrap();
        session.program_manual(&[true; 24]).unwrap();
        assert_eq!(handle.outputs(), vec![true; 24]);
        assert!(session.program_manual(&[true; 3]).is_err());
    }

    #[test]
    fn test_start_run_requires_armed() {
        let (mut session, _handle) = open();
        assert!(matches!(
            session.start_run(),
            Err(Error::InvalidState {
                state: "manual",
                ..
            })
        ));
    }
}
