// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! One status poll cycle.
//!
//! A cycle requests a fresh state snapshot, drains every queued event and
//! advances the wait correlation. It does not schedule itself; see
//! [`crate::monitor`] for a background caller.
use std::time::Instant;

use ndpg_log::{diagnostic, error, info, warn};
use ndpg_units::{Duration, Seconds};

use crate::lifecycle::RunState;
use crate::messages::{
    BytesDropped, CommsError, DeviceState, Message, MessageKind, Notification, PowerlineState,
    StateExtras,
};
use crate::options::Action;
use crate::session::Session;
use crate::transport::Transport;
use crate::Result;

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    WaitStarted {
        index: usize,
        label: String,
    },
    WaitCompleted {
        index: usize,
        label: String,
        measured: Duration<Seconds>,
    },
    /// The device was retriggered after the wait exceeded its timeout.
    WaitTimedOut {
        index: usize,
        label: String,
    },
    RunFinished,
}

#[derive(Debug, Clone, Default)]
pub struct PollResult {
    pub state: Option<DeviceState>,
    pub powerline: Option<PowerlineState>,
    pub extras: Option<StateExtras>,
    pub notifications: Vec<Notification>,
    pub comms_errors: Vec<CommsError>,
    pub bytes_dropped: Vec<BytesDropped>,
    pub events: Vec<RunEvent>,
    /// The shot was aborted; the caller should fall back to the idle cadence.
    pub stop_fast_polling: bool,
}

impl PollResult {
    pub fn run_finished(&self) -> bool {
        self.events.contains(&RunEvent::RunFinished)
    }
}

impl<T: Transport> Session<T> {
    pub fn poll(&mut self) -> Result<PollResult> {
        self.poll_at(Instant::now())
    }

    /// Run a poll cycle with `now` as the current time for wait deadlines.
    pub fn poll_at(&mut self, now: Instant) -> Result<PollResult> {
        let timeout = self.settings.state_timeout;
        for kind in [MessageKind::State, MessageKind::Powerline, MessageKind::Extras] {
            self.link.clear(kind);
        }
        self.link.write_action(&Action::request_status())?;
        let mut result = PollResult {
            state: match self.link.recv_timeout(MessageKind::State, timeout) {
                Some(Message::State(state)) => Some(state),
                _ => None,
            },
            powerline: match self.link.recv_timeout(MessageKind::Powerline, timeout) {
                Some(Message::Powerline(state)) => Some(state),
                _ => None,
            },
            extras: match self.link.recv_timeout(MessageKind::Extras, timeout) {
                Some(Message::Extras(extras)) => Some(extras),
                _ => None,
            },
            ..Default::default()
        };
        while let Some(message) = self.link.try_recv(MessageKind::Notification) {
            if let Message::Notification(n) = message {
                result.notifications.push(n);
            }
        }
        while let Some(message) = self.link.try_recv(MessageKind::Error) {
            if let Message::Error(e) = message {
                error!("Pulse Generator could not parse a message: {}", e.message);
                result.comms_errors.push(e);
            }
        }
        while let Some(message) = self.link.try_recv(MessageKind::BytesDropped) {
            if let Message::BytesDropped(d) = message {
                warn!("Pulse Generator dropped {} bytes", d.count);
                result.bytes_dropped.push(d);
            }
        }

        if self.run_state == RunState::Armed
            && (!result.notifications.is_empty() || result.state.as_ref().is_some_and(|s| s.running))
        {
            self.run_state = RunState::Running;
        }

        let sentinel_address = self.sentinel_address();
        let mut reached_sentinel = false;
        for notification in &result.notifications {
            diagnostic!("{:?}", notification);
            let events = self
                .shot
                .as_mut()
                .map(|shot| shot.waits.on_notification(notification, now))
                .unwrap_or_default();
            result.events.extend(events);
            reached_sentinel |= Some(notification.address) == sentinel_address;
        }
        let idle_at_sentinel = match (&result.state, sentinel_address) {
            (Some(state), Some(sentinel)) => state.is_halted_at(sentinel),
            _ => false,
        };
        if (reached_sentinel || idle_at_sentinel)
            && matches!(self.run_state, RunState::Armed | RunState::Running)
        {
            self.finish(&mut result);
        }

        self.handle_overdue_wait(now, &mut result)?;

        result.stop_fast_polling = std::mem::take(&mut self.cease_fast_polling);
        Ok(result)
    }

    fn finish(&mut self, result: &mut PollResult) {
        info!("Run finished");
        self.run_state = RunState::Finished;
        result.events.push(RunEvent::RunFinished);
    }

    fn handle_overdue_wait(&mut self, now: Instant, result: &mut PollResult) -> Result<()> {
        let Some(start_address) = self.shot.as_ref().and_then(|s| s.waits.overdue(now)) else {
            return Ok(());
        };
        // Without an answer the deadline stays armed for the next cycle.
        let Some(state) = self.query_state()? else {
            warn!("No device state while checking an overdue wait");
            return Ok(());
        };
        let still_halted = state.is_halted_at(start_address);
        let event = self
            .shot
            .as_mut()
            .and_then(|s| s.waits.resolve_timeout(still_halted));
        if let Some(event) = event {
            warn!(
                "Wait at address {} timed out; retriggering the Pulse Generator",
                start_address
            );
            self.trigger()?;
            result.events.push(event);
        }
        Ok(())
    }
}
