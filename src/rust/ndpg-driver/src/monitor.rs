// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Background polling of a shared session at an idle or a run cadence.
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ndpg_log::{debug, warn};

use crate::Result;
use crate::poller::PollResult;
use crate::session::Session;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Idle,
    Run,
}

enum Command {
    SetCadence(Cadence),
    Stop,
}

pub struct StatusMonitor {
    commands: Sender<Command>,
    results: Receiver<Result<PollResult>>,
    thread: Option<JoinHandle<()>>,
}

impl StatusMonitor {
    /// Start polling `session` on a background thread, beginning at the idle cadence.
    pub fn spawn<T>(session: Arc<Mutex<Session<T>>>) -> Self
    where
        T: Transport + 'static,
    {
        let (idle, run) = {
            let session = session.lock().unwrap_or_else(PoisonError::into_inner);
            (
                session.settings().idle_poll_interval,
                session.settings().run_poll_interval,
            )
        };
        let (commands, command_rx) = mpsc::channel();
        let (result_tx, results) = mpsc::channel();
        let thread = thread::spawn(move || {
            poll_loop(&session, &command_rx, &result_tx, idle, run);
        });
        StatusMonitor {
            commands,
            results,
            thread: Some(thread),
        }
    }

    /// Switch cadence. The pending poll is cancelled and rescheduled from now.
    pub fn set_cadence(&self, cadence: Cadence) {
        if self.commands.send(Command::SetCadence(cadence)).is_err() {
            warn!("Status monitor has already stopped");
        }
    }

    pub fn results(&self) -> &Receiver<Result<PollResult>> {
        &self.results
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Stop);
        if self.thread.take().is_some_and(|t| t.join().is_err()) {
            warn!("Status monitor thread panicked");
        }
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop<T: Transport>(
    session: &Mutex<Session<T>>,
    commands: &Receiver<Command>,
    results: &Sender<Result<PollResult>>,
    idle: Duration,
    run: Duration,
) {
    let mut cadence = Cadence::Idle;
    loop {
        let interval = match cadence {
            Cadence::Idle => idle,
            Cadence::Run => run,
        };
        match commands.recv_timeout(interval) {
            Ok(Command::SetCadence(next)) => {
                debug!("Status monitor cadence {:?}", next);
                cadence = next;
                continue;
            }
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        let outcome = session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .poll();
        if outcome
            .as_ref()
            .is_ok_and(|r| r.stop_fast_polling || r.run_finished())
        {
            cadence = Cadence::Idle;
        }
        if results.send(outcome).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::DriverSettings;
    use crate::simulator::SimulatedPulseGenerator;

    #[test]
    fn test_monitor_polls_in_background() {
        let settings = DriverSettings::default()
            .with_poll_intervals(Duration::from_millis(5), Duration::from_millis(1));
        let session = Session::with_link(SimulatedPulseGenerator::new(1), settings).unwrap();
        let monitor = StatusMonitor::spawn(Arc::new(Mutex::new(session)));
        let first = monitor
            .results()
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert!(first.state.is_some());
        monitor.set_cadence(Cadence::Run);
        let next = monitor
            .results()
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .unwrap();
        assert!(!next.state.unwrap().running);
        monitor.stop();
    }
}
