// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Correlation of device notifications with the waits of the running shot.
//!
//! The instruction that halts for a wait notifies the computer when it starts,
//! and the instruction after it notifies when the run resumes. The difference
//! of the two run time counters, minus the length of the halting instruction,
//! is the time the device spent halted.
use std::collections::HashMap;
use std::time::{Duration, Instant};

use ndpg_compiler::{Address, PulseProgram, WaitTable};
use ndpg_log::{diagnostic, warn};
use ndpg_units::{Seconds, seconds};

use crate::messages::Notification;
use crate::poller::RunEvent;
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct WaitStart {
    index: usize,
    /// Clock cycles of the halting instruction itself.
    duration: u64,
    timeout: Duration,
}

#[derive(Debug, Clone, Copy)]
struct ActiveWait {
    start_address: Address,
    start_run_time: u64,
    deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct WaitMonitor {
    starts: HashMap<Address, WaitStart>,
    ends: HashMap<Address, Address>,
    table: WaitTable,
    active: Option<ActiveWait>,
    resolution: ndpg_units::Duration<Seconds>,
}

impl WaitMonitor {
    /// Register the halting instructions of `program` against `table`, in address order.
    pub fn new(
        program: &PulseProgram,
        mut table: WaitTable,
        resolution: ndpg_units::Duration<Seconds>,
    ) -> Result<Self> {
        table.clear_measurements();
        let halts: Vec<_> = program
            .instructions()
            .iter()
            .filter(|i| i.stop_and_wait)
            .collect();
        if halts.len() != table.len() {
            return Err(ndpg_compiler::Error::WaitTableMismatch {
                markers: halts.len(),
                records: table.len(),
            }
            .into());
        }
        let mut starts = HashMap::new();
        let mut ends = HashMap::new();
        for (index, (instruction, record)) in halts.iter().zip(table.records()).enumerate() {
            let timeout = Duration::try_from_secs_f64(record.timeout.value()).map_err(|_| {
                Error::new(format!(
                    "Wait '{}' has invalid timeout {}",
                    record.label, record.timeout
                ))
            })?;
            starts.insert(
                instruction.address,
                WaitStart {
                    index,
                    duration: instruction.duration,
                    timeout,
                },
            );
            ends.insert(instruction.address + 1, instruction.address);
        }
        Ok(WaitMonitor {
            starts,
            ends,
            table,
            active: None,
            resolution,
        })
    }

    pub fn table(&self) -> &WaitTable {
        &self.table
    }

    pub fn into_table(self) -> WaitTable {
        self.table
    }

    pub fn is_wait_start(&self, address: Address) -> bool {
        self.starts.contains_key(&address)
    }

    pub fn on_notification(&mut self, notification: &Notification, now: Instant) -> Vec<RunEvent> {
        let mut events = vec![];
        if !notification.address_notify {
            return events;
        }
        let address = notification.address;
        // The same instruction may resume one wait and halt for the next.
        if let Some(start) = self.ends.get(&address).copied() {
            events.extend(self.complete(start, notification.run_time));
        }
        let Some((index, timeout)) = self.starts.get(&address).map(|s| (s.index, s.timeout)) else {
            return events;
        };
        // A halting instruction inside a loop notifies on every pass; the last one counts.
        let newly_started = self.active.is_none_or(|a| a.start_address != address);
        self.active = Some(ActiveWait {
            start_address: address,
            start_run_time: notification.run_time,
            deadline: Some(now + timeout),
        });
        diagnostic!("Wait {} started at run time {}", index, notification.run_time);
        if newly_started {
            events.push(RunEvent::WaitStarted {
                index,
                label: self.label(index),
            });
        }
        events
    }

    fn complete(&mut self, start_address: Address, end_run_time: u64) -> Option<RunEvent> {
        let start = self.starts.get(&start_address)?;
        let Some(active) = self.active.filter(|a| a.start_address == start_address) else {
            let measured = self
                .table
                .get(start.index)
                .is_some_and(|r| r.measured_duration.is_some());
            if measured {
                diagnostic!("Wait {} end notified again at run time {}", start.index, end_run_time);
            } else {
                warn!(
                    "Wait {} ended without a start notification; its duration is unknown",
                    start.index
                );
            }
            return None;
        };
        let elapsed = end_run_time
            .checked_sub(active.start_run_time)
            .and_then(|d| d.checked_sub(start.duration));
        let Some(cycles) = elapsed else {
            warn!(
                "Wait {} ended at run time {} before it could have started at {}",
                start.index,
                end_run_time,
                active.start_run_time
            );
            self.active = None;
            return None;
        };
        let index = start.index;
        let measured = seconds(cycles as f64 * self.resolution.value());
        self.active = None;
        if let Err(err) = self.table.record_measurement(index, measured) {
            warn!("{}", err);
            return None;
        }
        Some(RunEvent::WaitCompleted {
            index,
            label: self.label(index),
            measured,
        })
    }

    fn label(&self, index: usize) -> String {
        self.table
            .get(index)
            .map(|r| r.label.clone())
            .unwrap_or_default()
    }

    /// Start address of the active wait if its deadline passed.
    pub fn overdue(&self, now: Instant) -> Option<Address> {
        self.active
            .filter(|a| a.deadline.is_some_and(|d| d <= now))
            .map(|a| a.start_address)
    }

    /// Settle an overdue wait. Fires at most once per wait.
    ///
    /// When the device is still halted at the start address the wait is marked
    /// as timed out and the caller must retrigger; otherwise it already moved on
    /// and nothing is done.
    pub fn resolve_timeout(&mut self, still_halted: bool) -> Option<RunEvent> {
        let active = self.active.as_mut()?;
        active.deadline.take()?;
        if !still_halted {
            return None;
        }
        let index = self.starts.get(&active.start_address)?.index;
        if let Err(err) = self.table.mark_timed_out(index) {
            warn!("{}", err);
            return None;
        }
        Some(RunEvent::WaitTimedOut {
            index,
            label: self.label(index),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndpg_compiler::{ChannelState, HardwareInstruction, WaitRecord};

    fn program() -> PulseProgram {
        let mut halt = HardwareInstruction::new(0, 10, vec![ChannelState::Low; 24]);
        halt.stop_and_wait = true;
        halt.notify_computer = true;
        let mut resume = HardwareInstruction::new(1, 10, vec![ChannelState::Low; 24]);
        resume.notify_computer = true;
        let mut sentinel =
            HardwareInstruction::new(2, ndpg_compiler::instruction::MAX_DURATION, vec![ChannelState::Low; 24]);
        sentinel.notify_computer = true;
        PulseProgram::new(vec![halt, resume, sentinel])
    }

    fn monitor() -> WaitMonitor {
        let table =
            WaitTable::new(vec![WaitRecord::new("w0", seconds(100e-9), seconds(1e-3))]).unwrap();
        WaitMonitor::new(&program(), table, seconds(10e-9)).unwrap()
    }

    fn notification(address: Address, run_time: u64) -> Notification {
        Notification {
            address,
            run_time,
            address_notify: true,
            trigger_notify: false,
            finished_notify: false,
        }
    }

    #[test]
    fn test_measured_duration() {
        let mut monitor = monitor();
        let now = Instant::now();
        assert!(matches!(
            monitor.on_notification(&notification(0, 100), now).as_slice(),
            [RunEvent::WaitStarted { index: 0, .. }]
        ));
        let events = monitor.on_notification(&notification(1, 1110), now);
        let [RunEvent::WaitCompleted { measured, .. }] = events.as_slice() else {
            panic!("expected completion, got {events:?}");
        };
        // 1110 - 100 - 10 cycles
        assert_eq!(*measured, seconds(1000.0 * 10e-9));
        assert_eq!(monitor.table().get(0).unwrap().measured_duration, Some(*measured));
        assert_eq!(monitor.overdue(now + Duration::from_secs(1)), None);
    }

    #[test]
    fn test_resume_that_halts_again() {
        // 0 halts, 1 resumes and halts, 2 resumes
        let mut first = HardwareInstruction::new(0, 10, vec![ChannelState::Low; 24]);
        first.stop_and_wait = true;
        first.notify_computer = true;
        let mut second = HardwareInstruction::new(1, 10, vec![ChannelState::Low; 24]);
        second.stop_and_wait = true;
        second.notify_computer = true;
        let mut resume = HardwareInstruction::new(2, 10, vec![ChannelState::Low; 24]);
        resume.notify_computer = true;
        let mut sentinel =
            HardwareInstruction::new(3, ndpg_compiler::instruction::MAX_DURATION, vec![ChannelState::Low; 24]);
        sentinel.notify_computer = true;
        let program = PulseProgram::new(vec![first, second, resume, sentinel]);
        let table = WaitTable::new(vec![
            WaitRecord::new("w0", seconds(100e-9), seconds(1e-3)),
            WaitRecord::new("w1", seconds(200e-9), seconds(1e-3)),
        ])
        .unwrap();
        let mut monitor = WaitMonitor::new(&program, table, seconds(10e-9)).unwrap();
        let now = Instant::now();

        monitor.on_notification(&notification(0, 0), now);
        let events = monitor.on_notification(&notification(1, 510), now);
        assert!(matches!(
            events.as_slice(),
            [
                RunEvent::WaitCompleted { index: 0, .. },
                RunEvent::WaitStarted { index: 1, .. }
            ]
        ));
        assert_eq!(monitor.overdue(now + Duration::from_millis(2)), Some(1));

        let events = monitor.on_notification(&notification(2, 820), now);
        assert!(matches!(events.as_slice(), [RunEvent::WaitCompleted { index: 1, .. }]));
        let table = monitor.table();
        assert_eq!(table.get(0).unwrap().measured_duration, Some(seconds(500.0 * 10e-9)));
        assert_eq!(table.get(1).unwrap().measured_duration, Some(seconds(300.0 * 10e-9)));
    }

    #[test]
    fn test_repeated_end_is_ignored() {
        let mut monitor = monitor();
        let now = Instant::now();
        monitor.on_notification(&notification(0, 0), now);
        assert_eq!(monitor.on_notification(&notification(1, 110), now).len(), 1);
        assert!(monitor.on_notification(&notification(1, 120), now).is_empty());
        assert_eq!(
            monitor.table().get(0).unwrap().measured_duration,
            Some(seconds(100.0 * 10e-9))
        );
    }

    #[test]
    fn test_timeout_fires_once() {
        let mut monitor = monitor();
        let now = Instant::now();
        monitor.on_notification(&notification(0, 0), now);
        assert_eq!(monitor.overdue(now), None);
        let later = now + Duration::from_millis(2);
        assert_eq!(monitor.overdue(later), Some(0));
        assert!(matches!(
            monitor.resolve_timeout(true),
            Some(RunEvent::WaitTimedOut { index: 0, .. })
        ));
        assert_eq!(monitor.overdue(later), None);
        assert!(monitor.resolve_timeout(true).is_none());
        assert!(monitor.table().get(0).unwrap().timed_out);
    }

    #[test]
    fn test_timeout_ignored_when_advanced() {
        let mut monitor = monitor();
        let now = Instant::now();
        monitor.on_notification(&notification(0, 0), now);
        assert!(monitor.resolve_timeout(false).is_none());
        assert_eq!(monitor.overdue(now + Duration::from_secs(1)), None);
        assert!(!monitor.table().get(0).unwrap().timed_out);
    }

    #[test]
    fn test_loop_restart_overwrites_start() {
        let mut monitor = monitor();
        let now = Instant::now();
        assert_eq!(monitor.on_notification(&notification(0, 0), now).len(), 1);
        assert!(monitor.on_notification(&notification(0, 50), now).is_empty());
        let events = monitor.on_notification(&notification(1, 160), now);
        let [RunEvent::WaitCompleted { measured, .. }] = events.as_slice() else {
            panic!("expected completion, got {events:?}");
        };
        assert_eq!(*measured, seconds(100.0 * 10e-9));
    }

    #[test]
    fn test_mismatched_table() {
        assert!(WaitMonitor::new(&program(), WaitTable::default(), seconds(10e-9)).is_err());
    }
}
