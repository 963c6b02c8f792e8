// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use anyhow::bail;
use ndpg_compiler::device_traits::NDPG_TRAITS;
use ndpg_compiler::{Role, ShotFile, WaitTable};
use ndpg_driver::{DriverSettings, RunEvent, Session, SimulatedPulseGenerator};
use ndpg_log::{info, warn};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub waits: WaitTable,
    /// Clock cycles from the start trigger to the terminal instruction.
    pub run_time: u64,
    pub final_outputs: Vec<bool>,
}

/// Play `shot` on a simulated device, holding every wait for `wait_cycles`.
pub fn run(shot: &ShotFile, wait_cycles: u64, max_cycles: u64) -> anyhow::Result<SimulationReport> {
    let device = SimulatedPulseGenerator::new(0);
    let handle = device.handle();
    let mut session = Session::with_link(device, DriverSettings::default())?;
    let front_panel = vec![false; NDPG_TRAITS.n_channels as usize];
    session.transition_to_buffered(shot, &front_panel)?;
    match shot.properties.role {
        Role::Master => session.start_run()?,
        Role::Slave => handle.hardware_trigger(),
    }

    let mut finished = false;
    while !finished {
        let budget = max_cycles.saturating_sub(handle.run_time());
        if budget == 0 {
            session.abort_buffered()?;
            bail!("Shot did not finish within {max_cycles} clock cycles");
        }
        handle.run_until_idle(budget);
        let result = session.poll()?;
        for event in &result.events {
            match event {
                RunEvent::WaitCompleted {
                    index,
                    label,
                    measured,
                } => {
                    info!("Wait {index} '{label}' lasted {measured}");
                }
                RunEvent::WaitTimedOut { index, label } => {
                    warn!("Wait {index} '{label}' timed out");
                }
                RunEvent::WaitStarted { .. } | RunEvent::RunFinished => {}
            }
        }
        finished = result.run_finished();
        if !finished && !handle.state().running {
            handle.advance(wait_cycles);
            handle.hardware_trigger();
        }
    }
    let run_time = handle.run_time();
    session.transition_to_manual_with_retry()?;
    Ok(SimulationReport {
        waits: session.waits().cloned().unwrap_or_default(),
        run_time,
        final_outputs: handle.outputs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::ShotDescription;

    const DESCRIPTION: &str = r#"{
        "channels": {
            "clock_lines": [
                {"name": "direct", "connection": "internal"},
                {"name": "camera", "connection": "channel 0"}
            ],
            "outputs": [
                {"name": "shutter", "connection": "channel 1", "raw_output": [true, false]}
            ]
        },
        "timeline": [
            {"tick": {"step": 1e-7, "reps": 1, "enabled_clock_lines": ["direct"]}},
            {"tick": {"step": 2e-7, "reps": 3, "enabled_clock_lines": ["camera"]}},
            "wait",
            {"tick": {"step": 1e-7, "reps": 1, "enabled_clock_lines": ["direct"]}}
        ],
        "waits": [
            {"label": "trap", "nominal_time": 7e-7, "timeout": 1.0}
        ]
    }"#;

    #[test]
    fn test_simulated_run_measures_waits() {
        let shot = ShotDescription::from_reader(DESCRIPTION.as_bytes())
            .unwrap()
            .compile(None)
            .unwrap();
        let report = run(&shot, 250, 1_000_000).unwrap();
        // 10 + 3 * 20 cycles before the wait, 1 to halt, 250 halted, 10 after it.
        assert_eq!(report.run_time, 331);
        let record = report.waits.get(0).unwrap();
        assert!((record.measured_duration.unwrap().value() - 2.5e-6).abs() < 1e-12);
        assert!(!record.timed_out);
        assert!(!report.final_outputs[1]);
    }

    #[test]
    fn test_slave_run() {
        let mut shot = ShotDescription::from_reader(DESCRIPTION.as_bytes())
            .unwrap()
            .compile(None)
            .unwrap();
        shot.properties.role = Role::Slave;
        let report = run(&shot, 0, 1_000_000).unwrap();
        assert_eq!(report.run_time, 81);
    }
}
