// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for session tests against the simulator.
use std::collections::BTreeSet;

use ndpg_compiler::{
    ChannelConfig, ClockLineDef, ClockLineId, ClockTick, CompilerSettings, DeviceProperties,
    DigitalOutputDef, PseudoclockEntry, Role, ShotFile, WaitRecord, WaitTable, compile_shot,
};
use ndpg_units::seconds;

use crate::session::Session;
use crate::settings::DriverSettings;
use crate::simulator::{SimulatedPulseGenerator, SimulatorHandle};

pub(crate) const FRONT_PANEL: [bool; 24] = [false; 24];

fn tick(step: f64, reps: u64, line: &str) -> PseudoclockEntry {
    PseudoclockEntry::Tick(ClockTick {
        step: seconds(step),
        reps,
        enabled_clock_lines: BTreeSet::from([ClockLineId::new(line)]),
    })
}

fn shot(timeline: &[PseudoclockEntry], waits: Vec<WaitRecord>, role: Role) -> ShotFile {
    let config = ChannelConfig {
        clock_lines: vec![
            ClockLineDef {
                name: ClockLineId::new("direct"),
                connection: "internal".to_string(),
            },
            ClockLineDef {
                name: ClockLineId::new("camera"),
                connection: "channel 0".to_string(),
            },
        ],
        outputs: vec![DigitalOutputDef {
            name: "shutter".to_string(),
            connection: "channel 2".to_string(),
            raw_output: vec![true, false, true],
        }],
    };
    let waits = WaitTable::new(waits).unwrap();
    let compiled = compile_shot(timeline, &config, waits, &CompilerSettings::default()).unwrap();
    let properties = DeviceProperties {
        role,
        ..Default::default()
    };
    ShotFile::new(properties, compiled)
}

/// Two 1 us ticks of the direct outputs with a wait in between.
///
/// Address 0 halts, address 1 resumes and address 2 is terminal.
pub(crate) fn shot_with_wait(role: Role, timeout: f64) -> ShotFile {
    shot(
        &[tick(1e-6, 1, "direct"), PseudoclockEntry::Wait, tick(1e-6, 1, "direct")],
        vec![WaitRecord::new("load", seconds(1e-6), seconds(timeout))],
        role,
    )
}

/// Three 1 us ticks separated by two waits.
///
/// Address 0 halts, address 1 resumes and halts again, address 2 resumes.
pub(crate) fn back_to_back_waits(timeout: f64) -> ShotFile {
    shot(
        &[
            tick(1e-6, 1, "direct"),
            PseudoclockEntry::Wait,
            tick(1e-6, 1, "direct"),
            PseudoclockEntry::Wait,
            tick(1e-6, 1, "direct"),
        ],
        vec![
            WaitRecord::new("load", seconds(1e-6), seconds(timeout)),
            WaitRecord::new("image", seconds(2e-6), seconds(timeout)),
        ],
        Role::Master,
    )
}

/// A wait followed by a camera tick repeated `reps` times.
pub(crate) fn wait_then_loop(reps: u64) -> ShotFile {
    shot(
        &[tick(1e-6, 1, "direct"), PseudoclockEntry::Wait, tick(100e-9, reps, "camera")],
        vec![WaitRecord::new("load", seconds(1e-6), seconds(1.0))],
        Role::Master,
    )
}

pub(crate) fn open() -> (Session<SimulatedPulseGenerator>, SimulatorHandle) {
    let device = SimulatedPulseGenerator::new(1);
    let handle = device.handle();
    let session = Session::with_link(device, DriverSettings::default()).unwrap();
    (session, handle)
}

/// A session armed with [`shot_with_wait`] as master.
pub(crate) fn armed(timeout: f64) -> (Session<SimulatedPulseGenerator>, SimulatorHandle) {
    let (mut session, handle) = open();
    session
        .transition_to_buffered(&shot_with_wait(Role::Master, timeout), &FRONT_PANEL)
        .unwrap();
    (session, handle)
}
