// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Re-expansion of a program into the sequence of segments the device plays.
use std::collections::HashMap;

use ndpg_units::{ClockCycles, Duration, Seconds, clock_cycles, cycles_to_seconds};

use crate::channel::ChannelState;
use crate::instruction::{Address, PulseProgram};
use crate::{Error, Result};

/// One executed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub address: Address,
    pub start: ClockCycles,
    pub duration: ClockCycles,
    pub channel_state: Vec<ChannelState>,
    /// The device halts at the end of this segment until retriggered.
    pub halts: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Trace {
    pub segments: Vec<Segment>,
    /// Run time at which the terminal instruction is entered, waits excluded.
    pub end: ClockCycles,
}

impl Trace {
    pub fn duration(&self, resolution: Duration<Seconds>) -> Duration<Seconds> {
        cycles_to_seconds(self.end, resolution)
    }

    pub fn halts(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| s.halts)
    }
}

/// Play `program` until it reaches its terminal instruction.
///
/// Loops are executed; halts are recorded but treated as immediately retriggered.
/// Fails when more than `max_segments` would be produced.
pub fn expand(program: &PulseProgram, max_segments: usize) -> Result<Trace> {
    let sentinel = program
        .sentinel_address()
        .ok_or_else(|| Error::new("Cannot expand an empty program"))?;
    let mut counters: HashMap<Address, u32> = HashMap::new();
    let mut segments = vec![];
    let mut now: i64 = 0;
    let mut pc = 0;
    while pc != sentinel {
        let instruction = program
            .get(pc)
            .ok_or_else(|| Error::new(format!("Program jumps to missing address {pc}")))?;
        if segments.len() == max_segments {
            return Err(Error::new(format!(
                "Program expands to more than {max_segments} segments"
            )));
        }
        let duration = i64::try_from(instruction.duration)
            .map_err(|_| Error::new(format!("Duration of instruction {pc} overflows")))?;
        segments.push(Segment {
            address: pc,
            start: clock_cycles(now),
            duration: clock_cycles(duration),
            channel_state: instruction.channel_state.clone(),
            halts: false,
        });
        now += duration;

        let looping = instruction.is_loop_end() && {
            let remaining = counters.entry(pc).or_insert(instruction.goto_counter);
            let looping = *remaining > 0;
            *remaining = remaining.saturating_sub(1);
            looping
        };
        if looping {
            pc = instruction.goto_address;
        } else {
            counters.remove(&pc);
            // A halt inside a loop takes effect once the loop is done.
            if let Some(segment) = segments.last_mut() {
                segment.halts = instruction.stop_and_wait;
            }
            pc += 1;
        }
    }
    Ok(Trace {
        segments,
        end: clock_cycles(now),
    })
}
