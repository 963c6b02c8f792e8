// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Abstract pseudoclock timeline and its classification per tick.
use std::collections::BTreeSet;
use std::fmt;

use ndpg_units::{Duration, Seconds};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::channel::{ChannelIndex, ChannelMap};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClockLineId(String);

impl ClockLineId {
    pub fn new(name: impl Into<String>) -> Self {
        ClockLineId(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClockLineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One pseudoclock instruction: `reps` ticks of period `step` on every enabled line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockTick {
    pub step: Duration<Seconds>,
    pub reps: u64,
    pub enabled_clock_lines: BTreeSet<ClockLineId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PseudoclockEntry {
    Tick(ClockTick),
    /// Halt until retriggered; matched in order against the wait table.
    Wait,
}

impl PseudoclockEntry {
    pub fn is_wait(&self) -> bool {
        matches!(self, PseudoclockEntry::Wait)
    }
}

/// What a tick needs from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TickClass {
    /// Physical channels of the external clock lines to pulse.
    pub external_channels: Vec<ChannelIndex>,
    /// The tick enables the internal line, so direct outputs take their next value.
    pub latches_outputs: bool,
}

impl TickClass {
    pub fn is_internal_only(&self) -> bool {
        self.external_channels.is_empty()
    }
}

pub(crate) fn classify(tick: &ClockTick, channels: &ChannelMap) -> Result<TickClass> {
    let mut external_channels = vec![];
    let mut latches_outputs = false;
    for line in &tick.enabled_clock_lines {
        match channels.clock_channel(line)? {
            Some(channel) => external_channels.push(channel),
            None => latches_outputs = true,
        }
    }
    Ok(TickClass {
        external_channels,
        latches_outputs,
    })
}
