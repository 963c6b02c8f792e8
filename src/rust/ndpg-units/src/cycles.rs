// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt::{self, Display, Formatter};

use crate::duration::{Duration, Seconds, seconds};

/// One period of the device's sequencer clock.
///
/// Every instruction duration, trigger timing and run-time counter on the
/// device is an integer number of these.
#[derive(Debug, Clone, Copy, Default, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub struct ClockCycle;

impl Display for ClockCycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "cycles")
    }
}

/// A duration expressed in clock cycles.
pub type ClockCycles<T = i64> = Duration<ClockCycle, T>;

pub const fn clock_cycles<T>(value: T) -> ClockCycles<T> {
    Duration {
        value,
        unit: ClockCycle,
    }
}

/// Quantize a duration onto the clock grid, rounding to the nearest cycle.
pub fn seconds_to_cycles(duration: Duration<Seconds>, resolution: Duration<Seconds>) -> ClockCycles {
    clock_cycles((duration.value() / resolution.value()).round() as i64)
}

/// Quantize a duration onto the clock grid, rounding up to the next whole cycle.
///
/// A relative tolerance keeps exact multiples (up to float noise) from being pushed up a cycle.
pub fn seconds_to_cycles_ceil(
    duration: Duration<Seconds>,
    resolution: Duration<Seconds>,
) -> ClockCycles {
    let ratio = duration.value() / resolution.value();
    let nearest = ratio.round();
    if (ratio - nearest).abs() < 1e-9 {
        clock_cycles(nearest as i64)
    } else {
        clock_cycles(ratio.ceil() as i64)
    }
}

pub fn cycles_to_seconds(cycles: ClockCycles, resolution: Duration<Seconds>) -> Duration<Seconds> {
    seconds(cycles.value() as f64 * resolution.value())
}
