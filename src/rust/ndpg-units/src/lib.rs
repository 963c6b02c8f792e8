// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Typed durations for the pulse generator: seconds on the host side,
//! clock cycles on the device side, and the quantization between them.

pub mod cycles;
pub mod duration;

pub use cycles::{
    ClockCycle, ClockCycles, clock_cycles, cycles_to_seconds, seconds_to_cycles,
    seconds_to_cycles_ceil,
};
pub use duration::{Duration, Seconds, seconds};
