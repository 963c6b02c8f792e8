// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use ndpg_units::{ClockCycles, Duration, Seconds, clock_cycles, seconds};

/// Fixed hardware characteristics of the pulse generator.
///
/// NOTE: Values follow the device firmware documentation. Ensure that the
///     values do match when a new firmware revision changes the limits.
pub struct DeviceTraits {
    pub clock_resolution: Duration<Seconds>,
    pub n_channels: u8,
    pub max_instructions: usize,
    pub max_duration: u64,
    pub max_goto_counter: u64,
    pub max_trigger_out_length: ClockCycles,
    pub max_trigger_out_delay: ClockCycles,
    pub max_powerline_trigger_delay: ClockCycles,
}

pub const NDPG_TRAITS: DeviceTraits = DeviceTraits {
    clock_resolution: seconds(10e-9),
    n_channels: 24,
    max_instructions: 8192,
    max_duration: (1 << 48) - 1,
    max_goto_counter: u32::MAX as u64,
    max_trigger_out_length: clock_cycles(255),
    max_trigger_out_delay: clock_cycles((1 << 56) - 1),
    max_powerline_trigger_delay: clock_cycles((1 << 22) - 1),
};
