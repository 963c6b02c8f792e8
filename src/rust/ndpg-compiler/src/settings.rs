// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Module for defining settings for the instruction compiler.
use ndpg_units::{Duration, Seconds, seconds, seconds_to_cycles_ceil};
use serde::{Deserialize, Serialize};

use crate::device_traits::NDPG_TRAITS;
use crate::{Error, Result};

/// How the high time of an external clock pulse is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind", content = "high_time")]
pub enum PulseWidth {
    /// Half of the tick period, rounded down to whole cycles.
    #[default]
    Symmetric,
    /// A single clock cycle.
    Minimum,
    /// A fixed high time, quantized up to the clock grid.
    Fixed(Duration<Seconds>),
}

#[derive(Debug, Clone)]
pub struct SanitizationChange {
    pub field: &'static str,
    pub original: String,
    pub sanitized: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CompilerSettings {
    pulse_width: PulseWidth,
    clock_resolution: Duration<Seconds>,
    max_instructions: usize,
    n_channels: u8,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        CompilerSettings {
            pulse_width: PulseWidth::Symmetric,
            clock_resolution: NDPG_TRAITS.clock_resolution,
            max_instructions: NDPG_TRAITS.max_instructions,
            n_channels: NDPG_TRAITS.n_channels,
        }
    }
}

impl CompilerSettings {
    pub fn new(
        pulse_width: PulseWidth,
        clock_resolution: Duration<Seconds>,
        max_instructions: usize,
        n_channels: u8,
    ) -> Self {
        CompilerSettings {
            pulse_width,
            clock_resolution,
            max_instructions,
            n_channels,
        }
    }

    pub fn with_pulse_width(mut self, pulse_width: PulseWidth) -> Self {
        self.pulse_width = pulse_width;
        self
    }

    pub fn with_max_instructions(mut self, max_instructions: usize) -> Self {
        self.max_instructions = max_instructions;
        self
    }

    pub fn pulse_width(&self) -> PulseWidth {
        self.pulse_width
    }

    pub fn clock_resolution(&self) -> Duration<Seconds> {
        self.clock_resolution
    }

    pub fn max_instructions(&self) -> usize {
        self.max_instructions
    }

    pub fn n_channels(&self) -> u8 {
        self.n_channels
    }

    /// Clamp the settings to what the device supports.
    ///
    /// Values that cannot be repaired (a non-positive clock resolution) are errors.
    pub fn sanitize(&mut self) -> Result<Vec<SanitizationChange>> {
        let mut changes = vec![];
        let resolution = self.clock_resolution.value();
        if resolution.is_nan() || resolution <= 0.0 {
            return Err(Error::new(format!(
                "Clock resolution must be positive, got {}",
                self.clock_resolution
            )));
        }
        if self.clock_resolution < NDPG_TRAITS.clock_resolution {
            changes.push(SanitizationChange {
                field: "clock_resolution",
                original: self.clock_resolution.to_string(),
                sanitized: NDPG_TRAITS.clock_resolution.to_string(),
                reason: "Below the resolution of the device clock.".to_string(),
            });
            self.clock_resolution = NDPG_TRAITS.clock_resolution;
        }
        if self.max_instructions > NDPG_TRAITS.max_instructions || self.max_instructions < 1 {
            let sanitized = self.max_instructions.clamp(1, NDPG_TRAITS.max_instructions);
            changes.push(SanitizationChange {
                field: "max_instructions",
                original: self.max_instructions.to_string(),
                sanitized: sanitized.to_string(),
                reason: format!(
                    "Must be between 1 and the device memory of {} instructions.",
                    NDPG_TRAITS.max_instructions
                ),
            });
            self.max_instructions = sanitized;
        }
        if self.n_channels > NDPG_TRAITS.n_channels {
            changes.push(SanitizationChange {
                field: "n_channels",
                original: self.n_channels.to_string(),
                sanitized: NDPG_TRAITS.n_channels.to_string(),
                reason: "The device has no more channels.".to_string(),
            });
            self.n_channels = NDPG_TRAITS.n_channels;
        }
        if let PulseWidth::Fixed(high_time) = self.pulse_width {
            let cycles = seconds_to_cycles_ceil(high_time, self.clock_resolution).value();
            let sanitized = seconds(cycles.max(1) as f64 * self.clock_resolution.value());
            if sanitized != high_time {
                changes.push(SanitizationChange {
                    field: "pulse_width",
                    original: high_time.to_string(),
                    sanitized: sanitized.to_string(),
                    reason: "High time rounded up to the clock grid.".to_string(),
                });
                self.pulse_width = PulseWidth::Fixed(sanitized);
            }
        }
        Ok(changes)
    }
}
