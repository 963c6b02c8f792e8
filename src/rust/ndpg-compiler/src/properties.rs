// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use ndpg_units::{Duration, Seconds, seconds, seconds_to_cycles};
use serde::{Deserialize, Serialize};

use crate::device_traits::NDPG_TRAITS;
use crate::{Error, Result};

/// Position of a device in a multi-device run.
///
/// The master starts the run with a software trigger; slaves are armed for a
/// hardware trigger from the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Master,
    Slave,
}

/// Per-shot device configuration stored alongside the program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub role: Role,
    pub trigger_out_length: Duration<Seconds>,
    pub trigger_out_delay: Duration<Seconds>,
    pub trigger_on_powerline: bool,
    pub powerline_trigger_delay: Duration<Seconds>,
    pub max_instructions: usize,
    pub stop_time: Duration<Seconds>,
}

impl Default for DeviceProperties {
    fn default() -> Self {
        DeviceProperties {
            role: Role::Master,
            trigger_out_length: NDPG_TRAITS.clock_resolution,
            trigger_out_delay: seconds(0.0),
            trigger_on_powerline: false,
            powerline_trigger_delay: seconds(0.0),
            max_instructions: NDPG_TRAITS.max_instructions,
            stop_time: seconds(0.0),
        }
    }
}

impl DeviceProperties {
    pub fn validate(&self) -> Result<()> {
        let limits = [
            (
                "trigger_out_length",
                self.trigger_out_length,
                NDPG_TRAITS.max_trigger_out_length.value(),
            ),
            (
                "trigger_out_delay",
                self.trigger_out_delay,
                NDPG_TRAITS.max_trigger_out_delay.value(),
            ),
            (
                "powerline_trigger_delay",
                self.powerline_trigger_delay,
                NDPG_TRAITS.max_powerline_trigger_delay.value(),
            ),
        ];
        for (field, value, max_cycles) in limits {
            let cycles = seconds_to_cycles(value, NDPG_TRAITS.clock_resolution).value();
            if value.value() < 0.0 || cycles > max_cycles {
                return Err(Error::new(format!(
                    "{field} of {value} is outside the range of 0 to {max_cycles} clock cycles"
                )));
            }
        }
        if self.max_instructions > NDPG_TRAITS.max_instructions {
            return Err(Error::new(format!(
                "max_instructions of {} exceeds the device memory of {}",
                self.max_instructions, NDPG_TRAITS.max_instructions
            )));
        }
        Ok(())
    }
}
