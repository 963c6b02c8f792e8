// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Persisted representation of one compiled shot.
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::channel::ChannelState;
use crate::compile::CompiledShot;
use crate::device_traits::NDPG_TRAITS;
use crate::instruction::PulseProgram;
use crate::properties::DeviceProperties;
use crate::waits::WaitTable;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShotFile {
    pub properties: DeviceProperties,
    pub program: PulseProgram,
    #[serde(default)]
    pub waits: WaitTable,
    pub final_values: Vec<ChannelState>,
}

impl ShotFile {
    pub fn new(mut properties: DeviceProperties, shot: CompiledShot) -> Self {
        properties.stop_time = shot.stop_time;
        ShotFile {
            properties,
            program: shot.program,
            waits: shot.waits,
            final_values: shot.final_values,
        }
    }

    pub fn to_writer<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self).map_err(anyhow::Error::from)?;
        Ok(())
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let shot: ShotFile = serde_json::from_reader(reader).map_err(anyhow::Error::from)?;
        shot.properties.validate()?;
        shot.program
            .validate(shot.properties.max_instructions, NDPG_TRAITS.n_channels)?;
        if shot.final_values.len() != NDPG_TRAITS.n_channels as usize {
            return Err(Error::new(format!(
                "Shot has {} final values, expected {}",
                shot.final_values.len(),
                NDPG_TRAITS.n_channels
            )));
        }
        Ok(shot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelConfig, ClockLineDef};
    use crate::compile::compile_shot;
    use crate::settings::CompilerSettings;
    use crate::timeline::{ClockLineId, ClockTick, PseudoclockEntry};
    use crate::waits::WaitRecord;
    use crate::properties::Role;
    use ndpg_units::seconds;

    #[test]
    fn test_json_round_trip() {
        let config = ChannelConfig {
            clock_lines: vec![ClockLineDef {
                name: ClockLineId::new("ext"),
                connection: "channel 1".to_string(),
            }],
            outputs: vec![],
        };
        let timeline = vec![
            PseudoclockEntry::Tick(ClockTick {
                step: seconds(1e-6),
                reps: 5,
                enabled_clock_lines: [ClockLineId::new("ext")].into_iter().collect(),
            }),
            PseudoclockEntry::Wait,
            PseudoclockEntry::Tick(ClockTick {
                step: seconds(1e-6),
                reps: 1,
                enabled_clock_lines: [ClockLineId::new("ext")].into_iter().collect(),
            }),
        ];
        let waits =
            WaitTable::new(vec![WaitRecord::new("trigger", seconds(5e-6), seconds(0.5))]).unwrap();
        let compiled =
            compile_shot(&timeline, &config, waits, &CompilerSettings::default()).unwrap();
        let properties = DeviceProperties {
            role: Role::Slave,
            ..Default::default()
        };
        let shot = ShotFile::new(properties, compiled);
        assert!((shot.properties.stop_time.value() - 6e-6).abs() < 1e-15);

        let mut buffer = vec![];
        shot.to_writer(&mut buffer).unwrap();
        let loaded = ShotFile::from_reader(buffer.as_slice()).unwrap();
        assert_eq!(loaded, shot);
    }

    #[test]
    fn test_rejects_wrong_channel_count() {
        let sentinel = serde_json::json!({
            "address": 0, "duration": (1u64 << 48) - 1, "channel_state": vec!["low"; 280],
            "goto_address": 0, "goto_counter": 0, "stop_and_wait": false,
            "hardware_trig_out": false, "notify_computer": true, "powerline_sync": false
        });
        let json = serde_json::json!({
            "properties": DeviceProperties::default(),
            "program": [sentinel],
            "final_values": vec!["low"; 280],
        });
        assert!(ShotFile::from_reader(json.to_string().as_bytes()).is_err());
    }

    #[test]
    fn test_rejects_broken_program() {
        let json = r#"{"properties": {"role": "master", "trigger_out_length": 1e-8,
            "trigger_out_delay": 0.0, "trigger_on_powerline": false,
            "powerline_trigger_delay": 0.0, "max_instructions": 8192, "stop_time": 0.0},
            "program": [], "final_values": []}"#;
        assert!(ShotFile::from_reader(json.as_bytes()).is_err());
    }
}
