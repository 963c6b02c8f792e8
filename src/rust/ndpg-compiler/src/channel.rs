// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Mapping of logical clock lines and digital outputs onto physical channels.
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::timeline::ClockLineId;
use crate::{Error, Result};

pub type ChannelIndex = u8;

/// Value of a single output channel within one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    High,
    Low,
    /// No value specified: keep whatever the live front panel holds.
    #[default]
    Hold,
}

impl ChannelState {
    /// Substitute the front panel value for [`ChannelState::Hold`].
    pub fn resolve(self, front_panel: bool) -> bool {
        match self {
            ChannelState::High => true,
            ChannelState::Low => false,
            ChannelState::Hold => front_panel,
        }
    }

    pub fn is_hold(self) -> bool {
        self == ChannelState::Hold
    }
}

impl From<bool> for ChannelState {
    fn from(value: bool) -> Self {
        if value {
            ChannelState::High
        } else {
            ChannelState::Low
        }
    }
}

/// Physical endpoint of a clock line or an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    /// The latch line of the device's own direct outputs; not a physical channel.
    Internal,
    Channel(ChannelIndex),
}

impl Connection {
    pub const INTERNAL: &'static str = "internal";

    /// Parse a descriptor of the form `"channel n"` or `"internal"`.
    pub fn parse(owner: &str, descriptor: &str, n_channels: u8) -> Result<Self> {
        if descriptor == Self::INTERNAL {
            return Ok(Connection::Internal);
        }
        let malformed = || Error::MalformedConnection {
            output: owner.to_string(),
            connection: descriptor.to_string(),
            n_channels,
        };
        let mut parts = descriptor.split_whitespace();
        let (Some("channel"), Some(index), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };
        let index: ChannelIndex = index.parse().map_err(|_| malformed())?;
        if index >= n_channels {
            return Err(malformed());
        }
        Ok(Connection::Channel(index))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockLineDef {
    pub name: ClockLineId,
    pub connection: String,
}

/// A digital output latched by the internal clock line.
///
/// `raw_output` holds one value per tick that enables the internal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitalOutputDef {
    pub name: String,
    pub connection: String,
    pub raw_output: Vec<bool>,
}

/// Channel assignments for one device, as declared by the experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub clock_lines: Vec<ClockLineDef>,
    #[serde(default)]
    pub outputs: Vec<DigitalOutputDef>,
}

/// Validated view of a [`ChannelConfig`].
#[derive(Debug, Clone)]
pub struct ChannelMap {
    internal_line: Option<ClockLineId>,
    clock_lines: IndexMap<ClockLineId, ChannelIndex>,
    outputs: IndexMap<ChannelIndex, DigitalOutputDef>,
}

impl ChannelMap {
    pub fn new(config: &ChannelConfig, n_channels: u8) -> Result<Self> {
        let mut internal_line: Option<ClockLineId> = None;
        let mut clock_lines: IndexMap<ClockLineId, ChannelIndex> = IndexMap::new();
        for line in &config.clock_lines {
            match Connection::parse(line.name.as_str(), &line.connection, n_channels)? {
                Connection::Internal => {
                    if let Some(existing) = &internal_line {
                        return Err(Error::new(format!(
                            "Clock lines {existing} and {} are both connected to the internal line",
                            line.name
                        )));
                    }
                    internal_line = Some(line.name.clone());
                }
                Connection::Channel(channel) => {
                    if let Some((other, _)) = clock_lines.iter().find(|(_, c)| **c == channel) {
                        return Err(Error::DuplicateChannel {
                            first: other.to_string(),
                            second: line.name.to_string(),
                            channel,
                        });
                    }
                    if clock_lines.insert(line.name.clone(), channel).is_some() {
                        return Err(Error::new(format!(
                            "Clock line {} is declared twice",
                            line.name
                        )));
                    }
                }
            }
        }

        let mut outputs: IndexMap<ChannelIndex, DigitalOutputDef> = IndexMap::new();
        for output in &config.outputs {
            let channel = match Connection::parse(&output.name, &output.connection, n_channels)? {
                Connection::Channel(channel) => channel,
                Connection::Internal => {
                    return Err(Error::MalformedConnection {
                        output: output.name.clone(),
                        connection: output.connection.clone(),
                        n_channels,
                    });
                }
            };
            if clock_lines.values().any(|c| *c == channel) {
                return Err(Error::ChannelIsClock {
                    output: output.name.clone(),
                    channel,
                });
            }
            if let Some(other) = outputs.get(&channel) {
                return Err(Error::DuplicateChannel {
                    first: other.name.clone(),
                    second: output.name.clone(),
                    channel,
                });
            }
            outputs.insert(channel, output.clone());
        }
        if !outputs.is_empty() && internal_line.is_none() {
            return Err(Error::new(
                "Digital outputs are declared but no clock line is connected to the internal line",
            ));
        }

        Ok(ChannelMap {
            internal_line,
            clock_lines,
            outputs,
        })
    }

    pub fn is_internal(&self, line: &ClockLineId) -> bool {
        self.internal_line.as_ref() == Some(line)
    }

    /// Physical channel of an external clock line, `None` for the internal line.
    pub fn clock_channel(&self, line: &ClockLineId) -> Result<Option<ChannelIndex>> {
        if self.is_internal(line) {
            return Ok(None);
        }
        self.clock_lines
            .get(line)
            .copied()
            .map(Some)
            .ok_or_else(|| Error::new(format!("Unknown clock line: {line}")))
    }

    pub fn outputs(&self) -> impl Iterator<Item = (ChannelIndex, &DigitalOutputDef)> {
        self.outputs.iter().map(|(c, o)| (*c, o))
    }
}
