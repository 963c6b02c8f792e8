// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Input format of `ndpg compile`.
use std::io::Read;

use anyhow::Context;
use ndpg_compiler::{
    ChannelConfig, CompilerSettings, DeviceProperties, PseudoclockEntry, PulseWidth, ShotFile,
    WaitRecord, WaitTable, compile_shot,
};
use ndpg_log::warn;
use serde::Deserialize;

/// Everything the upstream timeline generator hands over for one device and shot.
#[derive(Debug, Deserialize)]
pub struct ShotDescription {
    pub channels: ChannelConfig,
    pub timeline: Vec<PseudoclockEntry>,
    #[serde(default)]
    pub waits: Vec<WaitRecord>,
    #[serde(default)]
    pub pulse_width: PulseWidth,
    #[serde(default)]
    pub properties: Option<DeviceProperties>,
}

impl ShotDescription {
    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        serde_json::from_reader(reader).context("Invalid shot description")
    }

    pub fn compile(self, max_instructions: Option<usize>) -> anyhow::Result<ShotFile> {
        let properties = self.properties.unwrap_or_default();
        let mut settings = CompilerSettings::default()
            .with_pulse_width(self.pulse_width)
            .with_max_instructions(max_instructions.unwrap_or(properties.max_instructions));
        for change in settings.sanitize()? {
            warn!(
                "{} changed from {} to {}: {}",
                change.field,
                change.original,
                change.sanitized,
                change.reason
            );
        }
        let waits = WaitTable::new(self.waits)?;
        let compiled = compile_shot(&self.timeline, &self.channels, waits, &settings)?;
        Ok(ShotFile::new(properties, compiled))
    }
}
