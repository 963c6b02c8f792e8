// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use ndpg_units::{Duration, Seconds};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A logical wait of the experiment, and what was observed when it ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitRecord {
    pub label: String,
    pub nominal_time: Duration<Seconds>,
    pub timeout: Duration<Seconds>,
    /// Resume synchronized to the next mains zero crossing.
    #[serde(default)]
    pub powerline_sync: bool,
    #[serde(default)]
    pub measured_duration: Option<Duration<Seconds>>,
    #[serde(default)]
    pub timed_out: bool,
}

impl WaitRecord {
    pub fn new(label: impl Into<String>, nominal_time: Duration<Seconds>, timeout: Duration<Seconds>) -> Self {
        WaitRecord {
            label: label.into(),
            nominal_time,
            timeout,
            powerline_sync: false,
            measured_duration: None,
            timed_out: false,
        }
    }

    pub fn with_powerline_sync(mut self, powerline_sync: bool) -> Self {
        self.powerline_sync = powerline_sync;
        self
    }
}

/// Waits in time order. The position of a record is its sequence index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<WaitRecord>", into = "Vec<WaitRecord>")]
pub struct WaitTable {
    records: Vec<WaitRecord>,
}

impl WaitTable {
    pub fn new(records: Vec<WaitRecord>) -> Result<Self> {
        if let Some(pair) = records
            .windows(2)
            .find(|pair| pair[1].nominal_time < pair[0].nominal_time)
        {
            return Err(Error::new(format!(
                "Wait '{}' at {} comes before the preceding wait '{}' at {}",
                pair[1].label, pair[1].nominal_time, pair[0].label, pair[0].nominal_time
            )));
        }
        Ok(WaitTable { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&WaitRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[WaitRecord] {
        &self.records
    }

    pub fn record_measurement(&mut self, index: usize, measured: Duration<Seconds>) -> Result<()> {
        let record = self
            .records
            .get_mut(index)
            .ok_or_else(|| Error::new(format!("No wait with sequence index {index}")))?;
        record.measured_duration = Some(measured);
        Ok(())
    }

    pub fn mark_timed_out(&mut self, index: usize) -> Result<()> {
        let record = self
            .records
            .get_mut(index)
            .ok_or_else(|| Error::new(format!("No wait with sequence index {index}")))?;
        record.timed_out = true;
        Ok(())
    }

    /// Forget the results of a previous run.
    pub fn clear_measurements(&mut self) {
        for record in &mut self.records {
            record.measured_duration = None;
            record.timed_out = false;
        }
    }
}

impl TryFrom<Vec<WaitRecord>> for WaitTable {
    type Error = Error;

    fn try_from(records: Vec<WaitRecord>) -> Result<Self> {
        WaitTable::new(records)
    }
}

impl From<WaitTable> for Vec<WaitRecord> {
    fn from(table: WaitTable) -> Self {
        table.records
    }
}
