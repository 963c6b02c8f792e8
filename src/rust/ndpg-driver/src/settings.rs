// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Module for defining settings for the device session.
use std::path::PathBuf;
use std::time::Duration;

use ndpg_compiler::device_traits::NDPG_TRAITS;
use ndpg_units::Seconds;

#[derive(Debug, Clone)]
pub struct DriverSettings {
    /// Bound on each status query of a poll cycle.
    pub state_timeout: Duration,
    pub echo_timeout: Duration,
    pub idle_poll_interval: Duration,
    pub run_poll_interval: Duration,
    pub discovery_lock_path: PathBuf,
    pub discovery_lock_timeout: Duration,
    pub manual_transition_attempts: usize,
    pub manual_transition_interval: Duration,
    pub clock_resolution: ndpg_units::Duration<Seconds>,
}

impl Default for DriverSettings {
    fn default() -> Self {
        DriverSettings {
            state_timeout: Duration::from_millis(100),
            echo_timeout: Duration::from_secs(1),
            idle_poll_interval: Duration::from_millis(2000),
            run_poll_interval: Duration::from_millis(100),
            discovery_lock_path: std::env::temp_dir().join("ndpg-discovery.lock"),
            discovery_lock_timeout: Duration::from_secs(10),
            manual_transition_attempts: 5,
            manual_transition_interval: Duration::from_millis(100),
            clock_resolution: NDPG_TRAITS.clock_resolution,
        }
    }
}

impl DriverSettings {
    pub fn with_discovery_lock_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.discovery_lock_path = path.into();
        self
    }

    pub fn with_state_timeout(mut self, timeout: Duration) -> Self {
        self.state_timeout = timeout;
        self
    }

    pub fn with_manual_transition(mut self, attempts: usize, interval: Duration) -> Self {
        self.manual_transition_attempts = attempts;
        self.manual_transition_interval = interval;
        self
    }

    pub fn with_poll_intervals(mut self, idle: Duration, run: Duration) -> Self {
        self.idle_poll_interval = idle;
        self.run_poll_interval = run;
        self
    }
}
