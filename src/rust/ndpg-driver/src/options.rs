// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Device option and action messages sent to the Pulse Generator.
//!
//! Every field is optional; `None` leaves the current device setting untouched.
use ndpg_compiler::Address;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Single,
    Continuous,
}

/// When the device starts a run on its hardware trigger input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerAcceptance {
    Never,
    Always,
    /// Only while no run is in progress.
    SingleRun,
    /// The next trigger only.
    Once,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOptions {
    pub final_address: Option<Address>,
    pub run_mode: Option<RunMode>,
    pub accept_hardware_trigger: Option<TriggerAcceptance>,
    /// Clock cycles.
    pub trigger_out_length: Option<u8>,
    /// Clock cycles.
    pub trigger_out_delay: Option<u64>,
    pub notify_on_main_trig_out: Option<bool>,
    pub notify_when_run_finished: Option<bool>,
    pub software_run_enable: Option<bool>,
}

impl DeviceOptions {
    /// Settings written whenever the device is (re)opened for manual use.
    pub fn manual_defaults() -> Self {
        DeviceOptions {
            final_address: None,
            run_mode: Some(RunMode::Single),
            accept_hardware_trigger: Some(TriggerAcceptance::Never),
            trigger_out_length: Some(1),
            trigger_out_delay: Some(0),
            notify_on_main_trig_out: Some(false),
            notify_when_run_finished: Some(true),
            software_run_enable: Some(true),
        }
    }

    pub fn accept_hardware_trigger(acceptance: TriggerAcceptance) -> Self {
        DeviceOptions {
            accept_hardware_trigger: Some(acceptance),
            ..Default::default()
        }
    }

    pub fn software_run_enable(enable: bool) -> Self {
        DeviceOptions {
            software_run_enable: Some(enable),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerlineTriggerOptions {
    pub trigger_on_powerline: Option<bool>,
    /// Clock cycles after the zero crossing.
    pub powerline_trigger_delay: Option<u32>,
}

/// One-shot commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub trigger_now: bool,
    pub disable_after_current_run: bool,
    pub reset_run: bool,
    pub request_state: bool,
    pub request_powerline_state: bool,
    pub request_state_extras: bool,
}

impl Action {
    pub fn trigger_now() -> Self {
        Action {
            trigger_now: true,
            ..Default::default()
        }
    }

    pub fn reset_run() -> Self {
        Action {
            reset_run: true,
            ..Default::default()
        }
    }

    pub fn request_status() -> Self {
        Action {
            request_state: true,
            request_powerline_state: true,
            request_state_extras: true,
            ..Default::default()
        }
    }
}
