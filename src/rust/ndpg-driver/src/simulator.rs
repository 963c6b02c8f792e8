// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! In-process model of a Pulse Generator.
//!
//! The model only advances when told to through [`SimulatorHandle::advance`],
//! so runs are deterministic. Replies are produced synchronously and never need
//! to be waited for. Powerline synchronization is treated as an immediate zero
//! crossing. A halting instruction that ends a loop halts after its last pass.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use ndpg_compiler::device_traits::NDPG_TRAITS;
use ndpg_compiler::encoding::{INSTRUCTION_RECORD_LEN, decode_instruction};
use ndpg_compiler::{Address, ChannelState, HardwareInstruction};
use ndpg_log::diagnostic;

use crate::messages::{
    BytesDropped, ClockSource, CommsError, DeviceInfo, DeviceState, Message, MessageKind,
    Notification, PowerlineState, StateExtras,
};
use crate::options::{Action, DeviceOptions, PowerlineTriggerOptions, RunMode, TriggerAcceptance};
use crate::transport::{Connector, Transport};
use crate::{Error, Result};

/// 50 Hz mains in clock cycles.
const POWERLINE_PERIOD: u32 = 2_000_000;

#[derive(Debug)]
struct Model {
    info: DeviceInfo,
    program: Vec<HardwareInstruction>,
    outputs: Vec<bool>,
    // Options.
    final_address: Address,
    run_mode: RunMode,
    accept_hardware_trigger: TriggerAcceptance,
    trigger_out_length: u8,
    trigger_out_delay: u64,
    notify_on_main_trig_out: bool,
    notify_when_run_finished: bool,
    software_run_enable: bool,
    trigger_on_powerline: bool,
    powerline_trigger_delay: u32,
    // Run.
    running: bool,
    halted: bool,
    current_address: Address,
    resume_address: Address,
    remaining: u64,
    run_time: u64,
    loop_counters: HashMap<Address, u32>,
    trigger_count: u64,
    software_triggers: usize,
    // Host link.
    queues: HashMap<MessageKind, VecDeque<Message>>,
    answer_state_requests: bool,
    deliver_notifications: bool,
}

impl Model {
    fn new(serial_number: u32) -> Self {
        Model {
            info: DeviceInfo {
                serial_number,
                firmware_version: "1.0.0".to_string(),
                hardware_version: "1.0".to_string(),
                port: format!("sim{serial_number}"),
            },
            program: vec![],
            outputs: vec![false; NDPG_TRAITS.n_channels as usize],
            final_address: 0,
            run_mode: RunMode::Single,
            accept_hardware_trigger: TriggerAcceptance::Never,
            trigger_out_length: 1,
            trigger_out_delay: 0,
            notify_on_main_trig_out: false,
            notify_when_run_finished: false,
            software_run_enable: false,
            trigger_on_powerline: false,
            powerline_trigger_delay: 0,
            running: false,
            halted: false,
            current_address: 0,
            resume_address: 0,
            remaining: 0,
            run_time: 0,
            loop_counters: HashMap::new(),
            trigger_count: 0,
            software_triggers: 0,
            queues: HashMap::new(),
            answer_state_requests: true,
            deliver_notifications: true,
        }
    }

    fn push(&mut self, message: Message) {
        if message.kind() == MessageKind::Notification && !self.deliver_notifications {
            return;
        }
        self.queues.entry(message.kind()).or_default().push_back(message);
    }

    fn state(&self) -> DeviceState {
        DeviceState {
            running: self.running,
            software_run_enable: self.software_run_enable,
            hardware_run_enable: self.accept_hardware_trigger != TriggerAcceptance::Never,
            current_address: self.current_address,
            final_address: self.final_address,
            run_mode: self.run_mode,
            accept_hardware_trigger: self.accept_hardware_trigger,
            clock_source: ClockSource::Internal,
            notify_on_main_trig_out: self.notify_on_main_trig_out,
            notify_when_run_finished: self.notify_when_run_finished,
            channel_state: self.outputs.clone(),
        }
    }

    fn reset_run(&mut self) {
        self.running = false;
        self.halted = false;
        self.current_address = 0;
        self.resume_address = 0;
        self.remaining = 0;
        self.run_time = 0;
        self.loop_counters.clear();
    }

    /// Start a run from address 0, or resume a halted one.
    fn trigger(&mut self) {
        if !self.software_run_enable {
            return;
        }
        self.trigger_count += 1;
        if self.halted {
            self.halted = false;
            self.running = true;
            self.enter(self.resume_address);
        } else if !self.running {
            self.reset_run();
            self.running = true;
            self.enter(0);
        }
    }

    fn hardware_trigger(&mut self) {
        let accepted = match self.accept_hardware_trigger {
            TriggerAcceptance::Never => false,
            TriggerAcceptance::Always => true,
            TriggerAcceptance::SingleRun => !self.running,
            TriggerAcceptance::Once => {
                self.accept_hardware_trigger = TriggerAcceptance::Never;
                true
            }
        };
        if accepted {
            if self.notify_on_main_trig_out {
                self.push(Message::Notification(Notification {
                    address: self.current_address,
                    run_time: self.run_time,
                    address_notify: false,
                    trigger_notify: true,
                    finished_notify: false,
                }));
            }
            self.trigger();
        }
    }

    fn enter(&mut self, address: Address) {
        self.current_address = address;
        let Some(instruction) = self.program.get(address as usize).cloned() else {
            self.running = false;
            self.push(Message::Error(CommsError {
                message: format!("Jump to unprogrammed address {address}"),
            }));
            return;
        };
        diagnostic!("Simulator entered {} at run time {}", address, self.run_time);
        self.remaining = instruction.duration;
        for (output, state) in self.outputs.iter_mut().zip(&instruction.channel_state) {
            *output = state.resolve(*output);
        }
        let finished = address == self.final_address;
        if instruction.notify_computer || (finished && self.notify_when_run_finished) {
            self.push(Message::Notification(Notification {
                address,
                run_time: self.run_time,
                address_notify: instruction.notify_computer,
                trigger_notify: false,
                finished_notify: finished && self.notify_when_run_finished,
            }));
        }
        if finished {
            self.running = false;
        }
    }

    /// Whether the run jumps back to the loop start after `instruction`.
    fn loops_back(&mut self, instruction: &HardwareInstruction) -> bool {
        if !instruction.is_loop_end() {
            return false;
        }
        let remaining = self
            .loop_counters
            .entry(instruction.address)
            .or_insert(instruction.goto_counter);
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            self.loop_counters.remove(&instruction.address);
            false
        }
    }

    fn advance(&mut self, mut cycles: u64) {
        while cycles > 0 {
            if self.halted {
                self.run_time += cycles;
                return;
            }
            if !self.running {
                return;
            }
            let step = cycles.min(self.remaining);
            self.run_time += step;
            self.remaining -= step;
            cycles -= step;
            if self.remaining > 0 {
                continue;
            }
            let Some(instruction) = self.program.get(self.current_address as usize).cloned() else {
                self.running = false;
                return;
            };
            if self.loops_back(&instruction) {
                self.enter(instruction.goto_address);
            } else if instruction.stop_and_wait {
                self.running = false;
                self.halted = true;
                self.resume_address = instruction.address + 1;
            } else {
                self.enter(instruction.address + 1);
            }
        }
    }
}

/// A simulated device implementing [`Transport`].
#[derive(Debug, Clone)]
pub struct SimulatedPulseGenerator {
    model: Arc<Mutex<Model>>,
}

impl SimulatedPulseGenerator {
    pub fn new(serial_number: u32) -> Self {
        SimulatedPulseGenerator {
            model: Arc::new(Mutex::new(Model::new(serial_number))),
        }
    }

    /// Test controls sharing this device's state.
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            model: Arc::clone(&self.model),
        }
    }

    fn model(&self) -> MutexGuard<'_, Model> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for SimulatedPulseGenerator {
    fn write_device_options(&mut self, options: &DeviceOptions) -> Result<()> {
        let mut model = self.model();
        if let Some(v) = options.final_address {
            model.final_address = v;
        }
        if let Some(v) = options.run_mode {
            model.run_mode = v;
        }
        if let Some(v) = options.accept_hardware_trigger {
            model.accept_hardware_trigger = v;
        }
        if let Some(v) = options.trigger_out_length {
            model.trigger_out_length = v;
        }
        if let Some(v) = options.trigger_out_delay {
            model.trigger_out_delay = v;
        }
        if let Some(v) = options.notify_on_main_trig_out {
            model.notify_on_main_trig_out = v;
        }
        if let Some(v) = options.notify_when_run_finished {
            model.notify_when_run_finished = v;
        }
        if let Some(v) = options.software_run_enable {
            model.software_run_enable = v;
        }
        Ok(())
    }

    fn write_powerline_trigger_options(&mut self, options: &PowerlineTriggerOptions) -> Result<()> {
        let mut model = self.model();
        if let Some(v) = options.trigger_on_powerline {
            model.trigger_on_powerline = v;
        }
        if let Some(v) = options.powerline_trigger_delay {
            model.powerline_trigger_delay = v;
        }
        Ok(())
    }

    fn write_action(&mut self, action: &Action) -> Result<()> {
        let mut model = self.model();
        if action.reset_run {
            model.reset_run();
        }
        if action.trigger_now {
            model.software_triggers += 1;
            model.trigger();
        }
        if action.disable_after_current_run {
            model.run_mode = RunMode::Single;
        }
        if action.request_state && model.answer_state_requests {
            let state = model.state();
            model.push(Message::State(state));
        }
        if action.request_powerline_state && model.answer_state_requests {
            let state = PowerlineState {
                trigger_on_powerline: model.trigger_on_powerline,
                powerline_locked: true,
                powerline_period: POWERLINE_PERIOD,
                powerline_trigger_delay: model.powerline_trigger_delay,
            };
            model.push(Message::Powerline(state));
        }
        if action.request_state_extras && model.answer_state_requests {
            let extras = StateExtras {
                run_time: model.run_time,
                trigger_count: model.trigger_count,
            };
            model.push(Message::Extras(extras));
        }
        Ok(())
    }

    fn write_instructions(&mut self, records: &[u8]) -> Result<()> {
        if records.len() % INSTRUCTION_RECORD_LEN != 0 {
            return Err(Error::Transport(format!(
                "Instruction upload of {} bytes is not a whole number of records",
                records.len()
            )));
        }
        let mut model = self.model();
        for record in records.chunks(INSTRUCTION_RECORD_LEN) {
            let instruction = decode_instruction(record, NDPG_TRAITS.n_channels)?;
            let address = instruction.address as usize;
            if address >= NDPG_TRAITS.max_instructions {
                return Err(Error::Device(format!(
                    "Address {address} exceeds the instruction memory"
                )));
            }
            if model.program.len() <= address {
                model.program.resize(
                    address + 1,
                    HardwareInstruction::new(0, 1, vec![ChannelState::Low; NDPG_TRAITS.n_channels as usize]),
                );
            }
            model.program[address] = instruction;
        }
        Ok(())
    }

    fn write_static_state(&mut self, channel_state: &[bool]) -> Result<()> {
        let mut model = self.model();
        if model.running {
            return Ok(());
        }
        for (output, value) in model.outputs.iter_mut().zip(channel_state) {
            *output = *value;
        }
        Ok(())
    }

    fn write_echo(&mut self, _byte: u8) -> Result<()> {
        let mut model = self.model();
        let info = model.info.clone();
        model.push(Message::Echo(info));
        Ok(())
    }

    fn clear(&mut self, kind: MessageKind) {
        self.model().queues.remove(&kind);
    }

    fn recv_timeout(&mut self, kind: MessageKind, _timeout: Duration) -> Option<Message> {
        self.model().queues.get_mut(&kind)?.pop_front()
    }
}

/// Controls of a [`SimulatedPulseGenerator`] standing in for the physical world.
#[derive(Debug, Clone)]
pub struct SimulatorHandle {
    model: Arc<Mutex<Model>>,
}

impl SimulatorHandle {
    fn model(&self) -> MutexGuard<'_, Model> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Let `cycles` clock cycles pass.
    pub fn advance(&self, cycles: u64) {
        self.model().advance(cycles);
    }

    /// Run until the device halts, finishes, or `max_cycles` passed.
    pub fn run_until_idle(&self, max_cycles: u64) {
        let mut model = self.model();
        let mut budget = max_cycles;
        while model.running && budget > 0 {
            let step = model.remaining.clamp(1, budget);
            model.advance(step);
            budget -= step;
        }
    }

    pub fn hardware_trigger(&self) {
        self.model().hardware_trigger();
    }

    /// Stop answering state requests, as when the host misses messages.
    pub fn set_answer_state_requests(&self, answer: bool) {
        self.model().answer_state_requests = answer;
    }

    /// Drop notifications instead of sending them.
    pub fn set_deliver_notifications(&self, deliver: bool) {
        self.model().deliver_notifications = deliver;
    }

    pub fn inject_comms_error(&self, message: &str) {
        self.model().push(Message::Error(CommsError {
            message: message.to_string(),
        }));
    }

    pub fn inject_bytes_dropped(&self, count: u32) {
        self.model()
            .push(Message::BytesDropped(BytesDropped { count }));
    }

    pub fn state(&self) -> DeviceState {
        self.model().state()
    }

    pub fn run_time(&self) -> u64 {
        self.model().run_time
    }

    pub fn outputs(&self) -> Vec<bool> {
        self.model().outputs.clone()
    }

    pub fn program(&self) -> Vec<HardwareInstruction> {
        self.model().program.clone()
    }

    /// Number of software triggers received.
    pub fn software_triggers(&self) -> usize {
        self.model().software_triggers
    }

    pub fn trigger_on_powerline(&self) -> (bool, u32) {
        let model = self.model();
        (model.trigger_on_powerline, model.powerline_trigger_delay)
    }

    pub fn trigger_out(&self) -> (u8, u64) {
        let model = self.model();
        (model.trigger_out_length, model.trigger_out_delay)
    }
}

/// Hands out a single simulated device.
#[derive(Debug, Default)]
pub struct SimulatorConnector {
    devices: Vec<SimulatedPulseGenerator>,
}

impl SimulatorConnector {
    pub fn new(devices: Vec<SimulatedPulseGenerator>) -> Self {
        SimulatorConnector { devices }
    }
}

impl Connector for SimulatorConnector {
    type Link = SimulatedPulseGenerator;

    fn connect(&mut self, serial_number: Option<u32>) -> Result<Self::Link> {
        let position = self
            .devices
            .iter()
            .position(|d| serial_number.is_none_or(|s| d.model().info.serial_number == s));
        match position {
            Some(position) => Ok(self.devices.remove(position)),
            None => Err(Error::Transport(match serial_number {
                Some(serial) => format!("No Pulse Generator with serial number {serial}"),
                None => "No Pulse Generator found".to_string(),
            })),
        }
    }
}
