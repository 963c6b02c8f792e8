// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Binary instruction records as written to the device.
//!
//! Each record is 19 bytes, little endian:
//!
//! | bytes  | field                                 |
//! |--------|---------------------------------------|
//! | 0      | message id `0x0F`                     |
//! | 1..3   | address                               |
//! | 3..6   | channel state, bit `n` is channel `n` |
//! | 6..12  | duration in clock cycles (48 bit)     |
//! | 12..14 | goto address                          |
//! | 14..18 | goto counter                          |
//! | 18     | flags                                 |
use crate::channel::ChannelState;
use crate::instruction::{HardwareInstruction, MAX_DURATION, PulseProgram};
use crate::{Error, Result};

pub const INSTRUCTION_MESSAGE_ID: u8 = 0x0F;
pub const INSTRUCTION_RECORD_LEN: usize = 19;
const STATE_BITS: usize = 24;

const FLAG_STOP_AND_WAIT: u8 = 1 << 0;
const FLAG_HARDWARE_TRIG_OUT: u8 = 1 << 1;
const FLAG_NOTIFY_COMPUTER: u8 = 1 << 2;
const FLAG_POWERLINE_SYNC: u8 = 1 << 3;
const KNOWN_FLAGS: u8 =
    FLAG_STOP_AND_WAIT | FLAG_HARDWARE_TRIG_OUT | FLAG_NOTIFY_COMPUTER | FLAG_POWERLINE_SYNC;

/// Replace every [`ChannelState::Hold`] with the current front panel value.
pub fn resolve_hold(program: &PulseProgram, front_panel: &[bool]) -> Result<PulseProgram> {
    let instructions = program
        .instructions()
        .iter()
        .map(|instruction| {
            if instruction.channel_state.len() > front_panel.len() {
                return Err(Error::new(format!(
                    "Front panel has {} channels, instruction {} needs {}",
                    front_panel.len(),
                    instruction.address,
                    instruction.channel_state.len()
                )));
            }
            let mut resolved = instruction.clone();
            for (state, panel) in resolved.channel_state.iter_mut().zip(front_panel) {
                *state = state.resolve(*panel).into();
            }
            Ok(resolved)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(PulseProgram::new(instructions))
}

pub fn encode_instruction(instruction: &HardwareInstruction) -> Result<[u8; INSTRUCTION_RECORD_LEN]> {
    if instruction.channel_state.len() > STATE_BITS {
        return Err(Error::new(format!(
            "Instruction {} has {} channels, the record holds {STATE_BITS}",
            instruction.address,
            instruction.channel_state.len()
        )));
    }
    if instruction.duration > MAX_DURATION {
        return Err(Error::new(format!(
            "Instruction {} duration {} does not fit in 48 bits",
            instruction.address, instruction.duration
        )));
    }
    let mut state: u32 = 0;
    for (channel, value) in instruction.channel_state.iter().enumerate() {
        match value {
            ChannelState::High => state |= 1 << channel,
            ChannelState::Low => {}
            ChannelState::Hold => {
                return Err(Error::new(format!(
                    "Instruction {} channel {channel} is unresolved; resolve HOLD against the front panel before encoding",
                    instruction.address
                )));
            }
        }
    }
    let mut flags = 0;
    if instruction.stop_and_wait {
        flags |= FLAG_STOP_AND_WAIT;
    }
    if instruction.hardware_trig_out {
        flags |= FLAG_HARDWARE_TRIG_OUT;
    }
    if instruction.notify_computer {
        flags |= FLAG_NOTIFY_COMPUTER;
    }
    if instruction.powerline_sync {
        flags |= FLAG_POWERLINE_SYNC;
    }

    let mut record = [0u8; INSTRUCTION_RECORD_LEN];
    record[0] = INSTRUCTION_MESSAGE_ID;
    record[1..3].copy_from_slice(&instruction.address.to_le_bytes());
    record[3..6].copy_from_slice(&state.to_le_bytes()[..3]);
    record[6..12].copy_from_slice(&instruction.duration.to_le_bytes()[..6]);
    record[12..14].copy_from_slice(&instruction.goto_address.to_le_bytes());
    record[14..18].copy_from_slice(&instruction.goto_counter.to_le_bytes());
    record[18] = flags;
    Ok(record)
}

pub fn decode_instruction(bytes: &[u8], n_channels: u8) -> Result<HardwareInstruction> {
    let record: &[u8; INSTRUCTION_RECORD_LEN] = bytes.try_into().map_err(|_| {
        Error::new(format!(
            "Instruction record must be {INSTRUCTION_RECORD_LEN} bytes, got {}",
            bytes.len()
        ))
    })?;
    if record[0] != INSTRUCTION_MESSAGE_ID {
        return Err(Error::new(format!(
            "Unexpected message id {:#04x} in instruction record",
            record[0]
        )));
    }
    if n_channels as usize > STATE_BITS {
        return Err(Error::new(format!(
            "Cannot decode {n_channels} channels from a {STATE_BITS} bit state"
        )));
    }
    let flags = record[18];
    if flags & !KNOWN_FLAGS != 0 {
        return Err(Error::new(format!("Unknown instruction flags {flags:#010b}")));
    }
    let state = u32::from_le_bytes([record[3], record[4], record[5], 0]);
    let mut duration = [0u8; 8];
    duration[..6].copy_from_slice(&record[6..12]);
    Ok(HardwareInstruction {
        address: u16::from_le_bytes([record[1], record[2]]),
        duration: u64::from_le_bytes(duration),
        channel_state: (0..n_channels)
            .map(|channel| ChannelState::from(state & (1 << channel) != 0))
            .collect(),
        goto_address: u16::from_le_bytes([record[12], record[13]]),
        goto_counter: u32::from_le_bytes([record[14], record[15], record[16], record[17]]),
        stop_and_wait: flags & FLAG_STOP_AND_WAIT != 0,
        hardware_trig_out: flags & FLAG_HARDWARE_TRIG_OUT != 0,
        notify_computer: flags & FLAG_NOTIFY_COMPUTER != 0,
        powerline_sync: flags & FLAG_POWERLINE_SYNC != 0,
    })
}

/// Encode a resolved program into one contiguous upload buffer.
pub fn encode_program(program: &PulseProgram) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(program.len() * INSTRUCTION_RECORD_LEN);
    for instruction in program.instructions() {
        buffer.extend_from_slice(&encode_instruction(instruction)?);
    }
    Ok(buffer)
}
