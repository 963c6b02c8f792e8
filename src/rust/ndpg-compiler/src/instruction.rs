// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

use crate::channel::ChannelState;
use crate::device_traits::NDPG_TRAITS;
use crate::{Error, Result};

pub type Address = u16;

/// Duration of the terminal instruction, the largest the device accepts.
pub const MAX_DURATION: u64 = NDPG_TRAITS.max_duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInstruction {
    pub address: Address,
    /// Clock cycles, at least one.
    pub duration: u64,
    pub channel_state: Vec<ChannelState>,
    pub goto_address: Address,
    /// Number of extra passes through the loop ending here; 0 means no loop.
    pub goto_counter: u32,
    pub stop_and_wait: bool,
    pub hardware_trig_out: bool,
    pub notify_computer: bool,
    pub powerline_sync: bool,
}

impl HardwareInstruction {
    pub fn new(address: Address, duration: u64, channel_state: Vec<ChannelState>) -> Self {
        HardwareInstruction {
            address,
            duration,
            channel_state,
            goto_address: 0,
            goto_counter: 0,
            stop_and_wait: false,
            hardware_trig_out: false,
            notify_computer: false,
            powerline_sync: false,
        }
    }

    pub fn is_loop_end(&self) -> bool {
        self.goto_counter > 0
    }
}

/// The instruction table of one shot, terminated by the sentinel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PulseProgram {
    instructions: Vec<HardwareInstruction>,
}

impl PulseProgram {
    pub fn new(instructions: Vec<HardwareInstruction>) -> Self {
        PulseProgram { instructions }
    }

    pub fn instructions(&self) -> &[HardwareInstruction] {
        &self.instructions
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn get(&self, address: Address) -> Option<&HardwareInstruction> {
        self.instructions.get(address as usize)
    }

    /// Address of the terminal instruction, where an idle device rests after the run.
    pub fn sentinel_address(&self) -> Option<Address> {
        self.instructions.last().map(|i| i.address)
    }

    /// Channel state the outputs are left in once the run completed.
    pub fn final_channel_state(&self) -> Option<&[ChannelState]> {
        self.instructions.last().map(|i| i.channel_state.as_slice())
    }

    /// Check the structural invariants the device relies on.
    pub fn validate(&self, max_instructions: usize, n_channels: u8) -> Result<()> {
        if self.instructions.len() > max_instructions {
            return Err(Error::TooManyInstructions {
                required: self.instructions.len(),
                limit: max_instructions,
            });
        }
        let Some(sentinel) = self.instructions.last() else {
            return Err(Error::new("Program has no terminal instruction"));
        };
        if sentinel.duration != MAX_DURATION || !sentinel.notify_computer {
            return Err(Error::new(
                "Last instruction must have maximal duration and notify the computer",
            ));
        }
        for (index, instruction) in self.instructions.iter().enumerate() {
            if instruction.address as usize != index {
                return Err(Error::new(format!(
                    "Instruction at position {index} has address {}",
                    instruction.address
                )));
            }
            if instruction.duration == 0 || instruction.duration > MAX_DURATION {
                return Err(Error::new(format!(
                    "Instruction {index} has duration {} outside 1..={MAX_DURATION}",
                    instruction.duration
                )));
            }
            if instruction.channel_state.len() != n_channels as usize {
                return Err(Error::new(format!(
                    "Instruction {index} has {} channels, expected {n_channels}",
                    instruction.channel_state.len()
                )));
            }
            if index + 1 != self.instructions.len()
                && instruction.duration == MAX_DURATION
                && instruction.notify_computer
            {
                return Err(Error::new(format!(
                    "Instruction {index} looks like a terminal instruction but is not the last one"
                )));
            }
            if instruction.goto_address as usize >= self.instructions.len() {
                return Err(Error::new(format!(
                    "Instruction {index} jumps to missing address {}",
                    instruction.goto_address
                )));
            }
        }
        if self.instructions[0].powerline_sync {
            return Err(Error::new(
                "The first instruction cannot wait for powerline synchronization",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentinel(address: Address) -> HardwareInstruction {
        let mut instr = HardwareInstruction::new(address, MAX_DURATION, vec![ChannelState::Hold; 24]);
        instr.notify_computer = true;
        instr
    }

    #[test]
    fn test_valid_program() {
        let program = PulseProgram::new(vec![
            HardwareInstruction::new(0, 10, vec![ChannelState::High; 24]),
            sentinel(1),
        ]);
        program.validate(8192, 24).unwrap();
        assert_eq!(program.sentinel_address(), Some(1));
        assert_eq!(program.final_channel_state().unwrap()[0], ChannelState::Hold);
    }

    #[test]
    fn test_rejects_powerline_sync_at_start() {
        let mut first = HardwareInstruction::new(0, 10, vec![ChannelState::Low; 24]);
        first.powerline_sync = true;
        let program = PulseProgram::new(vec![first, sentinel(1)]);
        assert!(program.validate(8192, 24).is_err());
    }

    #[test]
    fn test_rejects_overflow() {
        let program = PulseProgram::new(vec![
            HardwareInstruction::new(0, 10, vec![ChannelState::Low; 24]),
            sentinel(1),
        ]);
        assert!(matches!(
            program.validate(1, 24),
            Err(Error::TooManyInstructions {
                required: 2,
                limit: 1
            })
        ));
    }

    #[test]
    fn test_rejects_second_sentinel() {
        let program = PulseProgram::new(vec![
            HardwareInstruction::new(0, 10, vec![ChannelState::Low; 24]),
            sentinel(1),
            sentinel(2),
        ]);
        assert!(program.validate(8192, 24).is_err());

        // A long instruction that stays silent is fine.
        let program = PulseProgram::new(vec![
            HardwareInstruction::new(0, MAX_DURATION, vec![ChannelState::Low; 24]),
            sentinel(1),
        ]);
        program.validate(8192, 24).unwrap();
    }

    #[test]
    fn test_rejects_missing_sentinel() {
        let program = PulseProgram::new(vec![HardwareInstruction::new(
            0,
            10,
            vec![ChannelState::Low; 24],
        )]);
        assert!(program.validate(8192, 24).is_err());
        assert!(PulseProgram::default().validate(8192, 24).is_err());
    }
}
