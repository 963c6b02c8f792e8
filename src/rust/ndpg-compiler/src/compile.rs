// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Translation of a pseudoclock timeline into the device instruction table.
//!
//! Every tick becomes either a single instruction (when only the direct outputs
//! change) or a rising and a falling edge instruction, where the falling edge
//! jumps back to the rising edge to repeat the tick. Loops are never unrolled.
//! A WAIT marker halts on the instruction before it; the instruction the run
//! re-enters notifies the computer so the wait length can be measured. Neither
//! of the two may be repeated by a loop, so a 1 cycle marker instruction is
//! emitted in place of a looping halt or resume instruction.
use ndpg_log::{debug, diagnostic};
use ndpg_units::{Duration, Seconds, seconds, seconds_to_cycles, seconds_to_cycles_ceil};

use crate::channel::{ChannelConfig, ChannelMap, ChannelState};
use crate::device_traits::NDPG_TRAITS;
use crate::instruction::{Address, HardwareInstruction, MAX_DURATION, PulseProgram};
use crate::settings::{CompilerSettings, PulseWidth};
use crate::timeline::{PseudoclockEntry, classify};
use crate::waits::WaitTable;
use crate::{Error, Result};

/// Output of [`compile_shot`].
#[derive(Debug, Clone)]
pub struct CompiledShot {
    pub program: PulseProgram,
    pub waits: WaitTable,
    /// Channel values after the run, as left by the terminal instruction.
    pub final_values: Vec<ChannelState>,
    /// Nominal length of the timeline, waits excluded.
    pub stop_time: Duration<Seconds>,
}

struct ProgramBuilder {
    instructions: Vec<HardwareInstruction>,
    channel_state: Vec<ChannelState>,
    max_instructions: usize,
    resume_pending: bool,
}

impl ProgramBuilder {
    fn new(n_channels: u8, max_instructions: usize) -> Self {
        ProgramBuilder {
            instructions: vec![],
            channel_state: vec![ChannelState::Hold; n_channels as usize],
            max_instructions,
            resume_pending: false,
        }
    }

    fn next_address(&self) -> Result<Address> {
        // One slot stays reserved for the terminal instruction.
        if self.instructions.len() + 1 >= self.max_instructions {
            return Err(Error::TooManyInstructions {
                required: self.instructions.len() + 2,
                limit: self.max_instructions,
            });
        }
        Address::try_from(self.instructions.len()).map_err(|_| Error::TooManyInstructions {
            required: self.instructions.len() + 2,
            limit: self.max_instructions,
        })
    }

    fn push(&mut self, duration: u64) -> Result<&mut HardwareInstruction> {
        let address = self.next_address()?;
        let mut instruction =
            HardwareInstruction::new(address, duration, self.channel_state.clone());
        if self.resume_pending {
            instruction.notify_computer = true;
            self.resume_pending = false;
        }
        self.instructions.push(instruction);
        self.instructions
            .last_mut()
            .ok_or_else(|| Error::new("Instruction table unexpectedly empty"))
    }

    fn finish(mut self) -> Result<Vec<HardwareInstruction>> {
        let address = Address::try_from(self.instructions.len()).map_err(|_| {
            Error::TooManyInstructions {
                required: self.instructions.len() + 1,
                limit: self.max_instructions,
            }
        })?;
        let mut sentinel = HardwareInstruction::new(address, MAX_DURATION, self.channel_state);
        sentinel.notify_computer = true;
        self.instructions.push(sentinel);
        Ok(self.instructions)
    }
}

fn quantize(step: Duration<Seconds>, settings: &CompilerSettings, entry: usize) -> Result<u64> {
    let cycles = seconds_to_cycles(step, settings.clock_resolution()).value();
    match u64::try_from(cycles) {
        Ok(c) if (1..=MAX_DURATION).contains(&c) => Ok(c),
        _ => Err(Error::DurationOutOfRange {
            cycles,
            max: MAX_DURATION,
            entry,
        }),
    }
}

fn high_time_cycles(total: u64, settings: &CompilerSettings) -> u64 {
    match settings.pulse_width() {
        PulseWidth::Symmetric => total / 2,
        PulseWidth::Minimum => 1,
        PulseWidth::Fixed(high_time) => {
            seconds_to_cycles_ceil(high_time, settings.clock_resolution())
                .value()
                .max(0) as u64
        }
    }
}

fn goto_counter(reps: u64, entry: usize) -> Result<u32> {
    let counter = reps.saturating_sub(1);
    if counter > NDPG_TRAITS.max_goto_counter {
        return Err(Error::RepsOutOfRange { reps, entry });
    }
    u32::try_from(counter).map_err(|_| Error::RepsOutOfRange { reps, entry })
}

/// Compile one shot's pseudoclock timeline into a [`PulseProgram`].
///
/// `waits` must hold one record per WAIT marker, in timeline order.
pub fn compile_shot(
    timeline: &[PseudoclockEntry],
    config: &ChannelConfig,
    waits: WaitTable,
    settings: &CompilerSettings,
) -> Result<CompiledShot> {
    let markers = timeline.iter().filter(|e| e.is_wait()).count();
    if markers != waits.len() {
        return Err(Error::WaitTableMismatch {
            markers,
            records: waits.len(),
        });
    }
    if markers > 0 && timeline.iter().all(PseudoclockEntry::is_wait) {
        return Err(Error::WaitWithoutContent);
    }

    let channels = ChannelMap::new(config, settings.n_channels())?;
    let mut builder = ProgramBuilder::new(settings.n_channels(), settings.max_instructions());
    let mut raw_output_index: Option<usize> = None;
    let mut wait_index = 0;
    let mut previous_was_wait = false;
    let mut stop_time = 0.0;

    for (entry, item) in timeline.iter().enumerate() {
        let tick = match item {
            PseudoclockEntry::Wait => {
                if previous_was_wait {
                    return Err(Error::ConsecutiveWaits { entry });
                }
                previous_was_wait = true;
                let record = waits.get(wait_index).ok_or(Error::WaitTableMismatch {
                    markers,
                    records: waits.len(),
                })?;
                // Leading wait, or the last instruction repeats.
                if builder
                    .instructions
                    .last()
                    .is_none_or(HardwareInstruction::is_loop_end)
                {
                    builder.push(1)?;
                }
                let halt = builder
                    .instructions
                    .last_mut()
                    .ok_or_else(|| Error::new("No instruction to halt on"))?;
                halt.stop_and_wait = true;
                halt.notify_computer = true;
                builder.resume_pending = true;
                if record.powerline_sync {
                    let sync = builder.push(1)?;
                    if sync.address == 0 {
                        return Err(Error::new(
                            "Powerline synchronization cannot be placed on the first instruction",
                        ));
                    }
                    sync.powerline_sync = true;
                }
                diagnostic!("Wait '{}' halts at entry {}", record.label, entry);
                wait_index += 1;
                continue;
            }
            PseudoclockEntry::Tick(tick) => tick,
        };
        previous_was_wait = false;

        let counter = goto_counter(tick.reps, entry)?;
        if builder.resume_pending && counter > 0 {
            // Holds the levels of the halt for one cycle.
            builder.push(1)?;
        }

        let class = classify(tick, &channels)?;
        if class.latches_outputs {
            raw_output_index = Some(raw_output_index.map_or(0, |i| i + 1));
        }
        if let Some(index) = raw_output_index {
            for (channel, output) in channels.outputs() {
                let value = output.raw_output.get(index).ok_or_else(|| {
                    Error::new(format!(
                        "Output {} has {} values but the internal clock line ticked {} times",
                        output.name,
                        output.raw_output.len(),
                        index + 1
                    ))
                })?;
                builder.channel_state[channel as usize] = (*value).into();
            }
        }
        for channel in &class.external_channels {
            builder.channel_state[*channel as usize] = ChannelState::High;
        }

        let total = quantize(tick.step, settings, entry)?;
        stop_time += tick.step.value() * tick.reps.max(1) as f64;

        if class.is_internal_only() {
            let instruction = builder.push(total)?;
            if counter > 0 {
                instruction.goto_address = instruction.address;
                instruction.goto_counter = counter;
            }
            continue;
        }

        let high = high_time_cycles(total, settings);
        let low = total.saturating_sub(high);
        if high == 0 || low == 0 {
            return Err(Error::DurationOutOfRange {
                cycles: high.min(low) as i64,
                max: MAX_DURATION,
                entry,
            });
        }
        let rising = builder.push(high)?.address;
        for channel in &class.external_channels {
            builder.channel_state[*channel as usize] = ChannelState::Low;
        }
        let falling = builder.push(low)?;
        falling.goto_address = rising;
        falling.goto_counter = counter;
    }

    let instructions = builder.finish()?;
    let program = PulseProgram::new(instructions);
    program.validate(settings.max_instructions(), settings.n_channels())?;
    for instruction in program.instructions() {
        diagnostic!("{:?}", instruction);
    }
    let final_values = program
        .final_channel_state()
        .map(<[ChannelState]>::to_vec)
        .unwrap_or_default();
    debug!(
        "Compiled {} instructions with {} waits",
        program.len(),
        waits.len()
    );
    Ok(CompiledShot {
        program,
        waits,
        final_values,
        stop_time: seconds(stop_time),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ClockLineDef, DigitalOutputDef};
    use crate::timeline::{ClockLineId, ClockTick};
    use crate::waits::WaitRecord;
    use std::collections::BTreeSet;

    fn config() -> ChannelConfig {
        ChannelConfig {
            clock_lines: vec![
                ClockLineDef {
                    name: ClockLineId::new("direct"),
                    connection: "internal".to_string(),
                },
                ClockLineDef {
                    name: ClockLineId::new("ext"),
                    connection: "channel 0".to_string(),
                },
            ],
            outputs: vec![DigitalOutputDef {
                name: "shutter".to_string(),
                connection: "channel 3".to_string(),
                raw_output: vec![true, false, true, false],
            }],
        }
    }

    fn tick(step: f64, reps: u64, lines: &[&str]) -> PseudoclockEntry {
        PseudoclockEntry::Tick(ClockTick {
            step: seconds(step),
            reps,
            enabled_clock_lines: lines
                .iter()
                .map(|l| ClockLineId::new(*l))
                .collect::<BTreeSet<_>>(),
        })
    }

    fn waits(n: usize) -> WaitTable {
        WaitTable::new(
            (0..n)
                .map(|i| WaitRecord::new(format!("wait{i}"), seconds(i as f64 * 1e-3), seconds(1.0)))
                .collect(),
        )
        .unwrap()
    }

    fn compile(timeline: &[PseudoclockEntry], waits: WaitTable) -> Result<CompiledShot> {
        compile_shot(timeline, &config(), waits, &CompilerSettings::default())
    }

    #[test]
    fn test_internal_then_looped_external() {
        let timeline = [tick(100e-9, 1, &["direct"]), tick(200e-9, 3, &["ext"])];
        let shot = compile(&timeline, WaitTable::default()).unwrap();
        let instr = shot.program.instructions();
        assert_eq!(instr.len(), 4);
        assert_eq!(instr[0].duration, 10);
        assert_eq!(instr[1].duration, 10);
        assert_eq!(instr[2].duration, 10);
        assert_eq!(instr[2].goto_address, 1);
        assert_eq!(instr[2].goto_counter, 2);
        assert_eq!(instr[1].channel_state[0], ChannelState::High);
        assert_eq!(instr[2].channel_state[0], ChannelState::Low);
        assert_eq!(instr[3].duration, MAX_DURATION);
        assert!(instr[3].notify_computer);
        assert!((shot.stop_time.value() - 700e-9).abs() < 1e-15);
    }

    #[test]
    fn test_direct_outputs_follow_internal_ticks() {
        let timeline = [
            tick(100e-9, 1, &["ext"]),
            tick(100e-9, 1, &["direct"]),
            tick(100e-9, 1, &["direct", "ext"]),
        ];
        let shot = compile(&timeline, WaitTable::default()).unwrap();
        let instr = shot.program.instructions();
        // Before the first internal tick the outputs hold the front panel value.
        assert_eq!(instr[0].channel_state[3], ChannelState::Hold);
        assert_eq!(instr[2].channel_state[3], ChannelState::High);
        assert_eq!(instr[3].channel_state[3], ChannelState::Low);
        assert_eq!(instr[3].channel_state[0], ChannelState::High);
        assert_eq!(instr[2].channel_state[5], ChannelState::Hold);
        assert_eq!(shot.final_values[3], ChannelState::Low);
        assert_eq!(shot.final_values[0], ChannelState::Low);
    }

    #[test]
    fn test_pulse_width_policies() {
        let timeline = [tick(100e-9, 1, &["ext"])];
        let settings = CompilerSettings::default().with_pulse_width(PulseWidth::Minimum);
        let shot = compile_shot(&timeline, &config(), WaitTable::default(), &settings).unwrap();
        assert_eq!(shot.program.instructions()[0].duration, 1);
        assert_eq!(shot.program.instructions()[1].duration, 9);

        let settings =
            CompilerSettings::default().with_pulse_width(PulseWidth::Fixed(seconds(25e-9)));
        let shot = compile_shot(&timeline, &config(), WaitTable::default(), &settings).unwrap();
        assert_eq!(shot.program.instructions()[0].duration, 3);
        assert_eq!(shot.program.instructions()[1].duration, 7);

        let settings =
            CompilerSettings::default().with_pulse_width(PulseWidth::Fixed(seconds(100e-9)));
        assert!(matches!(
            compile_shot(&timeline, &config(), WaitTable::default(), &settings),
            Err(Error::DurationOutOfRange { .. })
        ));
    }

    #[test]
    fn test_wait_marks_previous_and_resume() {
        let timeline = [
            tick(100e-9, 1, &["direct"]),
            PseudoclockEntry::Wait,
            tick(100e-9, 1, &["direct"]),
        ];
        let shot = compile(&timeline, waits(1)).unwrap();
        let instr = shot.program.instructions();
        assert_eq!(instr.len(), 3);
        assert!(instr[0].stop_and_wait);
        assert!(instr[0].notify_computer);
        assert!(!instr[1].stop_and_wait);
        assert!(instr[1].notify_computer);
    }

    #[test]
    fn test_looped_ticks_around_wait_get_markers() {
        let timeline = [
            tick(100e-9, 1, &["direct"]),
            tick(200e-9, 3, &["ext"]),
            PseudoclockEntry::Wait,
            tick(100e-9, 10_000, &["ext"]),
        ];
        let shot = compile(&timeline, waits(1)).unwrap();
        let instr = shot.program.instructions();
        // direct, rising, falling, halt, resume, rising, falling, sentinel
        assert_eq!(instr.len(), 8);
        assert!(!instr[2].stop_and_wait);
        assert!(!instr[2].notify_computer);
        assert_eq!(instr[3].duration, 1);
        assert!(instr[3].stop_and_wait && instr[3].notify_computer);
        assert!(!instr[3].is_loop_end());
        assert_eq!(instr[3].channel_state[0], ChannelState::Low);
        assert_eq!(instr[4].duration, 1);
        assert!(instr[4].notify_computer && !instr[4].stop_and_wait);
        assert_eq!(instr[4].channel_state[0], ChannelState::Low);
        assert_eq!(instr[6].goto_address, 5);
        assert_eq!(instr[6].goto_counter, 9_999);
        // Nothing that is repeated notifies the computer.
        for i in &instr[..7] {
            let repeated = instr
                .iter()
                .any(|l| l.is_loop_end() && (l.goto_address..=l.address).contains(&i.address));
            assert!(!(repeated && i.notify_computer), "instruction {} notifies in a loop", i.address);
        }
    }

    #[test]
    fn test_self_looping_internal_tick_before_wait() {
        let timeline = [
            tick(100e-9, 2, &["direct"]),
            PseudoclockEntry::Wait,
            tick(100e-9, 1, &["direct"]),
        ];
        let shot = compile(&timeline, waits(1)).unwrap();
        let instr = shot.program.instructions();
        assert_eq!(instr.len(), 4);
        assert!(instr[0].is_loop_end() && !instr[0].stop_and_wait);
        assert!(instr[1].stop_and_wait);
        assert!(instr[2].notify_computer);
    }

    #[test]
    fn test_leading_wait_gets_placeholder() {
        let timeline = [PseudoclockEntry::Wait, tick(100e-9, 1, &["direct"])];
        let shot = compile(&timeline, waits(1)).unwrap();
        let instr = shot.program.instructions();
        assert_eq!(instr.len(), 3);
        assert_eq!(instr[0].duration, 1);
        assert!(instr[0].stop_and_wait);
        assert!(!instr[0].powerline_sync);
        assert!(instr[1].notify_computer);
    }

    #[test]
    fn test_leading_powerline_wait_gets_two_placeholders() {
        let timeline = [PseudoclockEntry::Wait, tick(100e-9, 1, &["direct"])];
        let table = WaitTable::new(vec![
            WaitRecord::new("ac", seconds(0.0), seconds(1.0)).with_powerline_sync(true),
        ])
        .unwrap();
        let shot = compile(&timeline, table).unwrap();
        let instr = shot.program.instructions();
        assert_eq!(instr.len(), 4);
        assert!(instr[0].stop_and_wait);
        assert!(!instr[0].powerline_sync);
        assert!(instr[1].powerline_sync);
        assert!(instr[1].notify_computer);
        assert!(!instr[2].notify_computer);
        assert!(instr.iter().all(|i| i.address != 0 || !i.powerline_sync));
    }

    #[test]
    fn test_wait_errors() {
        assert!(matches!(
            compile(&[PseudoclockEntry::Wait], waits(1)),
            Err(Error::WaitWithoutContent)
        ));
        assert!(matches!(
            compile(
                &[
                    tick(100e-9, 1, &["direct"]),
                    PseudoclockEntry::Wait,
                    PseudoclockEntry::Wait
                ],
                waits(2)
            ),
            Err(Error::ConsecutiveWaits { entry: 2 })
        ));
        assert!(matches!(
            compile(&[tick(100e-9, 1, &["direct"]), PseudoclockEntry::Wait], waits(2)),
            Err(Error::WaitTableMismatch {
                markers: 1,
                records: 2
            })
        ));
    }

    #[test]
    fn test_duration_and_reps_limits() {
        assert!(matches!(
            compile(&[tick(1e-9, 1, &["direct"])], WaitTable::default()),
            Err(Error::DurationOutOfRange { cycles: 0, .. })
        ));
        assert!(matches!(
            compile(&[tick(1e7, 1, &["direct"])], WaitTable::default()),
            Err(Error::DurationOutOfRange { .. })
        ));
        assert!(matches!(
            compile(&[tick(100e-9, 1 << 33, &["ext"])], WaitTable::default()),
            Err(Error::RepsOutOfRange { .. })
        ));
        let reps = NDPG_TRAITS.max_goto_counter + 1;
        let shot = compile(&[tick(100e-9, reps, &["ext"])], WaitTable::default()).unwrap();
        assert_eq!(shot.program.instructions()[1].goto_counter as u64, NDPG_TRAITS.max_goto_counter);
        assert!(matches!(
            compile(&[tick(100e-9, reps + 1, &["ext"])], WaitTable::default()),
            Err(Error::RepsOutOfRange { .. })
        ));
    }

    #[test]
    fn test_instruction_limit() {
        let timeline: Vec<_> = (0..10).map(|_| tick(100e-9, 1, &["ext"])).collect();
        let settings = CompilerSettings::default().with_max_instructions(20);
        assert!(compile_shot(&timeline, &config(), WaitTable::default(), &settings).is_err());
        let settings = CompilerSettings::default().with_max_instructions(21);
        let shot = compile_shot(&timeline, &config(), WaitTable::default(), &settings).unwrap();
        assert_eq!(shot.program.len(), 21);
    }

    #[test]
    fn test_raw_output_too_short() {
        let timeline: Vec<_> = (0..5).map(|_| tick(100e-9, 1, &["direct"])).collect();
        assert!(compile(&timeline, WaitTable::default()).is_err());
    }

    #[test]
    fn test_unknown_clock_line() {
        assert!(compile(&[tick(100e-9, 1, &["other"])], WaitTable::default()).is_err());
    }
}
