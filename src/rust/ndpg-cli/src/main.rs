// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Command line front end of the pulse generator compiler and driver.
//!
//! ```bash
//! # Compile a timeline description into a shot file
//! ndpg compile shot.json shot.ndpg.json
//!
//! # Print the instruction table, optionally with the played segments
//! ndpg show shot.ndpg.json --trace
//!
//! # Run a shot on the simulated device
//! ndpg simulate shot.ndpg.json --wait-cycles 500
//! ```
mod description;
mod simulate;

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use ndpg_compiler::ShotFile;
use ndpg_compiler::channel::ChannelState;
use ndpg_compiler::device_traits::NDPG_TRAITS;
use ndpg_compiler::trace::expand;
use ndpg_log::info;

use crate::description::ShotDescription;

#[derive(Parser)]
#[command(name = "ndpg")]
#[command(about = "Compile and run pulse generator shots")]
struct Cli {
    /// Trace every instruction and notification at debug level
    #[arg(long, global = true)]
    diagnostics: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a shot description into a shot file
    Compile {
        input: PathBuf,
        output: PathBuf,

        /// Instruction memory to compile for, if smaller than the device's
        #[arg(long)]
        max_instructions: Option<usize>,
    },

    /// Print the instruction table of a shot file
    Show {
        shot: PathBuf,

        /// Also print the segments the device plays
        #[arg(long)]
        trace: bool,

        #[arg(long, default_value_t = 10_000)]
        max_segments: usize,
    },

    /// Run a shot file on the simulated device
    Simulate {
        shot: PathBuf,

        /// Clock cycles each wait stays halted before the external trigger arrives
        #[arg(long, default_value_t = 100)]
        wait_cycles: u64,

        /// Give up after this many clock cycles of run time
        #[arg(long, default_value_t = 1_000_000_000_000)]
        max_cycles: u64,
    },
}

fn read_shot(path: &Path) -> anyhow::Result<ShotFile> {
    let file = File::open(path).with_context(|| format!("Cannot open {}", path.display()))?;
    ShotFile::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid shot file {}", path.display()))
}

fn levels(channel_state: &[ChannelState]) -> String {
    channel_state
        .iter()
        .map(|s| match s {
            ChannelState::High => '1',
            ChannelState::Low => '0',
            ChannelState::Hold => '-',
        })
        .collect()
}

fn show(shot: &ShotFile, trace: bool, max_segments: usize) -> anyhow::Result<()> {
    println!(
        "{} instructions, {} waits, role {:?}, stop time {}",
        shot.program.len(),
        shot.waits.len(),
        shot.properties.role,
        shot.properties.stop_time
    );
    println!("addr  duration         goto  counter     flags  channels");
    for i in shot.program.instructions() {
        let flags: String = [
            (i.stop_and_wait, 'W'),
            (i.hardware_trig_out, 'T'),
            (i.notify_computer, 'N'),
            (i.powerline_sync, 'P'),
        ]
        .iter()
        .map(|(set, c)| if *set { *c } else { '.' })
        .collect();
        println!(
            "{:>4}  {:>15}  {:>4}  {:>7}  {:>8}  {}",
            i.address,
            i.duration,
            i.goto_address,
            i.goto_counter,
            flags,
            levels(&i.channel_state)
        );
    }
    for (index, record) in shot.waits.records().iter().enumerate() {
        println!(
            "wait {index} '{}' at {} (timeout {})",
            record.label, record.nominal_time, record.timeout
        );
    }
    if trace {
        let trace = expand(&shot.program, max_segments)?;
        println!("segment  addr  start        duration  channels");
        for (n, segment) in trace.segments.iter().enumerate() {
            println!(
                "{:>7}  {:>4}  {:>11}  {:>8}  {}{}",
                n,
                segment.address,
                segment.start.value(),
                segment.duration.value(),
                levels(&segment.channel_state),
                if segment.halts { "  halt" } else { "" }
            );
        }
        println!(
            "played length {}",
            trace.duration(NDPG_TRAITS.clock_resolution)
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    ndpg_log::init_logging(cli.diagnostics);

    match cli.command {
        Commands::Compile {
            input,
            output,
            max_instructions,
        } => {
            let file =
                File::open(&input).with_context(|| format!("Cannot open {}", input.display()))?;
            let shot = ShotDescription::from_reader(BufReader::new(file))?
                .compile(max_instructions)?;
            let file = File::create(&output)
                .with_context(|| format!("Cannot create {}", output.display()))?;
            shot.to_writer(BufWriter::new(file))?;
            info!(
                "Wrote {} instructions and {} waits to {}",
                shot.program.len(),
                shot.waits.len(),
                output.display()
            );
        }
        Commands::Show {
            shot,
            trace,
            max_segments,
        } => show(&read_shot(&shot)?, trace, max_segments)?,
        Commands::Simulate {
            shot,
            wait_cycles,
            max_cycles,
        } => {
            let report = simulate::run(&read_shot(&shot)?, wait_cycles, max_cycles)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
