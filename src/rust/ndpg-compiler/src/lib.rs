// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Compiler from an abstract pseudoclock timeline to the instruction table of
//! the pulse generator.

pub mod channel;
pub mod compile;
pub mod device_traits;
pub mod encoding;
pub mod instruction;
pub mod properties;
pub mod settings;
pub mod shot;
pub mod timeline;
pub mod trace;
pub mod waits;

pub use channel::{ChannelConfig, ChannelState, ClockLineDef, DigitalOutputDef};
pub use compile::{CompiledShot, compile_shot};
pub use instruction::{Address, HardwareInstruction, PulseProgram};
pub use properties::{DeviceProperties, Role};
pub use settings::{CompilerSettings, PulseWidth};
pub use shot::ShotFile;
pub use timeline::{ClockLineId, ClockTick, PseudoclockEntry};
pub use waits::{WaitRecord, WaitTable};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(
        "Program needs more than {limit} instructions (reached {required}); the device cannot store it"
    )]
    TooManyInstructions { required: usize, limit: usize },
    #[error(
        "{output} has invalid connection string: '{connection}'. Format must be 'channel n' with n an integer less than {n_channels}"
    )]
    MalformedConnection {
        output: String,
        connection: String,
        n_channels: u8,
    },
    #[error(
        "{output} is set as connected to channel {channel}. This channel is already in use as one of the clock channels"
    )]
    ChannelIsClock { output: String, channel: u8 },
    #[error("{first} and {second} are both set as connected to channel {channel}")]
    DuplicateChannel {
        first: String,
        second: String,
        channel: u8,
    },
    #[error("WAIT found in a timeline without any clock ticks; there is nothing to resume into")]
    WaitWithoutContent,
    #[error("Two consecutive WAIT markers at timeline entry {entry}; a wait must follow a clock tick")]
    ConsecutiveWaits { entry: usize },
    #[error("Timeline contains {markers} WAIT markers but the wait table has {records} entries")]
    WaitTableMismatch { markers: usize, records: usize },
    #[error("Instruction duration of {cycles} cycles is out of range (1..={max}) at timeline entry {entry}")]
    DurationOutOfRange { cycles: i64, max: u64, entry: usize },
    #[error("Repeat count {reps} at timeline entry {entry} exceeds the goto counter range")]
    RepsOutOfRange { reps: u64, entry: usize },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    pub fn new<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        Error::Anyhow(anyhow::anyhow!(msg.to_string()))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
