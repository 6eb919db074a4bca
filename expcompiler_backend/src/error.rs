//! Error type shared by every editing and compilation step.
//!
//! All user-facing validation (unknown names, overlapping instructions, stop times that clip
//! instructions, ...) is reported through [`CompileError`] so that callers, including the python
//! bindings, can surface a readable message instead of aborting the process.

use thiserror::Error;

use crate::channel::TaskType;

/// Convenience alias for results of editing and compilation.
pub type CompileResult<T> = std::result::Result<T, CompileError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Expected instr type {instr_type} to contain key {key}")]
    MissingArg { instr_type: String, key: &'static str },

    #[error("Invalid argument for {instr_type} instruction: {reason}")]
    InvalidArg { instr_type: String, reason: String },

    #[error("Instruction {instr} end_pos {end_pos} should be strictly greater than start_pos {start_pos}")]
    EmptyInterval {
        instr: String,
        start_pos: usize,
        end_pos: usize,
    },

    #[error("Invalid time {0} [s]: times and durations must be finite and non-negative")]
    InvalidTime(f64),

    #[error("Channel {chan}: instruction {new} overlaps with instruction {existing}")]
    Overlap {
        chan: String,
        new: String,
        existing: String,
    },

    #[error("Physical device {name} not found. Registered devices are {registered:?}")]
    NoDevice { name: String, registered: Vec<String> },

    #[error("Device {dev}: sample rate must be positive and finite, received {samp_rate}")]
    InvalidSampRate { dev: String, samp_rate: f64 },

    #[error("Device {0} already registered")]
    DuplicateDevice(String),

    #[error("Channel name {chan} not found in device {dev}. Registered channels are: {registered:?}")]
    NoChannel {
        dev: String,
        chan: String,
        registered: Vec<String>,
    },

    #[error("Channel {chan} already registered on device {dev}")]
    DuplicateChannel { dev: String, chan: String },

    #[error("Expecting {task_type} channels to be of format '{expected}' yet received channel name {name}")]
    ChannelName {
        task_type: TaskType,
        name: String,
        expected: &'static str,
    },

    #[error("Device {dev} is {actual} but the operation requires {expected}")]
    TaskTypeMismatch {
        dev: String,
        actual: TaskType,
        expected: TaskType,
    },

    #[error("Digital channel {chan} only accepts constant 0 or 1, received {value}")]
    DigitalValue { chan: String, value: String },

    #[error("{name}: stop position {stop_pos} is below the last instruction end position {last_end}")]
    StopBeforeEnd {
        name: String,
        stop_pos: usize,
        last_end: usize,
    },

    #[error("Requested {what} at t = {time} [s] but some channels have instructions spanning until {last_end} [s]")]
    BeforeLastInstr {
        what: &'static str,
        time: f64,
        last_end: f64,
    },

    #[error("{0} is not compiled")]
    NotCompiled(String),

    #[error("{name}: invalid sample interval {start_pos}-{end_pos}")]
    InvalidInterval {
        name: String,
        start_pos: usize,
        end_pos: usize,
    },

    #[error("{name}: requested interval ends at {end_pos} while compiled signal ends at {stop_pos}")]
    OutOfRange {
        name: String,
        end_pos: usize,
        stop_pos: usize,
    },

    #[error("Device {dev}: there is no channel with streamable={streamable}, editable={editable}")]
    NoChannels {
        dev: String,
        streamable: bool,
        editable: bool,
    },

    #[error("Channels of device {dev} have unequal compiled lengths: {lengths:?}")]
    UnequalLengths {
        dev: String,
        lengths: Vec<(String, usize)>,
    },

    #[error("Digital line {line} is out of range for a sequence with {nlines} lines")]
    LineOutOfRange { line: usize, nlines: usize },

    #[error("Digital sequence has {nlines} lines, more than the {max} a port word can hold")]
    TooManyLines { nlines: usize, max: usize },

    #[error("Digital assignment at position {pos} is at or beyond stop position {stop_pos}")]
    AssignmentAfterStop { pos: usize, stop_pos: usize },

    #[error("Expected a state vector of length {expected}, received {actual}")]
    StateLength { expected: usize, actual: usize },

    #[error("Trigger configuration error: {0}")]
    TrigConfig(String),
}
