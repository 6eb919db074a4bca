//! Editing and compilation backend for timed experiment sequences.
//!
//! An [`Experiment`] holds [`Device`]s (one output task each), which hold [`Channel`]s, which
//! hold timed [`Instruction`]s. Compiling the experiment turns every channel into a gap-free
//! instruction table that can be sampled chunk by chunk for streaming, and every digital port
//! into a [`TransitionTable`] built by the [`digital`] waveform compiler.

pub mod channel;
pub mod device;
pub mod digital;
pub mod error;
pub mod experiment;
pub mod instruction;
pub mod utils;
#[cfg(feature = "python")]
pub mod python;

pub use channel::*;
pub use device::*;
pub use digital::*;
pub use error::*;
pub use experiment::*;
pub use instruction::*;
pub use utils::*;

pub use indexmap::IndexMap;
