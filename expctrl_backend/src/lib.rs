//! Streaming backend for sequences compiled by [`expcompiler_backend`].
//!
//! Compiled devices are streamed chunk by chunk to [`instrument::Instrument`]s, one worker
//! thread per device. Networked instruments speak a length-prefixed JSON protocol
//! ([`codec`], [`protocol`]) served by a [`server::DeviceServer`]. Experiments can be described
//! in TOML ([`config`]), and [`analysis`] turns imaging counts into loading and retention
//! statistics.

pub mod analysis;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod experiment;
pub mod instrument;
pub mod protocol;
pub mod server;
pub mod utils;
pub mod worker_cmd_chan;
#[cfg(feature = "python")]
pub mod python;

pub use crate::error::{CtrlError, CtrlResult};
pub use crate::experiment::Experiment;
