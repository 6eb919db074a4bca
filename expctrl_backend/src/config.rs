//! TOML experiment description.
//!
//! A configuration lists devices with their clock and trigger wiring, the channels of every
//! device, streaming parameters and the instruction sequence:
//!
//! ```toml
//! stop_time = 2.0
//!
//! [stream]
//! bufsize_ms = 50.0
//! nreps = 3
//!
//! [[devices]]
//! name = "PXI1Slot6"
//! kind = "do"
//! samp_rate = 1e6
//! address = "192.168.1.20:6000"
//! trig_line = "PXI1_Trig0"
//! export_trig = true
//! channels = [{ name = "port0/line0" }, { name = "port0/line4", default = 0.0 }]
//!
//! [[sequence]]
//! op = "high"
//! device = "PXI1Slot6"
//! channel = "port0/line0"
//! t = 0.5
//! duration = 1.0
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use expcompiler_backend::*;

use crate::error::{CtrlError, CtrlResult};
use crate::experiment::Experiment;
use crate::instrument::TcpInstrument;

fn default_bufsize_ms() -> f64 {
    50.
}
fn default_nreps() -> usize {
    1
}
fn default_timeout_s() -> f64 {
    5.
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    /// Each chunk travels as one JSON frame of at most [`crate::codec::MAX_FRAME_LEN`] bytes,
    /// about 25 bytes per analog sample, so fast many-channel devices need short buffers.
    #[serde(default = "default_bufsize_ms")]
    pub bufsize_ms: f64,
    #[serde(default = "default_nreps")]
    pub nreps: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bufsize_ms: default_bufsize_ms(),
            nreps: default_nreps(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Ao,
    Do,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// `ao<N>` for analog devices, `port<N>/line<M>` for digital ones.
    pub name: String,
    #[serde(default)]
    pub default: f64,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RefClkSettings {
    pub line: String,
    pub rate: f64,
    #[serde(default)]
    pub export: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: DeviceKind,
    pub samp_rate: f64,
    /// Device server `host:port`. Devices without an address are compiled but not streamed.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,
    #[serde(default)]
    pub samp_clk_src: Option<String>,
    #[serde(default)]
    pub trig_line: Option<String>,
    #[serde(default)]
    pub export_trig: bool,
    #[serde(default)]
    pub ref_clk: Option<RefClkSettings>,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// One instruction of the sequence, keyed by `op`. Fields that no variant knows are rejected.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum SeqOp {
    Const {
        duration: f64,
        value: f64,
    },
    GoConst {
        value: f64,
    },
    Sine {
        duration: f64,
        #[serde(default)]
        keep_val: bool,
        freq: f64,
        amplitude: Option<f64>,
        phase: Option<f64>,
        dc_offset: Option<f64>,
    },
    GoSine {
        freq: f64,
        amplitude: Option<f64>,
        phase: Option<f64>,
        dc_offset: Option<f64>,
    },
    Linramp {
        duration: f64,
        start_val: f64,
        end_val: f64,
        #[serde(default)]
        keep_val: bool,
    },
    Expramp {
        duration: f64,
        start_val: f64,
        end_val: f64,
        #[serde(default)]
        keep_val: bool,
    },
    High {
        duration: f64,
    },
    Low {
        duration: f64,
    },
    GoHigh {},
    GoLow {},
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(try_from = "RawSeqEntry")]
pub struct SeqEntry {
    pub device: String,
    pub channel: String,
    pub t: f64,
    pub op: SeqOp,
}

/// `[[sequence]]` table as written: the target keys plus the instruction keys, which are
/// checked against [`SeqOp`] in a second pass.
#[derive(Deserialize)]
struct RawSeqEntry {
    device: String,
    channel: String,
    t: f64,
    #[serde(flatten)]
    op: toml::Table,
}

impl TryFrom<RawSeqEntry> for SeqEntry {
    type Error = toml::de::Error;

    fn try_from(raw: RawSeqEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            op: toml::Value::Table(raw.op).try_into()?,
            device: raw.device,
            channel: raw.channel,
            t: raw.t,
        })
    }
}

impl SeqEntry {
    /// Adds this instruction to `exp` through the matching [`BaseExperiment`] method.
    pub fn apply<E: BaseExperiment>(&self, exp: &mut E) -> CompileResult<()> {
        let (dev, chan, t) = (self.device.as_str(), self.channel.as_str(), self.t);
        match self.op {
            SeqOp::Const { duration, value } => exp.constant(dev, chan, t, duration, value),
            SeqOp::GoConst { value } => exp.go_constant(dev, chan, t, value),
            SeqOp::Sine {
                duration,
                keep_val,
                freq,
                amplitude,
                phase,
                dc_offset,
            } => exp.sine(dev, chan, t, duration, keep_val, freq, amplitude, phase, dc_offset),
            SeqOp::GoSine {
                freq,
                amplitude,
                phase,
                dc_offset,
            } => exp.go_sine(dev, chan, t, freq, amplitude, phase, dc_offset),
            SeqOp::Linramp {
                duration,
                start_val,
                end_val,
                keep_val,
            } => exp.linramp(dev, chan, t, duration, start_val, end_val, keep_val),
            SeqOp::Expramp {
                duration,
                start_val,
                end_val,
                keep_val,
            } => exp.expramp(dev, chan, t, duration, start_val, end_val, keep_val),
            SeqOp::High { duration } => exp.high(dev, chan, t, duration),
            SeqOp::Low { duration } => exp.low(dev, chan, t, duration),
            SeqOp::GoHigh {} => exp.go_high(dev, chan, t),
            SeqOp::GoLow {} => exp.go_low(dev, chan, t),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Compile stop time; defaults to the end of the last instruction.
    #[serde(default)]
    pub stop_time: Option<f64>,
    /// Add a reset instruction to every channel.
    #[serde(default)]
    pub reset: bool,
    /// Time of the reset instruction; defaults to the end of the last instruction.
    #[serde(default)]
    pub reset_time: Option<f64>,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub sequence: Vec<SeqEntry>,
}

impl ExperimentConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> CtrlResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        info!("Loading experiment configuration {}", path.as_ref().display());
        Self::from_toml_str(&text)
    }

    /// Parses and validates a configuration.
    pub fn from_toml_str(text: &str) -> CtrlResult<Self> {
        let cfg: Self = toml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks what can be checked without building the experiment. Channel names, instruction
    /// overlaps and trigger wiring are checked while building.
    pub fn validate(&self) -> CtrlResult<()> {
        let invalid = |msg: String| Err(CtrlError::Configuration(msg));
        if !(self.stream.bufsize_ms.is_finite() && self.stream.bufsize_ms > 0.) {
            return invalid(format!(
                "stream.bufsize_ms must be positive, got {}",
                self.stream.bufsize_ms
            ));
        }
        if self.stream.nreps == 0 {
            return invalid("stream.nreps must be at least 1".to_string());
        }
        let mut names = HashSet::new();
        for dev in &self.devices {
            if dev.name.is_empty() {
                return invalid("device with an empty name".to_string());
            }
            if !names.insert(dev.name.as_str()) {
                return invalid(format!("device {} is declared twice", dev.name));
            }
            if !(dev.samp_rate.is_finite() && dev.samp_rate > 0.) {
                return invalid(format!(
                    "device {}: samp_rate must be positive, got {}",
                    dev.name, dev.samp_rate
                ));
            }
            if !(dev.timeout_s.is_finite() && dev.timeout_s > 0.) {
                return invalid(format!(
                    "device {}: timeout_s must be positive, got {}",
                    dev.name, dev.timeout_s
                ));
            }
            if dev.export_trig && dev.trig_line.is_none() {
                return invalid(format!(
                    "device {}: export_trig requires trig_line",
                    dev.name
                ));
            }
        }
        let exporters = self.devices.iter().filter(|dev| dev.export_trig).count();
        if exporters > 1 {
            return invalid(format!(
                "{} devices export the start trigger, at most one may",
                exporters
            ));
        }
        if let Some(entry) = self
            .sequence
            .iter()
            .find(|entry| !names.contains(entry.device.as_str()))
        {
            return invalid(format!(
                "sequence refers to undeclared device {}",
                entry.device
            ));
        }
        Ok(())
    }

    /// Builds and compiles the described experiment. No instrument is attached.
    pub fn build_experiment(&self) -> CtrlResult<Experiment> {
        self.validate()?;
        let mut exp = Experiment::new();
        for dev in &self.devices {
            match dev.kind {
                DeviceKind::Ao => exp.add_ao_device(&dev.name, dev.samp_rate)?,
                DeviceKind::Do => exp.add_do_device(&dev.name, dev.samp_rate)?,
            }
            for chan in &dev.channels {
                exp.device_op(&dev.name, |d| d.add_channel(&chan.name, chan.default))?;
            }
            if let Some(src) = &dev.samp_clk_src {
                exp.device_cfg_samp_clk_src(&dev.name, src)?;
            }
            if let Some(line) = &dev.trig_line {
                exp.device_cfg_trig(&dev.name, line, dev.export_trig)?;
            }
            if let Some(ref_clk) = &dev.ref_clk {
                exp.device_cfg_ref_clk(&dev.name, &ref_clk.line, ref_clk.rate, ref_clk.export)?;
            }
        }
        for entry in &self.sequence {
            entry.apply(&mut exp)?;
        }
        if self.reset || self.reset_time.is_some() {
            exp.add_reset_instr(self.reset_time)?;
        }
        exp.compile(self.stop_time)?;
        Ok(exp)
    }

    /// Connects a [`TcpInstrument`] to every device with an address. Returns how many were
    /// attached.
    pub fn connect_instruments(&self, exp: &mut Experiment) -> CtrlResult<usize> {
        let mut nconnected = 0;
        for dev in &self.devices {
            let Some(addr) = &dev.address else {
                continue;
            };
            let timeout = Duration::from_secs_f64(dev.timeout_s);
            let instrument = TcpInstrument::connect(&dev.name, addr.as_str(), timeout)?;
            exp.attach_instrument(&dev.name, Box::new(instrument))?;
            nconnected += 1;
        }
        Ok(nconnected)
    }
}

#[cfg(test)]
mod test {
    use crate::config::*;

    const TWO_DEVICES: &str = r#"
        stop_time = 2.0

        [stream]
        bufsize_ms = 20.0

        [[devices]]
        name = "PXI1Slot3"
        kind = "ao"
        samp_rate = 1e3
        trig_line = "PXI1_Trig0"
        export_trig = true
        ref_clk = { line = "PXI1_Trig7", rate = 1e7, export = true }
        channels = [{ name = "ao0" }]

        [[devices]]
        name = "PXI1Slot6"
        kind = "do"
        samp_rate = 1e4
        samp_clk_src = "PXI1_Trig7"
        trig_line = "PXI1_Trig0"
        channels = [{ name = "port0/line0" }, { name = "port0/line3", default = 1.0 }]

        [[sequence]]
        op = "sine"
        device = "PXI1Slot3"
        channel = "ao0"
        t = 0.0
        duration = 1.0
        freq = 5.0
        amplitude = 2.0

        [[sequence]]
        op = "high"
        device = "PXI1Slot6"
        channel = "port0/line0"
        t = 0.5
        duration = 0.5

        [[sequence]]
        op = "go_low"
        device = "PXI1Slot6"
        channel = "port0/line3"
        t = 1.5
    "#;

    #[test]
    fn parse_and_build() {
        let cfg = ExperimentConfig::from_toml_str(TWO_DEVICES).unwrap();
        assert_eq!(cfg.stream.bufsize_ms, 20.);
        assert_eq!(cfg.stream.nreps, 1);
        assert_eq!(cfg.devices[1].kind, DeviceKind::Do);
        assert_eq!(cfg.devices[1].timeout_s, 5.);
        assert_eq!(cfg.sequence[2].op, SeqOp::GoLow {});
        assert_eq!(cfg.sequence[2].t, 1.5);

        let exp = cfg.build_experiment().unwrap();
        assert_eq!(exp.total_run_time(), 2.);
        let table = exp.device_transition_table("PXI1Slot6", 0).unwrap();
        // line3 starts high by default
        assert_eq!(table.positions(), vec![0, 5_000, 10_000, 15_000]);
        assert_eq!(table.words(), vec![0b1000, 0b1001, 0b1000, 0]);
        assert!(exp.dev("PXI1Slot3").unwrap().is_primary());
    }

    #[test]
    fn validation_errors() {
        let bad = [
            "[stream]\nnreps = 0",
            "[stream]\nbufsize_ms = -1.0",
            "[[devices]]\nname = \"a\"\nkind = \"ao\"\nsamp_rate = 0.0",
            "[[devices]]\nname = \"a\"\nkind = \"ao\"\nsamp_rate = 1.0\n[[devices]]\nname = \"a\"\nkind = \"do\"\nsamp_rate = 1.0",
            "[[devices]]\nname = \"a\"\nkind = \"ao\"\nsamp_rate = 1.0\nexport_trig = true",
            "[[sequence]]\nop = \"go_high\"\ndevice = \"b\"\nchannel = \"port0/line0\"\nt = 0.0",
        ];
        for text in bad {
            match ExperimentConfig::from_toml_str(text) {
                Err(CtrlError::Configuration(_)) => {}
                other => panic!("expected a validation error for {:?}, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            ExperimentConfig::from_toml_str("[[devices]]\nname = \"a\"\nkind = \"xo\"\nsamp_rate = 1.0"),
            Err(CtrlError::Toml(_))
        ));
        assert!(matches!(
            ExperimentConfig::from_toml_str("stop_tiem = 1.0"),
            Err(CtrlError::Toml(_))
        ));
        assert!(matches!(
            ExperimentConfig::from_toml_str(
                "[[sequence]]\nop = \"jump\"\ndevice = \"a\"\nchannel = \"ao0\"\nt = 0.0"
            ),
            Err(CtrlError::Toml(_))
        ));

        // Misspelled optional keys would otherwise fall back to their defaults
        let misspelled = [
            "op = \"sine\"\nduration = 1.0\nfreq = 5.0\namplitdue = 5.0",
            "op = \"linramp\"\nduration = 1.0\nstart_val = 0.0\nend_val = 1.0\nkeepval = true",
            "op = \"go_high\"\nduration = 1.0",
        ];
        for op in misspelled {
            let text = format!(
                "[[devices]]\nname = \"a\"\nkind = \"ao\"\nsamp_rate = 1.0\n\
                 [[sequence]]\ndevice = \"a\"\nchannel = \"ao0\"\nt = 0.0\n{}",
                op
            );
            match ExperimentConfig::from_toml_str(&text) {
                Err(CtrlError::Toml(e)) => assert!(e.to_string().contains("unknown field")),
                other => panic!("expected a parse error for {:?}, got {:?}", op, other),
            }
        }
        // Target keys are still required
        assert!(matches!(
            ExperimentConfig::from_toml_str(
                "[[sequence]]\nop = \"go_high\"\ndevice = \"a\"\nt = 0.0"
            ),
            Err(CtrlError::Toml(_))
        ));
    }

    #[test]
    fn build_errors_come_from_the_compiler() {
        let text = r#"
            [[devices]]
            name = "PXI1Slot3"
            kind = "ao"
            samp_rate = 1e3
            channels = [{ name = "port0/line0" }]
        "#;
        let cfg = ExperimentConfig::from_toml_str(text).unwrap();
        assert!(matches!(cfg.build_experiment(), Err(CtrlError::Compile(_))));
    }

    #[test]
    fn reset_defaults_to_last_instruction() {
        let text = r#"
            reset = true
            [[devices]]
            name = "PXI1Slot6"
            kind = "do"
            samp_rate = 10.0
            channels = [{ name = "port0/line0" }, { name = "port0/line1" }]
            [[sequence]]
            op = "go_high"
            device = "PXI1Slot6"
            channel = "port0/line1"
            t = 0.0
            [[sequence]]
            op = "high"
            device = "PXI1Slot6"
            channel = "port0/line0"
            t = 0.0
            duration = 1.0
        "#;
        let exp = ExperimentConfig::from_toml_str(text)
            .unwrap()
            .build_experiment()
            .unwrap();
        let table = exp.device_transition_table("PXI1Slot6", 0).unwrap();
        assert_eq!(table.positions(), vec![0, 10]);
        assert_eq!(table.words(), vec![0b11, 0]);
    }
}
