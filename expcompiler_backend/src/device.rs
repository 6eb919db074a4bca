//! Implements struct and methods corresponding to output devices. See [`BaseDevice`] for
//! implementation details.
//!
//! ## Device
//! Every [`Device`] corresponds to one output task on a physical card (e.g. the analog outputs
//! of `PXI1Slot3`, or the digital lines of `PXI1Slot6`). All channels of a device share its
//! sample clock, so a device compiles all of its channels to the same number of samples.
//!
//! [`Device`] fields keep track of the channels associated with the device as well as
//! device-wide data such as the device name, trigger line and synchronization behavior.
//!
//! ### Digital devices
//! Users edit digital *lines* (`port0/line3`). During compilation the lines of every port are
//! fed to the digital waveform compiler ([`crate::digital`]), whose transition table becomes a
//! streamable `port0` channel holding port words. The tables stay available through
//! [`BaseDevice::transition_table`].
//!
//! ### Synchronization
//! A device either exports its start trigger (the *primary* device, started last) or waits for a
//! start trigger on `trig_line`. It may additionally import or export a reference clock, or take
//! its sample clock from an external terminal.

use indexmap::IndexMap;
use ndarray::{s, Array2};
use regex::Regex;
use std::collections::BTreeSet;
use tracing::debug;

use crate::channel::*;
use crate::digital::*;
use crate::error::{CompileError, CompileResult};
use crate::instruction::*;
use crate::utils::*;

pub trait BaseDevice {
    // Immutable accessors (getters)
    fn channels(&self) -> &IndexMap<String, Channel>;
    fn port_tables(&self) -> &IndexMap<usize, TransitionTable>;
    fn name(&self) -> &str;
    fn task_type(&self) -> TaskType;
    fn samp_rate(&self) -> f64;
    fn samp_clk_src(&self) -> Option<&str>;
    fn trig_line(&self) -> Option<&str>;
    fn export_trig(&self) -> Option<bool>;
    fn ref_clk_line(&self) -> Option<&str>;
    fn export_ref_clk(&self) -> Option<bool>;
    fn ref_clk_rate(&self) -> Option<f64>;

    // Mutable accessors
    fn channels_(&mut self) -> &mut IndexMap<String, Channel>;
    fn port_tables_(&mut self) -> &mut IndexMap<usize, TransitionTable>;
    fn samp_clk_src_(&mut self) -> &mut Option<String>;
    fn trig_line_(&mut self) -> &mut Option<String>;
    fn export_trig_(&mut self) -> &mut Option<bool>;
    fn ref_clk_line_(&mut self) -> &mut Option<String>;
    fn export_ref_clk_(&mut self) -> &mut Option<bool>;
    fn ref_clk_rate_(&mut self) -> &mut Option<f64>;

    fn no_channel(&self, name: &str) -> CompileError {
        CompileError::NoChannel {
            dev: self.name().to_string(),
            chan: name.to_string(),
            registered: self.channels().keys().cloned().collect(),
        }
    }
    fn chan(&self, name: &str) -> CompileResult<&Channel> {
        self.channels()
            .get(name)
            .ok_or_else(|| self.no_channel(name))
    }
    fn chan_(&mut self, name: &str) -> CompileResult<&mut Channel> {
        if !self.channels().contains_key(name) {
            return Err(self.no_channel(name));
        }
        self.channels_()
            .get_mut(name)
            .ok_or_else(|| CompileError::NotCompiled(name.to_string()))
    }

    /// The primary device exports the start trigger all other devices wait for.
    fn is_primary(&self) -> bool {
        self.export_trig() == Some(true)
    }

    fn cfg_samp_clk_src(&mut self, src: &str) {
        *(self.samp_clk_src_()) = Some(src.to_string());
    }

    fn cfg_trig(&mut self, trig_line: &str, export_trig: bool) {
        *(self.trig_line_()) = Some(trig_line.to_string());
        *(self.export_trig_()) = Some(export_trig);
    }

    fn cfg_ref_clk(
        &mut self,
        ref_clk_line: &str,
        ref_clk_rate: f64,
        export_ref_clk: bool,
    ) -> CompileResult<()> {
        if export_ref_clk && ref_clk_rate != 1e7 {
            return Err(CompileError::TrigConfig(format!(
                "Device {} needs to explicitly acknowledge exporting 10MHz clk by setting ref_clk_rate=1e7",
                self.name()
            )));
        }
        *(self.ref_clk_line_()) = Some(ref_clk_line.to_string());
        *(self.ref_clk_rate_()) = Some(ref_clk_rate);
        *(self.export_ref_clk_()) = Some(export_ref_clk);
        Ok(())
    }

    fn editable_channels(&self) -> Vec<&Channel> {
        self.channels()
            .values()
            .filter(|&chan| chan.editable())
            .collect()
    }
    fn editable_channels_(&mut self) -> Vec<&mut Channel> {
        self.channels_()
            .values_mut()
            .filter(|chan| (*chan).editable())
            .collect()
    }

    /// Registers a new editable channel.
    ///
    /// Analog channels are named `ao<N>`, digital lines `port<N>/line<M>`. Digital lines must
    /// default to 0 or 1.
    fn add_channel(&mut self, name: &str, default_value: f64) -> CompileResult<()> {
        let (name_pattern, expected) = match self.task_type() {
            TaskType::AO => (r"^ao\d+$", "ao(number)"),
            TaskType::DO => (r"^port\d+/line\d+$", "port(number)/line(number)"),
        };
        let re = Regex::new(name_pattern).map_err(|err| CompileError::ChannelName {
            task_type: self.task_type(),
            name: err.to_string(),
            expected,
        })?;
        if !re.is_match(name) {
            return Err(CompileError::ChannelName {
                task_type: self.task_type(),
                name: name.to_string(),
                expected,
            });
        }
        if self.task_type() == TaskType::DO {
            if let Some((_port, line)) = extract_port_line_numbers(name) {
                if line >= MAX_PORT_LINES {
                    return Err(CompileError::LineOutOfRange {
                        line,
                        nlines: MAX_PORT_LINES,
                    });
                }
            }
            if default_value != 0. && default_value != 1. {
                return Err(CompileError::DigitalValue {
                    chan: name.to_string(),
                    value: default_value.to_string(),
                });
            }
        }
        if self.channels().contains_key(name) {
            return Err(CompileError::DuplicateChannel {
                dev: self.name().to_string(),
                chan: name.to_string(),
            });
        }
        let new_channel = Channel::new(self.task_type(), name, self.samp_rate(), default_value);
        self.channels_().insert(name.to_string(), new_channel);
        Ok(())
    }

    /// Adds a "go to reset value" instruction at `reset_time` on every editable channel.
    fn add_reset_instr(&mut self, reset_time: f64) -> CompileResult<()> {
        if !reset_time.is_finite() || reset_time < 0.0 {
            return Err(CompileError::InvalidTime(reset_time));
        }
        let reset_pos = (reset_time * self.samp_rate()).round() as usize;
        if reset_pos < self.last_instr_end_pos() {
            return Err(CompileError::StopBeforeEnd {
                name: self.name().to_string(),
                stop_pos: reset_pos,
                last_end: self.last_instr_end_pos(),
            });
        }
        for chan in self.editable_channels_() {
            chan.add_reset_instr(reset_pos)?;
        }
        Ok(())
    }

    fn is_compiled(&self) -> bool {
        self.editable_channels()
            .iter()
            .any(|channel| channel.is_compiled())
    }
    fn is_edited(&self) -> bool {
        self.editable_channels()
            .iter()
            .any(|channel| channel.is_edited())
    }
    fn is_fresh_compiled(&self) -> bool {
        self.editable_channels()
            .iter()
            .all(|channel| channel.is_fresh_compiled())
    }
    fn clear_edit_cache(&mut self) {
        self.clear_compile_cache();
        for chan in self.channels_().values_mut() {
            chan.clear_edit_cache()
        }
    }
    fn clear_compile_cache(&mut self) {
        // Remove all made-up "port" channels
        self.channels_().retain(|_name, chan| chan.editable());
        self.port_tables_().clear();

        for chan in self.channels_().values_mut() {
            chan.clear_compile_cache()
        }
    }

    /// Whether some finite instruction ends exactly at `stop_pos`.
    fn check_end_clipped(&self, stop_pos: usize) -> bool {
        self.editable_channels()
            .iter()
            .filter_map(|chan| chan.instr_list().last())
            .any(|last_instr| last_instr.end_pos() == Some(stop_pos))
    }

    /// Compiles every channel up to `stop_time` and returns the device run time.
    ///
    /// If a finite instruction ends precisely at the stop, one more sample is generated so its
    /// closing edge is formed: otherwise the card would simply keep the last generated value.
    fn compile(&mut self, stop_time: f64) -> CompileResult<f64> {
        if !stop_time.is_finite() || stop_time < 0.0 {
            return Err(CompileError::InvalidTime(stop_time));
        }
        let stop_tick = (stop_time * self.samp_rate()).round() as usize;
        if stop_tick < self.last_instr_end_pos() {
            return Err(CompileError::StopBeforeEnd {
                name: self.name().to_string(),
                stop_pos: stop_tick,
                last_end: self.last_instr_end_pos(),
            });
        }
        let stop_pos = if self.check_end_clipped(stop_tick) {
            stop_tick + 1
        } else {
            stop_tick
        };
        for chan in self.editable_channels_() {
            chan.compile(stop_pos)?;
        }
        if self.task_type() == TaskType::DO {
            self.compile_ports(stop_pos)?;
        }
        debug!(
            "compiled device {} to {} samples ({} streamable channels)",
            self.name(),
            self.total_samps(),
            self.compiled_channels(true, false).len()
        );
        Ok(self.total_run_time())
    }

    /// Merges compiled digital lines into one transition table and port channel per port.
    fn compile_ports(&mut self, stop_pos: usize) -> CompileResult<()> {
        // Remove port channels left from the previous compile run
        self.channels_().retain(|_name, chan| chan.editable());
        self.port_tables_().clear();

        for port in self.unique_port_numbers() {
            let lines: Vec<(usize, &Channel)> = self
                .editable_channels()
                .into_iter()
                .filter_map(|chan| match extract_port_line_numbers(chan.name()) {
                    Some((chan_port, line)) if chan_port == port => Some((line, chan)),
                    _ => None,
                })
                .collect();
            let nlines = lines.iter().map(|(line, _chan)| line + 1).max().unwrap_or(0);
            if nlines > MAX_PORT_LINES {
                return Err(CompileError::TooManyLines {
                    nlines,
                    max: MAX_PORT_LINES,
                });
            }

            let mut initial = vec![false; nlines];
            for (line, chan) in lines.iter() {
                initial[*line] = chan.default_value() >= 0.5;
            }
            let mut seq = DigitalSequence::new(nlines).with_initial(&initial)?;
            for (line, chan) in lines.iter().filter(|(_line, chan)| chan.is_compiled()) {
                let mut seg_start = 0;
                for (&seg_end, instr) in chan.instr_end().iter().zip(chan.instr_val()) {
                    let value = instr.const_value().unwrap_or(0.0);
                    seq.set(seg_start, *line, LineState::from_value(value))?;
                    seg_start = seg_end;
                }
            }
            let table = seq.compile(stop_pos)?;

            let (instr_end, instr_val): (Vec<usize>, Vec<Instruction>) = table
                .segments()
                .map(|(_start, end, states)| (end, Instruction::new_const(port_word(states) as f64)))
                .unzip();
            let port_channel =
                Channel::new_port(&format!("port{}", port), self.samp_rate(), instr_end, instr_val);
            self.channels_()
                .insert(port_channel.name().to_string(), port_channel);
            self.port_tables_().insert(port, table);
        }
        Ok(())
    }

    /// Transition table of a digital port, available after compilation.
    fn transition_table(&self, port: usize) -> Option<&TransitionTable> {
        self.port_tables().get(&port)
    }

    fn compiled_channels(&self, require_streamable: bool, require_editable: bool) -> Vec<&Channel> {
        self.channels()
            .values()
            .filter(|chan| {
                chan.is_compiled()
                    && (!require_streamable || chan.streamable())
                    && (!require_editable || chan.editable())
            })
            .collect()
    }

    /// Number of samples all compiled channels share.
    fn total_samps(&self) -> usize {
        self.compiled_channels(false, false)
            .iter()
            .map(|chan| chan.total_samps())
            .max()
            .unwrap_or(0)
    }

    /// Checks that every compiled channel has the same length and returns it.
    ///
    /// Channels only diverge when they were compiled individually instead of through
    /// [`BaseDevice::compile`].
    fn check_total_samps(&self) -> CompileResult<usize> {
        let lengths: Vec<(String, usize)> = self
            .compiled_channels(false, false)
            .iter()
            .map(|chan| (chan.name().to_string(), chan.total_samps()))
            .collect();
        match lengths.first() {
            None => Ok(0),
            Some(&(_, first)) if lengths.iter().all(|(_, len)| *len == first) => Ok(first),
            Some(_) => Err(CompileError::UnequalLengths {
                dev: self.name().to_string(),
                lengths,
            }),
        }
    }

    fn total_run_time(&self) -> f64 {
        self.total_samps() as f64 / self.samp_rate()
    }

    fn last_instr_end_pos(&self) -> usize {
        self.editable_channels()
            .iter()
            .map(|chan| chan.last_instr_end_pos())
            .fold(0, usize::max)
    }
    fn last_instr_end_time(&self) -> f64 {
        self.last_instr_end_pos() as f64 / self.samp_rate()
    }

    /// Fills `buffer` of shape `[num_selected_channels, nsamps]` with signal values.
    fn fill_signal_nsamps(
        &self,
        start_pos: usize,
        end_pos: usize,
        nsamps: usize,
        buffer: &mut Array2<f64>,
        require_streamable: bool,
        require_editable: bool,
    ) -> CompileResult<()> {
        let chans = self.compiled_channels(require_streamable, require_editable);
        if buffer.dim() != (chans.len(), nsamps) {
            return Err(CompileError::InvalidInterval {
                name: self.name().to_string(),
                start_pos,
                end_pos,
            });
        }
        for (i, chan) in chans.iter().enumerate() {
            let mut channel_slice = buffer.slice_mut(s![i, ..]);
            chan.fill_signal_nsamps(start_pos, end_pos, nsamps, &mut channel_slice)?;
        }
        Ok(())
    }

    /// Samples the selected compiled channels over `start_pos..end_pos`.
    ///
    /// Returns an array of shape `[num_selected_channels, nsamps]`, rows in channel
    /// registration order (DO port channels after the lines).
    fn calc_signal_nsamps(
        &self,
        start_pos: usize,
        end_pos: usize,
        nsamps: usize,
        require_streamable: bool,
        require_editable: bool,
    ) -> CompileResult<Array2<f64>> {
        let chans = self.compiled_channels(require_streamable, require_editable);
        let Some(first_chan) = chans.first() else {
            return Err(CompileError::NoChannels {
                dev: self.name().to_string(),
                streamable: require_streamable,
                editable: require_editable,
            });
        };
        let t_values = first_chan.sample_times(start_pos, end_pos, nsamps);
        let mut buffer = Array2::from_elem((chans.len(), nsamps), 0.);
        buffer
            .outer_iter_mut()
            .for_each(|mut row| row.assign(&t_values));
        self.fill_signal_nsamps(
            start_pos,
            end_pos,
            nsamps,
            &mut buffer,
            require_streamable,
            require_editable,
        )?;
        Ok(buffer)
    }

    /// Port numbers having at least one compiled line.
    fn unique_port_numbers(&self) -> Vec<usize> {
        let port_numbers: BTreeSet<usize> = self
            .compiled_channels(false, true)
            .iter()
            .filter_map(|chan| extract_port_line_numbers(chan.name()))
            .map(|(port, _line)| port)
            .collect();
        port_numbers.into_iter().collect()
    }
}

#[derive(Clone, Debug)]
pub struct Device {
    channels: IndexMap<String, Channel>,
    port_tables: IndexMap<usize, TransitionTable>,

    name: String,
    task_type: TaskType,
    samp_rate: f64,

    samp_clk_src: Option<String>,
    trig_line: Option<String>,
    export_trig: Option<bool>,
    ref_clk_line: Option<String>,
    export_ref_clk: Option<bool>,
    ref_clk_rate: Option<f64>,
}

impl Device {
    pub fn new(name: &str, task_type: TaskType, samp_rate: f64) -> Self {
        Self {
            channels: IndexMap::new(),
            port_tables: IndexMap::new(),

            name: name.to_string(),
            task_type,
            samp_rate,

            samp_clk_src: None,
            trig_line: None,
            export_trig: None,
            ref_clk_line: None,
            export_ref_clk: None,
            ref_clk_rate: None,
        }
    }
}

impl BaseDevice for Device {
    // Immutable accessors (getters)
    fn channels(&self) -> &IndexMap<String, Channel> {
        &self.channels
    }

    fn port_tables(&self) -> &IndexMap<usize, TransitionTable> {
        &self.port_tables
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn task_type(&self) -> TaskType {
        self.task_type
    }

    fn samp_rate(&self) -> f64 {
        self.samp_rate
    }

    fn samp_clk_src(&self) -> Option<&str> {
        self.samp_clk_src.as_deref()
    }

    fn trig_line(&self) -> Option<&str> {
        self.trig_line.as_deref()
    }

    fn export_trig(&self) -> Option<bool> {
        self.export_trig
    }

    fn ref_clk_line(&self) -> Option<&str> {
        self.ref_clk_line.as_deref()
    }

    fn export_ref_clk(&self) -> Option<bool> {
        self.export_ref_clk
    }

    fn ref_clk_rate(&self) -> Option<f64> {
        self.ref_clk_rate
    }

    // Mutable accessors
    fn channels_(&mut self) -> &mut IndexMap<String, Channel> {
        &mut self.channels
    }

    fn port_tables_(&mut self) -> &mut IndexMap<usize, TransitionTable> {
        &mut self.port_tables
    }

    fn samp_clk_src_(&mut self) -> &mut Option<String> {
        &mut self.samp_clk_src
    }

    fn trig_line_(&mut self) -> &mut Option<String> {
        &mut self.trig_line
    }

    fn export_trig_(&mut self) -> &mut Option<bool> {
        &mut self.export_trig
    }

    fn ref_clk_line_(&mut self) -> &mut Option<String> {
        &mut self.ref_clk_line
    }

    fn export_ref_clk_(&mut self) -> &mut Option<bool> {
        &mut self.export_ref_clk
    }

    fn ref_clk_rate_(&mut self) -> &mut Option<f64> {
        &mut self.ref_clk_rate
    }
}

#[cfg(test)]
mod test {
    use crate::device::*;
    use crate::instruction::*;

    #[test]
    fn last_instr_end_pos() {
        let mut dev = Device::new("Dev1", TaskType::AO, 1e3);
        dev.add_channel("ao0", 0.0).unwrap();
        dev.add_channel("ao1", 0.0).unwrap();
        let mock_func = Instruction::new_const(0.0);

        // No instructions
        assert_eq!(dev.last_instr_end_pos(), 0);

        // Instruction t=0..1 on ao0
        dev.chan_("ao0")
            .unwrap()
            .add_instr(mock_func.clone(), 0.0, Some((1.0, false)))
            .unwrap();
        assert_eq!(dev.last_instr_end_pos(), 1000);

        // Instruction t=1..2 on ao1
        dev.chan_("ao1")
            .unwrap()
            .add_instr(mock_func.clone(), 1.0, Some((1.0, false)))
            .unwrap();
        assert_eq!(dev.last_instr_end_pos(), 2000);

        // "Go-something" instruction on ao1 at t=2
        dev.chan_("ao1")
            .unwrap()
            .add_instr(mock_func.clone(), 2.0, None)
            .unwrap();
        assert_eq!(dev.last_instr_end_pos(), 2001);

        dev.clear_edit_cache();
        assert_eq!(dev.last_instr_end_pos(), 0);
    }

    #[test]
    fn check_end_clipped() {
        let mut dev = Device::new("Dev1", TaskType::AO, 1.0);
        dev.add_channel("ao0", 0.0).unwrap();
        let mock_func = Instruction::new_const(0.0);

        // (1) No instructions
        assert!(!dev.check_end_clipped(0));

        // (2) Finite duration instruction t = 0..1s
        dev.chan_("ao0")
            .unwrap()
            .add_instr(mock_func.clone(), 0.0, Some((1.0, false)))
            .unwrap();
        assert_eq!(dev.chan("ao0").unwrap().last_instr_end_pos(), 1);
        assert!(!dev.check_end_clipped(2));
        assert!(dev.check_end_clipped(1));
        dev.clear_edit_cache();

        // (3) A "go-something" instruction is not meant to have the closing edge,
        //  so a stop right after its first sample is not clipping
        dev.chan_("ao0")
            .unwrap()
            .add_instr(mock_func.clone(), 0.0, None)
            .unwrap();
        assert_eq!(dev.chan("ao0").unwrap().last_instr_end_pos(), 1);
        assert!(!dev.check_end_clipped(1));
    }

    #[test]
    fn compile() {
        let mut dev = Device::new("Dev1", TaskType::AO, 1e3);
        dev.add_channel("ao0", 0.0).unwrap();
        dev.add_channel("ao1", 0.0).unwrap();
        let mock_func = Instruction::new_const(0.0);

        // Not compiled yet
        assert_eq!(dev.total_samps(), 0);

        dev.chan_("ao0")
            .unwrap()
            .add_instr(mock_func.clone(), 0.0, Some((1.0, false)))
            .unwrap();
        dev.chan_("ao1")
            .unwrap()
            .add_instr(mock_func.clone(), 1.0, Some((1.0, false)))
            .unwrap();
        assert_eq!(dev.last_instr_end_pos(), 2000);

        // Compile without clipping of the closing edge - no extra sample should be added
        dev.compile(3.0).unwrap();
        assert_eq!(dev.total_samps(), 3000);

        // Compile with stop_pos matching the end of a finite-duration instruction on "ao1" -
        //  an additional sample should be added to form the closing edge
        dev.compile(2.0).unwrap();
        assert_eq!(dev.total_samps(), 2001);
        assert_eq!(dev.check_total_samps(), Ok(2001));

        assert!(matches!(
            dev.compile(1.5),
            Err(CompileError::StopBeforeEnd { .. })
        ));
    }

    #[test]
    fn channel_names() {
        let mut ao = Device::new("Dev1", TaskType::AO, 1e3);
        assert!(ao.add_channel("ao0", 0.0).is_ok());
        assert!(matches!(
            ao.add_channel("port0/line0", 0.0),
            Err(CompileError::ChannelName { .. })
        ));
        assert!(matches!(
            ao.add_channel("ao0", 1.0),
            Err(CompileError::DuplicateChannel { .. })
        ));

        let mut dio = Device::new("Dev2", TaskType::DO, 1e3);
        assert!(dio.add_channel("port0/line5", 1.0).is_ok());
        assert!(dio.add_channel("ao0", 0.0).is_err());
        assert!(dio.add_channel("port0/line6", 0.5).is_err());
        assert!(dio.add_channel("port0/line32", 0.0).is_err());
        assert!(dio.chan("port0/line1").is_err());
    }

    #[test]
    fn digital_ports_become_transition_tables() {
        let mut dev = Device::new("Dev1", TaskType::DO, 10.0);
        dev.add_channel("port0/line0", 0.0).unwrap();
        dev.add_channel("port0/line2", 1.0).unwrap();
        dev.add_channel("port1/line0", 0.0).unwrap();

        dev.chan_("port0/line0")
            .unwrap()
            .constant(1.0, 1.0, Some((1.0, false)))
            .unwrap();
        dev.chan_("port0/line2")
            .unwrap()
            .constant(0.0, 1.5, None)
            .unwrap();
        dev.compile(3.0).unwrap();

        // port1 has no instructions and is not streamed
        assert_eq!(dev.unique_port_numbers(), vec![0]);
        assert!(dev.transition_table(1).is_none());

        let table = dev.transition_table(0).unwrap();
        assert_eq!(table.positions(), vec![0, 10, 15, 20]);
        assert_eq!(table.words(), vec![0b100, 0b101, 0b001, 0b000]);
        assert_eq!(table.stop_pos(), 30);

        let names: Vec<&str> = dev
            .compiled_channels(true, false)
            .iter()
            .map(|chan| chan.name())
            .collect();
        assert_eq!(names, vec!["port0"]);

        let sig = dev.calc_signal_nsamps(0, 30, 30, true, false).unwrap();
        assert_eq!(sig.dim(), (1, 30));
        assert_eq!(sig[[0, 9]], 4.0);
        assert_eq!(sig[[0, 10]], 5.0);
        assert_eq!(sig[[0, 15]], 1.0);
        assert_eq!(sig[[0, 29]], 0.0);

        // Recompiling replaces port channels instead of accumulating them
        dev.compile(4.0).unwrap();
        assert_eq!(dev.compiled_channels(true, false).len(), 1);
        dev.clear_compile_cache();
        assert!(dev.transition_table(0).is_none());
    }

    #[test]
    fn reset_instr() {
        let mut dev = Device::new("Dev1", TaskType::AO, 10.0);
        dev.add_channel("ao0", 0.5).unwrap();
        dev.chan_("ao0")
            .unwrap()
            .constant(2.0, 0.0, None)
            .unwrap();
        assert!(dev.add_reset_instr(0.0).is_err());
        dev.add_reset_instr(1.0).unwrap();
        dev.compile(2.0).unwrap();
        let sig = dev.calc_signal_nsamps(0, 20, 20, true, true).unwrap();
        assert_eq!(sig[[0, 9]], 2.0);
        assert_eq!(sig[[0, 10]], 0.5);
    }
}
