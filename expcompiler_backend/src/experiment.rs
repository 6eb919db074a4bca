//! The experiment module provides the highest level of abstraction for editing and compiling
//! experiment sequences, and the single place through which methods are exposed to python.
//!
//! ## Overview
//!
//! At the heart of this module lies the [`Experiment`] struct, which consists of a collection of
//! devices. Its behavior is defined by the [`BaseExperiment`] trait, which prescribes methods for
//! experiment management and manipulation through default implementations.
//!
//! - **Experiment**: a collection of devices. Methods addressing a device or a channel look it up
//!   by name and fail with [`CompileError::NoDevice`] / [`CompileError::NoChannel`] if it is not
//!   registered.
//! - **Device**: each [`Device`] corresponds to one output task of a card, see [`crate::device`].
//! - **Channel**: a [`Channel`] holds instructions, see [`crate::channel`].
//!
//! Any struct with a `devices: IndexMap<String, Device>` field can become an experiment with the
//! [`impl_exp_boilerplate`] macro; the streaming backend builds its own experiment type this way.
//!
//! ## Incommensurate clocks
//!
//! Devices may run on sample clocks whose grids only coincide occasionally. Experiment-level
//! times are therefore `f64` seconds, and every device rounds them onto its own grid. The
//! experiment-wide stop (or reset) time defaults to the latest instruction end across devices,
//! which each device then rounds to a tick at or after its own last instruction end.

use indexmap::IndexMap;
use ndarray::Array2;
use tracing::info;

use crate::channel::*;
use crate::device::*;
use crate::digital::TransitionTable;
use crate::error::{CompileError, CompileResult};
use crate::instruction::*;

/// Defines the behavior of the [`Experiment`] struct through default trait implementations.
///
/// Trait methods fall into the following categories:
/// 1. Experiment-targeted methods which alter or query the entire experiment:
///     - [`add_ao_device`], [`add_do_device`]
///     - [`compile`], [`check_trig_config`], [`add_reset_instr`]
///     - [`last_instr_end_time`], [`total_run_time`], [`compiled_devices`]
///     - [`is_edited`], [`is_compiled`], [`is_fresh_compiled`]
///     - [`clear_edit_cache`], [`clear_compile_cache`]
/// 2. Device-targeted methods:
///     - [`add_ao_channel`], [`add_do_channel`]
///     - [`device_calc_signal_nsamps`], [`device_compiled_channel_names`],
///       [`device_transition_table`]
///     - [`device_cfg_samp_clk_src`], [`device_cfg_trig`], [`device_cfg_ref_clk`]
///     - [`device_last_instr_end_time`], [`device_total_run_time`]
///     - [`device_clear_compile_cache`], [`device_clear_edit_cache`]
/// 3. Channel-targeted methods:
///     - [`constant`], [`go_constant`], [`sine`], [`go_sine`], [`linramp`], [`expramp`]
///     - [`high`], [`low`], [`go_high`], [`go_low`]
///     - [`channel_clear_compile_cache`], [`channel_clear_edit_cache`]
///     - [`channel_calc_signal_nsamps`], [`channel_last_instr_end_time`]
/// 4. Internal helpers:
///     - [`devices`], [`devices_`], [`dev`], [`dev_`]
///     - [`typed_device_op`], [`device_op`], [`typed_channel_op`], [`channel_op`]
///
/// [`add_ao_device`]: BaseExperiment::add_ao_device
/// [`add_do_device`]: BaseExperiment::add_do_device
/// [`compile`]: BaseExperiment::compile
/// [`check_trig_config`]: BaseExperiment::check_trig_config
/// [`add_reset_instr`]: BaseExperiment::add_reset_instr
/// [`last_instr_end_time`]: BaseExperiment::last_instr_end_time
/// [`total_run_time`]: BaseExperiment::total_run_time
/// [`compiled_devices`]: BaseExperiment::compiled_devices
/// [`is_edited`]: BaseExperiment::is_edited
/// [`is_compiled`]: BaseExperiment::is_compiled
/// [`is_fresh_compiled`]: BaseExperiment::is_fresh_compiled
/// [`clear_edit_cache`]: BaseExperiment::clear_edit_cache
/// [`clear_compile_cache`]: BaseExperiment::clear_compile_cache
/// [`add_ao_channel`]: BaseExperiment::add_ao_channel
/// [`add_do_channel`]: BaseExperiment::add_do_channel
/// [`device_calc_signal_nsamps`]: BaseExperiment::device_calc_signal_nsamps
/// [`device_compiled_channel_names`]: BaseExperiment::device_compiled_channel_names
/// [`device_transition_table`]: BaseExperiment::device_transition_table
/// [`device_cfg_samp_clk_src`]: BaseExperiment::device_cfg_samp_clk_src
/// [`device_cfg_trig`]: BaseExperiment::device_cfg_trig
/// [`device_cfg_ref_clk`]: BaseExperiment::device_cfg_ref_clk
/// [`device_last_instr_end_time`]: BaseExperiment::device_last_instr_end_time
/// [`device_total_run_time`]: BaseExperiment::device_total_run_time
/// [`device_clear_compile_cache`]: BaseExperiment::device_clear_compile_cache
/// [`device_clear_edit_cache`]: BaseExperiment::device_clear_edit_cache
/// [`constant`]: BaseExperiment::constant
/// [`go_constant`]: BaseExperiment::go_constant
/// [`sine`]: BaseExperiment::sine
/// [`go_sine`]: BaseExperiment::go_sine
/// [`linramp`]: BaseExperiment::linramp
/// [`expramp`]: BaseExperiment::expramp
/// [`high`]: BaseExperiment::high
/// [`low`]: BaseExperiment::low
/// [`go_high`]: BaseExperiment::go_high
/// [`go_low`]: BaseExperiment::go_low
/// [`channel_clear_compile_cache`]: BaseExperiment::channel_clear_compile_cache
/// [`channel_clear_edit_cache`]: BaseExperiment::channel_clear_edit_cache
/// [`channel_calc_signal_nsamps`]: BaseExperiment::channel_calc_signal_nsamps
/// [`channel_last_instr_end_time`]: BaseExperiment::channel_last_instr_end_time
/// [`devices`]: BaseExperiment::devices
/// [`devices_`]: BaseExperiment::devices_
/// [`dev`]: BaseExperiment::dev
/// [`dev_`]: BaseExperiment::dev_
/// [`typed_device_op`]: BaseExperiment::typed_device_op
/// [`device_op`]: BaseExperiment::device_op
/// [`typed_channel_op`]: BaseExperiment::typed_channel_op
/// [`channel_op`]: BaseExperiment::channel_op
pub trait BaseExperiment {
    // FIELD methods
    fn devices(&self) -> &IndexMap<String, Device>;
    fn devices_(&mut self) -> &mut IndexMap<String, Device>;

    fn no_device(&self, name: &str) -> CompileError {
        CompileError::NoDevice {
            name: name.to_string(),
            registered: self.devices().keys().cloned().collect(),
        }
    }

    /// Shortcut to borrow a device instance by name
    ///
    /// ```
    /// use expcompiler_backend::*;
    ///
    /// let mut exp = Experiment::new();
    /// exp.add_do_device("PXI1Slot6", 1e6).unwrap();
    /// assert!(exp.dev("PXI1Slot6").is_ok());
    /// assert!(matches!(exp.dev("PXI1Slot5"), Err(CompileError::NoDevice { .. })));
    /// ```
    fn dev(&self, name: &str) -> CompileResult<&Device> {
        self.devices()
            .get(name)
            .ok_or_else(|| self.no_device(name))
    }
    /// Shortcut to mutably borrow a device instance by name
    fn dev_(&mut self, name: &str) -> CompileResult<&mut Device> {
        if !self.devices().contains_key(name) {
            return Err(self.no_device(name));
        }
        self.devices_()
            .get_mut(name)
            .ok_or_else(|| CompileError::NotCompiled(name.to_string()))
    }

    /// Registers a device, rejecting duplicate names.
    /// Used by [`BaseExperiment::add_ao_device`] and [`BaseExperiment::add_do_device`].
    fn add_device_base(&mut self, dev: Device) -> CompileResult<()> {
        let name = dev.name().to_string();
        if !(dev.samp_rate().is_finite() && dev.samp_rate() > 0.) {
            return Err(CompileError::InvalidSampRate {
                dev: name,
                samp_rate: dev.samp_rate(),
            });
        }
        if self.devices().contains_key(&name) {
            return Err(CompileError::DuplicateDevice(name));
        }
        self.devices_().insert(name, dev);
        Ok(())
    }

    /// Registers an analog output (AO) device.
    ///
    /// ```
    /// # use expcompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_ao_device("PXI1Slot3", 1e6).unwrap();
    /// // Adding the same device again, even with different parameters, is an error
    /// assert!(exp.add_ao_device("PXI1Slot3", 1e7).is_err());
    /// ```
    fn add_ao_device(&mut self, name: &str, samp_rate: f64) -> CompileResult<()> {
        self.add_device_base(Device::new(name, TaskType::AO, samp_rate))
    }

    /// Registers a digital output (DO) device.
    fn add_do_device(&mut self, name: &str, samp_rate: f64) -> CompileResult<()> {
        self.add_device_base(Device::new(name, TaskType::DO, samp_rate))
    }

    /// Latest instruction end time across all devices.
    ///
    /// ```
    /// # use expcompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_do_device("PXI1Slot6", 1e6).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 0, 4, 0.).unwrap();
    /// exp.high("PXI1Slot6", "port0/line0", 1., 4.).unwrap(); // ends at 5
    /// assert_eq!(exp.last_instr_end_time(), 5.);
    /// exp.high("PXI1Slot6", "port0/line4", 0., 6.).unwrap(); // ends at 6
    /// assert_eq!(exp.last_instr_end_time(), 6.);
    /// ```
    fn last_instr_end_time(&self) -> f64 {
        self.devices()
            .values()
            .map(|dev| dev.last_instr_end_time())
            .fold(0.0, f64::max)
    }

    /// Longest compiled run time across all devices.
    fn total_run_time(&self) -> f64 {
        self.devices()
            .values()
            .map(|dev| dev.total_run_time())
            .fold(0.0, f64::max)
    }

    /// Checks start-trigger wiring: at most one device may export the start trigger, and devices
    /// waiting for a trigger need someone to export it.
    fn check_trig_config(&self) -> CompileResult<()> {
        let primaries: Vec<&str> = self
            .devices()
            .values()
            .filter(|dev| dev.is_primary())
            .map(|dev| dev.name())
            .collect();
        if primaries.len() > 1 {
            return Err(CompileError::TrigConfig(format!(
                "Only one device can export the start trigger, found {:?}",
                primaries
            )));
        }
        let waiting: Vec<&str> = self
            .devices()
            .values()
            .filter(|dev| dev.trig_line().is_some() && !dev.is_primary())
            .map(|dev| dev.name())
            .collect();
        if primaries.is_empty() && !waiting.is_empty() {
            return Err(CompileError::TrigConfig(format!(
                "Devices {:?} wait for a start trigger but no device exports one",
                waiting
            )));
        }
        Ok(())
    }

    /// Compiles every device to `stop_time` and returns the experiment run time.
    ///
    /// With `stop_time = None` the experiment stops right after its last instruction.
    ///
    /// ```
    /// # use expcompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_do_device("PXI1Slot6", 1e6).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    /// exp.go_high("PXI1Slot6", "port0/line0", 1.).unwrap();
    /// exp.go_low("PXI1Slot6", "port0/line0", 4.).unwrap();
    ///
    /// exp.compile(Some(5.)).unwrap();
    /// assert_eq!(exp.total_run_time(), 5.);
    /// // Stopping before the last instruction is rejected
    /// assert!(exp.compile(Some(3.)).is_err());
    /// ```
    fn compile(&mut self, stop_time: Option<f64>) -> CompileResult<f64> {
        self.check_trig_config()?;
        let last_instr_end_time = self.last_instr_end_time();
        let stop_time = match stop_time {
            Some(stop_time) => {
                if stop_time < last_instr_end_time {
                    return Err(CompileError::BeforeLastInstr {
                        what: "compile stop",
                        time: stop_time,
                        last_end: last_instr_end_time,
                    });
                }
                stop_time
            }
            None => last_instr_end_time,
        };
        for dev in self.devices_().values_mut() {
            dev.compile(stop_time)?;
        }
        info!(
            "compiled {} devices, total run time {} s",
            self.compiled_devices().len(),
            self.total_run_time()
        );
        Ok(self.total_run_time())
    }

    /// Devices holding compiled channels.
    fn compiled_devices(&self) -> Vec<&Device> {
        self.devices()
            .values()
            .filter(|dev| dev.is_compiled())
            .collect()
    }

    fn is_edited(&self) -> bool {
        self.devices().values().any(|dev| dev.is_edited())
    }

    fn is_compiled(&self) -> bool {
        self.devices().values().any(|dev| dev.is_compiled())
    }

    fn is_fresh_compiled(&self) -> bool {
        self.devices().values().all(|dev| dev.is_fresh_compiled())
    }

    fn clear_edit_cache(&mut self) {
        self.clear_compile_cache();
        self.devices_()
            .values_mut()
            .for_each(|dev| dev.clear_edit_cache());
    }

    fn clear_compile_cache(&mut self) {
        self.devices_()
            .values_mut()
            .for_each(|dev| dev.clear_compile_cache());
    }

    /// Returns every editable channel to its reset (default) value at `reset_time`.
    ///
    /// With `reset_time = None` the reset happens right after the latest instruction of the
    /// experiment. Returns the reset time used.
    ///
    /// ```
    /// # use expcompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_do_device("PXI1Slot6", 10.).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 0, 1, 0.).unwrap();
    ///
    /// exp.high("PXI1Slot6", "port0/line0", 0., 1.).unwrap();
    /// exp.go_high("PXI1Slot6", "port0/line1", 0.).unwrap();
    ///
    /// let reset_time = exp.add_reset_instr(None).unwrap();
    /// assert_eq!(reset_time, 1.0);
    /// exp.compile(Some(5.)).unwrap();
    /// let sig = exp.device_calc_signal_nsamps("PXI1Slot6", 0, 50, 50, false, true).unwrap();
    /// assert!(sig[[0, 9]] == 1. && sig[[0, 10]] == 0.);
    /// assert!(sig[[1, 9]] == 1. && sig[[1, 10]] == 0.); // line1 is reset too
    /// ```
    fn add_reset_instr(&mut self, reset_time: Option<f64>) -> CompileResult<f64> {
        let last_instr_end_time = self.last_instr_end_time();
        let reset_time = match reset_time {
            Some(reset_time) => {
                if reset_time < last_instr_end_time {
                    return Err(CompileError::BeforeLastInstr {
                        what: "all-channel reset",
                        time: reset_time,
                        last_end: last_instr_end_time,
                    });
                }
                reset_time
            }
            None => last_instr_end_time,
        };
        for dev in self.devices_().values_mut() {
            dev.add_reset_instr(reset_time)?;
        }
        Ok(reset_time)
    }

    /// Runs closure `f` on device `name` after checking that its task type is `task_type`.
    ///
    /// ```
    /// # use expcompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_ao_device("PXI1Slot3", 1e6).unwrap();
    /// let res = exp.typed_device_op("PXI1Slot3", TaskType::AO, |dev| Ok(dev.samp_rate()));
    /// assert_eq!(res, Ok(1e6));
    /// let res = exp.typed_device_op("PXI1Slot3", TaskType::DO, |dev| Ok(dev.samp_rate()));
    /// assert!(matches!(res, Err(CompileError::TaskTypeMismatch { .. })));
    /// ```
    fn typed_device_op<F, R>(&mut self, name: &str, task_type: TaskType, f: F) -> CompileResult<R>
    where
        F: FnOnce(&mut Device) -> CompileResult<R>,
    {
        let dev = self.dev_(name)?;
        if dev.task_type() != task_type {
            return Err(CompileError::TaskTypeMismatch {
                dev: name.to_string(),
                actual: dev.task_type(),
                expected: task_type,
            });
        }
        f(dev)
    }

    /// Type-agnostic variant of [`BaseExperiment::typed_device_op`].
    fn device_op<F, R>(&mut self, name: &str, f: F) -> CompileResult<R>
    where
        F: FnOnce(&mut Device) -> CompileResult<R>,
    {
        f(self.dev_(name)?)
    }

    /// Runs closure `f` on channel `chan_name` of device `name`, checking the device task type.
    fn typed_channel_op<F, R>(
        &mut self,
        name: &str,
        chan_name: &str,
        task_type: TaskType,
        f: F,
    ) -> CompileResult<R>
    where
        F: FnOnce(&mut Channel) -> CompileResult<R>,
    {
        self.typed_device_op(name, task_type, |dev| f(dev.chan_(chan_name)?))
    }

    /// Type-agnostic variant of [`BaseExperiment::typed_channel_op`].
    fn channel_op<F, R>(&mut self, name: &str, chan_name: &str, f: F) -> CompileResult<R>
    where
        F: FnOnce(&mut Channel) -> CompileResult<R>,
    {
        self.device_op(name, |dev| f(dev.chan_(chan_name)?))
    }

    /// Adds channel `ao<channel_id>` to an AO device.
    fn add_ao_channel(
        &mut self,
        name: &str,
        channel_id: usize,
        default_value: f64,
    ) -> CompileResult<()> {
        self.typed_device_op(name, TaskType::AO, |dev| {
            dev.add_channel(&format!("ao{}", channel_id), default_value)
        })
    }

    /// Adds line `port<port_id>/line<line_id>` to a DO device. `default_value` must be 0 or 1.
    fn add_do_channel(
        &mut self,
        name: &str,
        port_id: usize,
        line_id: usize,
        default_value: f64,
    ) -> CompileResult<()> {
        self.typed_device_op(name, TaskType::DO, |dev| {
            dev.add_channel(&format!("port{}/line{}", port_id, line_id), default_value)
        })
    }

    /// Samples the compiled channels of a device, see [`BaseDevice::calc_signal_nsamps`].
    fn device_calc_signal_nsamps(
        &self,
        dev_name: &str,
        start_pos: usize,
        end_pos: usize,
        nsamps: usize,
        require_streamable: bool,
        require_editable: bool,
    ) -> CompileResult<Array2<f64>> {
        self.dev(dev_name)?.calc_signal_nsamps(
            start_pos,
            end_pos,
            nsamps,
            require_streamable,
            require_editable,
        )
    }

    fn device_cfg_samp_clk_src(&mut self, name: &str, src: &str) -> CompileResult<()> {
        self.device_op(name, |dev| {
            dev.cfg_samp_clk_src(src);
            Ok(())
        })
    }

    /// Configures the start trigger of a device. Only one device may export it.
    fn device_cfg_trig(
        &mut self,
        name: &str,
        trig_line: &str,
        export_trig: bool,
    ) -> CompileResult<()> {
        if export_trig {
            if let Some(other) = self
                .devices()
                .values()
                .find(|dev| dev.is_primary() && dev.name() != name)
            {
                return Err(CompileError::TrigConfig(format!(
                    "Device {} cannot export triggers since {} already does",
                    name,
                    other.name()
                )));
            }
        }
        self.device_op(name, |dev| {
            dev.cfg_trig(trig_line, export_trig);
            Ok(())
        })
    }

    fn device_cfg_ref_clk(
        &mut self,
        name: &str,
        ref_clk_line: &str,
        ref_clk_rate: f64,
        export_ref_clk: bool,
    ) -> CompileResult<()> {
        self.device_op(name, |dev| {
            dev.cfg_ref_clk(ref_clk_line, ref_clk_rate, export_ref_clk)
        })
    }

    fn device_last_instr_end_time(&self, name: &str) -> CompileResult<f64> {
        Ok(self.dev(name)?.last_instr_end_time())
    }

    fn device_total_run_time(&self, name: &str) -> CompileResult<f64> {
        Ok(self.dev(name)?.total_run_time())
    }

    fn device_clear_compile_cache(&mut self, name: &str) -> CompileResult<()> {
        self.device_op(name, |dev| {
            dev.clear_compile_cache();
            Ok(())
        })
    }

    fn device_clear_edit_cache(&mut self, name: &str) -> CompileResult<()> {
        self.device_op(name, |dev| {
            dev.clear_edit_cache();
            Ok(())
        })
    }

    /// Names of compiled channels, in the row order of
    /// [`BaseExperiment::device_calc_signal_nsamps`].
    ///
    /// Set `require_editable=true` to see the lines as they were edited, and
    /// `require_streamable=true` to see the channels as they are written to the hardware.
    ///
    /// ```
    /// # use expcompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_do_device("PXI1Slot6", 1e6).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 2, 0, 0.).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 2, 1, 0.).unwrap();
    /// exp.go_high("PXI1Slot6", "port0/line0", 0.).unwrap();
    /// exp.go_high("PXI1Slot6", "port2/line0", 1.).unwrap();
    /// exp.go_high("PXI1Slot6", "port2/line1", 2.).unwrap();
    /// exp.compile(Some(3.)).unwrap();
    /// // 2 streamable channels: "port0" and "port2"
    /// let streamable = exp.device_compiled_channel_names("PXI1Slot6", true, false).unwrap();
    /// assert_eq!(streamable, vec!["port0", "port2"]);
    /// // 3 editable channels: "port0/line0", "port2/line0", "port2/line1"
    /// let editable = exp.device_compiled_channel_names("PXI1Slot6", false, true).unwrap();
    /// assert_eq!(editable.len(), 3);
    /// ```
    fn device_compiled_channel_names(
        &self,
        name: &str,
        require_streamable: bool,
        require_editable: bool,
    ) -> CompileResult<Vec<String>> {
        Ok(self
            .dev(name)?
            .compiled_channels(require_streamable, require_editable)
            .iter()
            .map(|chan| chan.name().to_string())
            .collect())
    }

    /// Compiled transition table of digital port `port` on device `name`.
    fn device_transition_table(&self, name: &str, port: usize) -> CompileResult<&TransitionTable> {
        let dev = self.dev(name)?;
        if dev.task_type() != TaskType::DO {
            return Err(CompileError::TaskTypeMismatch {
                dev: name.to_string(),
                actual: dev.task_type(),
                expected: TaskType::DO,
            });
        }
        dev.transition_table(port)
            .ok_or_else(|| CompileError::NotCompiled(format!("Device {} port{}", name, port)))
    }

    /// Constant `value` on an AO channel for `duration`, after which the channel returns to its
    /// default value. Use [`BaseExperiment::go_constant`] to keep the value instead.
    fn constant(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        duration: f64,
        value: f64,
    ) -> CompileResult<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::AO, |chan| {
            chan.constant(value, t, Some((duration, false)))
        })
    }

    /// Sets an AO channel to `value` from `t` until the next instruction.
    fn go_constant(&mut self, dev_name: &str, chan_name: &str, t: f64, value: f64) -> CompileResult<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::AO, |chan| {
            chan.constant(value, t, None)
        })
    }

    /// Sine waveform on an AO channel, see [`Instruction::new_sine`] for the arguments.
    ///
    /// ```
    /// # use expcompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_ao_device("PXI1Slot3", 1e6).unwrap();
    /// exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();
    /// // t=0, duration=1, keep_val=false, freq=10Hz, amplitude=10, phase=0(default), dc_offset=0(default)
    /// exp.sine("PXI1Slot3", "ao0", 0., 1., false, 10., Some(10.), None, None).unwrap();
    /// ```
    #[allow(clippy::too_many_arguments)]
    fn sine(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        duration: f64,
        keep_val: bool,
        freq: f64,
        amplitude: Option<f64>,
        phase: Option<f64>,
        dc_offset: Option<f64>,
    ) -> CompileResult<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::AO, |chan| {
            let instr = Instruction::new_sine(freq, amplitude, phase, dc_offset);
            chan.add_instr(instr, t, Some((duration, keep_val)))
        })
    }

    /// Same as [`BaseExperiment::sine`] but running until the next instruction.
    #[allow(clippy::too_many_arguments)]
    fn go_sine(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        freq: f64,
        amplitude: Option<f64>,
        phase: Option<f64>,
        dc_offset: Option<f64>,
    ) -> CompileResult<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::AO, |chan| {
            let instr = Instruction::new_sine(freq, amplitude, phase, dc_offset);
            chan.add_instr(instr, t, None)
        })
    }

    /// Linear ramp on an AO channel from `start_val` at `t` to `end_val` at `t + duration`.
    #[allow(clippy::too_many_arguments)]
    fn linramp(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        duration: f64,
        start_val: f64,
        end_val: f64,
        keep_val: bool,
    ) -> CompileResult<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::AO, |chan| {
            let instr = Instruction::new_linramp(start_val, end_val, t, t + duration)?;
            chan.add_instr(instr, t, Some((duration, keep_val)))
        })
    }

    /// Geometric ramp on an AO channel; both values must be non-zero with the same sign.
    #[allow(clippy::too_many_arguments)]
    fn expramp(
        &mut self,
        dev_name: &str,
        chan_name: &str,
        t: f64,
        duration: f64,
        start_val: f64,
        end_val: f64,
        keep_val: bool,
    ) -> CompileResult<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::AO, |chan| {
            let instr = Instruction::new_expramp(start_val, end_val, t, t + duration)?;
            chan.add_instr(instr, t, Some((duration, keep_val)))
        })
    }

    fn high(&mut self, dev_name: &str, chan_name: &str, t: f64, duration: f64) -> CompileResult<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::DO, |chan| {
            chan.constant(1., t, Some((duration, false)))
        })
    }

    fn low(&mut self, dev_name: &str, chan_name: &str, t: f64, duration: f64) -> CompileResult<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::DO, |chan| {
            chan.constant(0., t, Some((duration, false)))
        })
    }

    /// Sets a DO line high from `t` until its next instruction.
    fn go_high(&mut self, dev_name: &str, chan_name: &str, t: f64) -> CompileResult<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::DO, |chan| {
            chan.constant(1., t, None)
        })
    }

    /// Sets a DO line low from `t` until its next instruction.
    fn go_low(&mut self, dev_name: &str, chan_name: &str, t: f64) -> CompileResult<()> {
        self.typed_channel_op(dev_name, chan_name, TaskType::DO, |chan| {
            chan.constant(0., t, None)
        })
    }

    /// ```
    /// # use expcompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_do_device("PXI1Slot7", 1e6).unwrap();
    /// exp.add_do_channel("PXI1Slot7", 0, 7, 0.).unwrap();
    /// exp.go_high("PXI1Slot7", "port0/line7", 0.).unwrap();
    /// assert_eq!(exp.is_fresh_compiled(), false);
    /// exp.channel_clear_edit_cache("PXI1Slot7", "port0/line7").unwrap();
    /// assert_eq!(exp.is_fresh_compiled(), true);
    /// ```
    fn channel_clear_edit_cache(&mut self, dev_name: &str, chan_name: &str) -> CompileResult<()> {
        self.channel_op(dev_name, chan_name, |chan| {
            chan.clear_edit_cache();
            Ok(())
        })
    }

    fn channel_clear_compile_cache(&mut self, dev_name: &str, chan_name: &str) -> CompileResult<()> {
        self.channel_op(dev_name, chan_name, |chan| {
            chan.clear_compile_cache();
            Ok(())
        })
    }

    /// Samples one compiled channel between two times.
    ///
    /// ```
    /// # use expcompiler_backend::*;
    /// let mut exp = Experiment::new();
    /// exp.add_do_device("PXI1Slot7", 1e6).unwrap();
    /// exp.add_do_channel("PXI1Slot7", 0, 7, 0.).unwrap();
    /// exp.go_high("PXI1Slot7", "port0/line7", 0.5).unwrap();
    /// exp.compile(Some(1.)).unwrap();
    /// let sig = exp.channel_calc_signal_nsamps("PXI1Slot7", "port0/line7", 0., 1., 10).unwrap();
    /// assert_eq!(sig[0], 0.);
    /// assert_eq!(sig[sig.len() - 1], 1.);
    /// ```
    fn channel_calc_signal_nsamps(
        &self,
        dev_name: &str,
        chan_name: &str,
        start_time: f64,
        end_time: f64,
        num_samps: usize,
    ) -> CompileResult<Vec<f64>> {
        self.dev(dev_name)?
            .chan(chan_name)?
            .calc_signal_nsamps(start_time, end_time, num_samps)
    }

    fn channel_last_instr_end_time(&self, dev_name: &str, chan_name: &str) -> CompileResult<f64> {
        Ok(self.dev(dev_name)?.chan(chan_name)?.last_instr_end_time())
    }
}

/// A concrete struct consisting of a collection of devices.
///
/// **Refer to the [`BaseExperiment`] trait for method behavior.**
#[derive(Clone, Debug, Default)]
pub struct Experiment {
    devices: IndexMap<String, Device>,
}

impl Experiment {
    /// Creates an experiment with no devices.
    pub fn new() -> Self {
        Self {
            devices: IndexMap::new(),
        }
    }
}

/// Implements [`BaseExperiment`] for a struct with a `devices: IndexMap<String, Device>` field.
///
/// ```rust
/// use expcompiler_backend::*;
///
/// struct CustomExperiment {
///     devices: IndexMap<String, Device>,
///     some_property: f64,
/// }
/// impl_exp_boilerplate!(CustomExperiment);
///
/// let mut exp = CustomExperiment {
///     devices: IndexMap::new(),
///     some_property: 1.0,
/// };
/// exp.add_ao_device("PXI1Slot3", 1e6).unwrap();
/// assert_eq!(exp.devices().len(), 1);
/// ```
#[macro_export]
macro_rules! impl_exp_boilerplate {
    ($exp_type: ty) => {
        impl $crate::experiment::BaseExperiment for $exp_type {
            fn devices(&self) -> &$crate::IndexMap<String, $crate::device::Device> {
                &self.devices
            }
            fn devices_(&mut self) -> &mut $crate::IndexMap<String, $crate::device::Device> {
                &mut self.devices
            }
        }
    };
}

impl_exp_boilerplate!(Experiment);
