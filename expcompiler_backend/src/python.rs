//! Python bindings, built with the `python` feature.
//!
//! PyO3 doesn't expose trait methods directly, so [`impl_py_exp_methods`] wraps every
//! [`BaseExperiment`](crate::experiment::BaseExperiment) method of the struct's `inner` field in a
//! `#[pymethods]` block. [`CompileError`]s are raised as python `ValueError`s.

use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::error::CompileError;
use crate::experiment::Experiment;

pub fn to_py_err(err: CompileError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// Generates python wrappers for a `#[pyclass]` struct whose `inner` field implements
/// [`BaseExperiment`](crate::experiment::BaseExperiment).
///
/// The struct may carry additional `#[pymethods]` blocks (PyO3 `multiple-pymethods`).
#[macro_export]
macro_rules! impl_py_exp_methods {
    ($py_type: ty) => {
        #[::pyo3::pymethods]
        impl $py_type {
            pub fn add_ao_device(&mut self, name: &str, samp_rate: f64) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::add_ao_device(&mut self.inner, name, samp_rate)
                    .map_err($crate::python::to_py_err)
            }

            pub fn add_do_device(&mut self, name: &str, samp_rate: f64) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::add_do_device(&mut self.inner, name, samp_rate)
                    .map_err($crate::python::to_py_err)
            }

            pub fn last_instr_end_time(&self) -> f64 {
                $crate::experiment::BaseExperiment::last_instr_end_time(&self.inner)
            }

            pub fn total_run_time(&self) -> f64 {
                $crate::experiment::BaseExperiment::total_run_time(&self.inner)
            }

            pub fn check_trig_config(&self) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::check_trig_config(&self.inner)
                    .map_err($crate::python::to_py_err)
            }

            pub fn compile(&mut self, stop_time: Option<f64>) -> ::pyo3::PyResult<f64> {
                $crate::experiment::BaseExperiment::compile(&mut self.inner, stop_time)
                    .map_err($crate::python::to_py_err)
            }

            pub fn is_edited(&self) -> bool {
                $crate::experiment::BaseExperiment::is_edited(&self.inner)
            }

            pub fn is_compiled(&self) -> bool {
                $crate::experiment::BaseExperiment::is_compiled(&self.inner)
            }

            pub fn is_fresh_compiled(&self) -> bool {
                $crate::experiment::BaseExperiment::is_fresh_compiled(&self.inner)
            }

            pub fn clear_edit_cache(&mut self) {
                $crate::experiment::BaseExperiment::clear_edit_cache(&mut self.inner)
            }

            pub fn clear_compile_cache(&mut self) {
                $crate::experiment::BaseExperiment::clear_compile_cache(&mut self.inner)
            }

            pub fn add_reset_instr(&mut self, reset_time: Option<f64>) -> ::pyo3::PyResult<f64> {
                $crate::experiment::BaseExperiment::add_reset_instr(&mut self.inner, reset_time)
                    .map_err($crate::python::to_py_err)
            }

            // DEVICE METHODS
            pub fn add_ao_channel(
                &mut self,
                name: &str,
                channel_id: usize,
                default_value: f64,
            ) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::add_ao_channel(
                    &mut self.inner,
                    name,
                    channel_id,
                    default_value,
                )
                .map_err($crate::python::to_py_err)
            }

            pub fn add_do_channel(
                &mut self,
                name: &str,
                port_id: usize,
                line_id: usize,
                default_value: f64,
            ) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::add_do_channel(
                    &mut self.inner,
                    name,
                    port_id,
                    line_id,
                    default_value,
                )
                .map_err($crate::python::to_py_err)
            }

            pub fn device_cfg_samp_clk_src(&mut self, name: &str, src: &str) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::device_cfg_samp_clk_src(&mut self.inner, name, src)
                    .map_err($crate::python::to_py_err)
            }

            pub fn device_cfg_trig(
                &mut self,
                name: &str,
                trig_line: &str,
                export_trig: bool,
            ) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::device_cfg_trig(
                    &mut self.inner,
                    name,
                    trig_line,
                    export_trig,
                )
                .map_err($crate::python::to_py_err)
            }

            pub fn device_cfg_ref_clk(
                &mut self,
                name: &str,
                ref_clk_line: &str,
                ref_clk_rate: f64,
                export_ref_clk: bool,
            ) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::device_cfg_ref_clk(
                    &mut self.inner,
                    name,
                    ref_clk_line,
                    ref_clk_rate,
                    export_ref_clk,
                )
                .map_err($crate::python::to_py_err)
            }

            pub fn device_compiled_channel_names(
                &self,
                name: &str,
                require_streamable: bool,
                require_editable: bool,
            ) -> ::pyo3::PyResult<Vec<String>> {
                $crate::experiment::BaseExperiment::device_compiled_channel_names(
                    &self.inner,
                    name,
                    require_streamable,
                    require_editable,
                )
                .map_err($crate::python::to_py_err)
            }

            /// Samples the compiled channels of a device between two times into a numpy array.
            #[allow(clippy::too_many_arguments)]
            pub fn calc_signal(
                &self,
                name: &str,
                t_start: f64,
                t_end: f64,
                nsamps: usize,
                require_streamable: bool,
                require_editable: bool,
                py: ::pyo3::Python,
            ) -> ::pyo3::PyResult<::pyo3::PyObject> {
                use $crate::device::BaseDevice;
                let dev = $crate::experiment::BaseExperiment::dev(&self.inner, name)
                    .map_err($crate::python::to_py_err)?;
                let samp_rate = dev.samp_rate();
                let arr = dev
                    .calc_signal_nsamps(
                        (t_start * samp_rate).round() as usize,
                        (t_end * samp_rate).round() as usize,
                        nsamps,
                        require_streamable,
                        require_editable,
                    )
                    .map_err($crate::python::to_py_err)?;
                Ok(::pyo3::ToPyObject::to_object(
                    ::numpy::PyArray2::from_owned_array(py, arr),
                    py,
                ))
            }

            /// `(positions, port words)` of a compiled digital port.
            pub fn device_transition_table(
                &self,
                name: &str,
                port: usize,
            ) -> ::pyo3::PyResult<(Vec<usize>, Vec<u32>)> {
                let table = $crate::experiment::BaseExperiment::device_transition_table(
                    &self.inner,
                    name,
                    port,
                )
                .map_err($crate::python::to_py_err)?;
                Ok((table.positions(), table.words()))
            }

            pub fn device_last_instr_end_time(&self, name: &str) -> ::pyo3::PyResult<f64> {
                $crate::experiment::BaseExperiment::device_last_instr_end_time(&self.inner, name)
                    .map_err($crate::python::to_py_err)
            }

            pub fn device_total_run_time(&self, name: &str) -> ::pyo3::PyResult<f64> {
                $crate::experiment::BaseExperiment::device_total_run_time(&self.inner, name)
                    .map_err($crate::python::to_py_err)
            }

            pub fn device_clear_compile_cache(&mut self, name: &str) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::device_clear_compile_cache(&mut self.inner, name)
                    .map_err($crate::python::to_py_err)
            }

            pub fn device_clear_edit_cache(&mut self, name: &str) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::device_clear_edit_cache(&mut self.inner, name)
                    .map_err($crate::python::to_py_err)
            }

            // INSTRUCTION METHODS
            pub fn constant(
                &mut self,
                dev_name: &str,
                chan_name: &str,
                t: f64,
                duration: f64,
                value: f64,
            ) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::constant(
                    &mut self.inner,
                    dev_name,
                    chan_name,
                    t,
                    duration,
                    value,
                )
                .map_err($crate::python::to_py_err)
            }

            pub fn go_constant(
                &mut self,
                dev_name: &str,
                chan_name: &str,
                t: f64,
                value: f64,
            ) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::go_constant(&mut self.inner, dev_name, chan_name, t, value)
                    .map_err($crate::python::to_py_err)
            }

            #[allow(clippy::too_many_arguments)]
            pub fn sine(
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
            ) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::sine(
                    &mut self.inner,
                    dev_name,
                    chan_name,
                    t,
                    duration,
                    keep_val,
                    freq,
                    amplitude,
                    phase,
                    dc_offset,
                )
                .map_err($crate::python::to_py_err)
            }

            #[allow(clippy::too_many_arguments)]
            pub fn go_sine(
                &mut self,
                dev_name: &str,
                chan_name: &str,
                t: f64,
                freq: f64,
                amplitude: Option<f64>,
                phase: Option<f64>,
                dc_offset: Option<f64>,
            ) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::go_sine(
                    &mut self.inner,
                    dev_name,
                    chan_name,
                    t,
                    freq,
                    amplitude,
                    phase,
                    dc_offset,
                )
                .map_err($crate::python::to_py_err)
            }

            #[allow(clippy::too_many_arguments)]
            pub fn linramp(
                &mut self,
                dev_name: &str,
                chan_name: &str,
                t: f64,
                duration: f64,
                start_val: f64,
                end_val: f64,
                keep_val: bool,
            ) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::linramp(
                    &mut self.inner,
                    dev_name,
                    chan_name,
                    t,
                    duration,
                    start_val,
                    end_val,
                    keep_val,
                )
                .map_err($crate::python::to_py_err)
            }

            #[allow(clippy::too_many_arguments)]
            pub fn expramp(
                &mut self,
                dev_name: &str,
                chan_name: &str,
                t: f64,
                duration: f64,
                start_val: f64,
                end_val: f64,
                keep_val: bool,
            ) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::expramp(
                    &mut self.inner,
                    dev_name,
                    chan_name,
                    t,
                    duration,
                    start_val,
                    end_val,
                    keep_val,
                )
                .map_err($crate::python::to_py_err)
            }

            pub fn high(&mut self, dev_name: &str, chan_name: &str, t: f64, duration: f64) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::high(&mut self.inner, dev_name, chan_name, t, duration)
                    .map_err($crate::python::to_py_err)
            }

            pub fn low(&mut self, dev_name: &str, chan_name: &str, t: f64, duration: f64) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::low(&mut self.inner, dev_name, chan_name, t, duration)
                    .map_err($crate::python::to_py_err)
            }

            pub fn go_high(&mut self, dev_name: &str, chan_name: &str, t: f64) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::go_high(&mut self.inner, dev_name, chan_name, t)
                    .map_err($crate::python::to_py_err)
            }

            pub fn go_low(&mut self, dev_name: &str, chan_name: &str, t: f64) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::go_low(&mut self.inner, dev_name, chan_name, t)
                    .map_err($crate::python::to_py_err)
            }

            // CHANNEL METHODS
            pub fn channel_clear_compile_cache(&mut self, dev_name: &str, chan_name: &str) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::channel_clear_compile_cache(&mut self.inner, dev_name, chan_name)
                    .map_err($crate::python::to_py_err)
            }

            pub fn channel_clear_edit_cache(&mut self, dev_name: &str, chan_name: &str) -> ::pyo3::PyResult<()> {
                $crate::experiment::BaseExperiment::channel_clear_edit_cache(&mut self.inner, dev_name, chan_name)
                    .map_err($crate::python::to_py_err)
            }

            pub fn channel_last_instr_end_time(&self, dev_name: &str, chan_name: &str) -> ::pyo3::PyResult<f64> {
                $crate::experiment::BaseExperiment::channel_last_instr_end_time(&self.inner, dev_name, chan_name)
                    .map_err($crate::python::to_py_err)
            }

            pub fn channel_calc_signal_nsamps(
                &self,
                dev_name: &str,
                chan_name: &str,
                start_time: f64,
                end_time: f64,
                num_samps: usize,
            ) -> ::pyo3::PyResult<Vec<f64>> {
                $crate::experiment::BaseExperiment::channel_calc_signal_nsamps(
                    &self.inner,
                    dev_name,
                    chan_name,
                    start_time,
                    end_time,
                    num_samps,
                )
                .map_err($crate::python::to_py_err)
            }
        }
    };
}

/// Python-facing experiment without streaming support.
#[pyclass(name = "Experiment")]
pub struct PyExperiment {
    pub inner: Experiment,
}

#[pymethods]
impl PyExperiment {
    #[new]
    pub fn new() -> Self {
        Self {
            inner: Experiment::new(),
        }
    }
}

impl Default for PyExperiment {
    fn default() -> Self {
        Self::new()
    }
}

crate::impl_py_exp_methods!(PyExperiment);

#[pymodule]
fn expcompiler_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyExperiment>()?;
    Ok(())
}
