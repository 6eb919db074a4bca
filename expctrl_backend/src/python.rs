//! Python bindings, built with the `python` feature.
//!
//! The `Experiment` class carries every sequence editing method of the compiler backend (through
//! [`expcompiler_backend::impl_py_exp_methods`]) plus streaming. Errors are raised as python
//! `ValueError`s.

use std::time::Duration;

use numpy::PyReadonlyArray2;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::analysis::LoadingStats;
use crate::config::ExperimentConfig;
use crate::error::CtrlError;
use crate::experiment::Experiment;
use crate::instrument::TcpInstrument;

pub fn to_py_err(err: CtrlError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

#[pyclass(name = "Experiment")]
pub struct PyExperiment {
    pub inner: Experiment,
}

impl Default for PyExperiment {
    fn default() -> Self {
        Self::new()
    }
}

#[pymethods]
impl PyExperiment {
    #[new]
    pub fn new() -> Self {
        Self {
            inner: Experiment::new(),
        }
    }

    /// Builds and compiles the experiment described by a TOML file, connecting every device
    /// that has an address.
    #[staticmethod]
    pub fn from_config(path: &str, connect: bool) -> PyResult<Self> {
        let cfg = ExperimentConfig::from_file(path).map_err(to_py_err)?;
        let mut inner = cfg.build_experiment().map_err(to_py_err)?;
        if connect {
            cfg.connect_instruments(&mut inner).map_err(to_py_err)?;
        }
        Ok(Self { inner })
    }

    pub fn connect_instrument(&mut self, name: &str, address: &str, timeout_s: f64) -> PyResult<()> {
        let instrument =
            TcpInstrument::connect(name, address, Duration::from_secs_f64(timeout_s.max(0.)))
                .map_err(to_py_err)?;
        self.inner
            .attach_instrument(name, Box::new(instrument))
            .map_err(to_py_err)?;
        Ok(())
    }

    pub fn detach_instrument(&mut self, name: &str) -> bool {
        self.inner.detach_instrument(name).is_some()
    }

    pub fn has_instrument(&self, name: &str) -> bool {
        self.inner.has_instrument(name)
    }

    /// Streams the compiled experiment. The GIL is released while streaming.
    pub fn stream_exp(&mut self, py: Python, bufsize_ms: f64, nreps: usize) -> PyResult<()> {
        let inner = &mut self.inner;
        py.allow_threads(move || inner.stream_exp(bufsize_ms, nreps))
            .map_err(to_py_err)
    }

    pub fn reset_device(&mut self, name: &str) -> PyResult<()> {
        self.inner.reset_device(name).map_err(to_py_err)
    }

    pub fn reset_devices(&mut self) -> PyResult<()> {
        self.inner.reset_devices().map_err(to_py_err)
    }
}

expcompiler_backend::impl_py_exp_methods!(PyExperiment);

/// Per-site `(loading, loading_err, retention, retention_err)` from two `[shots, sites]` count
/// arrays.
#[pyfunction]
#[allow(clippy::type_complexity)]
pub fn loading_stats(
    first: PyReadonlyArray2<f64>,
    second: PyReadonlyArray2<f64>,
    threshold: f64,
) -> PyResult<(Vec<f64>, Vec<f64>, Vec<f64>, Vec<f64>)> {
    let stats = LoadingStats::from_counts(
        &first.as_array().to_owned(),
        &second.as_array().to_owned(),
        threshold,
    )
    .map_err(to_py_err)?;
    Ok((
        stats.loading.to_vec(),
        stats.loading_err.to_vec(),
        stats.retention.to_vec(),
        stats.retention_err.to_vec(),
    ))
}

#[pymodule]
fn expctrl_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyExperiment>()?;
    m.add_function(wrap_pyfunction!(loading_stats, m)?)?;
    Ok(())
}
