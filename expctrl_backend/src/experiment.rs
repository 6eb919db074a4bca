//! # Streaming experiments to networked devices
//!
//! This module extends the sequence editing of [`expcompiler_backend::BaseExperiment`] with
//! streaming. Its [`Experiment`] carries the same device collection (through
//! [`impl_exp_boilerplate`]) plus one [`Instrument`] per device that should be streamed.
//!
//! ## How to use
//!
//! 1. **Design:** add devices, channels and instructions through the `BaseExperiment` methods.
//! 2. **Attach instruments:** [`Experiment::attach_instrument`] a [`crate::instrument::TcpInstrument`]
//!    (or a [`crate::instrument::MockInstrument`] for dry runs) to every device with instructions.
//! 3. **Compile and stream:** [`BaseExperiment::compile`] then [`Experiment::stream_exp`].
//!
//! ## Threading
//!
//! [`Experiment::stream_exp`] spawns one scoped worker thread per compiled device. Workers wait
//! for [`WorkerCmd`]s on a broadcast [`CmdChan`] and report the outcome of every step over a
//! `crossbeam` channel. The coordinator only posts the next repetition once every worker has
//! reported the current one, so the whole experiment advances in lockstep and the first error
//! stops it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver};
use indexmap::IndexMap;
use tracing::{info, warn};

use expcompiler_backend::*;

use crate::device::{StreamWorker, StreamableDevice};
use crate::error::{CtrlError, CtrlResult};
use crate::instrument::Instrument;
use crate::utils::Semaphore;
use crate::worker_cmd_chan::{CmdChan, CmdRecvr, WorkerCmd};

/// Outcome of one worker step, tagged with the device name.
type WorkerReport = (String, CtrlResult<()>);

/// An experiment that can stream its compiled devices.
///
/// **Refer to [`BaseExperiment`] for sequence editing and compilation.**
#[derive(Default)]
pub struct Experiment {
    devices: IndexMap<String, Device>,
    instruments: IndexMap<String, Box<dyn Instrument>>,
}

impl_exp_boilerplate!(Experiment);

impl Experiment {
    pub fn new() -> Self {
        Self {
            devices: IndexMap::new(),
            instruments: IndexMap::new(),
        }
    }

    /// Attaches the instrument streaming device `name`, returning the one it replaces.
    pub fn attach_instrument(
        &mut self,
        name: &str,
        instrument: Box<dyn Instrument>,
    ) -> CtrlResult<Option<Box<dyn Instrument>>> {
        self.dev(name)?;
        Ok(self.instruments.insert(name.to_string(), instrument))
    }

    pub fn detach_instrument(&mut self, name: &str) -> Option<Box<dyn Instrument>> {
        self.instruments.shift_remove(name)
    }

    pub fn has_instrument(&self, name: &str) -> bool {
        self.instruments.contains_key(name)
    }

    /// Streams every compiled device `nreps` times with a buffer of `bufsize_ms` milliseconds.
    ///
    /// Fails before touching any instrument if a compiled device has no instrument attached or
    /// the trigger configuration is inconsistent.
    ///
    /// ```
    /// use expcompiler_backend::*;
    /// use expctrl_backend::instrument::*;
    /// use expctrl_backend::Experiment;
    ///
    /// let mut exp = Experiment::new();
    /// exp.add_do_device("PXI1Slot6", 1e3).unwrap();
    /// exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    /// exp.high("PXI1Slot6", "port0/line0", 0., 0.5).unwrap();
    /// exp.compile(Some(1.)).unwrap();
    ///
    /// let log = InstrumentLog::new();
    /// exp.attach_instrument("PXI1Slot6", Box::new(MockInstrument::with_log("PXI1Slot6", log.clone())))
    ///     .unwrap();
    /// exp.stream_exp(100., 2).unwrap();
    /// assert_eq!(
    ///     log.calls("PXI1Slot6").iter().filter(|call| **call == InstrumentCall::Start).count(),
    ///     2
    /// );
    /// ```
    pub fn stream_exp(&mut self, bufsize_ms: f64, nreps: usize) -> CtrlResult<()> {
        if bufsize_ms.is_nan() || bufsize_ms <= 0. {
            return Err(CtrlError::Stream(format!(
                "Buffer size must be positive, got {} ms",
                bufsize_ms
            )));
        }
        if nreps == 0 {
            return Ok(());
        }
        self.check_trig_config()?;
        let compiled: Vec<&str> = self
            .compiled_devices()
            .iter()
            .map(|dev| dev.name())
            .collect();
        if compiled.is_empty() {
            warn!("stream_exp: no compiled device to stream");
            return Ok(());
        }
        if let Some(missing) = compiled.iter().find(|name| !self.has_instrument(name)) {
            return Err(CtrlError::NoInstrument(missing.to_string()));
        }
        let num_devices = compiled.len();

        let Self {
            devices,
            instruments,
        } = self;
        let devices = &*devices;
        let jobs: Vec<(&Device, &mut Box<dyn Instrument>)> = instruments
            .iter_mut()
            .filter_map(|(name, instr)| {
                devices
                    .get(name)
                    .filter(|dev| dev.is_compiled())
                    .map(|dev| (dev, instr))
            })
            .collect();

        let sem = Arc::new(Semaphore::new(1));
        let cmd_chan = CmdChan::new();
        let (report_sender, report_recvr) = unbounded::<WorkerReport>();
        let mut timer = TickTimer::new();

        crossbeam::scope(|s| {
            for (dev, instr) in jobs {
                let recvr = cmd_chan.new_recvr();
                let sender = report_sender.clone();
                let sem = sem.clone();
                s.spawn(move |_| {
                    let report = |res: CtrlResult<()>| {
                        let _ = sender.send((dev.name().to_string(), res));
                    };
                    let body = AssertUnwindSafe(|| {
                        stream_worker_loop(dev, instr.as_mut(), recvr, &sem, num_devices, bufsize_ms, report)
                    });
                    if panic::catch_unwind(body).is_err() {
                        // A secondary that panicked before starting still owes the primary a permit
                        sem.release();
                        report(Err(CtrlError::Stream(format!(
                            "Device {} streaming worker panicked",
                            dev.name()
                        ))));
                    }
                });
            }
            // Only workers hold senders now, so a vanished worker disconnects the channel
            drop(report_sender);

            let mut res = collect_reports(&report_recvr, num_devices);
            timer.tick_print("stream_exp setup");
            if res.is_ok() {
                for rep in 0..nreps {
                    cmd_chan.send(WorkerCmd::Stream(rep + 1 < nreps));
                    res = collect_reports(&report_recvr, num_devices);
                    timer.tick_print(&format!("stream_exp rep {}", rep));
                    if res.is_err() {
                        break;
                    }
                }
            }
            cmd_chan.send(WorkerCmd::Close);
            res
        })
        .map_err(|_| CtrlError::Stream("a streaming worker panicked".to_string()))??;

        info!("Streamed {} devices x {} repetitions", num_devices, nreps);
        Ok(())
    }

    /// Resets the instrument attached to device `name`.
    pub fn reset_device(&mut self, name: &str) -> CtrlResult<()> {
        self.dev(name)?;
        let instr = self
            .instruments
            .get_mut(name)
            .ok_or_else(|| CtrlError::NoInstrument(name.to_string()))?;
        instr.reset()
    }

    /// Resets every attached instrument.
    pub fn reset_devices(&mut self) -> CtrlResult<()> {
        for instr in self.instruments.values_mut() {
            instr.reset()?;
        }
        Ok(())
    }
}

/// Body of one device worker: setup, then one repetition per [`WorkerCmd::Stream`] until
/// [`WorkerCmd::Close`]. Every step is reported exactly once.
fn stream_worker_loop<D, F>(
    dev: &D,
    instr: &mut dyn Instrument,
    mut recvr: CmdRecvr,
    sem: &Semaphore,
    num_devices: usize,
    bufsize_ms: f64,
    report: F,
) where
    D: StreamableDevice,
    F: Fn(CtrlResult<()>),
{
    let mut worker = match StreamWorker::new(dev, instr, bufsize_ms) {
        Ok(worker) => {
            report(Ok(()));
            worker
        }
        Err(e) => {
            report(Err(e));
            return;
        }
    };
    loop {
        match recvr.recv() {
            Ok(WorkerCmd::Stream(more_reps)) => {
                report(worker.run_rep(instr, sem, num_devices, more_reps))
            }
            Ok(WorkerCmd::Close) => break,
            Err(e) => {
                report(Err(e));
                break;
            }
        }
    }
}

/// Waits for one report per worker and returns the first error.
fn collect_reports(recvr: &Receiver<WorkerReport>, num_workers: usize) -> CtrlResult<()> {
    let mut first_err = None;
    for _ in 0..num_workers {
        let (name, res) = recvr
            .recv()
            .map_err(|_| CtrlError::Stream("streaming workers disconnected".to_string()))?;
        if let Err(e) = res {
            warn!("Device {} failed: {}", name, e);
            first_err.get_or_insert(e);
        }
    }
    first_err.map_or(Ok(()), Err)
}
