//! Chunked streaming of a compiled device to its [`Instrument`].
//!
//! A device's sequence is sampled `bufsize` samples at a time. The first chunk is written before
//! the task starts; the remaining chunks are written while the task runs. When the sequence is
//! repeated, the first chunk of the next repetition is computed before waiting for the current
//! one to finish, so only the buffer write sits between `stop` and the next `start`.

use std::cmp::min;

use ndarray::Array2;
use tracing::debug;

use expcompiler_backend::*;

use crate::codec::MAX_FRAME_LEN;
use crate::error::{CtrlError, CtrlResult};
use crate::instrument::Instrument;
use crate::protocol::{RefClkConfig, TaskConfig};
use crate::utils::{Semaphore, StreamCounter};

/// Longest JSON text of one analog sample, `-1.2345678901234567e-308,`.
const ANALOG_SAMPLE_JSON_LEN: usize = 25;
/// Longest JSON text of one port word, `4294967295,`.
const DIGITAL_SAMPLE_JSON_LEN: usize = 11;

/// One buffer worth of samples, in the representation the instrument expects.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    Analog(Array2<f64>),
    /// Port words, one row per port.
    Digital(Array2<u32>),
}

impl Chunk {
    pub fn nsamps(&self) -> usize {
        match self {
            Chunk::Analog(signal) => signal.ncols(),
            Chunk::Digital(words) => words.ncols(),
        }
    }

    pub fn write_to(&self, instrument: &mut dyn Instrument) -> CtrlResult<()> {
        match self {
            Chunk::Analog(signal) => instrument.write_analog(signal),
            Chunk::Digital(words) => instrument.write_digital(words),
        }
    }
}

pub trait StreamableDevice: BaseDevice + Sync + Send {
    /// Buffer size in samples for a buffer of `bufsize_ms`, at most the whole sequence and at
    /// least one sample.
    fn stream_bufsize(&self, bufsize_ms: f64) -> usize {
        let bufsize = (bufsize_ms * self.samp_rate() / 1000.) as usize;
        min(self.total_samps(), bufsize).max(1)
    }

    /// Task description sent to the instrument before streaming.
    fn stream_config(&self, bufsize: usize) -> CtrlResult<TaskConfig> {
        if !self.is_compiled() {
            return Err(CtrlError::NotCompiled(self.name().to_string()));
        }
        let ref_clk = match (self.ref_clk_line(), self.ref_clk_rate()) {
            (Some(line), Some(rate)) => Some(RefClkConfig {
                line: line.to_string(),
                rate,
                export: self.export_ref_clk().unwrap_or(false),
            }),
            _ => None,
        };
        Ok(TaskConfig {
            device: self.name().to_string(),
            kind: self.task_type().into(),
            samp_rate: self.samp_rate(),
            channels: self
                .compiled_channels(true, false)
                .iter()
                .map(|chan| chan.name().to_string())
                .collect(),
            total_samps: self.check_total_samps()?,
            bufsize,
            samp_clk_src: self.samp_clk_src().map(str::to_string),
            trig_line: self.trig_line().map(str::to_string),
            export_trig: self.is_primary(),
            ref_clk,
        })
    }

    /// Upper bound of the encoded size of one chunk of `bufsize` samples.
    fn chunk_frame_len(&self, bufsize: usize) -> usize {
        let sample_len = match self.task_type() {
            TaskType::AO => ANALOG_SAMPLE_JSON_LEN,
            TaskType::DO => DIGITAL_SAMPLE_JSON_LEN,
        };
        self.compiled_channels(true, false).len() * bufsize * sample_len
    }

    /// Samples the streamed channels over `start_pos..end_pos`.
    fn chunk(&self, start_pos: usize, end_pos: usize) -> CtrlResult<Chunk> {
        let signal = self.calc_signal_nsamps(start_pos, end_pos, end_pos - start_pos, true, false)?;
        Ok(match self.task_type() {
            TaskType::AO => Chunk::Analog(signal),
            TaskType::DO => Chunk::Digital(signal.mapv(|word| word as u32)),
        })
    }
}

impl StreamableDevice for Device {}

/// Per-device streaming state carried across repetitions.
pub struct StreamWorker<'a, D: StreamableDevice> {
    dev: &'a D,
    counter: StreamCounter,
    end_pos: usize,
    bufsize_ms: f64,
    timer: TickTimer,
}

impl<'a, D: StreamableDevice> StreamWorker<'a, D> {
    /// Configures the instrument and preloads the first chunk.
    pub fn new(dev: &'a D, instrument: &mut dyn Instrument, bufsize_ms: f64) -> CtrlResult<Self> {
        let mut timer = TickTimer::new();
        let bufsize = dev.stream_bufsize(bufsize_ms);
        let cfg = dev.stream_config(bufsize)?;
        let frame_len = dev.chunk_frame_len(bufsize);
        if frame_len > MAX_FRAME_LEN {
            return Err(CtrlError::Stream(format!(
                "Device {}: a {} ms buffer encodes to up to {} bytes, above the {} byte frame \
                 limit; use a shorter buffer",
                dev.name(),
                bufsize_ms,
                frame_len,
                MAX_FRAME_LEN
            )));
        }
        let mut counter = StreamCounter::new(cfg.total_samps, bufsize);
        instrument.configure(&cfg)?;
        timer.tick_print(&format!("{} cfg (task channels, buffers, clk & sync)", dev.name()));

        let (start_pos, end_pos) = counter.tick_next();
        dev.chunk(start_pos, end_pos)?.write_to(instrument)?;
        timer.tick_print(&format!("{} bufwrite", dev.name()));
        Ok(Self {
            dev,
            counter,
            end_pos,
            bufsize_ms,
            timer,
        })
    }

    /// Time allowed for the task to finish once every chunk is written: twice the buffer
    /// duration plus one second.
    pub fn timeout_s(&self) -> f64 {
        self.bufsize_ms * 2. / 1000. + 1.
    }

    /// Runs one repetition.
    ///
    /// Secondary devices release `sem` once started; the primary device acquires it
    /// `num_devices` times before starting, so it starts last and its start trigger reaches
    /// every armed device. With `more_reps`, the first chunk of the next repetition is written
    /// after `stop`.
    pub fn run_rep(
        &mut self,
        instrument: &mut dyn Instrument,
        sem: &Semaphore,
        num_devices: usize,
        more_reps: bool,
    ) -> CtrlResult<()> {
        let dev = self.dev;
        let name = dev.name();
        let seq_len = self.counter.end_pos();
        if dev.is_primary() {
            (0..num_devices).for_each(|_| sem.acquire());
            // Restore the count to 1 for the next repetition
            sem.release();
        }
        let started = instrument.start();
        if !dev.is_primary() {
            sem.release();
        }
        started?;
        self.timer.tick_print(&format!("{} start (restart) overhead", name));

        while self.end_pos != seq_len {
            let (start_pos, end_pos) = self.counter.tick_next();
            dev.chunk(start_pos, end_pos)?.write_to(instrument)?;
            self.end_pos = end_pos;
        }

        let next_start = if more_reps {
            let (start_pos, end_pos) = self.counter.tick_next();
            self.end_pos = end_pos;
            Some(dev.chunk(start_pos, end_pos)?)
        } else {
            None
        };
        let timeout_s = self.timeout_s();
        if !instrument.wait_until_done(timeout_s)? {
            return Err(CtrlError::Stream(format!(
                "Device {} did not finish within {} s",
                name, timeout_s
            )));
        }
        self.timer.tick_print(&format!("{} end", name));
        instrument.stop()?;
        if let Some(chunk) = next_start {
            chunk.write_to(instrument)?;
            debug!("{} preloaded {} samples for the next repetition", name, chunk.nsamps());
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::device::*;
    use crate::instrument::*;
    use crate::protocol::TaskKind;

    fn do_device() -> Device {
        let mut dev = Device::new("PXI1Slot6", TaskType::DO, 100.);
        dev.add_channel("port0/line0", 0.).unwrap();
        dev.add_channel("port0/line2", 0.).unwrap();
        dev.chan_("port0/line0")
            .unwrap()
            .constant(1., 0.1, Some((0.2, false)))
            .unwrap();
        dev.chan_("port0/line2")
            .unwrap()
            .constant(1., 0.2, None)
            .unwrap();
        dev.cfg_trig("PXI1_Trig0", false);
        dev.compile(0.5).unwrap();
        dev
    }

    #[test]
    fn stream_config() {
        let dev = do_device();
        assert_eq!(dev.stream_bufsize(100.), 10);
        assert_eq!(dev.stream_bufsize(1e6), 50);
        let cfg = dev.stream_config(10).unwrap();
        assert_eq!(cfg.kind, TaskKind::Do);
        assert_eq!(cfg.channels, vec!["port0".to_string()]);
        assert_eq!(cfg.total_samps, 50);
        assert_eq!(cfg.trig_line.as_deref(), Some("PXI1_Trig0"));
        assert!(!cfg.export_trig);
        assert!(cfg.ref_clk.is_none());

        let fresh = Device::new("PXI1Slot3", TaskType::AO, 1e3);
        assert!(matches!(
            fresh.stream_config(10),
            Err(CtrlError::NotCompiled(_))
        ));
    }

    #[test]
    fn digital_chunks_are_port_words() {
        let dev = do_device();
        let Chunk::Digital(words) = dev.chunk(0, 50).unwrap() else {
            panic!("DO devices stream digital chunks");
        };
        assert_eq!(words.dim(), (1, 50));
        assert_eq!(words[[0, 9]], 0);
        assert_eq!(words[[0, 10]], 0b001);
        assert_eq!(words[[0, 20]], 0b101);
        assert_eq!(words[[0, 30]], 0b100);
        assert_eq!(words[[0, 49]], 0b100);
    }

    #[test]
    fn repetitions_cover_the_sequence() {
        let dev = do_device();
        let log = InstrumentLog::new();
        let mut mock = MockInstrument::with_log("PXI1Slot6", log.clone());
        let sem = Semaphore::new(1);

        let mut worker = StreamWorker::new(&dev, &mut mock, 200.).unwrap();
        assert!((worker.timeout_s() - 1.4).abs() < 1e-12);
        worker.run_rep(&mut mock, &sem, 1, true).unwrap();
        worker.run_rep(&mut mock, &sem, 1, false).unwrap();

        let calls = log.calls("PXI1Slot6");
        let kinds: Vec<&str> = calls
            .iter()
            .map(|call| match call {
                InstrumentCall::Configure(_) => "cfg",
                InstrumentCall::WriteDigital(_) => "write",
                InstrumentCall::Start => "start",
                InstrumentCall::WaitUntilDone(_) => "wait",
                InstrumentCall::Stop => "stop",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                "cfg", "write", "start", "write", "write", "wait", "stop", "write", // rep 0
                "start", "write", "write", "wait", "stop", // rep 1
            ]
        );
        // Each repetition writes the whole sequence, 20 + 20 + 10 samples
        let lens: Vec<usize> = calls
            .iter()
            .filter_map(|call| match call {
                InstrumentCall::WriteDigital(words) => Some(words.ncols()),
                _ => None,
            })
            .collect();
        assert_eq!(lens, vec![20, 20, 10, 20, 20, 10]);
        // Secondary devices leave one extra permit for the primary
        assert_eq!(sem.count(), 3);
    }

    #[test]
    fn oversized_buffers_are_rejected() {
        let mut dev = Device::new("PXI1Slot3", TaskType::AO, 1e6);
        for chan in ["ao0", "ao1", "ao2", "ao3"] {
            dev.add_channel(chan, 0.).unwrap();
            dev.chan_(chan)
                .unwrap()
                .constant(1., 0., Some((0.5, false)))
                .unwrap();
        }
        dev.compile(1.).unwrap();
        assert_eq!(dev.chunk_frame_len(1000), 4 * 1000 * 25);
        assert!(dev.chunk_frame_len(dev.stream_bufsize(100.)) <= MAX_FRAME_LEN);

        // One second of 4 channels at 1 MHz does not fit in a frame
        let log = InstrumentLog::new();
        let mut mock = MockInstrument::with_log("PXI1Slot3", log.clone());
        assert!(matches!(
            StreamWorker::new(&dev, &mut mock, 1000.),
            Err(CtrlError::Stream(_))
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn unfinished_task_is_an_error() {
        let dev = do_device();
        let mut mock = MockInstrument::new("PXI1Slot6").finishes(false);
        let sem = Semaphore::new(1);
        let mut worker = StreamWorker::new(&dev, &mut mock, 1000.).unwrap();
        assert!(matches!(
            worker.run_rep(&mut mock, &sem, 1, false),
            Err(CtrlError::Stream(_))
        ));
    }
}
