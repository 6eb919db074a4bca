//! Output instruments a compiled device streams to.
//!
//! The [`Instrument`] trait is the seam between the streaming workers and hardware. Two
//! implementations are provided:
//! - [`TcpInstrument`] talks to a device server over the length-prefixed protocol of
//!   [`crate::codec`] and [`crate::protocol`], one request/response round trip per call.
//! - [`MockInstrument`] accepts everything and records each call in an [`InstrumentLog`], which
//!   several mocks may share to observe the relative order of calls across devices.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use ndarray::Array2;
use parking_lot::Mutex;
use tracing::debug;

use crate::codec::{recv_msg, send_msg};
use crate::error::{CtrlError, CtrlResult};
use crate::protocol::{Request, Response, TaskConfig};

/// A buffered output task on one device.
///
/// Calls follow the order `configure`, (`write_*`, `start`, `write_*`..., `wait_until_done`,
/// `stop`) per repetition. Signals are shaped `[channels, samples]`.
pub trait Instrument: Send {
    fn name(&self) -> &str;
    fn ping(&mut self) -> CtrlResult<()>;
    fn configure(&mut self, cfg: &TaskConfig) -> CtrlResult<()>;
    fn write_analog(&mut self, signal: &Array2<f64>) -> CtrlResult<()>;
    fn write_digital(&mut self, words: &Array2<u32>) -> CtrlResult<()>;
    fn start(&mut self) -> CtrlResult<()>;
    /// Blocks until the task finishes or `timeout_s` elapses. Returns whether the task finished.
    fn wait_until_done(&mut self, timeout_s: f64) -> CtrlResult<bool>;
    fn stop(&mut self) -> CtrlResult<()>;
    fn reset(&mut self) -> CtrlResult<()>;
}

/// Client side of a device server connection.
pub struct TcpInstrument {
    name: String,
    stream: TcpStream,
    io_timeout: Duration,
}

impl TcpInstrument {
    /// Connects to `addr` within `io_timeout`, which also bounds every later read and write.
    pub fn connect<A: ToSocketAddrs>(name: &str, addr: A, io_timeout: Duration) -> CtrlResult<Self> {
        let mut last_err = None;
        for sock_addr in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&sock_addr, io_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(io_timeout))?;
                    stream.set_write_timeout(Some(io_timeout))?;
                    stream.set_nodelay(true)?;
                    debug!("Instrument {} connected to {}", name, sock_addr);
                    return Ok(Self {
                        name: name.to_string(),
                        stream,
                        io_timeout,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.map_or_else(
            || CtrlError::Instrument {
                name: name.to_string(),
                message: "address resolved to nothing".to_string(),
            },
            CtrlError::Io,
        ))
    }

    /// One request/response round trip. `Response::Error` becomes [`CtrlError::Instrument`].
    pub fn request(&mut self, req: &Request) -> CtrlResult<Response> {
        send_msg(&mut self.stream, req)?;
        match recv_msg(&mut self.stream)? {
            Some(Response::Error { message }) => Err(CtrlError::Instrument {
                name: self.name.clone(),
                message,
            }),
            Some(resp) => Ok(resp),
            None => Err(CtrlError::ConnectionClosed(self.name.clone())),
        }
    }

    fn expect_ok(&mut self, req: &Request) -> CtrlResult<()> {
        match self.request(req)? {
            Response::Ok => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    fn unexpected(&self, resp: Response) -> CtrlError {
        CtrlError::UnexpectedResponse {
            name: self.name.clone(),
            response: format!("{:?}", resp),
        }
    }
}

impl Instrument for TcpInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn ping(&mut self) -> CtrlResult<()> {
        match self.request(&Request::Ping)? {
            Response::Pong => Ok(()),
            other => Err(self.unexpected(other)),
        }
    }

    fn configure(&mut self, cfg: &TaskConfig) -> CtrlResult<()> {
        self.expect_ok(&Request::Configure(cfg.clone()))
    }

    fn write_analog(&mut self, signal: &Array2<f64>) -> CtrlResult<()> {
        let req = Request::WriteAnalog {
            nchans: signal.nrows(),
            data: signal.iter().copied().collect(),
        };
        self.expect_ok(&req)
    }

    fn write_digital(&mut self, words: &Array2<u32>) -> CtrlResult<()> {
        let req = Request::WriteDigital {
            nports: words.nrows(),
            data: words.iter().copied().collect(),
        };
        self.expect_ok(&req)
    }

    fn start(&mut self) -> CtrlResult<()> {
        self.expect_ok(&Request::Start)
    }

    fn wait_until_done(&mut self, timeout_s: f64) -> CtrlResult<bool> {
        // The server may legitimately block for the whole timeout before answering
        let wait = Duration::try_from_secs_f64(timeout_s.max(0.))
            .ok()
            .filter(|_| !timeout_s.is_nan())
            .and_then(|timeout| timeout.checked_add(self.io_timeout))
            .ok_or_else(|| CtrlError::Instrument {
                name: self.name.clone(),
                message: format!("invalid wait timeout {} s", timeout_s),
            })?;
        self.stream.set_read_timeout(Some(wait))?;
        let resp = self.request(&Request::WaitUntilDone { timeout_s });
        self.stream.set_read_timeout(Some(self.io_timeout))?;
        match resp? {
            Response::Done { finished } => Ok(finished),
            other => Err(self.unexpected(other)),
        }
    }

    fn stop(&mut self) -> CtrlResult<()> {
        self.expect_ok(&Request::Stop)
    }

    fn reset(&mut self) -> CtrlResult<()> {
        self.expect_ok(&Request::Reset)
    }
}

/// A call received by a [`MockInstrument`].
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentCall {
    Ping,
    Configure(TaskConfig),
    WriteAnalog(Array2<f64>),
    WriteDigital(Array2<u32>),
    Start,
    WaitUntilDone(f64),
    Stop,
    Reset,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub instrument: String,
    pub call: InstrumentCall,
}

/// Shared, thread-safe record of instrument calls.
#[derive(Debug, Clone, Default)]
pub struct InstrumentLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl InstrumentLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, instrument: &str, call: InstrumentCall) {
        self.entries.lock().push(LogEntry {
            instrument: instrument.to_string(),
            call,
        });
    }

    /// Snapshot of all entries in call order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Calls received by one instrument, in order.
    pub fn calls(&self, instrument: &str) -> Vec<InstrumentCall> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.instrument == instrument)
            .map(|entry| entry.call.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

/// Instrument that accepts every call and records it.
///
/// ```
/// use expctrl_backend::instrument::*;
///
/// let log = InstrumentLog::new();
/// let mut mock = MockInstrument::with_log("PXI1Slot3", log.clone());
/// mock.start().unwrap();
/// assert!(mock.wait_until_done(1.).unwrap());
/// assert_eq!(log.calls("PXI1Slot3"), vec![InstrumentCall::Start, InstrumentCall::WaitUntilDone(1.)]);
///
/// // Injected failures are reported as instrument errors
/// let mut failing = MockInstrument::new("PXI1Slot4").fail_on("start");
/// assert!(failing.start().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct MockInstrument {
    name: String,
    log: InstrumentLog,
    fail_on: Option<String>,
    finishes: bool,
}

impl Default for MockInstrument {
    fn default() -> Self {
        Self::new("mock")
    }
}

impl MockInstrument {
    pub fn new(name: &str) -> Self {
        Self::with_log(name, InstrumentLog::new())
    }

    pub fn with_log(name: &str, log: InstrumentLog) -> Self {
        Self {
            name: name.to_string(),
            log,
            fail_on: None,
            finishes: true,
        }
    }

    /// Makes every call named `call` (`"start"`, `"write_digital"`...) fail.
    pub fn fail_on(mut self, call: &str) -> Self {
        self.fail_on = Some(call.to_string());
        self
    }

    /// Sets what `wait_until_done` reports.
    pub fn finishes(mut self, finishes: bool) -> Self {
        self.finishes = finishes;
        self
    }

    pub fn log(&self) -> &InstrumentLog {
        &self.log
    }

    fn record(&self, call_name: &str, call: InstrumentCall) -> CtrlResult<()> {
        if self.fail_on.as_deref() == Some(call_name) {
            return Err(CtrlError::Instrument {
                name: self.name.clone(),
                message: format!("injected failure on {}", call_name),
            });
        }
        self.log.push(&self.name, call);
        Ok(())
    }
}

impl Instrument for MockInstrument {
    fn name(&self) -> &str {
        &self.name
    }

    fn ping(&mut self) -> CtrlResult<()> {
        self.record("ping", InstrumentCall::Ping)
    }

    fn configure(&mut self, cfg: &TaskConfig) -> CtrlResult<()> {
        self.record("configure", InstrumentCall::Configure(cfg.clone()))
    }

    fn write_analog(&mut self, signal: &Array2<f64>) -> CtrlResult<()> {
        self.record("write_analog", InstrumentCall::WriteAnalog(signal.clone()))
    }

    fn write_digital(&mut self, words: &Array2<u32>) -> CtrlResult<()> {
        self.record("write_digital", InstrumentCall::WriteDigital(words.clone()))
    }

    fn start(&mut self) -> CtrlResult<()> {
        self.record("start", InstrumentCall::Start)
    }

    fn wait_until_done(&mut self, timeout_s: f64) -> CtrlResult<bool> {
        self.record("wait_until_done", InstrumentCall::WaitUntilDone(timeout_s))?;
        Ok(self.finishes)
    }

    fn stop(&mut self) -> CtrlResult<()> {
        self.record("stop", InstrumentCall::Stop)
    }

    fn reset(&mut self) -> CtrlResult<()> {
        self.record("reset", InstrumentCall::Reset)
    }
}
