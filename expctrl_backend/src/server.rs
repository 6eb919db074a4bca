//! Device server: exposes one [`Instrument`] over TCP.
//!
//! Connections are served one at a time, since an output task has a single owner. Within a
//! connection every request frame gets exactly one response frame. Instrument failures and
//! undecodable requests are answered with [`Response::Error`] and the connection stays open;
//! framing errors (oversized or truncated frames) close it.

use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::codec::{read_frame, send_msg};
use crate::error::{CtrlError, CtrlResult};
use crate::instrument::Instrument;
use crate::protocol::{Request, Response};

pub struct DeviceServer {
    listener: TcpListener,
    instrument: Box<dyn Instrument>,
}

impl DeviceServer {
    pub fn bind<A: ToSocketAddrs>(addr: A, instrument: Box<dyn Instrument>) -> CtrlResult<Self> {
        let listener = TcpListener::bind(addr)?;
        info!(
            "Device server for {} listening on {}",
            instrument.name(),
            listener.local_addr()?
        );
        Ok(Self {
            listener,
            instrument,
        })
    }

    pub fn local_addr(&self) -> CtrlResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts one connection and serves it until the client disconnects.
    /// Returns the number of requests handled.
    pub fn serve_one(&mut self) -> CtrlResult<usize> {
        let (stream, peer) = self.listener.accept()?;
        info!("Connection from {}", peer);
        self.handle_connection(stream)
    }

    /// Accept loop. Connection errors are logged and the server keeps listening.
    pub fn run(&mut self) -> CtrlResult<()> {
        loop {
            match self.serve_one() {
                Ok(nreq) => info!("Connection closed after {} requests", nreq),
                Err(e) => warn!("Connection error: {}", e),
            }
        }
    }

    fn handle_connection(&mut self, mut stream: TcpStream) -> CtrlResult<usize> {
        stream.set_nodelay(true)?;
        let mut nreq = 0;
        while let Some(payload) = read_frame(&mut stream)? {
            let response = match serde_json::from_slice::<Request>(&payload) {
                Ok(req) => {
                    debug!("{} <- {}", self.instrument.name(), req.name());
                    self.handle_request(req)
                }
                Err(e) => Response::Error {
                    message: format!("Invalid request: {}", e),
                },
            };
            send_msg(&mut stream, &response)?;
            nreq += 1;
        }
        Ok(nreq)
    }

    fn handle_request(&mut self, req: Request) -> Response {
        let instr = self.instrument.as_mut();
        let res = match req {
            Request::Ping => instr.ping().map(|_| Response::Pong),
            Request::Configure(cfg) => instr.configure(&cfg).map(|_| Response::Ok),
            Request::WriteAnalog { nchans, data } => unflatten(nchans, data)
                .and_then(|signal| instr.write_analog(&signal))
                .map(|_| Response::Ok),
            Request::WriteDigital { nports, data } => unflatten(nports, data)
                .and_then(|words| instr.write_digital(&words))
                .map(|_| Response::Ok),
            Request::Start => instr.start().map(|_| Response::Ok),
            Request::WaitUntilDone { timeout_s } => instr
                .wait_until_done(timeout_s)
                .map(|finished| Response::Done { finished }),
            Request::Stop => instr.stop().map(|_| Response::Ok),
            Request::Reset => instr.reset().map(|_| Response::Ok),
        };
        res.unwrap_or_else(|e| Response::Error {
            message: e.to_string(),
        })
    }
}

/// Rebuilds a `[nrows, data.len() / nrows]` array from row-major data.
fn unflatten<T>(nrows: usize, data: Vec<T>) -> CtrlResult<Array2<T>> {
    if nrows == 0 || data.len() % nrows != 0 {
        return Err(CtrlError::Stream(format!(
            "{} samples cannot be split into {} rows",
            data.len(),
            nrows
        )));
    }
    let ncols = data.len() / nrows;
    Array2::from_shape_vec((nrows, ncols), data).map_err(|e| CtrlError::Stream(e.to_string()))
}

#[cfg(test)]
mod test {
    use crate::server::*;

    #[test]
    fn unflatten_rows() {
        let arr = unflatten(2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(arr.dim(), (2, 3));
        assert_eq!(arr[[1, 0]], 4);
        assert!(unflatten(4, vec![1., 2., 3.]).is_err());
        assert!(unflatten::<u32>(0, vec![]).is_err());
    }
}
