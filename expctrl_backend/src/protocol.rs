//! Messages exchanged with a device server.
//!
//! Every call is one [`Request`] frame answered by one [`Response`] frame (see [`crate::codec`]).
//! Messages are JSON objects tagged by `cmd` / `status`:
//!
//! ```
//! use expctrl_backend::protocol::*;
//!
//! let req = serde_json::to_string(&Request::WaitUntilDone { timeout_s: 2.0 }).unwrap();
//! assert_eq!(req, r#"{"cmd":"wait_until_done","timeout_s":2.0}"#);
//!
//! let resp: Response = serde_json::from_str(r#"{"status":"done","finished":true}"#).unwrap();
//! assert_eq!(resp, Response::Done { finished: true });
//! ```

use serde::{Deserialize, Serialize};

use expcompiler_backend::TaskType;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Request {
    Ping,
    Configure(TaskConfig),
    /// Row-major samples of shape `[nchans, data.len() / nchans]`.
    WriteAnalog { nchans: usize, data: Vec<f64> },
    /// Row-major port words of shape `[nports, data.len() / nports]`.
    WriteDigital { nports: usize, data: Vec<u32> },
    Start,
    WaitUntilDone { timeout_s: f64 },
    Stop,
    Reset,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::Configure(_) => "configure",
            Request::WriteAnalog { .. } => "write_analog",
            Request::WriteDigital { .. } => "write_digital",
            Request::Start => "start",
            Request::WaitUntilDone { .. } => "wait_until_done",
            Request::Stop => "stop",
            Request::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Pong,
    Done { finished: bool },
    Error { message: String },
}

/// Output kind of a task, mirroring [`TaskType`] on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Ao,
    Do,
}

impl From<TaskType> for TaskKind {
    fn from(task_type: TaskType) -> Self {
        match task_type {
            TaskType::AO => TaskKind::Ao,
            TaskType::DO => TaskKind::Do,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefClkConfig {
    pub line: String,
    pub rate: f64,
    pub export: bool,
}

/// Everything a device server needs to set up one buffered output task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskConfig {
    pub device: String,
    pub kind: TaskKind,
    pub samp_rate: f64,
    /// Streamed channel names, in write order (`ao0`, `port0`...).
    pub channels: Vec<String>,
    pub total_samps: usize,
    pub bufsize: usize,
    #[serde(default)]
    pub samp_clk_src: Option<String>,
    #[serde(default)]
    pub trig_line: Option<String>,
    #[serde(default)]
    pub export_trig: bool,
    #[serde(default)]
    pub ref_clk: Option<RefClkConfig>,
}

#[cfg(test)]
mod test {
    use crate::protocol::*;

    fn task_config() -> TaskConfig {
        TaskConfig {
            device: "PXI1Slot6".to_string(),
            kind: TaskKind::Do,
            samp_rate: 1e7,
            channels: vec!["port0".to_string()],
            total_samps: 100,
            bufsize: 10,
            samp_clk_src: Some("PXI1_Trig7".to_string()),
            trig_line: Some("PXI1_Trig0".to_string()),
            export_trig: false,
            ref_clk: None,
        }
    }

    #[test]
    fn request_tags() {
        let json = serde_json::to_value(Request::WriteDigital {
            nports: 1,
            data: vec![1, 0],
        })
        .unwrap();
        assert_eq!(json["cmd"], "write_digital");
        assert_eq!(json["nports"], 1);

        let json = serde_json::to_value(Request::Configure(task_config())).unwrap();
        assert_eq!(json["cmd"], "configure");
        assert_eq!(json["kind"], "do");
        assert_eq!(json["device"], "PXI1Slot6");

        let parsed: Request = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, Request::Configure(task_config()));
    }

    #[test]
    fn optional_task_fields() {
        let parsed: TaskConfig = serde_json::from_str(
            r#"{"device":"PXI1Slot3","kind":"ao","samp_rate":1e6,"channels":["ao0"],
                "total_samps":10,"bufsize":10}"#,
        )
        .unwrap();
        assert_eq!(parsed.kind, TaskKind::Ao);
        assert_eq!(parsed.trig_line, None);
        assert!(!parsed.export_trig);
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(serde_json::from_str::<Request>(r#"{"cmd":"self_destruct"}"#).is_err());
        let err: Response = serde_json::from_str(r#"{"status":"error","message":"busy"}"#).unwrap();
        assert_eq!(
            err,
            Response::Error {
                message: "busy".to_string()
            }
        );
    }
}
