use std::io::Write;

use expcompiler_backend::*;
use expctrl_backend::config::ExperimentConfig;
use expctrl_backend::instrument::*;
use expctrl_backend::server::DeviceServer;
use expctrl_backend::CtrlError;

fn config_text(address: &str) -> String {
    format!(
        r#"
stop_time = 1.0

[stream]
bufsize_ms = 100.0
nreps = 2

[[devices]]
name = "PXI1Slot3"
kind = "ao"
samp_rate = 1e3
trig_line = "PXI1_Trig0"
export_trig = true
channels = [{{ name = "ao0" }}]

[[devices]]
name = "PXI1Slot6"
kind = "do"
samp_rate = 1e3
address = "{address}"
timeout_s = 2.0
trig_line = "PXI1_Trig0"
channels = [{{ name = "port0/line0" }}]

[[sequence]]
op = "linramp"
device = "PXI1Slot3"
channel = "ao0"
t = 0.0
duration = 0.5
start_val = 0.0
end_val = 1.0

[[sequence]]
op = "high"
device = "PXI1Slot6"
channel = "port0/line0"
t = 0.2
duration = 0.3
"#
    )
}

#[test]
fn load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(config_text("127.0.0.1:1").as_bytes()).unwrap();

    let cfg = ExperimentConfig::from_file(file.path()).unwrap();
    assert_eq!(cfg.stream.nreps, 2);
    assert_eq!(cfg.devices.len(), 2);
    assert_eq!(cfg.devices[1].address.as_deref(), Some("127.0.0.1:1"));

    let exp = cfg.build_experiment().unwrap();
    assert_eq!(exp.total_run_time(), 1.);
    let table = exp.device_transition_table("PXI1Slot6", 0).unwrap();
    assert_eq!(table.positions(), vec![0, 200, 500]);
}

#[test]
fn missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let res = ExperimentConfig::from_file(dir.path().join("missing.toml"));
    assert!(matches!(res, Err(CtrlError::Io(_))));
}

#[test]
fn connect_and_stream() {
    let log = InstrumentLog::new();
    let mut server = DeviceServer::bind(
        "127.0.0.1:0",
        Box::new(MockInstrument::with_log("PXI1Slot6", log.clone())),
    )
    .unwrap();
    let addr = server.local_addr().unwrap();
    let handle = std::thread::spawn(move || server.serve_one());

    let cfg = ExperimentConfig::from_toml_str(&config_text(&addr.to_string())).unwrap();
    let mut exp = cfg.build_experiment().unwrap();
    assert_eq!(cfg.connect_instruments(&mut exp).unwrap(), 1);
    assert!(exp.has_instrument("PXI1Slot6"));

    // PXI1Slot3 is compiled but has no instrument
    assert!(matches!(
        exp.stream_exp(cfg.stream.bufsize_ms, cfg.stream.nreps),
        Err(CtrlError::NoInstrument(_))
    ));
    exp.attach_instrument("PXI1Slot3", Box::new(MockInstrument::with_log("PXI1Slot3", log.clone())))
        .unwrap();
    exp.stream_exp(cfg.stream.bufsize_ms, cfg.stream.nreps).unwrap();
    drop(exp);
    handle.join().unwrap().unwrap();

    let starts: Vec<String> = log
        .entries()
        .into_iter()
        .filter(|entry| entry.call == InstrumentCall::Start)
        .map(|entry| entry.instrument)
        .collect();
    assert_eq!(starts, ["PXI1Slot6", "PXI1Slot3", "PXI1Slot6", "PXI1Slot3"]);
}
