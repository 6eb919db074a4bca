use std::net::{SocketAddr, TcpStream};
use std::thread::JoinHandle;
use std::time::Duration;

use ndarray::{array, concatenate, Array2, Axis};

use expcompiler_backend::*;
use expctrl_backend::codec::*;
use expctrl_backend::instrument::*;
use expctrl_backend::protocol::*;
use expctrl_backend::server::DeviceServer;
use expctrl_backend::{CtrlError, CtrlResult, Experiment};

const TIMEOUT: Duration = Duration::from_secs(5);

/// Serves one connection to a mock instrument on a background thread.
fn spawn_server(mock: MockInstrument) -> (SocketAddr, JoinHandle<CtrlResult<usize>>) {
    let mut server = DeviceServer::bind("127.0.0.1:0", Box::new(mock)).unwrap();
    let addr = server.local_addr().unwrap();
    (addr, std::thread::spawn(move || server.serve_one()))
}

#[test]
fn round_trip() {
    let log = InstrumentLog::new();
    let (addr, handle) = spawn_server(MockInstrument::with_log("PXI1Slot6", log.clone()));

    let mut client = TcpInstrument::connect("PXI1Slot6", addr, TIMEOUT).unwrap();
    client.ping().unwrap();
    client.write_digital(&array![[1, 2], [3, 4]]).unwrap();
    client.start().unwrap();
    assert!(client.wait_until_done(0.5).unwrap());
    client.stop().unwrap();
    client.reset().unwrap();
    drop(client);

    assert_eq!(handle.join().unwrap().unwrap(), 6);
    assert_eq!(
        log.calls("PXI1Slot6"),
        vec![
            InstrumentCall::Ping,
            InstrumentCall::WriteDigital(array![[1, 2], [3, 4]]),
            InstrumentCall::Start,
            InstrumentCall::WaitUntilDone(0.5),
            InstrumentCall::Stop,
            InstrumentCall::Reset,
        ]
    );
}

#[test]
fn instrument_errors_keep_the_connection() {
    let (addr, handle) = spawn_server(MockInstrument::new("PXI1Slot3").fail_on("start"));

    let mut client = TcpInstrument::connect("PXI1Slot3", addr, TIMEOUT).unwrap();
    match client.start() {
        Err(CtrlError::Instrument { name, message }) => {
            assert_eq!(name, "PXI1Slot3");
            assert!(message.contains("injected failure on start"));
        }
        other => panic!("expected an instrument error, got {:?}", other),
    }
    client.ping().unwrap();
    drop(client);
    assert_eq!(handle.join().unwrap().unwrap(), 2);
}

#[test]
fn invalid_requests_are_answered() {
    let (addr, handle) = spawn_server(MockInstrument::default());
    let mut stream = TcpStream::connect(addr).unwrap();

    write_frame(&mut stream, br#"{"cmd":"fly"}"#).unwrap();
    match recv_msg::<_, Response>(&mut stream).unwrap() {
        Some(Response::Error { message }) => assert!(message.starts_with("Invalid request")),
        other => panic!("expected an error response, got {:?}", other),
    }
    // Analog data that doesn't split into rows
    send_msg(
        &mut stream,
        &Request::WriteAnalog {
            nchans: 2,
            data: vec![0.; 3],
        },
    )
    .unwrap();
    assert!(matches!(
        recv_msg::<_, Response>(&mut stream).unwrap(),
        Some(Response::Error { .. })
    ));
    send_msg(&mut stream, &Request::Ping).unwrap();
    assert_eq!(
        recv_msg::<_, Response>(&mut stream).unwrap(),
        Some(Response::Pong)
    );
    drop(stream);
    assert_eq!(handle.join().unwrap().unwrap(), 3);
}

#[test]
fn stream_over_tcp() {
    let mut exp = Experiment::new();
    exp.add_do_device("PXI1Slot6", 1e3).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 1, 0.).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 7, 0.).unwrap();
    exp.high("PXI1Slot6", "port0/line1", 0.1, 0.2).unwrap();
    exp.go_high("PXI1Slot6", "port0/line7", 0.25).unwrap();
    exp.compile(Some(0.5)).unwrap();

    let log = InstrumentLog::new();
    let (addr, handle) = spawn_server(MockInstrument::with_log("PXI1Slot6", log.clone()));
    let client = TcpInstrument::connect("PXI1Slot6", addr, TIMEOUT).unwrap();
    exp.attach_instrument("PXI1Slot6", Box::new(client)).unwrap();
    exp.stream_exp(200., 2).unwrap();
    drop(exp);
    handle.join().unwrap().unwrap();

    let calls = log.calls("PXI1Slot6");
    let Some(InstrumentCall::Configure(cfg)) = calls.first() else {
        panic!("the task is configured first");
    };
    assert_eq!(cfg.kind, TaskKind::Do);
    assert_eq!(cfg.total_samps, 500);
    assert_eq!(cfg.bufsize, 200);

    let chunks: Vec<Array2<u32>> = calls
        .iter()
        .filter_map(|call| match call {
            InstrumentCall::WriteDigital(words) => Some(words.clone()),
            _ => None,
        })
        .collect();
    // 200 + 200 + 100 samples per repetition
    assert_eq!(chunks.len(), 6);
    let views: Vec<_> = chunks[..3].iter().map(|chunk| chunk.view()).collect();
    let first_rep = concatenate(Axis(1), &views).unwrap();
    assert_eq!(first_rep.dim(), (1, 500));
    assert_eq!(first_rep[[0, 99]], 0);
    assert_eq!(first_rep[[0, 100]], 0b10);
    assert_eq!(first_rep[[0, 250]], 0b1000_0010);
    assert_eq!(first_rep[[0, 300]], 0b1000_0000);
    assert_eq!(first_rep[[0, 499]], 0b1000_0000);
    // The second repetition replays the same words
    assert_eq!(chunks[3], chunks[0]);
    assert_eq!(
        calls
            .iter()
            .filter(|call| **call == InstrumentCall::Start)
            .count(),
        2
    );
}
