use expcompiler_backend::*;

/// Two AO cards and one DO card sharing a start trigger and a reference clock.
fn demo_experiment() -> Experiment {
    let mut exp = Experiment::new();
    // Define devices and associated channels
    exp.add_ao_device("PXI1Slot3", 1e3).unwrap();
    exp.add_ao_channel("PXI1Slot3", 0, 0.).unwrap();

    exp.add_ao_device("PXI1Slot4", 1e3).unwrap();
    exp.add_ao_channel("PXI1Slot4", 0, 0.).unwrap();

    exp.add_do_device("PXI1Slot6", 1e4).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 4, 0.).unwrap();

    // Synchronization: PXI1Slot3 is the primary device
    exp.device_cfg_trig("PXI1Slot3", "PXI1_Trig0", true).unwrap();
    exp.device_cfg_ref_clk("PXI1Slot3", "PXI1_Trig7", 1e7, true)
        .unwrap();

    exp.device_cfg_trig("PXI1Slot4", "PXI1_Trig0", false).unwrap();
    exp.device_cfg_ref_clk("PXI1Slot4", "PXI1_Trig7", 1e7, false)
        .unwrap();

    exp.device_cfg_samp_clk_src("PXI1Slot6", "PXI1_Trig7").unwrap();
    exp.device_cfg_trig("PXI1Slot6", "PXI1_Trig0", false).unwrap();

    // PXI1Slot3/ao0 starts with a 1s-long 7Hz sine wave with offset 1
    // and unit amplitude, zero phase. Does not keep its value.
    exp.sine("PXI1Slot3", "ao0", 0., 1., false, 7., None, None, Some(1.))
        .unwrap();
    // Ends with a half-second long 1V constant signal which returns to zero
    exp.constant("PXI1Slot3", "ao0", 9., 0.5, 1.).unwrap();

    // PXI1Slot4/ao0 is left empty: it will simply not be compiled

    // Both lines of PXI1Slot6 start with a one-second "high" at t=0 and a half-second high at t=9
    exp.high("PXI1Slot6", "port0/line0", 0., 1.).unwrap();
    exp.high("PXI1Slot6", "port0/line0", 9., 0.5).unwrap();
    // The same waveform through go_high / go_low
    exp.go_high("PXI1Slot6", "port0/line4", 0.).unwrap();
    exp.go_low("PXI1Slot6", "port0/line4", 1.).unwrap();
    exp.go_high("PXI1Slot6", "port0/line4", 9.).unwrap();
    exp.go_low("PXI1Slot6", "port0/line4", 9.5).unwrap();
    exp
}

#[test]
fn demo_compile() {
    let mut exp = demo_experiment();
    assert_eq!(exp.compile(Some(10.)), Ok(10.));

    let compiled: Vec<&str> = exp.compiled_devices().iter().map(|dev| dev.name()).collect();
    assert_eq!(compiled, vec!["PXI1Slot3", "PXI1Slot6"]);

    // Identical line waveforms collapse into one transition per edge
    let table = exp.device_transition_table("PXI1Slot6", 0).unwrap();
    assert_eq!(table.nlines(), 5);
    assert_eq!(table.positions(), vec![0, 10_000, 90_000, 95_000]);
    assert_eq!(table.words(), vec![0b10001, 0, 0b10001, 0]);

    let sig = exp
        .device_calc_signal_nsamps("PXI1Slot6", 0, 100_000, 20, true, false)
        .unwrap();
    assert_eq!(sig.dim(), (1, 20));
    assert_eq!(sig[[0, 1]], 17.);
    assert_eq!(sig[[0, 2]], 0.);
    assert_eq!(sig[[0, 18]], 17.);
    assert_eq!(sig[[0, 19]], 0.);

    let ao = exp
        .channel_calc_signal_nsamps("PXI1Slot3", "ao0", 0., 10., 20)
        .unwrap();
    assert_eq!(ao[10], 0.);
    assert_eq!(ao[18], 1.);

    // Recompiling with a later stop time only extends the tail
    assert_eq!(exp.compile(Some(12.)), Ok(12.));
    let table = exp.device_transition_table("PXI1Slot6", 0).unwrap();
    assert_eq!(table.positions(), vec![0, 10_000, 90_000, 95_000]);
    assert_eq!(table.stop_pos(), 120_000);
}

#[test]
fn empty_compile() {
    let mut exp = Experiment::new();
    exp.add_do_device("PXI1Slot6", 1e7).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();

    assert_eq!(exp.compile(None), Ok(0.));
    assert!(!exp.is_compiled());
}

#[test]
fn empty_calc_signal() {
    let mut exp = Experiment::new();
    exp.add_do_device("PXI1Slot6", 1e7).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();

    exp.compile(None).unwrap();
    let err = exp
        .device_calc_signal_nsamps("PXI1Slot6", 0, 10, 100, false, false)
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("there is no channel with streamable=false, editable=false"));
}

#[test]
fn test_reset_tick() {
    let mut exp = Experiment::new();
    exp.add_do_device("PXI1Slot6", 10.).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 0, 0.).unwrap();
    exp.add_do_channel("PXI1Slot6", 0, 1, 0.).unwrap();

    exp.high("PXI1Slot6", "port0/line0", 0., 1.).unwrap();
    exp.go_high("PXI1Slot6", "port0/line1", 0.).unwrap();
    exp.compile(Some(5.)).unwrap();

    // Calculate from t=0 ~ 5
    let sig = exp
        .device_calc_signal_nsamps("PXI1Slot6", 0, 50, 50, false, true)
        .unwrap();
    assert!(sig[[0, 9]] == 1. && sig[[0, 10]] == 0.);
    assert!(sig[[1, 9]] == 1. && sig[[1, 10]] == 1.);

    let reset_time = exp.add_reset_instr(None).unwrap();
    // Reset happens right after the latest instruction across all channels
    assert_eq!(reset_time, 1.0);
    exp.compile(Some(5.)).unwrap();
    let sig = exp
        .device_calc_signal_nsamps("PXI1Slot6", 0, 50, 50, false, true)
        .unwrap();
    assert!(sig[[0, 9]] == 1. && sig[[0, 10]] == 0.);
    assert!(sig[[1, 9]] == 1. && sig[[1, 10]] == 0.); // Also zeros line 1 at t=1

    // The streamed port word follows both lines
    let table = exp.device_transition_table("PXI1Slot6", 0).unwrap();
    assert_eq!(table.positions(), vec![0, 10]);
    assert_eq!(table.words(), vec![0b11, 0]);
}
