use expcompiler_backend::*;
use tracing_subscriber::EnvFilter;

fn main() -> CompileResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut exp = Experiment::new();
    exp.add_do_device("PXI1Slot6", 1e6)?;
    exp.add_do_channel("PXI1Slot6", 0, 0, 0.)?;
    exp.add_do_channel("PXI1Slot6", 0, 4, 0.)?;
    exp.high("PXI1Slot6", "port0/line0", 1., 4.)?;
    exp.high("PXI1Slot6", "port0/line4", 2., 5.)?;
    exp.compile(Some(10.))?;

    println!("{}", exp.device_transition_table("PXI1Slot6", 0)?);
    println!(
        "{:?}",
        exp.device_calc_signal_nsamps("PXI1Slot6", 0, 10_000_000, 10, true, false)?
    );
    Ok(())
}
