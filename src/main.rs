use anyhow::{Context, Result};
use ats_pipeline::*;
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, CombinedLogger, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::{
    fs::File,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

#[derive(Parser, Debug)]
#[command(name = "ats-pipeline")]
#[command(about = "Stream a two-channel digitizer through averaging workers")]
struct Cli {
    /// Configuration file
    #[arg(short = 'c', long, default_value = "config.toml")]
    config: PathBuf,

    /// Also log to this file, or to a timestamped file inside this directory
    #[arg(short = 'l', long)]
    log_file: Option<PathBuf>,

    /// Stop the acquisition after this many seconds
    #[arg(short = 'd', long)]
    duration_s: Option<f64>,

    /// Noise of the simulated board in ADC codes
    #[arg(long, default_value = "40")]
    noise: u16,

    /// Time the simulated board takes to fill one buffer, ms
    #[arg(long, default_value = "1")]
    fill_ms: u64,

    /// Write reduced vectors to this HDF5 file, or to a timestamped file
    /// inside this directory
    #[cfg(feature = "hdf5")]
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Debug output on the terminal
    #[arg(short = 'v', long)]
    verbose: bool,
}

/// `path` itself, or `ats_<stamp>.<ext>` inside it when it is a directory.
fn stamped(path: &Path, ext: &str) -> PathBuf {
    if path.is_dir() {
        path.join(format!("ats_{}.{ext}", file_stamp()))
    } else {
        path.to_path_buf()
    }
}

fn init_logging(cli: &Cli) -> Result<()> {
    let term_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        term_level,
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = &cli.log_file {
        let path = stamped(path, "log");
        let file = File::create(&path)
            .with_context(|| format!("Could not create log file {}", path.display()))?;
        loggers.push(WriteLogger::new(
            LevelFilter::Debug,
            simplelog::Config::default(),
            file,
        ));
    }
    CombinedLogger::init(loggers)?;
    Ok(())
}

fn run_with<D: Display>(pipeline: &Pipeline, cli: &Cli, display: &mut D) -> Result<RunReport> {
    let board = SimBoard::noisy(12, cli.noise).with_fill_interval(Duration::from_millis(cli.fill_ms));
    let mut producer = AcquisitionProducer::new(board);

    let stop = StopSignal::new();
    if let Some(secs) = cli.duration_s {
        let timer = crossbeam_channel::after(Duration::from_secs_f64(secs.max(0.0)));
        let stop = stop.clone();
        thread::spawn(move || {
            if timer.recv().is_ok() {
                info!("Run time of {secs} s elapsed, stopping");
                stop.raise();
            }
        });
    }

    let report = pipeline.run(&mut producer, display, &stop)?;
    Ok(report)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let conf = Conf::load(&cli.config)
        .with_context(|| format!("Could not load {}", cli.config.display()))?;
    let pipeline = Pipeline::new(conf)?;

    #[cfg(feature = "hdf5")]
    let report = match &cli.output {
        Some(path) => {
            let path = stamped(path, "h5");
            let conf = pipeline.conf();
            let mut writer = Hdf5Writer::new(
                &path,
                &["A", "B"],
                conf.acquisition.acquired_samples,
                conf.acquisition.buffers_per_acquisition,
                50,
            )?;
            info!("Writing reduced vectors to {}", path.display());
            run_with(&pipeline, &cli, &mut writer)?
        }
        None => run_with(&pipeline, &cli, &mut LogDisplay::default())?,
    };
    #[cfg(not(feature = "hdf5"))]
    let report = run_with(&pipeline, &cli, &mut LogDisplay::default())?;

    info!("{}", report.summary.counter.summary());
    for worker in &report.workers {
        info!(
            "Worker {}: {} of {} buffers reduced, {} dropped",
            worker.worker, worker.reduced, worker.assigned, worker.dropped
        );
    }
    if !report.is_complete() {
        warn!("Stopped before every worker finished: {:?}", report.completion);
    }
    if let Some((a, b)) = &report.combined {
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len().max(1) as f64;
        info!(
            "Overall mean: channel A {:.6} V, channel B {:.6} V",
            mean(a),
            mean(b)
        );
    }
    Ok(())
}
