//! Multi-server queueing simulation application.
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications
)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::default_trait_access)]

use std::convert::TryFrom;
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;

use clap::Parser;
use eyre::WrapErr;
use indicatif::{ProgressBar, ProgressStyle};
use rand_distr::Exp;
use serde::Deserialize;

use dsim::{
    Context, ElementId, ElementObserver, Experiment, Simulation, StreamId, StreamResetPolicy,
    DEFAULT_SEED,
};
use mmsim::{Source, Station, SummaryLog};

/// Runs a multi-server queueing simulation over several replications.
#[derive(Parser)]
#[clap(version)]
struct Opt {
    /// Number of identical servers at the station.
    #[clap(long, default_value = "2")]
    servers: usize,

    /// Customer arrivals per second.
    #[clap(long, default_value = "1.0")]
    arrival_rate: f64,

    /// Services completed per second per server.
    #[clap(long, default_value = "0.6")]
    service_rate: f64,

    /// Path to a JSON model configuration; overrides the model flags above.
    #[clap(long)]
    config: Option<PathBuf>,

    /// Number of replications to run.
    #[clap(long, default_value = "5")]
    replications: usize,

    /// Length of each replication.
    #[clap(long, default_value = "10m")]
    length: humantime::Duration,

    /// Warm-up period; statistics reset this far into each replication.
    #[clap(long)]
    warm_up: Option<humantime::Duration>,

    /// How streams are repositioned at each replication start.
    #[clap(long, default_value = "substream")]
    stream_reset: StreamResetPolicy,

    /// Run replications in antithetic pairs.
    #[clap(long)]
    antithetic: bool,

    /// Six-integer generator seed; defaults to the generator's standard seed.
    #[clap(long, number_of_values = 6)]
    seed: Option<Vec<u64>>,

    /// Where to write the per-replication CSV summary.
    #[clap(long, default_value = "replications.csv")]
    output: PathBuf,

    /// Verbosity.
    #[clap(short, long, parse(from_occurrences))]
    verbose: i32,

    /// Store the logs in this file.
    #[clap(long)]
    log_output: Option<PathBuf>,

    /// Do not log to the stderr.
    #[clap(long)]
    no_stderr: bool,
}

/// Model parameters, loadable from a JSON file instead of flags.
#[derive(Debug, Deserialize)]
struct ModelConfig {
    servers: usize,
    arrival_rate: f64,
    service_rate: f64,
}

impl TryFrom<&Opt> for ModelConfig {
    type Error = eyre::Error;

    fn try_from(opt: &Opt) -> eyre::Result<Self> {
        let config = if let Some(path) = &opt.config {
            let file = File::open(path)
                .wrap_err_with(|| format!("unable to open model config: {}", path.display()))?;
            serde_json::from_reader(file)
                .wrap_err_with(|| format!("unable to parse model config: {}", path.display()))?
        } else {
            Self {
                servers: opt.servers,
                arrival_rate: opt.arrival_rate,
                service_rate: opt.service_rate,
            }
        };
        eyre::ensure!(config.servers > 0, "servers must be positive");
        eyre::ensure!(
            config.arrival_rate > 0.0,
            "arrival rate must be positive"
        );
        eyre::ensure!(
            config.service_rate > 0.0,
            "service rate must be positive"
        );
        Ok(config)
    }
}

/// Advances a progress bar every time the station finishes a replication.
struct ProgressObserver {
    bar: ProgressBar,
}

impl ElementObserver for ProgressObserver {
    fn after_replication(&mut self, _element: ElementId, ctx: &mut Context<'_>) {
        self.bar.set_message(&format!(
            "replication ended at {}s",
            ctx.time().as_secs()
        ));
        self.bar.inc(1);
    }
}

fn run(opt: &Opt, config: &ModelConfig) -> eyre::Result<()> {
    let seed = match &opt.seed {
        Some(values) => <[u64; 6]>::try_from(values.as_slice())
            .map_err(|_| eyre::eyre!("the seed must have exactly six values"))?,
        None => DEFAULT_SEED,
    };
    let mut sim = Simulation::with_seed(seed)?;

    let summary = SummaryLog::shared();
    let service = Exp::new(config.service_rate)
        .map_err(|e| eyre::eyre!("invalid service rate {}: {}", config.service_rate, e))?;
    let interarrival = Exp::new(config.arrival_rate)
        .map_err(|e| eyre::eyre!("invalid arrival rate {}: {}", config.arrival_rate, e))?;
    let station = sim.model.add_element(
        sim.model.root(),
        "station",
        Station::new(config.servers, service, StreamId::from(1), summary.clone())?,
    )?;
    sim.model.add_element(
        sim.model.root(),
        "source",
        Source::new(station, interarrival, StreamId::from(0)),
    )?;
    if let Some(warm_up) = opt.warm_up {
        sim.model.set_warm_up(station, Some(warm_up.into()))?;
    }

    let bar = ProgressBar::new(opt.replications as u64)
        .with_style(ProgressStyle::default_bar().template("{msg} {wide_bar} {pos}/{len}"));
    sim.model.attach_observer(
        station,
        std::rc::Rc::new(std::cell::RefCell::new(ProgressObserver {
            bar: bar.clone(),
        })),
    )?;

    let mut experiment = Experiment::new(opt.replications)?
        .replication_length(opt.length.into())
        .stream_reset(opt.stream_reset)
        .antithetic_pairs(opt.antithetic);
    experiment.run(&mut sim)?;
    bar.finish();

    let summary = summary.borrow();
    log::info!(
        "{} replications done; grand mean wait {:.3}s",
        summary.rows().len(),
        summary.grand_mean_wait()
    );
    let output = File::create(&opt.output)
        .wrap_err_with(|| format!("unable to create output file: {}", opt.output.display()))?;
    summary
        .write_csv(BufWriter::new(output))
        .wrap_err("unable to write replication summary")?;
    Ok(())
}

/// Set up a logger based on the given user options.
fn set_up_logger(opt: &Opt) -> Result<(), fern::InitError> {
    let log_level = match opt.verbose {
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        3 => log::LevelFilter::Trace,
        _ => log::LevelFilter::Warn,
    };
    let dispatch = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[{}] {}", record.level(), message)))
        .level(log_level);
    let dispatch = if let Some(path) = &opt.log_output {
        let _ = std::fs::remove_file(path);
        dispatch.chain(
            std::fs::OpenOptions::new()
                .write(true)
                .create(true)
                .append(false)
                .open(path)?,
        )
    } else {
        dispatch
    };
    let dispatch = if opt.no_stderr {
        dispatch
    } else {
        dispatch.chain(std::io::stderr())
    };
    dispatch.apply()?;
    Ok(())
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let opt = Opt::parse();
    set_up_logger(&opt).wrap_err("unable to set up logging")?;
    let config = ModelConfig::try_from(&opt)?;
    run(&opt, &config)
}
