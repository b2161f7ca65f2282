mod app;
pub use app::App;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ctxcue_experiment::{
    ExperimentConfig, Session, SimulatedDevice, SimulatedParticipant, load_layouts, open_or_null,
    replay_log, run_headless,
};
use ctxcue_timing::{HighPrecisionTimer, ManualTimer};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about)]
/// Contextual cueing visual search with a staircase-timed vibrotactile cue
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// JSON config file; built-in defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a session for one subject
    Run(RunArgs),
    /// Recompute a logged response-timing staircase
    Replay {
        /// staircase_state_<subject>.csv written by a session
        log: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Subject id, used in every output file name
    #[arg(short, long)]
    subject: String,

    /// Trial layout CSV
    #[arg(short, long)]
    trials: Option<PathBuf>,

    /// Directory for the output files
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Serial port of the vibration controller
    #[arg(short, long)]
    port: Option<String>,

    /// Run without a window, with a simulated participant and device
    #[arg(long)]
    simulate: bool,

    /// Seed for trial randomisation
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = match &cli.config {
        Some(path) => ExperimentConfig::load(path)?,
        None => ExperimentConfig::default(),
    };

    match cli.command {
        Command::Run(args) => run(config, args),
        Command::Replay { log } => {
            let report = replay_log(config.staircase.params(), &log)
                .with_context(|| format!("replaying {}", log.display()))?;
            tracing::info!(
                rows = report.rows,
                updates = report.updates,
                rejected = report.rejected,
                final_delay_ms = report.final_delay_ms,
                logged_final_delay_ms = report.logged_final_delay_ms,
                "replay finished"
            );
            if report.reproduces_log() {
                Ok(())
            } else {
                anyhow::bail!(
                    "replay disagrees with the log at trials {:?}",
                    report.mismatches
                )
            }
        }
    }
}

fn run(mut config: ExperimentConfig, args: RunArgs) -> Result<()> {
    if let Some(trials) = args.trials {
        config.trials_path = trials;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }
    if let Some(port) = args.port {
        config.device.port = port;
    }
    config.validate()?;

    let layouts = load_layouts(&config.trials_path)
        .with_context(|| format!("loading layouts from {}", config.trials_path.display()))?;
    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    if args.simulate {
        let clock = ManualTimer::new().with_frame_time(Duration::from_micros(16_667));
        let mut session = Session::new(
            args.subject,
            config,
            layouts,
            Box::new(SimulatedDevice::default()),
            clock.clone(),
            rng,
        )?;
        let seed = args.seed.unwrap_or_default().wrapping_add(1);
        let mut participant = SimulatedParticipant::new(StdRng::seed_from_u64(seed));
        run_headless(&mut session, &clock, &mut participant, Duration::from_millis(1))?;
        report(&session);
        return Ok(());
    }

    let device = open_or_null(&config.device);
    let font = ctxcue_render::load_font(&config.font_path);
    let session = Session::new(
        args.subject,
        config,
        layouts,
        device,
        HighPrecisionTimer::new(),
        rng,
    )?;
    let session = App::new(session, font).run()?;
    report(&session);
    Ok(())
}

fn report<T, R>(session: &Session<T, R>)
where
    T: ctxcue_timing::Timer<Timestamp = u64>,
    R: rand::Rng,
{
    let results = session.results();
    let correct = results.iter().filter(|r| r.correct).count();
    tracing::info!(
        subject = %session.subject,
        trials = results.len(),
        correct,
        interrupted = session.was_interrupted(),
        final_delay_ms = session.summary().map(|s| s.final_delay_ms),
        results = %session.paths().results.display(),
        "session complete"
    );
}
