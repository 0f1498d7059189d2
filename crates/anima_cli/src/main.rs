use anima_core::{AnimaConfig, Stimulus, StimulusSource};
use anima_limbic::{HeartbeatConfig, JsonFileSnapshotSink, Scheduler};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "anima.toml";
const STIMULUS_KINDS: [&str; 4] = ["noise", "contact", "warmth", "nourishment"];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct LogArgs {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Write logs to a daily rolling file in this directory instead of stderr
    #[arg(long, global = true, env = "ANIMA_LOG_DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the heartbeat against a synthetic stimulus source
    Run(RunArgs),
    /// Print the last snapshot written under the data directory
    Inspect {
        /// Path to the TOML config
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Path to the TOML config (defaults to ./anima.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many ticks. Runs until Ctrl-C when omitted.
    #[arg(short, long)]
    ticks: Option<u64>,

    /// Seed for the stimulus source and feedback windows
    #[arg(short, long)]
    seed: Option<u64>,

    /// Chance per tick that a stimulus arrives
    #[arg(long, default_value_t = 0.3)]
    rate: f64,

    /// Ignore any existing snapshot and start from the initial state
    #[arg(long)]
    fresh: bool,
}

/// Random stimuli at a fixed rate.
struct SyntheticSource {
    rng: StdRng,
    rate: f64,
}

impl SyntheticSource {
    fn new(seed: Option<u64>, rate: f64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            rate: rate.clamp(0.0, 1.0),
        }
    }
}

impl StimulusSource for SyntheticSource {
    fn drain(&mut self) -> Vec<Stimulus> {
        let mut batch = Vec::new();
        while batch.len() < 3 && self.rng.gen_bool(self.rate) {
            let kind = STIMULUS_KINDS[self.rng.gen_range(0..STIMULUS_KINDS.len())];
            batch.push(Stimulus::new(kind, self.rng.gen_range(0.0..=1.0)));
        }
        batch
    }
}

fn init_tracing(args: &LogArgs) -> anyhow::Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // The guard flushes buffered lines on drop; main holds it until exit
    let (writer, guard) = match &args.log_dir {
        Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "anima.log")),
        None => tracing_appender::non_blocking(std::io::stderr()),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(args.log_dir.is_none());
    let installed = if args.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install log subscriber: {e}"))?;
    Ok(guard)
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AnimaConfig> {
    match path {
        Some(path) => AnimaConfig::load(path),
        None => Ok(AnimaConfig::load_or_default(DEFAULT_CONFIG)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli.log)?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Inspect { config } => inspect(config).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    // 1. Load config
    let mut config = load_config(args.config.as_ref())?;
    if args.seed.is_some() {
        config.feedback.seed = args.seed;
    }
    info!(data_dir = %config.persistence.data_dir.display(), "Initializing Anima...");

    // 2. Build the heartbeat
    let mut heartbeat = HeartbeatConfig::from(&config.scheduler);
    if let Some(ticks) = args.ticks {
        heartbeat = heartbeat.with_tick_limit(ticks);
    }
    let snapshots = JsonFileSnapshotSink::new(config.persistence.snapshot_path());
    let mut scheduler = Scheduler::from_config(config.clone())
        .context("Failed to build the scheduler")?
        .with_heartbeat(heartbeat);

    // 3. Resume from the last snapshot
    if !args.fresh {
        match snapshots.load().await {
            Ok(Some(payload)) => {
                scheduler
                    .restore(payload)
                    .context("Snapshot exists but could not be restored; rerun with --fresh")?;
            }
            Ok(None) => info!("No snapshot found, starting fresh"),
            Err(e) => return Err(e).context("Failed to read snapshot"),
        }
    }

    // 4. Start ticking
    let source = SyntheticSource::new(args.seed, args.rate);
    let handle = scheduler
        .spawn(Box::new(source))
        .context("Failed to start the heartbeat thread")?;
    info!("Anima heartbeat online. Press Ctrl-C to stop.");

    let stopper = handle.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping after the current tick");
            // Already stopped if the receiver is gone
            let _ = stopper.stop().await;
        }
    });

    let status = handle.stopped().await;
    ctrl_c.abort();
    println!("{}", serde_json::to_string_pretty(&status)?);

    tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Heartbeat thread could not be joined")??;
    info!(ticks = status.tick_count, "Anima stopped");
    Ok(())
}

async fn inspect(config: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(config.as_ref())?;
    let snapshots = JsonFileSnapshotSink::new(config.persistence.snapshot_path());
    match snapshots.load().await? {
        Some(payload) => println!("{}", serde_json::to_string_pretty(&payload)?),
        None => println!("No snapshot at {}", snapshots.path().display()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_source_is_reproducible() {
        let mut a = SyntheticSource::new(Some(9), 0.5);
        let mut b = SyntheticSource::new(Some(9), 0.5);
        for _ in 0..20 {
            let (x, y) = (a.drain(), b.drain());
            assert_eq!(x.len(), y.len());
            for (s, t) in x.iter().zip(&y) {
                assert_eq!(s.kind, t.kind);
                assert_eq!(s.intensity, t.intensity);
            }
        }
    }

    #[test]
    fn test_synthetic_source_rate_bounds() {
        let mut silent = SyntheticSource::new(Some(1), 0.0);
        assert!((0..50).all(|_| silent.drain().is_empty()));

        let mut busy = SyntheticSource::new(Some(1), 1.0);
        let batch = busy.drain();
        assert_eq!(batch.len(), 3);
        assert!(batch.iter().all(|s| (0.0..=1.0).contains(&s.intensity)));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["anima", "run", "--ticks", "10", "--seed", "4", "--json-logs"]);
        assert!(cli.log.json_logs);
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.ticks, Some(10));
                assert_eq!(args.seed, Some(4));
                assert!(!args.fresh);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
