use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use reveal_core::{
    Clock, HttpBackend, ManualClock, PageState, ReqwestBackend, Sdk, SdkConfig, StaticSession,
    SystemClock,
};
use reveal_replay::{initial_url, load_trace, replay, StdoutBackend};
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "reveal-replay", version, about = "Replay a recorded browser trace through the Reveal SDK")]
struct Cli {
    /// JSON-lines trace file
    #[arg(long)]
    trace: PathBuf,

    /// SDK config TOML; defaults come from REVEAL_* environment variables
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print requests to stdout instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Replay as a treatment session (decisions are requested)
    #[arg(long)]
    treatment: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => SdkConfig::from_toml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SdkConfig::from_env(),
    };
    // The replay loop drives the clock and the stall poll itself.
    config.background_tasks = false;

    let trace = load_trace(&cli.trace)
        .with_context(|| format!("loading trace {}", cli.trace.display()))?;
    let page = PageState::new(initial_url(&trace).unwrap_or("about:blank")).shared();
    let clock = ManualClock::new(SystemClock.now_ms());
    let http: Arc<dyn HttpBackend> = if cli.dry_run {
        Arc::new(StdoutBackend::new())
    } else {
        Arc::new(ReqwestBackend::new())
    };

    let sdk = Sdk::builder(config)
        .page(page.clone())
        .session(Arc::new(StaticSession::generated(cli.treatment)))
        .http(http)
        .clock(Arc::new(clock.clone()))
        .build()
        .context("building SDK")?;
    sdk.init().context("initialising SDK")?;

    info!(
        trace = %cli.trace.display(),
        records = trace.len(),
        dry_run = cli.dry_run,
        treatment = cli.treatment,
        "Replay starting"
    );

    let report = replay(&trace, &sdk, &clock, &page).await;
    let outcome = sdk.flush().await;
    debug!(?outcome, "Post-replay flush");
    // The final flush waits out any flush still in flight, then drains.
    if let Some(final_flush) = sdk.destroy() {
        let outcome = final_flush.await.context("final flush task")?;
        info!(?outcome, "Final flush complete");
    }

    info!(
        records = report.records,
        duration_ms = report.duration_ms,
        signals = report.signals,
        nudges = report.nudges.len(),
        "Replay finished"
    );
    eprintln!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
