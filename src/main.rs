//! Playlist Agent - fill playlists from job files.
//!
//! Usage: `playlist-agent <job.json>...`
//!
//! Each job file holds `{playlist_id, target_count, criteria}`. Set
//! `PLAYLIST_AGENT_CONFIG` to load a YAML config file before environment
//! overrides are applied.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use playlist_agent::agents::{
    AgentContext, PlaylistJob, RelaxationController, RelaxationSettings, SelectionTransport,
};
use playlist_agent::budget::{BudgetManager, ModelPricing};
use playlist_agent::Config;

fn read_job(path: &Path) -> Result<PlaylistJob> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read job file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid job file {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("playlist_agent=info")),
        )
        .init();

    let job_paths: Vec<PathBuf> = std::env::args().skip(1).map(PathBuf::from).collect();
    if job_paths.is_empty() {
        bail!("Usage: playlist-agent <job.json>...");
    }

    let config_path = std::env::var("PLAYLIST_AGENT_CONFIG").ok().map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let jobs = job_paths
        .iter()
        .map(|p| read_job(p))
        .collect::<Result<Vec<_>>>()?;

    tracing::info!(
        model = %config.model,
        jobs = jobs.len(),
        ledger = %config.ledger_path.display(),
        backend = %config.ledger_backend,
        "Starting playlist agent"
    );

    let pricing = Arc::new(ModelPricing::default());
    let ledger = config.open_ledger()?;
    let budget = Arc::new(BudgetManager::open(
        config.budget.clone(),
        pricing.clone(),
        ledger,
    )?);
    let llm = Arc::new(config.openrouter_client()?);
    let tools = config.tool_registry()?;
    let settings = RelaxationSettings::from_config(&config);

    let ctx = Arc::new(AgentContext::new(config, llm, tools, pricing, budget.clone()));
    let transport = Arc::new(SelectionTransport::new(ctx));
    let controller = RelaxationController::new(transport, budget.clone(), settings);

    let results = controller.run_batch(&jobs).await?;

    let mut failed = 0;
    let playlists: Vec<_> = jobs
        .iter()
        .zip(results)
        .map(|(job, result)| match result {
            Ok(outcome) => {
                tracing::info!(
                    playlist_id = %job.playlist_id,
                    tracks = outcome.tracks.len(),
                    score = outcome.score,
                    satisfied = outcome.satisfied,
                    cost_usd = outcome.total_cost(),
                    "Playlist filled"
                );
                json!(outcome)
            }
            Err(e) => {
                failed += 1;
                tracing::error!(playlist_id = %job.playlist_id, "Playlist failed: {}", e);
                json!({ "playlist_id": job.playlist_id, "error": e.to_string() })
            }
        })
        .collect();

    let output = json!({
        "playlists": playlists,
        "budget": budget.summary()?,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if failed > 0 {
        bail!("{} of {} playlists failed", failed, jobs.len());
    }
    Ok(())
}
