//! Voiceprint server binary.

use anyhow::Context as _;
use clap::Parser;

use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "voiceprint", version, about = "Voice profile evolution engine")]
struct Cli {
    /// Path to a TOML config file.
    #[arg(short, long, env = "VOICEPRINT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,

    /// Address to serve the HTTP API on, overriding the config.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    voiceprint::daemon::init_tracing(cli.debug);

    let mut config = voiceprint::config::Config::load(cli.config.as_deref())?;
    if let Some(bind) = cli.bind {
        config.api.bind = bind;
    }

    let database_path = config.database_path();
    let store = voiceprint::voice::VoiceStore::connect(&database_path)
        .await
        .with_context(|| format!("failed to open store at {}", database_path.display()))?;
    let (service, queue_task) =
        voiceprint::voice::VoiceService::start(store.clone(), config.voice.clone())
            .await
            .context("failed to start voice service")?;

    let listener = tokio::net::TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.api.bind))?;
    tracing::info!(bind = %config.api.bind, database = %database_path.display(), "voiceprint listening");

    axum::serve(listener, voiceprint::api::router(service.clone()))
        .with_graceful_shutdown(voiceprint::daemon::shutdown_signal())
        .await
        .context("http server failed")?;

    // Let in-flight learning finish; pending edits are recovered on next start.
    service.queue().shutdown();
    if let Err(error) = queue_task.await {
        tracing::warn!(%error, "learning queue task ended abnormally");
    }
    store.close().await;
    tracing::info!("voiceprint stopped");
    Ok(())
}
