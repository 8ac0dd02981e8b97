use anyhow::{Context, Result};
use call_bridge::config::TranscoderKind;
use call_bridge::agent::{OpenAiResponder, OpenAiSynthesizer};
use call_bridge::transcript::{
    FanoutSink, JsonlTranscriptSink, MemoryTranscriptSink, NatsTranscriptSink, TranscriptSink,
};
use call_bridge::{
    create_router, AppState, Config, DeepgramConnector, FfmpegTranscoder, NativeTranscoder,
    ScenarioCatalog, SessionServices, Transcoder,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "call-bridge", version, about = "Real-time turn-taking telephony audio bridge")]
struct Args {
    /// Config file path (extension optional)
    #[arg(short, long, default_value = "config/call-bridge")]
    config: String,

    /// Override the HTTP port from the config file
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let mut cfg = Config::load(&args.config)?;
    if let Some(port) = args.port {
        cfg.service.http.port = port;
    }

    info!("Call Bridge v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);
    if cfg.recognizer.api_key.is_empty() {
        warn!("Recognizer API key is empty; set CALL_BRIDGE__RECOGNIZER__API_KEY");
    }

    let scenarios = ScenarioCatalog::load(&cfg.scenarios.catalog)?.into_resolver();
    info!("Scenarios available: {}", scenarios.ids().join(", "));

    let memory = Arc::new(MemoryTranscriptSink::new());
    let transcripts = build_transcript_sinks(&cfg, Arc::clone(&memory)).await?;

    let transcoder: Arc<dyn Transcoder> = match cfg.synthesis.transcoder {
        TranscoderKind::Native => Arc::new(NativeTranscoder::new()),
        TranscoderKind::Ffmpeg => Arc::new(
            FfmpegTranscoder::new(cfg.synthesis.ffmpeg_path.clone())
                .with_timeout(Duration::from_secs(cfg.synthesis.ffmpeg_timeout_secs)),
        ),
    };

    let services = SessionServices {
        connector: Arc::new(
            DeepgramConnector::new(cfg.recognizer.api_key.clone())
                .with_listen_url(cfg.recognizer.url.clone()),
        ),
        responder: Arc::new(OpenAiResponder::new(cfg.responder.clone())?),
        synthesizer: Arc::new(OpenAiSynthesizer::new(cfg.synthesis.clone())?),
        transcoder,
        transcripts,
    };

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let state = AppState::new(cfg, services, scenarios, memory);
    spawn_session_sweeper(state.clone());
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Shut down");
    Ok(())
}

/// Memory sink always; JSON-lines and NATS when configured
async fn build_transcript_sinks(
    cfg: &Config,
    memory: Arc<MemoryTranscriptSink>,
) -> Result<Arc<dyn TranscriptSink>> {
    let mut sinks: Vec<Arc<dyn TranscriptSink>> = vec![memory];

    if let Some(directory) = &cfg.transcripts.directory {
        sinks.push(Arc::new(JsonlTranscriptSink::create(directory).await?));
    }

    if let Some(url) = &cfg.transcripts.nats_url {
        match NatsTranscriptSink::connect(url).await {
            Ok(sink) => sinks.push(Arc::new(sink)),
            Err(e) => warn!("Transcript publishing disabled: {:#}", e),
        }
    }

    Ok(Arc::new(FanoutSink::new(sinks)))
}

/// Periodically evict closed sessions so idle servers shed them too
fn spawn_session_sweeper(state: AppState) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let evicted = state.evict_closed().await;
            if evicted > 0 {
                info!("Evicted {} closed sessions", evicted);
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
