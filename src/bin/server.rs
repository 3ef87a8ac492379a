//! `speecht5-server`: serves the one-button text-to-speech page.
//!
//! ```text
//! speecht5-server --model-dir saved_tts_model --port 8501
//! RUST_LOG=speecht5_tts=debug speecht5-server --seed 42
//! ```

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use speecht5_tts::{server, SpeakerEmbedding, SpeakerSource, Synthesizer, DEFAULT_MODEL_DIR};

#[derive(Debug, Parser)]
#[command(name = "speecht5-server", version, about = "SpeechT5 text-to-speech web demo")]
struct Args {
    /// Directory holding config.json, the tokenizer and the ONNX graphs.
    #[arg(long, default_value = DEFAULT_MODEL_DIR)]
    model_dir: PathBuf,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 8501)]
    port: u16,

    /// Use one reproducible voice instead of a random one per request.
    #[arg(long, conflicts_with = "speaker")]
    seed: Option<u64>,

    /// Fixed speaker embedding (.npy, or .npz with --speaker-key).
    #[arg(long)]
    speaker: Option<PathBuf>,

    /// Array name inside the --speaker .npz archive.
    #[arg(long, requires = "speaker")]
    speaker_key: Option<String>,

    /// Directory for temporary WAV files [default: system temp dir].
    #[arg(long)]
    artifact_dir: Option<PathBuf>,
}

impl Args {
    fn speaker_source(&self) -> Result<SpeakerSource> {
        if let Some(path) = &self.speaker {
            let embedding = SpeakerEmbedding::load(path, self.speaker_key.as_deref())?;
            return Ok(SpeakerSource::Fixed(embedding));
        }
        Ok(match self.seed {
            Some(seed) => SpeakerSource::Seeded(seed),
            None => SpeakerSource::Random,
        })
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("speecht5_tts=info,speecht5_server=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let speaker = args.speaker_source()?;
    tracing::info!(model_dir = %args.model_dir.display(), "loading model");

    // Without a model there is nothing to serve.
    let mut synth = Synthesizer::load(&args.model_dir)?.with_speaker(speaker);
    if let Some(dir) = &args.artifact_dir {
        synth = synth.with_artifact_dir(dir.clone());
    }
    tracing::info!(speaker = %synth.speaker().describe(), "model ready");

    let app = server::router(Arc::new(synth));

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", args.host, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot bind {}", addr))?;
    tracing::info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!("cannot listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}
