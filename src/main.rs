use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use http::{HeaderName, Method, header::CONTENT_TYPE};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing_subscriber::EnvFilter;

use gemini_live_gateway::{
    GatewayConfig,
    core::audio::{PcmWavWriter, read_pcm16_fragments},
    core::credentials::{CredentialCache, GatewayTokenIssuer, HttpTokenIssuer, TokenIssuer},
    core::realtime::{
        LiveSession, RealtimeAudioData, RealtimeError, Transcript, TranscriptEvent,
        TranscriptRole, TurnOutcome,
        gemini::{INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE},
    },
    routes,
    state::AppState,
};

/// How long `talk` waits for the model to finish its reply.
const REPLY_TIMEOUT: Duration = Duration::from_secs(60);

/// Gemini Live gateway - credential relay and realtime audio client
#[derive(Parser, Debug)]
#[command(name = "gemini-live-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `serve`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the credential relay endpoint
    Serve,

    /// Send one spoken turn from a WAV file and collect the reply
    Talk {
        /// 16 kHz mono 16-bit WAV to send as the user turn
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Where to write the 24 kHz reply audio
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Fragment length, as a capture device would deliver it
        #[arg(long = "chunk-ms", default_value_t = 100)]
        chunk_ms: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
        GatewayConfig::from_file(config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        GatewayConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Talk {
            input,
            output,
            chunk_ms,
        } => talk(config, &input, output.as_deref(), chunk_ms).await,
    }
}

async fn serve(config: GatewayConfig) -> anyhow::Result<()> {
    let address = config.address();
    let cors_origins = config.cors_allowed_origins.clone();
    println!("Starting server on {address}");

    let app_state = AppState::new(config).map_err(|e| anyhow!("Failed to start: {e}"))?;

    let cors_layer = match cors_origins.as_deref() {
        Some("*") => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-requested-with")])
            .allow_credentials(false),
        Some(origins) => {
            // Parse comma-separated origins
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::POST, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE, HeaderName::from_static("x-requested-with")])
        }
        None => {
            info!("CORS not configured, defaulting to same-origin only.");
            CorsLayer::new()
                .allow_methods([Method::POST, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE])
        }
    };

    // Security headers
    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app = routes::api::create_api_router()
        .with_state(app_state)
        .layer(cors_layer)
        .layer(security_headers);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    let listener = TcpListener::bind(socket_addr).await?;
    println!("Server listening on http://{socket_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

async fn talk(
    config: GatewayConfig,
    input: &Path,
    output: Option<&Path>,
    chunk_ms: u32,
) -> anyhow::Result<()> {
    let fragments = read_pcm16_fragments(input, INPUT_SAMPLE_RATE, chunk_ms)?;
    info!("Read {} fragments from {}", fragments.len(), input.display());

    let issuer: Arc<dyn TokenIssuer> = match &config.gateway_url {
        Some(url) => {
            info!("Requesting credentials from gateway {url}");
            Arc::new(GatewayTokenIssuer::new(url.clone(), config.issuance_timeout())?)
        }
        None => {
            let api_key = config.require_api_key().map_err(|e| anyhow!(e))?;
            Arc::new(HttpTokenIssuer::new(
                config.issuer_url.clone(),
                api_key,
                config.issuance_timeout(),
            )?)
        }
    };

    let credentials = Arc::new(
        CredentialCache::new(issuer, config.token_request())
            .with_safety_margin(config.safety_margin()),
    );
    let session = LiveSession::new(config.live.clone(), credentials);

    let transcript = Arc::new(Mutex::new(Transcript::new()));
    let turn_done = Arc::new(Notify::new());
    {
        let transcript = transcript.clone();
        let turn_done = turn_done.clone();
        session.on_transcript(Arc::new(move |event: TranscriptEvent| {
            let transcript = transcript.clone();
            let turn_done = turn_done.clone();
            Box::pin(async move {
                let finished = matches!(
                    event,
                    TranscriptEvent::NewParagraph {
                        role: TranscriptRole::User
                    }
                );
                transcript.lock().apply(&event);
                if finished {
                    turn_done.notify_one();
                }
            })
        }));
    }

    let writer = match output {
        Some(path) => Some(PcmWavWriter::create(path, OUTPUT_SAMPLE_RATE)?),
        None => None,
    };
    let writer = Arc::new(Mutex::new(writer));
    {
        let writer = writer.clone();
        session.on_audio(Arc::new(move |audio: RealtimeAudioData| {
            let writer = writer.clone();
            Box::pin(async move {
                if let Some(w) = writer.lock().as_mut()
                    && let Err(e) = w.write_pcm(&audio.data)
                {
                    warn!("Failed to write reply audio: {e}");
                }
            })
        }));
    }

    {
        let turn_done = turn_done.clone();
        session.on_error(Arc::new(move |error: RealtimeError| {
            let turn_done = turn_done.clone();
            Box::pin(async move {
                warn!("Session error: {error}");
                turn_done.notify_one();
            })
        }));
    }

    session.open().await?;
    for fragment in fragments {
        session.append_audio(fragment);
    }

    match session.send_turn().await? {
        TurnOutcome::Sent { fragments, bytes } => {
            info!("Sent turn: {fragments} fragments, {bytes} bytes");
            if tokio::time::timeout(REPLY_TIMEOUT, turn_done.notified())
                .await
                .is_err()
            {
                warn!("No complete reply within {}s", REPLY_TIMEOUT.as_secs());
            }
        }
        TurnOutcome::NothingToSend => warn!("Input contained no audio"),
    }

    session.close().await?;

    if let Some(w) = writer.lock().take() {
        let samples = w.samples_written();
        w.finalize()?;
        if let Some(path) = output {
            println!("Wrote {samples} samples to {}", path.display());
        }
    }

    let transcript = transcript.lock();
    for text in transcript.paragraphs(TranscriptRole::User) {
        println!("user:  {text}");
    }
    for text in transcript.paragraphs(TranscriptRole::Model) {
        println!("model: {text}");
    }

    Ok(())
}
