use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::info;

use candor_client::{
    Config, ConsentDecision, HttpBackend, MemoryBackend, SessionBackend, SessionOrchestrator,
    StaticToken, SyntheticDevice, SyntheticDeviceConfig,
};

#[derive(Parser)]
#[command(name = "candor-client", version)]
#[command(about = "Two-party consent-gated recording client")]
struct Cli {
    /// Config file (TOML, extension optional)
    #[arg(long, default_value = "config/candor-client")]
    config: String,

    /// Bearer token issued by the identity service
    #[arg(long)]
    token: Option<String>,

    /// Username this device is logged in as
    #[arg(long)]
    username: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a session and invite a participant
    Create {
        #[arg(long)]
        participant: String,
    },
    /// Record a consent decision for a session
    Consent {
        session_id: String,
        /// Decline instead of granting
        #[arg(long)]
        decline: bool,
    },
    /// Show the reconciled status of a session
    Status { session_id: String },
    /// Start a session once both parties have consented
    Start { session_id: String },
    /// Run the full flow end-to-end against the in-process backend
    Demo {
        #[arg(long, default_value = "participant")]
        participant: String,
        /// Seconds of synthetic media to capture
        #[arg(long, default_value_t = 3)]
        seconds: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    let token = cli.token;
    let username = cli.username;

    match cli.command {
        Command::Create { participant } => {
            let backend = http_backend(&token, &username, &config)?;
            let snapshot = backend.create_session(&participant).await?;
            println!("session_id: {}", snapshot.id);
            println!("state: {:?}", snapshot.state);
        }
        Command::Consent {
            session_id,
            decline,
        } => {
            let backend = http_backend(&token, &username, &config)?;
            let decision = if decline {
                ConsentDecision::Declined
            } else {
                ConsentDecision::Granted
            };
            let status = backend.submit_consent(&session_id, decision).await?;
            print_status(&status);
        }
        Command::Status { session_id } => {
            let backend = http_backend(&token, &username, &config)?;
            let status = backend.poll_status(&session_id).await?;
            print_status(&status);
        }
        Command::Start { session_id } => {
            let backend = http_backend(&token, &username, &config)?;
            let state = backend.start_session(&session_id).await?;
            println!("state: {:?}", state);
        }
        Command::Demo {
            participant,
            seconds,
        } => run_demo(config, &participant, seconds).await?,
    }

    Ok(())
}

fn load_config(path: &str) -> Result<Config> {
    let file = format!("{}.toml", path);
    if std::path::Path::new(&file).exists() {
        Config::load(path).with_context(|| format!("Failed to load config from {}", file))
    } else {
        info!("No config file at {}, using defaults", file);
        Ok(Config::default())
    }
}

fn http_backend(
    token: &Option<String>,
    username: &Option<String>,
    config: &Config,
) -> Result<Arc<HttpBackend>> {
    let token = match token {
        Some(t) => t.clone(),
        None => bail!("--token is required to talk to the backend"),
    };
    let username = match username {
        Some(u) => u.clone(),
        None => bail!("--username is required to talk to the backend"),
    };

    let backend = HttpBackend::new(&config.backend, username, Arc::new(StaticToken(token)))?;
    Ok(Arc::new(backend))
}

fn print_status(status: &candor_client::SessionStatus) {
    println!("session_id: {}", status.session_id);
    println!("state: {:?}", status.state);
    println!("initiator_consent: {}", status.initiator_consent);
    println!("participant_consent: {}", status.participant_consent);
    println!("both_consented: {}", status.both_consented);
}

/// Drive the whole protocol in-process: two parties, one backend
async fn run_demo(config: Config, participant: &str, seconds: u64) -> Result<()> {
    info!("Running demo flow against the in-process backend");

    let initiator_backend = MemoryBackend::new("initiator");
    let participant_backend = initiator_backend.as_participant(participant.to_string());

    let orchestrator = SessionOrchestrator::new(Arc::new(initiator_backend), config.clone());

    let snapshot = orchestrator.create_session(participant).await?;
    println!("created session {}", snapshot.id);

    orchestrator.submit_consent(ConsentDecision::Granted).await?;
    println!("initiator consent granted");

    // The other party's device answers on its own schedule
    let session_id = snapshot.id.clone();
    let other_device = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        participant_backend
            .submit_consent(&session_id, ConsentDecision::Granted)
            .await
    });

    let status = orchestrator.wait_for_ready().await?;
    println!("consent settled: {:?}", status.state);
    other_device.await??;

    orchestrator.start().await?;
    println!("session started");

    let device = SyntheticDevice::new(SyntheticDeviceConfig {
        sample_rate: config.capture.sample_rate,
        channels: config.capture.channels,
        frame_ms: 100,
        frame_limit: Some(seconds * 10),
        fault_after: None,
    });
    orchestrator.start_capture(Box::new(device)).await?;
    println!("capturing {} seconds...", seconds);

    tokio::time::sleep(std::time::Duration::from_secs(seconds)).await;

    let artifact = orchestrator.stop_capture().await?;
    println!(
        "captured {:?} ({} ms, {} bytes)",
        artifact.local_path, artifact.duration_ms, artifact.size_bytes
    );

    orchestrator.upload(artifact).await?;
    orchestrator.await_upload().await?;
    println!("upload acknowledged");

    let analysis = orchestrator.analysis_status().await?;
    println!(
        "analysis: {} (results available: {})",
        analysis.status, analysis.results_available
    );

    Ok(())
}
