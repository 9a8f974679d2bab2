use anyhow::{Context, Result};
use clap::Parser;
use simli_rtc::{SimliClient, SimliConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;
use tutor_core::catalog::SubjectCatalog;
use tutor_core::realtime_api::Microphone;
use tutor_core::registry::AccountRegistry;
use tutor_core::{SessionOrchestrator, SessionSettings, SessionStatus};
use tutor_service::config::{Config, CredentialPolicy};
use tutor_service::gemini_adapter::GeminiProvider;
use tutor_service::microphone::WavMicrophone;
use tutor_service::renderer_bridge::{self, TracingRenderer};
use tutor_service::simli_adapter::SimliAvatar;

#[derive(Parser)]
#[command(version, about = "Runs a live tutoring session")]
struct Cli {
    /// Subject id from the catalog. Defaults to the first subject.
    #[arg(long)]
    subject: Option<String>,
    /// Use a WAV file as the microphone.
    #[arg(long)]
    wav: Option<PathBuf>,
    /// Input device name (requires the `cpal` feature).
    #[arg(long)]
    device: Option<String>,
    /// Print the subject catalog and exit.
    #[arg(long)]
    list_subjects: bool,
    /// Print the available input devices and exit.
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting tutor service...");

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();
    let catalog = SubjectCatalog::new(&config.subjects_path);

    if args.list_subjects {
        for subject in catalog.get_subjects()? {
            println!(
                "{:<16} {:<6} {:<9} {} (voice {})",
                subject.id, subject.board, subject.class_level, subject.title, subject.voice_id
            );
        }
        return Ok(());
    }
    if args.list_devices {
        return list_devices();
    }

    for name in config.missing_credentials() {
        if config.credential_policy == CredentialPolicy::Warn {
            tracing::warn!("{} is not set; the related service will be unavailable.", name);
        }
    }

    // --- 4. Resolve the lesson ---
    let subject = match &args.subject {
        Some(id) => catalog.find(id)?,
        None => catalog
            .get_subjects()?
            .into_iter()
            .next()
            .context("Subject catalog is empty")?,
    };

    let registry = AccountRegistry::new(&config.registry_path);
    let memory = match registry.get_active_session() {
        Ok(Some(profile)) => {
            tracing::info!("Signed in as {} ({} past lessons).", profile.full_name, profile.session_history.len());
            profile.session_history
        }
        Ok(None) => Vec::new(),
        Err(e) => {
            tracing::warn!("Failed to read the account registry: {}", e);
            Vec::new()
        }
    };

    // --- 5. Initialize API Clients ---
    let gemini_config = gemini_realtime::Config::builder()
        .with_base_url(&config.gemini_base_url)
        .with_api_key(config.gemini_api_key.clone())
        .with_model(&config.gemini_model)
        .build();
    let simli_config = SimliConfig::builder()
        .with_base_url(&config.simli_base_url)
        .with_api_key(config.simli_api_key.clone())
        .build();

    let orchestrator = SessionOrchestrator::new(
        Arc::new(GeminiProvider::new(gemini_config)),
        Arc::new(SimliAvatar::new(Arc::new(SimliClient::new(simli_config)))),
        microphone(&args)?,
        Arc::new(TracingRenderer),
        SessionSettings {
            transcript_limit: config.transcript_limit,
            memory,
            ..Default::default()
        },
    );

    // --- 6. Renderer bridge and session ---
    let bridge = tokio::spawn(renderer_bridge::serve(
        config.renderer_bind_address,
        orchestrator.clone(),
    ));
    let watcher = tokio::spawn(log_session(orchestrator.clone()));

    orchestrator
        .start(subject)
        .await
        .context("Failed to start the session")?;

    tracing::info!("Lesson running. Press Ctrl-C to end it.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    tracing::info!("Ending the lesson...");
    orchestrator.stop().await;
    watcher.abort();
    bridge.abort();
    Ok(())
}

fn microphone(args: &Cli) -> Result<Arc<dyn Microphone>> {
    if let Some(path) = &args.wav {
        return Ok(Arc::new(WavMicrophone::new(path)));
    }
    device_microphone(args.device.clone())
}

#[cfg(feature = "cpal")]
fn device_microphone(device: Option<String>) -> Result<Arc<dyn Microphone>> {
    Ok(Arc::new(tutor_service::microphone::DeviceMicrophone::new(device)))
}

#[cfg(not(feature = "cpal"))]
fn device_microphone(_device: Option<String>) -> Result<Arc<dyn Microphone>> {
    anyhow::bail!("No microphone available: pass --wav or build with the `cpal` feature")
}

#[cfg(feature = "cpal")]
fn list_devices() -> Result<()> {
    println!("{}", tutor_native_utils::device::get_available_inputs()?);
    Ok(())
}

#[cfg(not(feature = "cpal"))]
fn list_devices() -> Result<()> {
    anyhow::bail!("Device listing requires the `cpal` feature")
}

/// Mirrors status changes and the caption into the log.
async fn log_session(orchestrator: SessionOrchestrator) {
    let mut snapshots = orchestrator.subscribe();
    let mut status = SessionStatus::Idle;
    let mut transcript_len = 0;
    while snapshots.changed().await.is_ok() {
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.status != status {
            status = snapshot.status;
            match &snapshot.last_error {
                Some(error) => tracing::warn!("Session {:?}: {}", status, error),
                None => tracing::info!("Session {:?}", status),
            }
        }
        if snapshot.transcript.len() != transcript_len {
            transcript_len = snapshot.transcript.len();
            tracing::debug!("Tutor: {}", snapshot.transcript.as_str());
        }
    }
}
