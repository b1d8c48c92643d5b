use anyhow::{Context, Result};
use porter_core::OnnxFaceAnalyzer;
use porter_store::Store;
use porterd::config::Config;
use porterd::correlation::ApprovalChannel;
use porterd::decision::OpenAiDecisionService;
use porterd::directory::ContactDirectory;
use porterd::engine::spawn_engine;
use porterd::gatekeeper::Gatekeeper;
use porterd::http::create_router;
use porterd::messaging::{ConsoleGateway, MessageGateway, TwilioGateway};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("porterd starting");

    let config = Config::from_env();

    // Load both ONNX models synchronously (fail-fast).
    let analyzer = OnnxFaceAnalyzer::load(
        &config.detector_model_path(),
        &config.encoder_model_path(),
    )
    .context("loading ONNX models")?;
    let engine = spawn_engine(Box::new(analyzer));

    let store = Store::open(&config.db_path)
        .await
        .context("opening database")?;
    tracing::info!(path = %config.db_path.display(), "database open");

    let directory = match ContactDirectory::load(&config.roster_path) {
        Ok(directory) => {
            tracing::info!(
                path = %config.roster_path.display(),
                contacts = directory.len(),
                "contact roster loaded"
            );
            directory
        }
        Err(e) => {
            tracing::warn!(error = %e, "no contact roster; approval dispatch will re-prompt");
            ContactDirectory::empty()
        }
    };

    let status_callback = config
        .public_base_url
        .as_ref()
        .map(|base| format!("{}/webhooks/messaging/status", base.trim_end_matches('/')));
    let gateway: Arc<dyn MessageGateway> = match &config.twilio {
        Some(twilio) => Arc::new(TwilioGateway::new(
            twilio.account_sid.clone(),
            twilio.auth_token.clone(),
            twilio.from_number.clone(),
            status_callback,
        )?),
        None => {
            tracing::warn!("no messaging credentials; using console gateway");
            Arc::new(ConsoleGateway)
        }
    };

    if config.openai.api_key.is_none() {
        tracing::warn!("no language-model api key; extraction and judgment will degrade");
    }
    let decisions = Arc::new(OpenAiDecisionService::new(
        config.openai.endpoint.clone(),
        config.openai.model.clone(),
        config.openai.api_key.clone(),
    )?);

    let gatekeeper = Arc::new(Gatekeeper::new(
        store,
        engine,
        ApprovalChannel::new(gateway),
        decisions,
        directory,
        config.match_threshold,
        config.multi_face_policy,
        config.session_ttl_secs,
    ));

    // The sweep bounds stale-session growth; correctness never depends on it.
    let sweeper = gatekeeper.clone();
    let sweep_interval = std::time::Duration::from_secs(config.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            sweeper.expire_stale().await;
        }
    });

    let app = create_router(gatekeeper);
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .context("binding listen address")?;
    tracing::info!(addr = %config.listen_addr, "porterd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("porterd shutting down");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
