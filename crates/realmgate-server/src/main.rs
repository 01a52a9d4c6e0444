//! `realmgate` binary

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use realmgate_auth::ConfigResolver;
use realmgate_server::{AppState, ServerSettings, logging, oauth_context, router};
use tracing::{error, info};

/// OAuth login backend for the realmgate admin dashboard
#[derive(Debug, Parser)]
#[command(name = "realmgate", version, about)]
struct Args {
    /// Settings file (.toml, .yaml, .yml or .json)
    #[arg(short, long, env = "REALMGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Interface to bind
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = ServerSettings::load(args.config.as_deref())
        .context("failed to load server settings")?
        .with_overrides(args.bind, args.port);
    logging::init(&settings).context("failed to initialize logging")?;

    // Fail fast: a misconfigured deployment should not start serving
    let resolver = ConfigResolver::from_env();
    let oauth = resolver.resolve().map_err(|e| {
        error!(error = %e, "Refusing to start without complete OAuth configuration");
        e
    })?;
    info!(
        issuer = %oauth.issuer,
        client_id = %oauth.credentials.client_id(),
        redirect_uri = %oauth.redirect_uri,
        "OAuth configuration loaded"
    );

    let context = oauth_context(&settings, resolver)?;
    let app = router(AppState::new(context), &settings);

    let addr = settings.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "realmgate listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
