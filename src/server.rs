//! Blog API server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};

use crate::api::{AppState, create_router};
use crate::config::{BootstrapAdmin, Config};
use crate::store::spawn_reaper;
use crate::users::{NewUser, Role, validate_password};
use crate::{Error, Result};

/// Blog API server
pub struct Server {
    config: Config,
    state: Arc<AppState>,
}

impl Server {
    /// Create a server with in-memory collaborators.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let state = AppState::from_config(config.clone())?;
        Ok(Self::with_state(config, Arc::new(state)))
    }

    /// Create a server over an already-wired state.
    #[must_use]
    pub fn with_state(config: Config, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Shared state, e.g. for seeding users before [`run`](Self::run).
    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Run until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        if let Some(admin) = &self.config.bootstrap_admin {
            seed_admin(&self.state, admin).await?;
        }

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let reaper = spawn_reaper(
            Arc::clone(&self.state.store),
            Duration::from_secs(self.config.store.reap_interval_secs),
            shutdown_tx.subscribe(),
        );

        let app = create_router(Arc::clone(&self.state))?;
        let listener = TcpListener::bind(addr).await?;

        info!(version = env!("CARGO_PKG_VERSION"), "Blog API starting");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        if self.config.jwt.secret == "auto" {
            warn!("jwt.secret is 'auto': tokens will not survive a restart");
        }
        if self.config.rate_limit.enabled {
            for class in crate::rate_limit::EndpointClass::ALL {
                let tier = self.config.rate_limit.tier(class);
                info!(
                    endpoint = class.as_str(),
                    max_requests = tier.max_requests,
                    window_secs = tier.window_secs,
                    "Rate limit tier"
                );
            }
        } else {
            warn!("Rate limiting disabled");
        }

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        if let Err(e) = reaper.await {
            warn!(error = %e, "Store reaper ended abnormally");
        }
        info!("Server stopped");
        Ok(())
    }
}

/// Create the configured administrator unless the username is taken.
pub async fn seed_admin(state: &AppState, admin: &BootstrapAdmin) -> Result<()> {
    if state.users.find_by_username(&admin.username).await?.is_some() {
        info!(user = %admin.username, "Bootstrap admin already present");
        return Ok(());
    }
    let password = admin.resolve_password()?;
    validate_password(&password)
        .map_err(|e| Error::Config(format!("bootstrap_admin.password: {e}")))?;

    let password_hash = state.hash_password(&password).await?;
    state
        .users
        .create(NewUser {
            username: admin.username.clone(),
            email: admin.email.clone(),
            password_hash,
            nickname: None,
            role: Role::Admin,
        })
        .await?;
    info!(user = %admin.username, "Bootstrap admin created");
    Ok(())
}

async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
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
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
