//! Broker server: client construction, listener, graceful shutdown.

pub mod envelope;
pub mod router;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::authorizer::{Authorizer, ManifestSource, PipelineSource};
use crate::buildkite;
use crate::config::Config;
use crate::forge::AppClient;
use crate::jwks::JwksCache;
use crate::metrics::Metrics;
use crate::{Error, Result};

use router::{create_router, AppState};

/// The token broker server
pub struct Server {
    port: u16,
    state: Arc<AppState>,
}

impl Server {
    /// Build all clients and assemble the shared state.
    ///
    /// The initial JWKS fetch is synchronous: a broker that cannot verify
    /// tokens must not start. Each configured GitHub App is initialized and
    /// its installations enumerated before the listener opens.
    ///
    /// # Errors
    ///
    /// Fails when the JWKS fetch fails or any GitHub App client cannot be
    /// initialized.
    pub async fn new(config: Config) -> Result<Self> {
        let metrics = Arc::new(Metrics::new());

        let jwks = JwksCache::new(&config.oidc.jwks_url).await?;
        jwks.spawn_refresh();

        let buildkite = Arc::new(buildkite::Client::new(&config.buildkite_token));

        let mut forges: HashMap<String, Arc<AppClient>> = HashMap::new();
        for app_config in &config.applications {
            let client = AppClient::for_host(app_config).await.map_err(|e| {
                Error::Config(format!(
                    "cannot initialize github client for {}: {e}",
                    app_config.host
                ))
            })?;
            forges.insert(app_config.host.clone(), Arc::new(client));
        }

        let manifest_sources: HashMap<String, Arc<dyn ManifestSource>> = forges
            .iter()
            .map(|(host, client)| {
                let source: Arc<dyn ManifestSource> = Arc::clone(client) as Arc<dyn ManifestSource>;
                (host.clone(), source)
            })
            .collect();
        let pipelines: Arc<dyn PipelineSource> = buildkite;
        let authorizer = Authorizer::new(pipelines, manifest_sources);

        let port = config.port;
        let state = Arc::new(AppState {
            config,
            jwks,
            authorizer,
            forges,
            metrics,
        });

        Ok(Self { port, state })
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// # Errors
    ///
    /// Fails when the port cannot be bound or the server crashes.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;

        // Re-discover the port; with port 0 this is the one we actually bound
        let port = listener.local_addr()?.port();
        info!(port = port, "server listening");

        let app = create_router(self.state);
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))
    }
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received");
}
