//! JWKS cache for CI signing keys.
//!
//! The key set is fetched once, synchronously, at construction; a broker that
//! cannot verify tokens must not come up. A background task then refreshes it
//! on a fixed interval, keeping the last-known-good set whenever the endpoint
//! is unreachable, so readers always see a usable `JwkSet` without waiting on
//! the network.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::jwk::JwkSet;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::Result;

/// Minimum interval between key-set refreshes.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(15 * 60);

/// Cached JSON Web Key Set with background refresh.
pub struct JwksCache {
    url: String,
    http: reqwest::Client,
    keys: RwLock<Arc<JwkSet>>,
}

impl JwksCache {
    /// Fetch the key set and build the cache.
    ///
    /// # Errors
    ///
    /// Fails when the initial fetch fails; startup should abort in that case.
    pub async fn new(url: &str) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        let keys = fetch(&http, url).await.inspect_err(|e| {
            warn!(jwks_uri = %url, error = %e, "unable to fetch buildkite JWKS");
        })?;
        info!(jwks_uri = %url, keys = keys.keys.len(), "successfully fetched buildkite JWKS");

        Ok(Arc::new(Self {
            url: url.to_string(),
            http,
            keys: RwLock::new(Arc::new(keys)),
        }))
    }

    /// The current key set.
    #[must_use]
    pub fn get(&self) -> Arc<JwkSet> {
        self.keys.read().clone()
    }

    /// Refresh the key set once, keeping the old set on failure.
    pub async fn refresh(&self) {
        match fetch(&self.http, &self.url).await {
            Ok(keys) => {
                *self.keys.write() = Arc::new(keys);
            }
            Err(e) => {
                // Serve the last-known-good set until the next interval
                warn!(jwks_uri = %self.url, error = %e, "JWKS refresh failed");
            }
        }
    }

    /// Start the background refresh task.
    pub fn spawn_refresh(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(MIN_REFRESH_INTERVAL);
            // The first tick fires immediately; skip it, we just fetched
            interval.tick().await;
            loop {
                interval.tick().await;
                cache.refresh().await;
            }
        })
    }
}

async fn fetch(http: &reqwest::Client, url: &str) -> Result<JwkSet> {
    let keys = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json::<JwkSet>()
        .await?;
    Ok(keys)
}
