//! Opening the server connection.
//!
//! A freshly provisioned server often refuses connections for a while, so
//! the first ping is retried until `connect_retry_timeout_sec` runs out.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::client::{MySqlClient, SqlClient};
use crate::config::ProviderConfig;
use crate::dsn::{build_opts, MaskedDsn, Network};
use crate::error::ProviderError;
use crate::proxy::{ProxyDialer, ProxyRelay};
use crate::retry::{retry, RetryPolicy};

/// Upper bound on releasing the pool after a failed connect.
const CLOSE_AFTER_FAILURE_TIMEOUT: Duration = Duration::from_secs(5);

/// A live server handle plus the proxy relay it depends on, if any.
pub struct Connection {
    client: Arc<dyn SqlClient>,
    relay: Option<ProxyRelay>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap an already connected client.
    pub fn from_client(client: Arc<dyn SqlClient>) -> Self {
        Self {
            client,
            relay: None,
        }
    }

    /// The client to run statements on.
    pub fn client(&self) -> Arc<dyn SqlClient> {
        Arc::clone(&self.client)
    }

    /// Disconnect the pool and stop the relay.
    pub async fn close(self) -> Result<(), ProviderError> {
        let result = self.client.close().await;
        if let Some(relay) = &self.relay {
            relay.shutdown();
        }
        result
    }
}

/// Connect using the process environment for proxy fallbacks.
pub async fn connect(config: &ProviderConfig) -> Result<Connection, ProviderError> {
    connect_with_env(config, crate::config::process_env).await
}

/// Connect, resolving proxy fallbacks through `env`.
pub async fn connect_with_env(
    config: &ProviderConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Connection, ProviderError> {
    let network = Network::parse(&config.endpoint)?;
    let dialer = ProxyDialer::resolve(config.proxy.as_deref(), &network, env)?;

    let relay = match (&network, dialer.is_proxied()) {
        (Network::Tcp { host, port }, true) => {
            Some(ProxyRelay::start(Arc::new(dialer), host.clone(), *port).await?)
        },
        _ => None,
    };

    let opts = build_opts(config, relay.as_ref().map(ProxyRelay::local_addr))?;
    info!(dsn = %MaskedDsn(config), proxied = relay.is_some(), "Connecting to MySQL");

    let client: Arc<dyn SqlClient> = Arc::new(MySqlClient::new(opts));
    let policy = RetryPolicy::with_timeout(config.connect_retry_timeout);
    if let Err(err) = wait_until_ready(client.as_ref(), &policy).await {
        match tokio::time::timeout(CLOSE_AFTER_FAILURE_TIMEOUT, client.close()).await {
            Ok(Ok(())) => {},
            Ok(Err(close_err)) => {
                warn!(error = %close_err, "Failed to release pool after connect failure")
            },
            Err(_) => warn!("Timed out releasing pool after connect failure"),
        }
        return Err(err);
    }

    Ok(Connection { client, relay })
}

/// Ping until the server answers or the policy gives up.
///
/// A ping still pending at the deadline is abandoned. Fails with
/// [`ProviderError::Connection`] carrying the last ping error.
pub async fn wait_until_ready(
    client: &dyn SqlClient,
    policy: &RetryPolicy,
) -> Result<(), ProviderError> {
    retry(policy, "connect", |_| client.ping())
        .await
        .map_err(|err| ProviderError::Connection(err.to_string()))?;
    info!("Connected to MySQL");
    Ok(())
}
