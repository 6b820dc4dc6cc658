use std::sync::{PoisonError, RwLock};

use dashmap::DashMap;
use url::Url;

use super::client::Client;
use crate::error::Error;
use crate::ws::config::Config;
use crate::{BASE_URL_VAR, DEFAULT_BASE_URL, HEALTH_TARGET, Result};

/// Registry of real-time clients keyed by primary target id.
///
/// Clients are created lazily and owned by the registry; callers get cheap clones.
/// One extra client bound to [`HEALTH_TARGET`] is kept apart from the keyed clients.
#[derive(Debug)]
pub struct Manager {
    base: Url,
    config: Config,
    clients: DashMap<String, Client>,
    health: RwLock<Option<Client>>,
}

impl Manager {
    /// Registry for the backend at `base_url` using default client configuration.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_config(base_url, Config::default())
    }

    /// Registry whose new clients use `config` unless a call overrides it.
    pub fn with_config(base_url: &str, config: Config) -> Result<Self> {
        let base = Url::parse(base_url)?;
        // Fail early on bases that cannot produce an endpoint.
        endpoint(&base, HEALTH_TARGET)?;

        Ok(Self {
            base,
            config,
            clients: DashMap::new(),
            health: RwLock::new(None),
        })
    }

    /// Registry for the backend named by `AGENT_BACKEND_URL`, falling back to
    /// [`DEFAULT_BASE_URL`].
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var(BASE_URL_VAR).unwrap_or_else(|_| DEFAULT_BASE_URL.to_owned());
        Self::new(&base_url)
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// WebSocket endpoint serving `target`.
    pub fn endpoint(&self, target: &str) -> Result<Url> {
        endpoint(&self.base, target)
    }

    /// Existing client for `target`, or a new disconnected one.
    ///
    /// `config` applies only when the client is created.
    pub fn get_client(&self, target: &str, config: Option<Config>) -> Result<Client> {
        if target.is_empty() {
            return Err(Error::validation("target id cannot be empty"));
        }
        if let Some(client) = self.clients.get(target) {
            return Ok(client.clone());
        }

        let endpoint = self.endpoint(target)?;
        let client = self
            .clients
            .entry(target.to_owned())
            .or_insert_with(|| {
                #[cfg(feature = "tracing")]
                tracing::debug!(%target, %endpoint, "Creating real-time client");

                Client::new(
                    target,
                    endpoint.as_str(),
                    config.unwrap_or_else(|| self.config.clone()),
                )
            })
            .clone();

        Ok(client)
    }

    /// Get or create the client for `target` and connect it.
    pub async fn connect(&self, target: &str, config: Option<Config>) -> Result<Client> {
        let client = self.get_client(target, config)?;
        client.connect().await?;
        Ok(client)
    }

    /// Disconnect and forget the client for `target`. Unknown ids are ignored.
    pub fn disconnect(&self, target: &str) {
        if let Some((_, client)) = self.clients.remove(target) {
            #[cfg(feature = "tracing")]
            tracing::debug!(%target, "Removing real-time client");
            client.shutdown();
        }
    }

    /// Disconnect and forget every client, the health client included.
    pub fn disconnect_all(&self) {
        #[cfg(feature = "tracing")]
        tracing::debug!(count = self.clients.len(), "Disconnecting all real-time clients");

        self.clients.retain(|_, client| {
            client.shutdown();
            false
        });
        self.disconnect_health();
    }

    /// Connect the health-check client, creating it on first use.
    pub async fn connect_health(&self, config: Option<Config>) -> Result<Client> {
        let client = {
            let mut health = self.health.write().unwrap_or_else(PoisonError::into_inner);
            match health.as_ref() {
                Some(client) => client.clone(),
                None => {
                    let client = Client::new(
                        HEALTH_TARGET,
                        self.endpoint(HEALTH_TARGET)?.as_str(),
                        config.unwrap_or_else(|| self.config.clone()),
                    );
                    *health = Some(client.clone());
                    client
                }
            }
        };

        client.connect().await?;
        Ok(client)
    }

    pub fn disconnect_health(&self) {
        let client = self
            .health
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(client) = client {
            client.shutdown();
        }
    }

    #[must_use]
    pub fn health_client(&self) -> Option<Client> {
        self.health
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of keyed clients, the health client excluded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Target ids with a registered client, sorted.
    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.clients.iter().map(|entry| entry.key().clone()).collect();
        targets.sort_unstable();
        targets
    }
}

/// Derive the WebSocket endpoint for `target`: `http`/`https` become `ws`/`wss`
/// and `/v1/ws/{target}` is appended to the base path.
pub fn endpoint(base: &Url, target: &str) -> Result<Url> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(Error::validation(format!(
                "unsupported backend scheme `{other}`"
            )));
        }
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|()| Error::validation(format!("cannot switch {base} to {scheme}")))?;
    url.path_segments_mut()
        .map_err(|()| Error::validation(format!("{base} cannot be a base URL")))?
        .pop_if_empty()
        .extend(["v1", "ws", target]);
    url.set_fragment(None);

    Ok(url)
}
