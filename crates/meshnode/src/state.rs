//! Application state and shared resources.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::connection::Connector;
use crate::identity::NodeIdentity;
use crate::node::MeshNode;
use crate::secure::AccessLog;
use crate::storage::{self, Backend};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,

    /// Peer pipeline (identity, codec, storage)
    pub mesh: Arc<MeshNode>,

    /// Outbound HTTP client
    pub connector: Arc<Connector>,
}

impl AppState {
    /// Open storage and build the node
    pub async fn new(config: AppConfig) -> Result<Self> {
        let backend = storage::open(config.storage, &config.redis_url)
            .await
            .context("Failed to open storage")?;

        Self::with_backend(config, backend)
    }

    /// Build the node on an already opened backend
    pub fn with_backend(config: AppConfig, backend: Arc<dyn Backend>) -> Result<Self> {
        let identity = NodeIdentity::from_config(&config.node).context("Invalid node identity")?;
        let encryptor = config.node.encryptor.build(config.node.raw);

        let access_log = AccessLog::new(
            config.logs.access_errors_file.clone(),
            config.logs.access_errors_db.then(|| backend.clone()),
        );
        if !access_log.is_enabled() {
            tracing::info!("Unauthorized access logging disabled");
        }

        let mesh = MeshNode::new(
            identity,
            encryptor,
            backend,
            access_log,
            config.connection.relay,
        );
        let connector =
            Connector::new(&config.connection.connector()).context("Failed to build connector")?;

        Ok(Self {
            config: Arc::new(config),
            mesh: Arc::new(mesh),
            connector: Arc::new(connector),
        })
    }

    /// True if `password` opens the admin surface
    pub fn is_operator(&self, password: Option<&str>) -> bool {
        match self.config.admin_password_hash.as_deref() {
            None => true,
            Some(hash) => password.is_some_and(|p| bcrypt::verify(p, hash).unwrap_or(false)),
        }
    }
}

#[cfg(test)]
pub(crate) fn test_state(admin_password: Option<&str>) -> AppState {
    test_state_at("me.org/node", admin_password)
}

#[cfg(test)]
pub(crate) fn test_state_at(url: &str, admin_password: Option<&str>) -> AppState {
    use crate::storage::MemoryBackend;

    let mut config = AppConfig::default();
    config.node.key_id = "shared".into();
    config.node.url = url.into();
    config.node.hash_cost = 4;
    config.logs.access_errors_db = true;
    config.admin_password_hash = admin_password.map(|p| bcrypt::hash(p, 4).unwrap());

    AppState::with_backend(config, Arc::new(MemoryBackend::new())).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_password() {
        assert!(test_state(None).is_operator(None));

        let state = test_state(Some("hunter2"));
        assert!(state.is_operator(Some("hunter2")));
        assert!(!state.is_operator(Some("wrong")));
        assert!(!state.is_operator(None));
    }
}
