use std::{collections::HashMap, sync::Arc, time::Instant};

use tokio::sync::RwLock;

use crate::services::GatewayServices;

// ── Connected client ─────────────────────────────────────────────────────────

/// An authenticated control-plane client. Authentication happens before the
/// client is registered; the gateway only checks role and scopes.
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub conn_id: String,
    pub role: String,
    pub scopes: Vec<String>,
    pub connected_at: Instant,
}

impl ConnectedClient {
    pub fn new(conn_id: impl Into<String>, role: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            conn_id: conn_id.into(),
            role: role.into(),
            scopes,
            connected_at: Instant::now(),
        }
    }

    /// Operator connection with the given scopes.
    pub fn operator(conn_id: impl Into<String>, scopes: &[&str]) -> Self {
        Self::new(
            conn_id,
            switchboard_protocol::roles::OPERATOR,
            scopes.iter().map(|s| (*s).to_string()).collect(),
        )
    }
}

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
pub struct GatewayState {
    /// Connected clients, keyed by conn_id.
    pub clients: RwLock<HashMap<String, ConnectedClient>>,
    /// Server version string.
    pub version: String,
    /// Domain services.
    pub services: GatewayServices,
}

impl GatewayState {
    pub fn new(services: GatewayServices) -> Arc<Self> {
        Arc::new(Self {
            clients: RwLock::new(HashMap::new()),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services,
        })
    }

    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id.clone();
        self.clients.write().await.insert(conn_id, client);
    }

    /// Remove a client by conn_id. Returns the removed client if found.
    pub async fn remove_client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.write().await.remove(conn_id)
    }

    pub async fn client(&self, conn_id: &str) -> Option<ConnectedClient> {
        self.clients.read().await.get(conn_id).cloned()
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}
