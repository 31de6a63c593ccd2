//! Domain services reachable from method handlers.

use std::sync::Arc;

pub use switchboard_service_traits::*;

/// Bundles the services the gateway dispatches to.
pub struct GatewayServices {
    pub session: Arc<dyn SessionService>,
}

impl GatewayServices {
    /// Services that answer with empty data until the session stack is wired in.
    pub fn noop() -> Self {
        Self {
            session: Arc::new(NoopSessionService),
        }
    }

    pub fn with_session(mut self, session: Arc<dyn SessionService>) -> Self {
        self.session = session;
        self
    }
}

impl Default for GatewayServices {
    fn default() -> Self {
        Self::noop()
    }
}
