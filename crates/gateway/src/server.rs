use std::sync::Arc;

use {
    anyhow::bail,
    tracing::{info, warn},
};

use {
    switchboard_agents::{AgentBackend, ModelCatalog},
    switchboard_auto_reply::AutoReply,
    switchboard_channels::ChannelOutbound,
    switchboard_config::{Severity, SwitchboardConfig},
    switchboard_sessions::SessionStore,
};

use crate::{
    methods::MethodRegistry,
    services::GatewayServices,
    session::LiveSessionService,
    state::GatewayState,
};

/// A fully wired gateway: the auto-reply engine plus the control plane
/// operating on the same session store.
pub struct Gateway {
    pub engine: AutoReply,
    pub state: Arc<GatewayState>,
    pub methods: Arc<MethodRegistry>,
}

impl Gateway {
    /// Validate `config` and wire every component. Fails only on config errors.
    pub fn build(
        config: &SwitchboardConfig,
        backend: Arc<dyn AgentBackend>,
        outbound: Arc<dyn ChannelOutbound>,
        catalog: Arc<dyn ModelCatalog>,
    ) -> anyhow::Result<Self> {
        let report = switchboard_config::validate(config);
        for d in &report.diagnostics {
            match d.severity {
                Severity::Error => warn!(path = %d.path, category = d.category, "config error: {}", d.message),
                Severity::Warning => warn!(path = %d.path, category = d.category, "config warning: {}", d.message),
                Severity::Info => info!(path = %d.path, "config: {}", d.message),
            }
        }
        if report.has_errors() {
            bail!(
                "invalid configuration ({} error(s))",
                report.count(Severity::Error)
            );
        }

        let store_dir = config.session.store_dir();
        let engine = AutoReply::new(config, SessionStore::in_dir(&store_dir), backend, outbound);
        let sessions = LiveSessionService::new(engine.clone(), catalog)
            .with_compact_max_lines(config.session.compact_max_lines);
        let state = GatewayState::new(GatewayServices::noop().with_session(Arc::new(sessions)));

        info!(
            store = %store_dir.display(),
            main_key = engine.routing().main_key(),
            max_concurrent = config.agent.max_concurrent,
            "gateway ready"
        );
        Ok(Self {
            engine,
            state,
            methods: Arc::new(MethodRegistry::new()),
        })
    }
}
