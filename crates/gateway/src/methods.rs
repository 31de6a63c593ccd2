use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use tracing::{debug, warn};

#[cfg(feature = "metrics")]
use switchboard_metrics::{control as control_metrics, counter, labels};

use switchboard_protocol::{ErrorShape, RequestFrame, ResponseFrame, error_codes};

use crate::state::GatewayState;

// ── Types ────────────────────────────────────────────────────────────────────

/// Context passed to every method handler.
pub struct MethodContext {
    pub request_id: String,
    pub method: String,
    pub params: serde_json::Value,
    pub client_conn_id: String,
    pub client_role: String,
    pub client_scopes: Vec<String>,
    pub state: Arc<GatewayState>,
}

/// The result a method handler produces.
pub type MethodResult = Result<serde_json::Value, ErrorShape>;

/// A boxed async method handler.
pub type HandlerFn =
    Box<dyn Fn(MethodContext) -> Pin<Box<dyn Future<Output = MethodResult> + Send>> + Send + Sync>;

// ── Scope authorization ──────────────────────────────────────────────────────

const READ_METHODS: &[&str] = &["sessions.list", "sessions.preview"];

const WRITE_METHODS: &[&str] = &[
    "sessions.patch",
    "sessions.reset",
    "sessions.delete",
    "sessions.compact",
];

fn is_in(method: &str, list: &[&str]) -> bool {
    list.contains(&method)
}

/// Check role + scopes for a method. Returns None if authorized, Some(error) if not.
pub fn authorize_method(method: &str, role: &str, scopes: &[String]) -> Option<ErrorShape> {
    use switchboard_protocol::{roles, scopes as s};

    if role != roles::OPERATOR {
        return Some(ErrorShape::new(
            error_codes::INVALID_REQUEST,
            format!("unauthorized role: {role}"),
        ));
    }

    let has = |scope: &str| scopes.iter().any(|s| s == scope);
    if has(s::ADMIN) {
        return None;
    }

    if is_in(method, READ_METHODS) && !(has(s::READ) || has(s::WRITE)) {
        return Some(ErrorShape::new(
            error_codes::INVALID_REQUEST,
            "missing scope: operator.read",
        ));
    }
    if is_in(method, WRITE_METHODS) && !has(s::WRITE) {
        return Some(ErrorShape::new(
            error_codes::INVALID_REQUEST,
            "missing scope: operator.write",
        ));
    }

    if is_in(method, READ_METHODS) || is_in(method, WRITE_METHODS) {
        return None;
    }

    Some(ErrorShape::new(
        error_codes::INVALID_REQUEST,
        "missing scope: operator.admin",
    ))
}

// ── Method registry ──────────────────────────────────────────────────────────

pub struct MethodRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        let mut reg = Self {
            handlers: HashMap::new(),
        };
        reg.register_defaults();
        reg
    }

    pub fn register(&mut self, method: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(method.into(), handler);
    }

    pub async fn dispatch(&self, ctx: MethodContext) -> ResponseFrame {
        let method = ctx.method.clone();
        let request_id = ctx.request_id.clone();
        let conn_id = ctx.client_conn_id.clone();

        if let Some(err) = authorize_method(&method, &ctx.client_role, &ctx.client_scopes) {
            warn!(method = %method, conn_id = %conn_id, code = %err.code, "method auth denied");
            return ResponseFrame::err(&request_id, err);
        }

        let Some(handler) = self.handlers.get(&method) else {
            warn!(method = %method, conn_id = %conn_id, "unknown method");
            return ResponseFrame::err(
                &request_id,
                ErrorShape::new(
                    error_codes::INVALID_REQUEST,
                    format!("unknown method: {method}"),
                ),
            );
        };

        debug!(method = %method, request_id = %request_id, conn_id = %conn_id, "dispatching method");
        let result = handler(ctx).await;
        #[cfg(feature = "metrics")]
        counter!(
            control_metrics::CALLS_TOTAL,
            labels::METHOD => method.clone(),
            labels::SUCCESS => if result.is_ok() { "true" } else { "false" }
        )
        .increment(1);
        match result {
            Ok(payload) => {
                debug!(method = %method, request_id = %request_id, "method ok");
                ResponseFrame::ok(&request_id, payload)
            },
            Err(err) => {
                if err.code == error_codes::UNAVAILABLE {
                    warn!(method = %method, request_id = %request_id, code = %err.code, msg = %err.message, "method error");
                } else {
                    debug!(method = %method, request_id = %request_id, code = %err.code, msg = %err.message, "method rejected");
                }
                ResponseFrame::err(&request_id, err)
            },
        }
    }

    /// Dispatch a wire request on behalf of a registered client.
    pub async fn handle_frame(
        &self,
        state: &Arc<GatewayState>,
        conn_id: &str,
        frame: RequestFrame,
    ) -> ResponseFrame {
        if frame.r#type != "req" {
            return ResponseFrame::err(
                &frame.id,
                ErrorShape::invalid(format!("unexpected frame type: {}", frame.r#type)),
            );
        }
        let Some(client) = state.client(conn_id).await else {
            warn!(conn_id, method = %frame.method, "request from unknown connection");
            return ResponseFrame::err(&frame.id, ErrorShape::invalid("unknown connection"));
        };
        self.dispatch(MethodContext {
            request_id: frame.id,
            method: frame.method,
            params: frame.params.unwrap_or(serde_json::Value::Null),
            client_conn_id: client.conn_id,
            client_role: client.role,
            client_scopes: client.scopes,
            state: Arc::clone(state),
        })
        .await
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    fn register_defaults(&mut self) {
        self.register_session_methods();
    }

    // ── Sessions ─────────────────────────────────────────────────────────

    fn register_session_methods(&mut self) {
        self.register(
            "sessions.list",
            Box::new(|ctx| {
                Box::pin(async move {
                    ctx.state
                        .services
                        .session
                        .list(ctx.params.clone())
                        .await
                        .map_err(ErrorShape::from)
                })
            }),
        );
        self.register(
            "sessions.preview",
            Box::new(|ctx| {
                Box::pin(async move {
                    ctx.state
                        .services
                        .session
                        .preview(ctx.params.clone())
                        .await
                        .map_err(ErrorShape::from)
                })
            }),
        );
        self.register(
            "sessions.patch",
            Box::new(|ctx| {
                Box::pin(async move {
                    ctx.state
                        .services
                        .session
                        .patch(ctx.params.clone())
                        .await
                        .map_err(ErrorShape::from)
                })
            }),
        );
        self.register(
            "sessions.reset",
            Box::new(|ctx| {
                Box::pin(async move {
                    ctx.state
                        .services
                        .session
                        .reset(ctx.params.clone())
                        .await
                        .map_err(ErrorShape::from)
                })
            }),
        );
        self.register(
            "sessions.delete",
            Box::new(|ctx| {
                Box::pin(async move {
                    ctx.state
                        .services
                        .session
                        .delete(ctx.params.clone())
                        .await
                        .map_err(ErrorShape::from)
                })
            }),
        );
        self.register(
            "sessions.compact",
            Box::new(|ctx| {
                Box::pin(async move {
                    ctx.state
                        .services
                        .session
                        .compact(ctx.params.clone())
                        .await
                        .map_err(ErrorShape::from)
                })
            }),
        );
    }
}
