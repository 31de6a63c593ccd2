use std::sync::Arc;

use {
    async_trait::async_trait,
    serde_json::{Value, json},
    tracing::{debug, info},
};

use {
    switchboard_agents::ModelCatalog,
    switchboard_auto_reply::AutoReply,
    switchboard_common::time::now_ms,
    switchboard_sessions::{GLOBAL_KEY, SessionListFilter, SessionPatch},
};

use crate::{
    services::{ServiceError, ServiceResult, SessionService},
    session_types::{
        CompactParams, DEFAULT_COMPACT_MAX_LINES, DEFAULT_PREVIEW_LIMIT, DeleteParams, KeyParams,
        ListParams, PatchParams, PreviewParams, parse_params, require_key,
    },
};

fn store_error(err: switchboard_sessions::Error) -> ServiceError {
    if err.is_invalid_request() {
        ServiceError::invalid_request(err)
    } else {
        ServiceError::message(err)
    }
}

/// Session service backed by the live auto-reply engine, so control-plane
/// changes coordinate with in-flight runs.
pub struct LiveSessionService {
    engine: AutoReply,
    catalog: Arc<dyn ModelCatalog>,
    compact_max_lines: usize,
}

impl LiveSessionService {
    pub fn new(engine: AutoReply, catalog: Arc<dyn ModelCatalog>) -> Self {
        Self {
            engine,
            catalog,
            compact_max_lines: DEFAULT_COMPACT_MAX_LINES,
        }
    }

    pub fn with_compact_max_lines(mut self, max_lines: usize) -> Self {
        self.compact_max_lines = max_lines.max(1);
        self
    }

    fn is_protected(&self, key: &str) -> bool {
        key == self.engine.routing().main_key() || key == GLOBAL_KEY
    }

    /// Translate wire params into a store patch, resolving `model`.
    fn build_patch(&self, params: PatchParams) -> Result<SessionPatch, ServiceError> {
        let (provider_override, model_override) = match params.model {
            None => (None, None),
            Some(None) => (Some(None), Some(None)),
            Some(Some(name)) => {
                let found = self
                    .catalog
                    .resolve(&name)
                    .ok_or_else(|| ServiceError::invalid_request(format!("unknown model: {name}")))?;
                (Some(Some(found.provider)), Some(Some(found.model)))
            },
        };
        Ok(SessionPatch {
            thinking_level: params.thinking_level,
            verbose_level: params.verbose_level,
            send_policy: params.send_policy,
            group_activation: params.group_activation,
            queue_mode: params.queue_mode,
            queue_debounce_ms: params.queue_debounce_ms,
            queue_cap: params.queue_cap,
            queue_drop: params.queue_drop,
            provider_override,
            model_override,
            label: params.label,
        })
    }
}

#[async_trait]
impl SessionService for LiveSessionService {
    async fn list(&self, params: Value) -> ServiceResult {
        let params: ListParams = parse_params(params)?;
        let filter = SessionListFilter {
            include_global: params.include_global,
            include_unknown: params.include_unknown,
            active_minutes: params.active_minutes,
            limit: params.limit,
        };
        let rows = self.engine.store().list(&filter).await;
        let sessions: Vec<Value> = rows.iter().map(|row| row.to_value()).collect();
        Ok(json!({
            "ts": now_ms(),
            "path": self.engine.store().path().display().to_string(),
            "count": sessions.len(),
            "sessions": sessions,
        }))
    }

    async fn preview(&self, params: Value) -> ServiceResult {
        let params: PreviewParams = parse_params(params)?;
        let key = require_key(&params.key)?;
        let Some(entry) = self.engine.store().get(key).await else {
            return Ok(json!({ "key": key, "lines": [] }));
        };
        let lines = self
            .engine
            .transcripts()
            .read_last_n(&entry.session_id, params.limit.unwrap_or(DEFAULT_PREVIEW_LIMIT))
            .await
            .map_err(store_error)?;
        Ok(json!({
            "key": key,
            "sessionId": entry.session_id,
            "lines": lines,
        }))
    }

    async fn patch(&self, params: Value) -> ServiceResult {
        let params: PatchParams = parse_params(params)?;
        let key = require_key(&params.key)?.to_string();
        let patch = self.build_patch(params)?;
        if patch.is_empty() {
            return Err(ServiceError::invalid_request("nothing to patch"));
        }
        let entry = self
            .engine
            .store()
            .patch(&key, &patch)
            .await
            .map_err(store_error)?;
        debug!(session_key = %key, "session patched");
        Ok(json!({ "key": key, "entry": entry }))
    }

    async fn reset(&self, params: Value) -> ServiceResult {
        let params: KeyParams = parse_params(params)?;
        let key = require_key(&params.key)?;
        let cancelled = self.engine.coordinator().cancel(key, true).await;
        self.engine.history().clear(key);
        let entry = self.engine.store().reset(key).await.map_err(store_error)?;
        info!(session_key = %key, session_id = %entry.session_id, cancelled, "session reset");
        Ok(json!({ "key": key, "cancelled": cancelled, "entry": entry }))
    }

    async fn delete(&self, params: Value) -> ServiceResult {
        let params: DeleteParams = parse_params(params)?;
        let key = require_key(&params.key)?;
        if self.is_protected(key) {
            return Err(store_error(switchboard_sessions::Error::protected(key)));
        }

        let cancelled = self.engine.coordinator().cancel(key, true).await;
        let removed = self.engine.store().remove(key).await.map_err(store_error)?;
        let archived = match &removed {
            Some(entry) if params.delete_transcript => self
                .engine
                .transcripts()
                .archive(&entry.session_id)
                .await
                .map_err(store_error)?,
            _ => None,
        };
        self.engine.coordinator().remove_lane(key);
        self.engine.history().clear(key);

        info!(session_key = %key, deleted = removed.is_some(), cancelled, "session deleted");
        Ok(json!({
            "key": key,
            "deleted": removed.is_some(),
            "cancelled": cancelled,
            "archived": archived.map(|p| p.display().to_string()),
        }))
    }

    async fn compact(&self, params: Value) -> ServiceResult {
        let params: CompactParams = parse_params(params)?;
        let key = require_key(&params.key)?;
        let max_lines = params.max_lines.unwrap_or(self.compact_max_lines);
        if max_lines == 0 {
            return Err(ServiceError::invalid_request("invalid maxLines (must be at least 1)"));
        }
        let Some(entry) = self.engine.store().get(key).await else {
            return Ok(json!({ "key": key, "compacted": false, "reason": "no session" }));
        };
        let outcome = self
            .engine
            .transcripts()
            .compact(&entry.session_id, max_lines)
            .await
            .map_err(store_error)?;
        let mut payload = serde_json::to_value(&outcome)?;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("key".into(), key.into());
        }
        Ok(payload)
    }
}
