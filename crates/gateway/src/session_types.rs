//! Typed parameter structs for the `sessions.*` methods.
//!
//! Fields that can be cleared (set to null) use `Option<Option<T>>`:
//! - outer `None` → field was absent from the request (no-op)
//! - `Some(None)` → field was explicitly `null` (clear it)
//! - `Some(Some(v))` → field was set to value `v`

use serde::Deserialize;

use crate::services::ServiceError;

/// Lines kept by `sessions.compact` when neither the caller nor config say otherwise.
pub const DEFAULT_COMPACT_MAX_LINES: usize = 400;

/// Transcript lines returned by `sessions.preview` by default.
pub const DEFAULT_PREVIEW_LIMIT: usize = 5;

/// Params for `sessions.list`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    #[serde(default)]
    pub include_global: bool,
    #[serde(default)]
    pub include_unknown: bool,
    #[serde(default)]
    pub active_minutes: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Params for methods that only name a session.
#[derive(Debug, Deserialize)]
pub struct KeyParams {
    pub key: String,
}

/// Params for `sessions.patch`. Only provided fields are updated.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchParams {
    pub key: String,
    #[serde(default, deserialize_with = "double_option")]
    pub thinking_level: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub verbose_level: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub send_policy: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub group_activation: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub queue_mode: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub queue_debounce_ms: Option<Option<u64>>,
    #[serde(default, deserialize_with = "double_option")]
    pub queue_cap: Option<Option<usize>>,
    #[serde(default, deserialize_with = "double_option")]
    pub queue_drop: Option<Option<String>>,
    /// Model name resolved through the catalog; `null` clears the override.
    #[serde(default, deserialize_with = "double_option")]
    pub model: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub label: Option<Option<String>>,
}

/// Params for `sessions.delete`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteParams {
    pub key: String,
    #[serde(default = "default_true")]
    pub delete_transcript: bool,
}

/// Params for `sessions.compact`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactParams {
    pub key: String,
    #[serde(default)]
    pub max_lines: Option<usize>,
}

/// Params for `sessions.preview`.
#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    pub key: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn default_true() -> bool {
    true
}

/// Deserialize a field as `Some(inner)` when present (even if null),
/// vs `None` when absent (via `#[serde(default)]`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?))
}

/// Parse a `serde_json::Value` into a typed param struct. Missing params
/// (`null`) parse as an empty object.
pub fn parse_params<T: serde::de::DeserializeOwned>(
    params: serde_json::Value,
) -> Result<T, ServiceError> {
    let params = if params.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        params
    };
    serde_json::from_value(params).map_err(|e| ServiceError::invalid_request(format!("invalid params: {e}")))
}

/// Trimmed, non-empty session key.
pub fn require_key(key: &str) -> Result<&str, ServiceError> {
    match key.trim() {
        "" => Err(ServiceError::invalid_request("missing 'key' parameter")),
        key => Ok(key),
    }
}
