use std::sync::{Arc, RwLock};

use serde::Serialize;

/// A concrete model on a concrete provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

impl ModelRef {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// `provider/model`.
    pub fn full(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Resolves user-facing model names (`gpt-4o`, `openai/gpt-4o`) to a
/// provider/model pair.
pub trait ModelCatalog: Send + Sync {
    fn resolve(&self, name: &str) -> Option<ModelRef>;
}

/// Fixed list of known models.
#[derive(Debug, Clone, Default)]
pub struct StaticModelCatalog {
    models: Vec<ModelRef>,
}

impl StaticModelCatalog {
    pub fn new(models: Vec<ModelRef>) -> Self {
        Self { models }
    }
}

impl ModelCatalog for StaticModelCatalog {
    /// Exact `provider/model` match first, then a bare model name when it is
    /// unique across providers.
    fn resolve(&self, name: &str) -> Option<ModelRef> {
        let name = name.trim();
        if let Some((provider, model)) = name.split_once('/')
            && let Some(found) = self
                .models
                .iter()
                .find(|m| m.provider.eq_ignore_ascii_case(provider) && m.model == model)
        {
            return Some(found.clone());
        }
        let mut matches = self.models.iter().filter(|m| m.model == name);
        match (matches.next(), matches.next()) {
            (Some(found), None) => Some(found.clone()),
            _ => None,
        }
    }
}

/// What the running agent reported it is using.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSelection {
    pub provider: String,
    pub model: String,
    pub thinking_level: Option<String>,
}

/// Shared slot for the current run's model selection. Written by the run's
/// event handler, read by the reply dispatcher at delivery time.
#[derive(Debug, Clone, Default)]
pub struct ModelSelectionCell(Arc<RwLock<Option<ModelSelection>>>);

impl ModelSelectionCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, selection: ModelSelection) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = Some(selection);
    }

    pub fn get(&self) -> Option<ModelSelection> {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = None;
    }
}
