//! Configuration validation.
//!
//! Parsing already rejects malformed values; this layer reports settings that
//! parse fine but cannot work as intended.

use std::path::Path;

use crate::{
    loader::parse_config,
    schema::{HumanDelayMode, SwitchboardConfig},
};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "value", "conflict"
    pub category: &'static str,
    /// Dotted path, e.g. "messages.queue.cap"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Check an already-parsed config.
pub fn validate(config: &SwitchboardConfig) -> ValidationResult {
    let mut out = Vec::new();

    if config.session.main_key.trim().is_empty() {
        out.push(Diagnostic::new(
            Severity::Info,
            "value",
            "session.main_key",
            "blank main key, falling back to \"main\"",
        ));
    }
    if config.session.main_key.trim() == "global" {
        out.push(Diagnostic::new(
            Severity::Error,
            "conflict",
            "session.main_key",
            "\"global\" is reserved for the global scope",
        ));
    }
    for (i, trigger) in config.session.reset_triggers.iter().enumerate() {
        if trigger.trim().is_empty() {
            out.push(Diagnostic::new(
                Severity::Warning,
                "value",
                format!("session.reset_triggers[{i}]"),
                "empty reset trigger never matches",
            ));
        }
    }
    if config.session.compact_max_lines == 0 {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "session.compact_max_lines",
            "must be at least 1",
        ));
    }

    let queue = &config.messages.queue;
    if queue.cap == 0 {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "messages.queue.cap",
            "must be at least 1",
        ));
    }
    for surface in queue.by_surface.keys() {
        if surface.trim().is_empty() {
            out.push(Diagnostic::new(
                Severity::Warning,
                "value",
                "messages.queue.by_surface",
                "blank surface name",
            ));
        } else if surface.chars().any(|c| c.is_ascii_uppercase()) {
            out.push(Diagnostic::new(
                Severity::Warning,
                "value",
                format!("messages.queue.by_surface.{surface}"),
                "surface names are matched lower-case; this entry never applies",
            ));
        }
    }

    let delay = &config.messages.human_delay;
    if delay.mode == HumanDelayMode::Custom {
        match (delay.min_ms, delay.max_ms) {
            (Some(min), Some(max)) if min > max => out.push(Diagnostic::new(
                Severity::Error,
                "value",
                "messages.human_delay",
                format!("min_ms ({min}) is greater than max_ms ({max})"),
            )),
            (None, _) | (_, None) => out.push(Diagnostic::new(
                Severity::Warning,
                "value",
                "messages.human_delay",
                "custom delay without min_ms/max_ms",
            )),
            _ => {},
        }
    } else if delay.min_ms.is_some() || delay.max_ms.is_some() {
        out.push(Diagnostic::new(
            Severity::Info,
            "value",
            "messages.human_delay",
            "min_ms/max_ms only apply in custom mode",
        ));
    }

    if config.agent.max_concurrent == 0 {
        out.push(Diagnostic::new(
            Severity::Error,
            "value",
            "agent.max_concurrent",
            "must be at least 1",
        ));
    }

    ValidationResult {
        diagnostics: out,
        config_path: None,
    }
}

/// Parse and check a config file. Unreadable or unparseable files yield a
/// single `syntax` error.
pub fn validate_file(path: &Path) -> ValidationResult {
    let parsed = std::fs::read_to_string(path)
        .map_err(anyhow::Error::from)
        .and_then(|raw| parse_config(&raw, path));
    let mut result = match parsed {
        Ok(cfg) => validate(&cfg),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                e.to_string(),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(path.to_path_buf());
    result
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        super::*,
        crate::schema::{HumanDelayConfig, QueueMode},
    };

    #[test]
    fn default_config_is_clean() {
        let result = validate(&SwitchboardConfig::default());
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn zero_cap_and_concurrency_are_errors() {
        let mut cfg = SwitchboardConfig::default();
        cfg.messages.queue.cap = 0;
        cfg.agent.max_concurrent = 0;
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert_eq!(result.count(Severity::Error), 2);
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "messages.queue.cap")
        );
    }

    #[test]
    fn inverted_custom_delay_is_an_error() {
        let mut cfg = SwitchboardConfig::default();
        cfg.messages.human_delay = HumanDelayConfig {
            mode: HumanDelayMode::Custom,
            min_ms: Some(900),
            max_ms: Some(100),
        };
        let result = validate(&cfg);
        assert_eq!(result.count(Severity::Error), 1);
        assert!(result.diagnostics[0].message.contains("900"));
    }

    #[test]
    fn uppercase_surface_override_warns() {
        let mut cfg = SwitchboardConfig::default();
        cfg.messages
            .queue
            .by_surface
            .insert("Telegram".into(), QueueMode::Steer);
        let result = validate(&cfg);
        assert_eq!(result.count(Severity::Warning), 1);
        assert!(!result.has_errors());
    }

    #[test]
    fn syntax_errors_reported_for_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("switchboard.toml");
        std::fs::write(&path, "[messages.queue\ncap = 3").unwrap();
        let result = validate_file(&path);
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
    }
}
