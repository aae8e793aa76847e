//! Process-wide transport configuration.

use serde::{Deserialize, Serialize};

use crate::mode::TransportMode;
use crate::resolve::{candidate_chain, negotiate, Resolution};

/// Which transport a stream should use and what to try when it is unavailable.
///
/// Mode names are kept as strings so that a misspelled or retired mode in a
/// configuration file degrades to the fallback chain instead of failing to load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Preferred mode.
    pub default_mode: String,
    /// Whether `fallback_order` is consulted when the preferred mode is unavailable.
    pub auto_fallback: bool,
    /// Modes to try, in order, after the preferred one.
    pub fallback_order: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            default_mode: TransportMode::Sse.as_str().to_string(),
            auto_fallback: true,
            fallback_order: vec![
                TransportMode::Short.as_str().to_string(),
                TransportMode::NoStream.as_str().to_string(),
            ],
        }
    }
}

impl TransportConfig {
    /// Creates a configuration with the given preferred mode and no fallbacks.
    pub fn new(default_mode: impl Into<String>) -> Self {
        Self {
            default_mode: default_mode.into(),
            auto_fallback: true,
            fallback_order: Vec::new(),
        }
    }

    /// Sets the fallback order.
    pub fn with_fallback_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fallback_order = order.into_iter().map(Into::into).collect();
        self
    }

    /// Enables or disables auto-fallback.
    pub fn with_auto_fallback(mut self, enabled: bool) -> Self {
        self.auto_fallback = enabled;
        self
    }

    /// The ordered candidate modes this configuration yields.
    pub fn candidates(&self) -> Vec<TransportMode> {
        candidate_chain(&self.default_mode, &self.fallback_order, self.auto_fallback)
    }

    /// Negotiates a transport, see [`crate::resolve`].
    pub fn negotiate<T>(
        &self,
        attempt: impl FnMut(TransportMode) -> Option<T>,
        last_resort: impl FnOnce() -> T,
    ) -> Resolution<T> {
        negotiate(&self.candidates(), &self.default_mode, attempt, last_resort)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.default_mode, "sse");
        assert!(config.auto_fallback);
        assert_eq!(
            config.candidates(),
            vec![TransportMode::Sse, TransportMode::Short, TransportMode::NoStream]
        );
    }

    #[test]
    fn test_builder() {
        let config = TransportConfig::new("ws")
            .with_fallback_order(["long", "nostream"])
            .with_auto_fallback(false);
        assert_eq!(config.default_mode, "ws");
        assert_eq!(config.fallback_order, vec!["long", "nostream"]);
        assert_eq!(config.candidates(), vec![TransportMode::Ws]);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: TransportConfig = serde_json::from_str(r#"{"default_mode":"long"}"#).unwrap();
        assert_eq!(config.default_mode, "long");
        assert!(config.auto_fallback);
        assert_eq!(config.fallback_order, vec!["short", "nostream"]);
    }

    #[test]
    fn test_unknown_default_mode_falls_through() {
        let config = TransportConfig::new("does-not-exist").with_fallback_order(["long", "nostream"]);
        let resolution = config.negotiate(Some, || TransportMode::NoStream);
        assert_eq!(resolution.mode, TransportMode::Long);
    }
}
