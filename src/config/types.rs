use std::path::PathBuf;
use std::time::Duration;

use event_transport_server::{FactoryOptions, SseConfig, TransportConfig};
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub transport: TransportSection,
    pub server: ServerSection,
    pub queue: QueueSection,
    pub polling: PollingConfig,
    pub sse: SseSection,
    pub handoff: HandoffConfig,
}

/// Mode negotiation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSection {
    #[serde(flatten)]
    pub negotiation: TransportConfig,
    /// Whether the deployment can hold streaming responses open
    pub sse_supported: bool,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            negotiation: TransportConfig::default(),
            sse_supported: true,
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    /// Base URL hand-off streams replay their POST against. Defaults to the
    /// listener address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_base_url: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            public_base_url: None,
        }
    }
}

/// Where polling queues live
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    File,
    Memory,
}

/// Queue store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSection {
    pub backend: QueueBackend,
    /// Directory of the file store; the system temp dir when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    /// Records untouched for this long are purged. Zero disables purging.
    pub max_age_secs: u64,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            backend: QueueBackend::File,
            dir: None,
            max_age_secs: 3600,
        }
    }
}

impl QueueSection {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("evtx-queues"))
    }
}

/// Polling intervals and timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Client-side pause between short polls
    pub short_interval_ms: u64,
    /// Upper bound of one long-poll request
    pub long_timeout_secs: u64,
    /// Server-side pause between pop attempts of a long poll
    pub long_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            short_interval_ms: 120,
            long_timeout_secs: 20,
            long_interval_ms: 50,
        }
    }
}

impl PollingConfig {
    pub fn short_interval(&self) -> Duration {
        Duration::from_millis(self.short_interval_ms)
    }

    pub fn long_timeout(&self) -> Duration {
        Duration::from_secs(self.long_timeout_secs)
    }

    pub fn long_interval(&self) -> Duration {
        Duration::from_millis(self.long_interval_ms)
    }
}

/// SSE output tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SseSection {
    pub initial_padding: bool,
    pub padding_every: usize,
    pub padding_bytes: usize,
    pub channel_capacity: usize,
}

impl Default for SseSection {
    fn default() -> Self {
        let sse = SseConfig::default();
        Self {
            initial_padding: sse.initial_padding,
            padding_every: sse.padding_every,
            padding_bytes: sse.padding_bytes,
            channel_capacity: sse.channel_capacity,
        }
    }
}

impl From<&SseSection> for SseConfig {
    fn from(section: &SseSection) -> Self {
        SseConfig {
            initial_padding: section.initial_padding,
            padding_every: section.padding_every,
            padding_bytes: section.padding_bytes,
            channel_capacity: section.channel_capacity,
        }
    }
}

/// POST-SSE hand-off settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandoffConfig {
    pub ttl_secs: u64,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 }
    }
}

impl Config {
    /// Engine options derived from the `[transport]`, `[sse]` and `[polling]` sections.
    pub fn factory_options(&self) -> FactoryOptions {
        FactoryOptions {
            sse_supported: self.transport.sse_supported,
            sse: SseConfig::from(&self.sse),
            long_poll_interval: self.polling.long_interval(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.transport.negotiation.default_mode, "sse");
        assert_eq!(config.polling.short_interval(), Duration::from_millis(120));
        assert_eq!(config.polling.long_timeout(), Duration::from_secs(20));
        assert_eq!(config.queue.backend, QueueBackend::File);
        assert_eq!(config.handoff.ttl_secs, 300);
    }

    #[test]
    fn test_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [transport]
            default_mode = "ws"
            fallback_order = ["long", "nostream"]
            sse_supported = false

            [queue]
            backend = "memory"

            [polling]
            long_timeout_secs = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.transport.negotiation.default_mode, "ws");
        assert!(config.transport.negotiation.auto_fallback);
        assert_eq!(config.transport.negotiation.fallback_order, vec!["long", "nostream"]);
        assert!(!config.transport.sse_supported);
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.polling.long_timeout_secs, 5);
        assert_eq!(config.polling.short_interval_ms, 120);
        assert_eq!(config.server.port, 8787);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
