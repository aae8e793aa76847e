//! Streaming services: the producers behind the `/event` routes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use event_transport_server::{json_map, EventStream, JsonMap, ServerError};
use serde_json::json;

/// A producer of events for one request.
///
/// Implementations push events and should end with `finish`. The route calls
/// `finish` with an error payload when `run` fails, and a repeated `finish`
/// is harmless.
#[async_trait]
pub trait StreamingService: Send + Sync {
    async fn run(&self, stream: &mut dyn EventStream, payload: JsonMap) -> Result<(), ServerError>;
}

/// Echoes the words of `payload.prompt` back as `token` events.
#[derive(Debug, Clone)]
pub struct EchoService {
    delay: Duration,
}

impl Default for EchoService {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(20),
        }
    }
}

impl EchoService {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl StreamingService for EchoService {
    async fn run(&self, stream: &mut dyn EventStream, payload: JsonMap) -> Result<(), ServerError> {
        let prompt = payload
            .get("prompt")
            .and_then(|p| p.as_str())
            .unwrap_or_default();

        stream.start().await?;
        let mut count = 0;
        for word in prompt.split_whitespace() {
            if stream.is_disconnected() {
                log::debug!("Echo client went away after {} tokens", count);
                break;
            }
            stream.push("token", json_map(json!({ "t": word }))).await?;
            count += 1;
            tokio::time::sleep(self.delay).await;
        }

        stream.send_comment("heartbeat").await?;
        stream.finish(json_map(json!({ "n": count }))).await
    }
}

/// Maps service names to producers.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn StreamingService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in services.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("echo", EchoService::default());
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, service: impl StreamingService + 'static) {
        self.services.insert(name.into(), Arc::new(service));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StreamingService>> {
        self.services.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_transport_server::NoStreamEventStream;

    #[tokio::test]
    async fn test_echo_tokens_and_count() {
        let service = EchoService::new(Duration::ZERO);
        let mut stream = NoStreamEventStream::new();

        service
            .run(&mut stream, json_map(json!({"prompt": "He llo"})))
            .await
            .unwrap();

        let output = serde_json::to_value(stream.take_output().unwrap()).unwrap();
        assert_eq!(
            output,
            json!({
                "type": "done",
                "events": [
                    {"type": "token", "data": {"t": "He"}},
                    {"type": "token", "data": {"t": "llo"}}
                ],
                "data": {"n": 2}
            })
        );
    }

    #[tokio::test]
    async fn test_echo_without_prompt() {
        let mut stream = NoStreamEventStream::new();
        EchoService::new(Duration::ZERO)
            .run(&mut stream, JsonMap::new())
            .await
            .unwrap();
        assert_eq!(stream.take_output().unwrap().data, json_map(json!({"n": 0})));
    }

    #[test]
    fn test_registry() {
        let registry = ServiceRegistry::with_builtin();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nope").is_none());
        assert_eq!(registry.names(), vec!["echo"]);
    }
}
