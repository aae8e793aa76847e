use std::sync::Arc;

use event_transport::client::{ChannelConfig, ClientCapabilities, TransportResolver};
use event_transport::transport::{
    EventStreamFactory, FactoryOptions, MemoryQueueStore, StreamIdentity, TransportConfig,
    TransportMode,
};
use proptest::prelude::*;

fn mode_name() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "nostream", "short", "long", "sse", "ws", "SSE", " long ", "does-not-exist", "",
    ])
    .prop_map(str::to_string)
}

fn server_mode(primary: &str, fallbacks: &[String], auto: bool, sse_supported: bool) -> TransportMode {
    let config = TransportConfig::new(primary)
        .with_fallback_order(fallbacks.iter().cloned())
        .with_auto_fallback(auto);
    let factory = EventStreamFactory::new(config, Arc::new(MemoryQueueStore::new())).with_options(
        FactoryOptions {
            sse_supported,
            ..FactoryOptions::default()
        },
    );
    factory.create_stream_with_mode(primary, "echo", "s1").mode
}

fn client_mode(primary: &str, fallbacks: &[String], auto: bool, event_source: bool) -> TransportMode {
    let config = ChannelConfig::new("http://127.0.0.1:8787/event")
        .with_mode(primary)
        .with_fallback_modes(fallbacks.iter().cloned())
        .with_auto_fallback(auto);
    let capabilities = ClientCapabilities {
        event_source,
        web_socket: true,
    };
    TransportResolver::create_channel(&config, capabilities, StreamIdentity::new("echo", "s1")).mode()
}

proptest! {
    // Neither side can use `ws` here: the server has no connection resolver
    // and the client has no socket URL. Everything else must line up.
    #[test]
    fn prop_client_and_server_pick_the_same_mode(
        primary in mode_name(),
        fallbacks in prop::collection::vec(mode_name(), 0..6),
        auto in any::<bool>(),
        sse in any::<bool>(),
    ) {
        let server = server_mode(&primary, &fallbacks, auto, sse);
        let client = client_mode(&primary, &fallbacks, auto, sse);
        prop_assert_eq!(server, client);
        prop_assert_ne!(server, TransportMode::Ws);
    }

    #[test]
    fn prop_disabled_fallback_uses_primary_or_single_shot(
        primary in mode_name(),
        fallbacks in prop::collection::vec(mode_name(), 0..6),
    ) {
        let mode = client_mode(&primary, &fallbacks, false, true);
        let expected = match primary.trim().parse::<TransportMode>() {
            Ok(TransportMode::Ws) | Err(_) => TransportMode::NoStream,
            Ok(mode) => mode,
        };
        prop_assert_eq!(mode, expected);
    }
}
