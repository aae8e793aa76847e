//! Event Transport Core Types
//!
//! This crate provides the types shared by the producing (server) and the
//! consuming (client) side of event-transport: the event model, stream
//! identities, transport modes and the fallback negotiation algorithm.
//!
//! # Overview
//!
//! - **Events**: [`Event`], the [`PollReply`] sentinels and the single-shot [`CombinedPayload`]
//! - **Identities**: [`StreamIdentity`] and the storage key sanitizer
//! - **Modes**: the five delivery mechanisms as [`TransportMode`]
//! - **Negotiation**: [`TransportConfig`] and [`negotiate`], used identically by
//!   the server stream factory and the client channel resolver
//!
//! # Usage
//!
//! ```rust
//! use event_transport_core::{TransportConfig, TransportMode};
//!
//! let config = TransportConfig::new("ws").with_fallback_order(["long", "nostream"]);
//! let resolution = config.negotiate(
//!     |mode| (mode != TransportMode::Ws).then_some(mode),
//!     || TransportMode::NoStream,
//! );
//! assert_eq!(resolution.mode, TransportMode::Long);
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod mode;
pub mod resolve;

pub use error::{Result, TransportError};

/// Re-export serde_json::Value for consistent JSON handling across the crates
pub use serde_json::Value as JsonValue;

pub use config::TransportConfig;
pub use event::{json_map, CombinedPayload, Event, JsonMap, PollReply};
pub use identity::{sanitize_key, StreamIdentity};
pub use mode::TransportMode;
pub use resolve::{candidate_chain, negotiate, Resolution};
