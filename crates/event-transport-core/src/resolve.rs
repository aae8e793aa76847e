//! Fallback negotiation.
//!
//! The same algorithm picks the engine on the server and the channel on the
//! client, so a given configuration converges on compatible mechanisms at
//! both ends:
//!
//! 1. Candidates are the primary mode followed by the fallback order (the
//!    fallback order is ignored when auto-fallback is disabled).
//! 2. Duplicates are dropped, keeping the first occurrence; unknown names
//!    are skipped.
//! 3. Each candidate is attempted in order; the first one that yields a value
//!    wins.
//! 4. If none does, the last-resort constructor runs unconditionally. It
//!    always stands for single-shot delivery.

use std::str::FromStr;

use crate::mode::TransportMode;

/// Outcome of a negotiation.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution<T> {
    /// The mode that produced `value`.
    pub mode: TransportMode,
    /// What the winning attempt constructed.
    pub value: T,
    /// Whether the primary mode was passed over.
    pub fell_back: bool,
}

/// Builds the ordered, deduplicated candidate list.
pub fn candidate_chain<S: AsRef<str>>(
    primary: &str,
    fallback_order: &[S],
    auto_fallback: bool,
) -> Vec<TransportMode> {
    let fallbacks = if auto_fallback { fallback_order } else { &[] };
    let names = std::iter::once(primary).chain(fallbacks.iter().map(AsRef::as_ref));

    let mut chain = Vec::with_capacity(TransportMode::ALL.len());
    for name in names {
        match TransportMode::from_str(name) {
            Ok(mode) if !chain.contains(&mode) => chain.push(mode),
            Ok(_) => {}
            Err(_) => log::debug!("Skipping unknown transport mode '{}'", name),
        }
    }
    chain
}

/// Walks `chain`, returning the first successful attempt or the last resort.
pub fn negotiate<T>(
    chain: &[TransportMode],
    primary: &str,
    mut attempt: impl FnMut(TransportMode) -> Option<T>,
    last_resort: impl FnOnce() -> T,
) -> Resolution<T> {
    for &mode in chain {
        if let Some(value) = attempt(mode) {
            return Resolution {
                mode,
                value,
                fell_back: mode.as_str() != primary.trim(),
            };
        }
        log::debug!("Transport mode '{}' unavailable, trying next", mode);
    }

    log::debug!("No configured transport available, using single-shot delivery");
    Resolution {
        mode: TransportMode::NoStream,
        value: last_resort(),
        fell_back: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn always(mode: TransportMode) -> Option<TransportMode> {
        Some(mode)
    }

    #[test]
    fn test_chain_dedups_preserving_first_occurrence() {
        let chain = candidate_chain("long", &["short", "long", "nostream", "short"], true);
        assert_eq!(
            chain,
            vec![TransportMode::Long, TransportMode::Short, TransportMode::NoStream]
        );
    }

    #[test]
    fn test_chain_skips_unknown_names() {
        let chain = candidate_chain("does-not-exist", &["short", "carrier-pigeon", "nostream"], true);
        assert_eq!(chain, vec![TransportMode::Short, TransportMode::NoStream]);
    }

    #[test]
    fn test_chain_without_auto_fallback_is_primary_only() {
        let chain = candidate_chain("ws", &["long", "nostream"], false);
        assert_eq!(chain, vec![TransportMode::Ws]);
    }

    #[test]
    fn test_negotiate_takes_first_available() {
        let chain = candidate_chain("ws", &["long", "nostream"], true);
        let resolution = negotiate(
            &chain,
            "ws",
            |mode| (mode != TransportMode::Ws).then_some(mode),
            || TransportMode::NoStream,
        );
        assert_eq!(resolution.mode, TransportMode::Long);
        assert_eq!(resolution.value, TransportMode::Long);
        assert!(resolution.fell_back);
    }

    #[test]
    fn test_negotiate_primary_available() {
        let chain = candidate_chain("sse", &["short"], true);
        let resolution = negotiate(&chain, "sse", always, || TransportMode::NoStream);
        assert_eq!(resolution.mode, TransportMode::Sse);
        assert!(!resolution.fell_back);
    }

    #[test]
    fn test_negotiate_uses_last_resort_when_nothing_is_available() {
        let chain = candidate_chain("ws", &["sse"], true);
        let mut last_resort_ran = false;
        let resolution = negotiate(
            &chain,
            "ws",
            |_| None::<&str>,
            || {
                last_resort_ran = true;
                "single-shot"
            },
        );
        assert!(last_resort_ran);
        assert_eq!(resolution.mode, TransportMode::NoStream);
        assert_eq!(resolution.value, "single-shot");
    }

    #[test]
    fn test_negotiate_empty_chain_uses_last_resort() {
        let resolution = negotiate(&[], "bogus", always, || TransportMode::NoStream);
        assert_eq!(resolution.mode, TransportMode::NoStream);
    }
}
