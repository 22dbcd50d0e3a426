//! Auth token provider contract
//!
//! Token acquisition itself is an external concern; the engine only needs a
//! provider that returns header blocks for one or two identities and a cache
//! that refreshes them when their lifetime elapses.
//!
//! The provider output format is line oriented: lines `1..k` are identity
//! descriptors (`user1: …`, `user2: …`), the remaining lines are header
//! blocks, one per identity, separated by a `---` divider line.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, TransportError};

/// Parsed auth material for the primary and optional shadow identity
#[derive(Debug, Clone, PartialEq)]
pub struct TokenData {
    /// Header block for the primary identity, CRLF terminated lines
    pub primary_headers: String,
    /// Header block for the secondary identity, when two users are configured
    pub shadow_headers: Option<String>,
}

/// Supplies fresh auth material on demand
pub trait AuthProvider: Send + Sync {
    /// Acquire token headers for the configured identities.
    fn acquire_token(&self) -> Result<TokenData>;
}

/// Provider backed by fixed header blocks from the settings file
pub struct StaticTokenProvider {
    data: TokenData,
}

impl StaticTokenProvider {
    pub fn new(primary_headers: String, shadow_headers: Option<String>) -> Self {
        Self { data: TokenData { primary_headers, shadow_headers } }
    }
}

impl AuthProvider for StaticTokenProvider {
    fn acquire_token(&self) -> Result<TokenData> {
        Ok(self.data.clone())
    }
}

/// Parse the multiline provider output format.
pub fn parse_token_response(raw: &str) -> Result<TokenData> {
    let mut lines = raw.lines().peekable();

    // Identity descriptor lines come first.
    while lines.peek().is_some_and(|l| l.trim_start().starts_with("user")) {
        lines.next();
    }

    let mut blocks: Vec<String> = vec![String::new()];
    for line in lines {
        if line.trim() == "---" {
            blocks.push(String::new());
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let block = blocks.last_mut().expect("blocks is never empty");
        block.push_str(line.trim_end());
        block.push_str("\r\n");
    }

    let mut blocks = blocks.into_iter().filter(|b| !b.is_empty());
    let primary_headers = blocks
        .next()
        .ok_or_else(|| TransportError::AuthFailed("no token headers in output".to_string()))?;
    Ok(TokenData { primary_headers, shadow_headers: blocks.next() })
}

struct CachedToken {
    acquired_at: Instant,
    data: TokenData,
}

/// Caches token data and refreshes it when the configured lifetime elapses
pub struct TokenCache {
    provider: Option<Arc<dyn AuthProvider>>,
    lifetime: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(provider: Option<Arc<dyn AuthProvider>>, lifetime: Duration) -> Self {
        Self { provider, lifetime, cached: Mutex::new(None) }
    }

    /// A cache with no provider; any request carrying the auth placeholder
    /// fails with `NoToken`.
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(300))
    }

    /// Whether two identities are available (namespace checker precondition).
    pub fn has_shadow_identity(&self) -> bool {
        self.current().map(|d| d.shadow_headers.is_some()).unwrap_or(false)
    }

    /// The current token data, refreshed when its lifetime elapsed.
    pub fn current(&self) -> Result<TokenData> {
        let provider = self.provider.as_ref().ok_or(TransportError::NoToken)?;
        let mut cached = self.cached.lock();
        let expired = cached
            .as_ref()
            .map(|c| c.acquired_at.elapsed() >= self.lifetime)
            .unwrap_or(true);
        if expired {
            let data = provider.acquire_token()?;
            *cached = Some(CachedToken { acquired_at: Instant::now(), data });
        }
        Ok(cached.as_ref().expect("cache was just populated").data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_parse_two_identity_output() {
        let raw = "user1: {\"app\": \"a\"}\nuser2: {\"app\": \"b\"}\nAuthorization: token A\n---\nAuthorization: token B\n";
        let data = parse_token_response(raw).expect("parse");
        assert_eq!(data.primary_headers, "Authorization: token A\r\n");
        assert_eq!(data.shadow_headers.as_deref(), Some("Authorization: token B\r\n"));
    }

    #[test]
    fn test_parse_single_identity_output() {
        let raw = "user1: {}\nAuthorization: token A\nX-Extra: 1\n";
        let data = parse_token_response(raw).expect("parse");
        assert_eq!(data.primary_headers, "Authorization: token A\r\nX-Extra: 1\r\n");
        assert_eq!(data.shadow_headers, None);
    }

    #[test]
    fn test_parse_empty_output_fails() {
        assert!(parse_token_response("").is_err());
    }

    #[test]
    fn test_cache_refreshes_after_lifetime() {
        struct Counting(AtomicUsize);
        impl AuthProvider for Counting {
            fn acquire_token(&self) -> Result<TokenData> {
                let n = self.0.fetch_add(1, Ordering::SeqCst);
                Ok(TokenData {
                    primary_headers: format!("Authorization: token {n}\r\n"),
                    shadow_headers: None,
                })
            }
        }

        let provider = Arc::new(Counting(AtomicUsize::new(0)));
        let cache = TokenCache::new(Some(provider), Duration::ZERO);
        let first = cache.current().expect("token");
        let second = cache.current().expect("token");
        // Zero lifetime means every access refreshes.
        assert_ne!(first.primary_headers, second.primary_headers);
    }

    #[test]
    fn test_disabled_cache_reports_no_token() {
        let cache = TokenCache::disabled();
        assert!(matches!(cache.current(), Err(TransportError::NoToken)));
    }
}
