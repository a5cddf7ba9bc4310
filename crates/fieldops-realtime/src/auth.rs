//! Access token source consumed by the hub manager.
//!
//! The token store is owned by the application; the manager only reads the
//! current token before every connect and asks for a refresh before every
//! reconnection attempt (never before the very first connect).

use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::HubResult;

/// Provider of the bearer token presented to hubs.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Current access token, `None` when signed out.
    fn access_token(&self) -> Option<String>;

    /// Obtain a fresh token; afterwards [`access_token`](Self::access_token)
    /// should return it.
    async fn refresh_token(&self) -> HubResult<()>;
}

/// Fixed token that can be swapped at runtime. Refresh is a no-op.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    token: RwLock<Option<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Provider that has no token.
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn access_token(&self) -> Option<String> {
        self.token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .filter(|token| !token.is_empty())
    }

    async fn refresh_token(&self) -> HubResult<()> {
        Ok(())
    }
}
