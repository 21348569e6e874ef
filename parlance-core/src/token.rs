//! Session token caching.
//!
//! Tokens are obtained lazily through the injected generator, cached until
//! `expiration_time`, and regenerated on demand. Concurrent callers during a
//! generation window share the single in-flight request: the async lock is
//! held across the generator await, so queued callers wake up to a fresh
//! cached token instead of issuing their own.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::entity::SessionToken;
use crate::error::Result;

/// Token-generation collaborator, injected by the host application.
#[async_trait]
pub trait GenerateSessionToken: Send + Sync {
    async fn generate_session_token(&self) -> Result<SessionToken>;
}

pub struct SessionTokenManager {
    generator: Arc<dyn GenerateSessionToken>,
    cached: Mutex<Option<SessionToken>>,
}

impl SessionTokenManager {
    pub fn new(generator: Arc<dyn GenerateSessionToken>) -> Self {
        Self {
            generator,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached token, generating a new one only when the cache is
    /// empty or expired. A generation error propagates to the caller and
    /// leaves the cache untouched, so the next call retries.
    pub async fn get_token(&self) -> Result<SessionToken> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if !token.is_expired() {
                return Ok(token.clone());
            }
            debug!(session_id = %token.session_id, "session token expired, regenerating");
        }

        let token = self.generator.generate_session_token().await?;
        debug!(session_id = %token.session_id, "session token generated");
        *cached = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next `get_token` regenerates.
    pub async fn invalidate(&self) {
        self.cached.lock().await.take();
    }
}
