use std::collections::HashMap;

use async_trait::async_trait;
use secrecy::ExposeSecret;

use orderly_core::config::AuthConfig;
use orderly_core::domain::account::UserId;

use crate::errors::AgentError;

/// Maps a caller token to the user that progress lines and orders are attributed to.
#[async_trait]
pub trait CallerVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, AgentError>;
}

/// Tokens configured under `auth.callers`.
pub struct StaticTokenVerifier {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenVerifier {
    pub fn new(tokens: impl IntoIterator<Item = (String, UserId)>) -> Self {
        Self { tokens: tokens.into_iter().collect() }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.callers.iter().map(|caller| {
            (caller.token.expose_secret().to_string(), UserId(caller.user_id.clone()))
        }))
    }
}

#[async_trait]
impl CallerVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<UserId, AgentError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AgentError::Unauthorized("missing caller token".to_string()));
        }
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| AgentError::Unauthorized("caller token not recognised".to_string()))
    }
}
