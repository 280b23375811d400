use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Fleet,
    Dealership,
    Tower,
}

/// An authenticated principal. `account_id` is the fleet, dealership or
/// tower account the caller acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub account_id: String,
    pub user_id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(role: Role, account_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            user_id: user_id.into(),
            role,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError>;
}

/// Fixed token table, for local runs and tests.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    tokens: DashMap<String, Caller>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, token: impl Into<String>, caller: Caller) {
        self.tokens.insert(token.into(), caller);
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn authenticate(&self, token: &str) -> Result<Caller, AuthError> {
        self.tokens
            .get(token)
            .map(|c| c.value().clone())
            .ok_or(AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn known_token_resolves_caller() {
        let identity = StaticIdentity::new();
        identity.insert("t1", Caller::new(Role::Fleet, "f1", "u1"));
        let caller = identity.authenticate("t1").await.unwrap();
        assert_eq!(caller.account_id, "f1");
        assert!(matches!(
            identity.authenticate("nope").await,
            Err(AuthError::InvalidToken)
        ));
    }
}
