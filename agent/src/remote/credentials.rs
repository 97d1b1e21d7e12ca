use async_trait::async_trait;

/// Supplies the bearer token attached to remote requests.
///
/// Called once per request so implementations can refresh expired tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn bearer_token(&self) -> Option<String>;
}

/// A fixed token, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.trim().is_empty()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn bearer_token(&self) -> Option<String> {
        self.0.clone()
    }
}
