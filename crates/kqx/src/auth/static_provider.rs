//! 🪨 A provider that never changes its mind.
//!
//! Hands out the same endpoint and token when asked with `force = true`, and shrugs
//! (`None`) on refreshes, because a static token has nothing new to report.

use async_trait::async_trait;

use super::{Credential, CredentialProvider};

#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(endpoint, token),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn provide(&self, force: bool) -> Option<Credential> {
        force.then(|| self.credential.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_refresh_has_nothing_new_to_say() {
        let provider = StaticCredentialProvider::new("api.example", "token");
        assert_eq!(provider.provide(false).await, None);
        let forced = provider.provide(true).await.expect("forced call answers");
        assert_eq!(forced.endpoint, "api.example");
        assert_eq!(forced.token, "token");
    }
}
