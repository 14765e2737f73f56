//! Authentication strategies.
//!
//! A connection authenticates with either a handle (anonymous) or a bearer
//! token. Each method is backed by an [`Authenticator`] injected at server
//! construction. Token authenticators compare SHA-256 hashes so plaintext
//! tokens never have to be stored in configuration.

use futures::future::{self, BoxFuture, FutureExt};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub handle: String,
}

impl User {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
        }
    }
}

/// Decides whether a credential maps to a user.
///
/// Plain closures `Fn(Option<&str>) -> Option<User>` implement this; write a
/// manual impl when the check itself has to await.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, credential: Option<&str>) -> BoxFuture<'static, Option<User>>;
}

impl<F> Authenticator for F
where
    F: Fn(Option<&str>) -> Option<User> + Send + Sync,
{
    fn authenticate(&self, credential: Option<&str>) -> BoxFuture<'static, Option<User>> {
        future::ready(self(credential)).boxed()
    }
}

/// Authentication method requested by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Anonymous,
    Token,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Anonymous => "anonymous",
            AuthMethod::Token => "token",
        }
    }
}

/// The authenticator for each method. A missing one refuses nothing; it is
/// a configuration error at the point a client tries that method.
#[derive(Clone, Default)]
pub struct Authenticators {
    pub anonymous: Option<Arc<dyn Authenticator>>,
    pub token: Option<Arc<dyn Authenticator>>,
}

impl Authenticators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_anonymous(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.anonymous = Some(Arc::new(authenticator));
        self
    }

    pub fn with_token(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.token = Some(Arc::new(authenticator));
        self
    }

    pub fn get(&self, method: AuthMethod) -> Option<&Arc<dyn Authenticator>> {
        match method {
            AuthMethod::Anonymous => self.anonymous.as_ref(),
            AuthMethod::Token => self.token.as_ref(),
        }
    }
}

impl std::fmt::Debug for Authenticators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticators")
            .field("anonymous", &self.anonymous.is_some())
            .field("token", &self.token.is_some())
            .finish()
    }
}

/// Accepts every client, using the requested handle or a default one.
#[derive(Debug, Clone)]
pub struct AnonymousAuthenticator {
    default_handle: String,
}

impl AnonymousAuthenticator {
    pub fn new(default_handle: impl Into<String>) -> Self {
        Self {
            default_handle: default_handle.into(),
        }
    }

    /// Returns the user for a requested handle.
    pub fn user_for(&self, handle: Option<&str>) -> User {
        match handle.map(str::trim) {
            Some(h) if !h.is_empty() => User::new(h),
            _ => User::new(self.default_handle.clone()),
        }
    }
}

impl Authenticator for AnonymousAuthenticator {
    fn authenticate(&self, credential: Option<&str>) -> BoxFuture<'static, Option<User>> {
        future::ready(Some(self.user_for(credential))).boxed()
    }
}

/// Validates bearer tokens against pre-configured hashes.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    /// Token hash (SHA-256 hex) to handle.
    handles: HashMap<String, String>,
}

impl TokenAuthenticator {
    /// Creates an authenticator from `(hash, handle)` pairs.
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            handles: entries
                .into_iter()
                .map(|(hash, handle)| (hash.to_lowercase(), handle))
                .collect(),
        }
    }

    /// Returns whether any tokens are configured.
    pub fn has_tokens(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Returns the number of configured tokens.
    pub fn token_count(&self) -> usize {
        self.handles.len()
    }

    /// Returns the handle for a plaintext token, if it is known.
    pub fn validate(&self, token: &str) -> Option<&str> {
        if self.handles.is_empty() {
            return None;
        }
        self.handles.get(&Self::hash_token(token)).map(String::as_str)
    }

    /// Hashes a token using SHA-256, returning a lowercase hex string.
    pub fn hash_token(token: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, credential: Option<&str>) -> BoxFuture<'static, Option<User>> {
        let user = credential.and_then(|token| self.validate(token)).map(User::new);
        future::ready(user).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token() {
        let hash = TokenAuthenticator::hash_token("test-token");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, TokenAuthenticator::hash_token("test-token"));
        assert_ne!(hash, TokenAuthenticator::hash_token("other-token"));
    }

    #[test]
    fn test_validate_maps_token_to_handle() {
        let auth = TokenAuthenticator::new(vec![
            (TokenAuthenticator::hash_token("token-one"), "alice".to_string()),
            (TokenAuthenticator::hash_token("token-two"), "bob".to_string()),
        ]);
        assert_eq!(auth.token_count(), 2);
        assert_eq!(auth.validate("token-one"), Some("alice"));
        assert_eq!(auth.validate("token-two"), Some("bob"));
        assert_eq!(auth.validate("token-three"), None);
    }

    #[test]
    fn test_validate_is_case_sensitive() {
        let auth = TokenAuthenticator::new(vec![(
            TokenAuthenticator::hash_token("MyToken"),
            "carol".to_string(),
        )]);
        assert!(auth.validate("MyToken").is_some());
        assert!(auth.validate("mytoken").is_none());
    }

    #[test]
    fn test_uppercase_hash_accepted() {
        let hash = TokenAuthenticator::hash_token("secret").to_uppercase();
        let auth = TokenAuthenticator::new(vec![(hash, "dave".to_string())]);
        assert_eq!(auth.validate("secret"), Some("dave"));
    }

    #[test]
    fn test_no_tokens_configured() {
        let auth = TokenAuthenticator::default();
        assert!(!auth.has_tokens());
        assert!(auth.validate("").is_none());
    }

    #[tokio::test]
    async fn test_token_authenticator_requires_credential() {
        let auth = TokenAuthenticator::new(vec![(
            TokenAuthenticator::hash_token("t"),
            "erin".to_string(),
        )]);
        assert_eq!(auth.authenticate(None).await, None);
        assert_eq!(auth.authenticate(Some("t")).await, Some(User::new("erin")));
    }

    #[tokio::test]
    async fn test_anonymous_falls_back_to_default_handle() {
        let auth = AnonymousAuthenticator::new("guest");
        assert_eq!(auth.authenticate(Some("frank")).await, Some(User::new("frank")));
        assert_eq!(auth.authenticate(Some("  ")).await, Some(User::new("guest")));
        assert_eq!(auth.authenticate(None).await, Some(User::new("guest")));
    }

    #[tokio::test]
    async fn test_closure_authenticator() {
        let authenticators = Authenticators::new().with_anonymous(|handle: Option<&str>| {
            handle.filter(|h| *h != "root").map(User::new)
        });

        let anonymous = authenticators.get(AuthMethod::Anonymous).unwrap();
        assert_eq!(anonymous.authenticate(Some("gina")).await, Some(User::new("gina")));
        assert_eq!(anonymous.authenticate(Some("root")).await, None);
        assert!(authenticators.get(AuthMethod::Token).is_none());
    }
}
