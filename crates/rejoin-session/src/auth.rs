//! Authentication hook for resolving a client's declared identity.
//!
//! Rejoin does not care where identities come from: a device id, a
//! platform account, a signed token. The client sends a string in
//! [`SessionMessage::AuthRequest`](rejoin_protocol::SessionMessage::AuthRequest),
//! the server runs it through an [`Authenticator`], and whatever comes out
//! is the durable identity the registry keys players by.

use crate::SessionError;

/// Turns a client-declared identity into a durable stable id.
///
/// # Trait bounds
///
/// - `Send + Sync + 'static` → one authenticator is shared by every
///   authentication task for the lifetime of the server.
/// - The returned future is `Send` because the server runs it on its own
///   Tokio task, so a slow identity provider never stalls the registry.
///
/// # Example
///
/// ```rust
/// use rejoin_session::{Authenticator, SessionError};
///
/// /// Accepts identities of the form `"device:<id>"`.
/// struct DeviceAuthenticator;
///
/// impl Authenticator for DeviceAuthenticator {
///     async fn authenticate(&self, identity: &str) -> Result<String, SessionError> {
///         identity
///             .strip_prefix("device:")
///             .filter(|id| !id.is_empty())
///             .map(str::to_owned)
///             .ok_or_else(|| SessionError::AuthFailed("expected device:<id>".into()))
///     }
/// }
/// ```
pub trait Authenticator: Send + Sync + 'static {
    /// Validates `identity` and returns the stable id to register.
    ///
    /// # Returns
    /// - `Ok(stable_id)`: the identity is accepted
    /// - `Err(SessionError::AuthFailed)`: the identity provider said no
    fn authenticate(
        &self,
        identity: &str,
    ) -> impl std::future::Future<Output = Result<String, SessionError>> + Send;
}

/// Accepts any non-blank identity as-is.
///
/// Good for development and for games that trust the client's device id.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughAuthenticator;

impl Authenticator for PassthroughAuthenticator {
    async fn authenticate(&self, identity: &str) -> Result<String, SessionError> {
        if identity.trim().is_empty() {
            return Err(SessionError::EmptyIdentity);
        }
        Ok(identity.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_passthrough_returns_identity_unchanged() {
        let id = PassthroughAuthenticator.authenticate("abc").await.unwrap();
        assert_eq!(id, "abc");
    }

    #[tokio::test]
    async fn test_passthrough_blank_identity_returns_empty_identity() {
        let result = PassthroughAuthenticator.authenticate("  ").await;
        assert!(matches!(result, Err(SessionError::EmptyIdentity)));
    }
}
