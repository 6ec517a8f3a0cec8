//! Session configuration.

use serde::Deserialize;

/// Controls how the registry shares roster information and whether a
/// session is running from the moment the registry is created.
///
/// Deserializable so it can live in whatever config file the host server
/// already reads. Missing fields fall back to [`Default`].
///
/// ```rust
/// use rejoin_session::SessionConfig;
///
/// let config: SessionConfig = serde_json::from_str(r#"{ "share_ids": false }"#).unwrap();
/// assert!(!config.share_ids);
/// assert!(!config.session_started_initially);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Shared-roster mode when `true`: every authenticated client sees every
    /// player's connection changes plus a full roster snapshot after each
    /// change. Owner-only mode when `false`: a client only hears about its
    /// own connect/reconnect.
    ///
    /// Default: `true`.
    pub share_ids: bool,

    /// Whether the registry starts (and resets) with a session already
    /// running. While a session runs, dropped players are kept for
    /// reconnection instead of being removed.
    ///
    /// Default: `false`.
    pub session_started_initially: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            share_ids: true,
            session_started_initially: false,
        }
    }
}
