//! Per-session configuration.

/// Property name of the host's awaiting protocol.
pub const RESERVED_KEY: &str = "then";

/// Settings a [`Session`](crate::session::Session) is created with.
///
/// ```
/// use pipelink::SessionConfig;
///
/// let config = SessionConfig::new().name("calculator");
/// assert_eq!(config.peer_name(), "calculator");
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    name: String,
    reserved_key: String,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name used in log output for this peer.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Overrides the awaiting-protocol key. Both peers must agree on it.
    pub fn reserved_key(mut self, key: impl Into<String>) -> Self {
        self.reserved_key = key.into();
        self
    }

    pub fn peer_name(&self) -> &str {
        &self.name
    }

    pub fn awaiting_key(&self) -> &str {
        &self.reserved_key
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            name: "peer".to_string(),
            reserved_key: RESERVED_KEY.to_string(),
        }
    }
}
