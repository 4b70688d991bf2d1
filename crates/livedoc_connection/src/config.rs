//! Configuration for connections and loaders.

/// An opaque bearer token for the collaboration server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps a token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AuthToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

/// Configuration for one shared connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Collaboration server endpoint.
    pub endpoint_url: String,
    /// Space all documents on this connection belong to.
    pub space: String,
    /// Environment within the space.
    pub environment: String,
}

impl ConnectionConfig {
    /// Creates a configuration for the given endpoint, space and environment.
    pub fn new(
        endpoint_url: impl Into<String>,
        space: impl Into<String>,
        environment: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            space: space.into(),
            environment: environment.into(),
        }
    }

    /// Sets the endpoint URL.
    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = endpoint_url.into();
        self
    }
}

/// Configuration for one document loader.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Consecutive failed opens tolerated before the loader stops
    /// re-attempting until open-intent toggles. `0` means unbounded.
    pub max_reopen_attempts: u32,
    /// Whether ops pending or in flight at teardown are reapplied on the
    /// next open.
    pub carry_local_ops: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_reopen_attempts: 8,
            carry_local_ops: true,
        }
    }
}

impl LoaderConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the reopen attempt bound.
    pub fn with_max_reopen_attempts(mut self, attempts: u32) -> Self {
        self.max_reopen_attempts = attempts;
        self
    }

    /// Sets whether local ops survive a teardown.
    pub fn with_carry_local_ops(mut self, carry: bool) -> Self {
        self.carry_local_ops = carry;
        self
    }
}
