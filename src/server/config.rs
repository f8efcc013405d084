//! Server configuration

/// Default RTMP port
pub const DEFAULT_PORT: u16 = 1935;

/// Server configuration options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

impl ServerConfig {
    /// Create a new config listening on `port`
    pub fn with_port(port: u16) -> Self {
        Self { port }
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        assert_eq!(ServerConfig::default().port, 1935);
    }

    #[test]
    fn test_with_port() {
        assert_eq!(ServerConfig::with_port(1936).port, 1936);
    }

    #[test]
    fn test_builder_port() {
        let config = ServerConfig::default().port(8080);

        assert_eq!(config, ServerConfig::with_port(8080));
    }
}
