//! Client configuration

use crate::error::{Error, Result};

/// Default RTMP port
pub const DEFAULT_PORT: u16 = 1935;

/// Outbound connection configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Target url, `rtmp://host[:port]/app[/stream_key]`
    pub url: String,
}

/// Components of an RTMP url
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub stream_key: Option<String>,
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Split the url into host, port, application and stream key
    pub fn parse_url(&self) -> Result<ParsedUrl> {
        let invalid = || Error::InvalidUrl(self.url.clone());

        let rest = self.url.strip_prefix("rtmp://").ok_or_else(invalid)?;
        let (authority, path) = rest.split_once('/').ok_or_else(invalid)?;

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
            None => (authority, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(invalid());
        }

        let (app, stream_key) = match path.split_once('/') {
            Some((app, key)) if !key.is_empty() => (app, Some(key.to_string())),
            Some((app, _)) => (app, None),
            None => (path, None),
        };
        if app.is_empty() {
            return Err(invalid());
        }

        Ok(ParsedUrl {
            host: host.to_string(),
            port,
            app: app.to_string(),
            stream_key,
        })
    }
}
