use std::{
    collections::HashMap,
    net::{AddrParseError, SocketAddr},
};

/// The error returned when a configuration option has an invalid value.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid value {value:?} for {key}: {source}")]
pub struct ConfigError {
    key: String,
    value: String,
    source: AddrParseError,
}

impl ConfigError {
    /// The name of the offending configuration option.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Configuration of a [`Server`][crate::backend::Server], usually read from the environment.
///
/// | Variable | Meaning | Default |
/// |----------|---------|---------|
/// | `GF_SIMPLEJSON_ADDR` | The address to listen on | `0.0.0.0:8080` |
/// | `GF_SIMPLEJSON_SHUTDOWN_ADDR` | The address of the [shutdown handler][crate::backend::Server::shutdown_handler] | none |
#[derive(Clone, Debug, Default)]
pub struct ServerConfig {
    config: HashMap<String, String>,
}

impl ServerConfig {
    const LISTEN_ADDR: &'static str = "GF_SIMPLEJSON_ADDR";
    const SHUTDOWN_ADDR: &'static str = "GF_SIMPLEJSON_SHUTDOWN_ADDR";

    const DEFAULT_LISTEN_ADDR: SocketAddr =
        SocketAddr::new(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 8080);

    /// Create a configuration from the given options.
    #[must_use]
    pub fn new(config: HashMap<String, String>) -> Self {
        Self { config }
    }

    /// Read the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(
            std::env::vars()
                .filter(|(key, _)| key.starts_with("GF_SIMPLEJSON_"))
                .collect(),
        )
    }

    fn get_addr(&self, key: &str) -> ConfigResult<Option<SocketAddr>> {
        self.config
            .get(key)
            .map(|value| {
                value.parse().map_err(|source| ConfigError {
                    key: key.to_string(),
                    value: value.clone(),
                    source,
                })
            })
            .transpose()
    }

    /// Return the address the server should listen on.
    pub fn listen_addr(&self) -> ConfigResult<SocketAddr> {
        Ok(self
            .get_addr(Self::LISTEN_ADDR)?
            .unwrap_or(Self::DEFAULT_LISTEN_ADDR))
    }

    /// Return the address of the shutdown handler, if one is configured.
    pub fn shutdown_addr(&self) -> ConfigResult<Option<SocketAddr>> {
        self.get_addr(Self::SHUTDOWN_ADDR)
    }
}
