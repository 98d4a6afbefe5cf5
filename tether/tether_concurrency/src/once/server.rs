//! Server settings resolved once from a configuration source.
//!
//! This is the canonical guarded-initialization example: many request
//! handlers ask for the server settings, the first one reads the environment,
//! everybody shares the result.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::GuardedInitializer;
use crate::config::{ConfigError, ConfigSource};

/// Key holding the server URL
pub const SERVER_URL_KEY: &str = "TT_SERVER_URL";

/// Key holding the server port
pub const PORT_KEY: &str = "TT_PORT";

/// Server connection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server URL
    pub server: String,

    /// Server port
    pub port: i64,
}

/// Values used when a key is absent or malformed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDefaults {
    /// Default server URL
    pub server: String,

    /// Default server port
    pub port: i64,
}

impl Default for ServerDefaults {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    /// Read the settings from `source`, substituting a default for every key
    /// that is absent or malformed. Never fails.
    pub fn load(source: &dyn ConfigSource, defaults: &ServerDefaults) -> Self {
        let server = match source.get(SERVER_URL_KEY) {
            Some(server) => server,
            None => {
                warn!(
                    "{} not set, using default {:?}",
                    SERVER_URL_KEY, defaults.server
                );
                defaults.server.clone()
            }
        };

        let port = match source.get(PORT_KEY) {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(port) => port,
                Err(e) => {
                    warn!(
                        "{}={:?} is not a valid port ({}), using default {}",
                        PORT_KEY, raw, e, defaults.port
                    );
                    defaults.port
                }
            },
            None => {
                warn!("{} not set, using default {}", PORT_KEY, defaults.port);
                defaults.port
            }
        };

        info!("init config");
        Self { server, port }
    }

    /// Read the settings from `source`, failing on the first key that is
    /// absent or malformed.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let server = source
            .get(SERVER_URL_KEY)
            .ok_or_else(|| ConfigError::Invalid(format!("{} is not set", SERVER_URL_KEY)))?;

        let raw = source
            .get(PORT_KEY)
            .ok_or_else(|| ConfigError::Invalid(format!("{} is not set", PORT_KEY)))?;
        let port = raw.trim().parse::<i64>().map_err(|e| {
            ConfigError::Invalid(format!("{}={:?} is not a valid port: {}", PORT_KEY, raw, e))
        })?;

        info!("init config");
        Ok(Self { server, port })
    }

    /// Resolve the settings through `init`, reading `source` only on first
    /// access. Malformed values fall back to `defaults`.
    pub fn shared<'a>(
        init: &'a GuardedInitializer<ServerConfig>,
        source: &dyn ConfigSource,
        defaults: &ServerDefaults,
    ) -> &'a ServerConfig {
        init.get_or_init(|| Self::load(source, defaults))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapSource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_load_reads_source() {
        let source = MapSource::new()
            .with(SERVER_URL_KEY, "http://localhost")
            .with(PORT_KEY, "9090");

        let config = ServerConfig::load(&source, &ServerDefaults::default());
        assert_eq!(config.server, "http://localhost");
        assert_eq!(config.port, 9090);
    }

    #[test]
    fn test_load_substitutes_defaults() {
        let source = MapSource::new().with(PORT_KEY, "eighty");

        let config = ServerConfig::load(&source, &ServerDefaults::default());
        assert_eq!(config.server, "");
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_from_source_is_strict() {
        let source = MapSource::new().with(SERVER_URL_KEY, "http://localhost");
        assert!(matches!(
            ServerConfig::from_source(&source),
            Err(ConfigError::Invalid(_))
        ));

        let source = source.with(PORT_KEY, "x");
        assert!(ServerConfig::from_source(&source).is_err());

        let source = MapSource::new()
            .with(SERVER_URL_KEY, "http://localhost")
            .with(PORT_KEY, " 443 ");
        let config = ServerConfig::from_source(&source).unwrap();
        assert_eq!(config.port, 443);
    }

    struct CountingSource {
        inner: MapSource,
        reads: AtomicUsize,
    }

    impl ConfigSource for CountingSource {
        fn get(&self, key: &str) -> Option<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key)
        }
    }

    #[test]
    fn test_shared_reads_source_once() {
        let init = Arc::new(GuardedInitializer::with_name("server"));
        let source = Arc::new(CountingSource {
            inner: MapSource::new()
                .with(SERVER_URL_KEY, "http://example")
                .with(PORT_KEY, "8000"),
            reads: AtomicUsize::new(0),
        });
        let defaults = ServerDefaults::default();

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let init = Arc::clone(&init);
                let source = Arc::clone(&source);
                let defaults = defaults.clone();
                thread::spawn(move || {
                    ServerConfig::shared(&init, &*source, &defaults).clone()
                })
            })
            .collect();

        for handle in handles {
            let config = handle.join().unwrap();
            assert_eq!(config.port, 8000);
        }

        // One load reads both keys exactly once
        assert_eq!(source.reads.load(Ordering::SeqCst), 2);
        assert_eq!(init.init_count(), 1);
    }
}
