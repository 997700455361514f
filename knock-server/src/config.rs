//! Server configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8080
//! backlog = 128
//! probe_timeout_ms = 2000
//! wake = "self-dial"   # or "cancellable"
//! ```
//!
//! Every key is optional; a missing file means all defaults.
//!
//! # Environment Variables
//!
//! - `CONFIG` — Path to configuration file (default: `knock.toml`)
//! - `HOST` — Override server bind address
//! - `PORT` — Override server port

use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use knock::address::{DEFAULT_HOST, DEFAULT_PORT};
use knock::probe::DEFAULT_CONNECT_TIMEOUT;
use knock::server::DEFAULT_BACKLOG;
use knock::{ServerAddress, WakeStrategy};
use serde::{Deserialize, Serialize};

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "knock.toml";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// Path of the configuration file.
        path: PathBuf,
        /// The underlying I/O error.
        source: io::Error,
    },

    /// The file is not valid TOML or does not match the schema.
    #[error("invalid configuration file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value parsed but is not usable.
    #[error("invalid configuration: `{field}` {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Top-level server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Server port (default: `8080`). Must be non-zero: the unblock probe
    /// needs to know where to dial before the listener exists.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Listen backlog (default: `128`).
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Connect timeout of the unblock probe in milliseconds (default: `2000`).
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// How a pending accept is woken on shutdown (default: `self-dial`).
    #[serde(default)]
    pub wake: WakeStrategy,
}

const fn default_host() -> IpAddr {
    DEFAULT_HOST
}

const fn default_port() -> u16 {
    DEFAULT_PORT
}

const fn default_backlog() -> u32 {
    DEFAULT_BACKLOG
}

#[allow(clippy::cast_possible_truncation)] // a couple of seconds always fits
const fn default_probe_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_millis() as u64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            probe_timeout_ms: default_probe_timeout_ms(),
            wake: WakeStrategy::default(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from the path given by the `CONFIG` environment
    /// variable, falling back to `knock.toml` in the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
        Self::load_from(Path::new(&path), |name| std::env::var(name).ok())
    }

    /// Loads configuration from a specific file, resolving variables through
    /// `env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load_from(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let content = if path.exists() {
            std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            String::new()
        };
        Self::from_toml(&content, env)
    }

    /// Parses configuration from TOML text.
    ///
    /// `$VAR` / `${VAR}` references are expanded first; `HOST` and `PORT`
    /// then override the file values when they parse.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be parsed or a value is invalid.
    pub fn from_toml(
        content: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(content, &env);
        let mut config: Self = toml::from_str(&expanded)?;

        if let Some(host) = env("HOST") {
            match host.parse() {
                Ok(addr) => config.host = addr,
                Err(_) => tracing::warn!(value = %host, "ignoring unparsable HOST"),
            }
        }
        if let Some(port) = env("PORT") {
            match port.parse() {
                Ok(p) => config.port = p,
                Err(_) => tracing::warn!(value = %port, "ignoring unparsable PORT"),
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// The address to bind and to probe.
    #[must_use]
    pub const fn address(&self) -> ServerAddress {
        ServerAddress::new(self.host, self.port)
    }

    /// Connect timeout of the unblock probe.
    #[must_use]
    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                reason: "must be non-zero",
            });
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid {
                field: "backlog",
                reason: "must be at least 1",
            });
        }
        if self.probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "probe_timeout_ms",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Expands `$VAR` and `${VAR}` patterns using `env`.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str, env: &impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        let braced = chars.next_if_eq(&'{').is_some();
        let mut name = String::new();
        let mut closed = false;
        while let Some(&c) = chars.peek() {
            if braced && c == '}' {
                chars.next();
                closed = true;
                break;
            }
            if !braced && !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            name.push(c);
            chars.next();
        }

        let resolved = if name.is_empty() || (braced && !closed) {
            None
        } else {
            env(&name)
        };
        match resolved {
            Some(value) => result.push_str(&value),
            None => {
                result.push('$');
                if braced {
                    result.push('{');
                }
                result.push_str(&name);
                if closed {
                    result.push('}');
                }
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = ServerConfig::from_toml("", env_of(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.address().to_string(), "0.0.0.0:8080");
        assert_eq!(config.wake, WakeStrategy::SelfDial);
        assert_eq!(config.probe_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_file_values_are_read() {
        let toml = r#"
            host = "127.0.0.1"
            port = 9090
            backlog = 4
            probe_timeout_ms = 250
            wake = "cancellable"
        "#;
        let config = ServerConfig::from_toml(toml, env_of(&[])).unwrap();
        assert_eq!(config.address().to_string(), "127.0.0.1:9090");
        assert_eq!(config.backlog, 4);
        assert_eq!(config.probe_timeout(), Duration::from_millis(250));
        assert_eq!(config.wake, WakeStrategy::Cancellable);
    }

    #[test]
    fn test_host_and_port_env_override_file() {
        let toml = "host = \"127.0.0.1\"\nport = 9090\n";
        let env = env_of(&[("HOST", "::1"), ("PORT", "7000")]);
        let config = ServerConfig::from_toml(toml, env).unwrap();
        assert_eq!(config.address().to_string(), "[::1]:7000");
    }

    #[test]
    fn test_unparsable_override_is_ignored() {
        let config = ServerConfig::from_toml("port = 9090", env_of(&[("PORT", "http")])).unwrap();
        assert_eq!(config.port, 9090);
    }

    #[test]
    fn test_variables_are_expanded_before_parsing() {
        let toml = "host = \"${BIND_HOST}\"\nport = $BIND_PORT\n";
        let env = env_of(&[("BIND_HOST", "10.0.0.1"), ("BIND_PORT", "8181")]);
        let config = ServerConfig::from_toml(toml, env).unwrap();
        assert_eq!(config.address().to_string(), "10.0.0.1:8181");
    }

    #[test]
    fn test_zero_port_is_rejected() {
        let err = ServerConfig::from_toml("port = 0", env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "port", .. }));
    }

    #[test]
    fn test_zero_backlog_is_rejected() {
        let err = ServerConfig::from_toml("backlog = 0", env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "backlog", .. }));
    }

    #[test]
    fn test_unknown_key_is_a_parse_error() {
        let err = ServerConfig::from_toml("prot = 80", env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let path = Path::new("/nonexistent/knock-test/knock.toml");
        let config = ServerConfig::load_from(path, env_of(&[])).unwrap();
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_expand_leaves_unresolved_variables() {
        let env = env_of(&[("SET", "x")]);
        assert_eq!(expand_env_vars("$SET-$UNSET", &env), "x-$UNSET");
        assert_eq!(expand_env_vars("${UNSET}", &env), "${UNSET}");
        assert_eq!(expand_env_vars("${SET}y", &env), "xy");
    }

    #[test]
    fn test_expand_keeps_lone_dollar_and_unclosed_brace() {
        let env = env_of(&[("SET", "x")]);
        assert_eq!(expand_env_vars("cost: $ 5", &env), "cost: $ 5");
        assert_eq!(expand_env_vars("${", &env), "${");
        assert_eq!(expand_env_vars("${SET", &env), "${SET");
    }
}
