use crate::cli::Cli;
use crate::client::RedisClient;
use crate::driver::Driver;
use crate::error::{ClientError, ConfigError};
use serde::Deserialize;
use std::path::Path;

/// Connection settings for the command line tool.
///
/// Can be loaded from files, env vars, or CLI args with precedence order:
/// CLI > File > Environment > Defaults
///
/// Values are not checked here; [`Config::configure`] pushes them through
/// the client's validating setters.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: i64,
    /// Seconds; 0 disables the timeout.
    pub connect_timeout: f64,
    pub connect_tries: i64,
    pub persistent: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            connect_timeout: 0.0,
            connect_tries: 1,
            persistent: false,
        }
    }
}

/// Config file contents; absent fields fall through to lower sources.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<i64>,
    connect_timeout: Option<f64>,
    connect_tries: Option<i64>,
    persistent: Option<bool>,
}

impl Config {
    /// Create config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(host) = lookup("REDIS_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("REDIS_PORT") {
            config.port = parse_var("REDIS_PORT", &port)?;
        }
        if let Some(timeout) = lookup("REDIS_CONNECT_TIMEOUT") {
            config.connect_timeout = parse_var("REDIS_CONNECT_TIMEOUT", &timeout)?;
        }
        if let Some(tries) = lookup("REDIS_CONNECT_TRIES") {
            config.connect_tries = parse_var("REDIS_CONNECT_TRIES", &tries)?;
        }
        if let Some(persistent) = lookup("REDIS_PERSISTENT") {
            config.persistent = match persistent.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(ConfigError::Validation(format!(
                        "REDIS_PERSISTENT: expected a boolean, got {:?}",
                        other
                    )))
                }
            };
        }

        Ok(config)
    }

    /// Create config with CLI args taking precedence over file and environment.
    ///
    /// Precedence: CLI > File > Environment > Defaults
    pub fn from_sources(cli: &Cli) -> Result<Self, ConfigError> {
        let env_config = Self::from_env()?;
        let file_config = match &cli.config {
            Some(path) => Self::read_file(path)?,
            None => FileConfig::default(),
        };
        Ok(Self::merge(cli, file_config, env_config))
    }

    fn merge(cli: &Cli, file: FileConfig, env: Config) -> Self {
        Config {
            host: cli.host.clone().or(file.host).unwrap_or(env.host),
            port: cli.port.or(file.port).unwrap_or(env.port),
            connect_timeout: cli
                .timeout
                .or(file.connect_timeout)
                .unwrap_or(env.connect_timeout),
            connect_tries: cli
                .tries
                .or(file.connect_tries)
                .unwrap_or(env.connect_tries),
            persistent: cli
                .persistent_override()
                .or(file.persistent)
                .unwrap_or(env.persistent),
        }
    }

    fn read_file<P: AsRef<Path>>(path: P) -> Result<FileConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Apply these settings to `client` through its setters.
    pub fn configure<D: Driver>(&self, client: &mut RedisClient<D>) -> Result<(), ClientError> {
        client
            .set_host(self.host.as_str())?
            .set_port(self.port)?
            .set_connect_timeout(self.connect_timeout)?
            .set_connect_tries(self.connect_tries)?
            .set_persistent(self.persistent);
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConfigError::Validation(format!("{}: {}", name, e)))
}
