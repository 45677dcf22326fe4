//! Lazily connecting Redis client.
//!
//! [`RedisClient`] holds the connection settings and at most one driver
//! connection. The connection is opened on the first command with a bounded
//! number of attempts. Every command then goes through the same steps: make
//! sure a connection exists, call the driver, turn the driver's answer into a
//! value or a [`ClientError`].

use crate::driver::{Connection, Driver, Endpoint};
use crate::error::{ClientError, Result};
use crate::metrics::{Metrics, Timer};
use crate::protocol::RespValue;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection settings held by a [`RedisClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    host: String,
    port: Option<u16>,
    connect_timeout: f64,
    connect_tries: u32,
    persistent: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            connect_timeout: 0.0,
            connect_tries: 1,
            persistent: false,
        }
    }
}

impl ConnectionConfig {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Seconds; 0 means no timeout.
    pub fn connect_timeout(&self) -> f64 {
        self.connect_timeout
    }

    pub fn connect_tries(&self) -> u32 {
        self.connect_tries
    }

    pub fn persistent(&self) -> bool {
        self.persistent
    }

    /// A client can connect once host and port are set.
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty() && self.port.is_some()
    }

    /// The endpoint to connect to, or `None` while not configured.
    pub fn endpoint(&self) -> Option<Endpoint> {
        let port = self.port.filter(|_| !self.host.is_empty())?;
        let timeout = Some(self.connect_timeout)
            .filter(|secs| *secs > 0.0)
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
        Some(Endpoint::new(self.host.clone(), port).with_timeout(timeout))
    }
}

/// Redis client over a [`Driver`].
///
/// Not synchronized: every method takes `&mut self`, so sharing a client
/// between threads needs an external lock.
pub struct RedisClient<D: Driver> {
    driver: D,
    config: ConnectionConfig,
    connection: Option<D::Connection>,
}

impl<D: Driver> RedisClient<D> {
    /// Create an unconfigured client. Host and port must be set before the
    /// first command.
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            config: ConnectionConfig::default(),
            connection: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn set_host(&mut self, host: impl Into<String>) -> Result<&mut Self> {
        let host = host.into();
        if host.is_empty() {
            return Err(ClientError::invalid("host", "must not be empty"));
        }
        self.config.host = host;
        Ok(self)
    }

    pub fn set_port(&mut self, port: i64) -> Result<&mut Self> {
        let port = u16::try_from(port)
            .map_err(|_| ClientError::invalid("port", format!("{} is outside 0..=65535", port)))?;
        self.config.port = Some(port);
        Ok(self)
    }

    /// Connect timeout in seconds; 0 disables the timeout.
    pub fn set_connect_timeout(&mut self, seconds: f64) -> Result<&mut Self> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ClientError::invalid(
                "connect_timeout",
                format!("{} is not a non-negative number of seconds", seconds),
            ));
        }
        self.config.connect_timeout = seconds;
        Ok(self)
    }

    /// Number of connect attempts per connect cycle; at least 1.
    pub fn set_connect_tries(&mut self, tries: i64) -> Result<&mut Self> {
        let tries = u32::try_from(tries)
            .ok()
            .filter(|tries| *tries >= 1)
            .ok_or_else(|| ClientError::invalid("connect_tries", format!("{} is less than 1", tries)))?;
        self.config.connect_tries = tries;
        Ok(self)
    }

    pub fn set_persistent(&mut self, persistent: bool) -> &mut Self {
        self.config.persistent = persistent;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Drop the current connection; the next command reconnects.
    pub fn disconnect(&mut self) {
        if self.connection.take().is_some() {
            debug!("Dropped connection to {}", self.config.host);
        }
    }

    /// Return the live connection, opening one first if there is none.
    pub fn connection(&mut self) -> Result<&mut D::Connection> {
        let connection = match self.connection.take() {
            Some(connection) => connection,
            None => self.connect()?,
        };
        Ok(self.connection.insert(connection))
    }

    /// One connect cycle.
    ///
    /// A fault ends the cycle at once with `ConnectFailed`; an ordinary
    /// failure is retried until `connect_tries` attempts have been made.
    fn connect(&mut self) -> Result<D::Connection> {
        let endpoint = self.config.endpoint().ok_or(ClientError::NotConfigured)?;
        let tries = self.config.connect_tries;
        let persistent = self.config.persistent;
        let metrics = Metrics::get();

        let mut attempts = 0;
        while attempts < tries {
            attempts += 1;
            debug!("Connecting to {} (attempt {}/{})", endpoint, attempts, tries);
            metrics.record_connect_attempt(persistent);

            let outcome = if persistent {
                self.driver.pconnect(&endpoint)
            } else {
                self.driver.connect(&endpoint)
            };

            match outcome {
                Ok(Some(connection)) => {
                    info!("Connected to {} after {} attempt(s)", endpoint, attempts);
                    metrics.record_connection();
                    return Ok(connection);
                }
                Ok(None) => {
                    warn!("Connect attempt {}/{} to {} failed", attempts, tries, endpoint);
                    metrics.record_connect_failure("failure");
                }
                Err(fault) => {
                    warn!("Connect to {} aborted: {}", endpoint, fault);
                    metrics.record_connect_failure("fault");
                    return Err(ClientError::ConnectFailed(format!("{}: {}", endpoint, fault)));
                }
            }
        }

        self.connection = None;
        Err(ClientError::RetriesExhausted {
            endpoint: endpoint.to_string(),
            attempts,
        })
    }

    /// Ensure a connection, run `op` on it and record the outcome.
    fn run<T>(
        &mut self,
        command: &'static str,
        op: impl FnOnce(&mut D::Connection) -> Result<T>,
    ) -> Result<T> {
        let timer = Timer::new();
        let result = self.connection().and_then(op);

        let metrics = Metrics::get();
        match &result {
            Ok(_) => metrics.record_command(command, timer.elapsed_seconds()),
            Err(e) => {
                debug!("{} failed: {}", command, e);
                metrics.record_error(e.kind(), Some(command));
            }
        }
        result
    }

    /// Increment `key` by one.
    pub fn incr(&mut self, key: &str) -> Result<i64> {
        self.incr_by(key, 1)
    }

    /// Increment `key`. Amounts above 1 use INCRBY; anything else, including
    /// zero and negative amounts, increments by one.
    pub fn incr_by(&mut self, key: &str, amount: i64) -> Result<i64> {
        self.run("incr", |conn| {
            let reply = if amount > 1 {
                conn.incr_by(key, amount)?
            } else {
                conn.incr(key)?
            };
            reply.ok_or_else(|| command_failed(conn, "INCR", key))
        })
    }

    pub fn get(&mut self, key: &str) -> Result<String> {
        self.run("get", |conn| {
            conn.get(key)?
                .ok_or_else(|| ClientError::KeyNotFound(key.to_string()))
        })
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.set_with_ttl(key, value, 0)
    }

    /// Set `key`, expiring after `ttl_millis` milliseconds; 0 means no expiry.
    pub fn set_with_ttl(&mut self, key: &str, value: &str, ttl_millis: u64) -> Result<()> {
        self.run("set", |conn| {
            let stored = if ttl_millis == 0 {
                conn.set(key, value)?
            } else {
                conn.psetex(key, ttl_millis, value)?
            };
            if stored {
                Ok(())
            } else {
                Err(command_failed(conn, "SET", key))
            }
        })
    }

    /// Set `key` only if it does not exist. Returns whether it was set.
    pub fn set_if_absent(&mut self, key: &str, value: &str) -> Result<bool> {
        self.run("setnx", |conn| Ok(conn.setnx(key, value)?))
    }

    /// Set or clear one bit and return its previous value (0 or 1).
    pub fn set_bit(&mut self, key: &str, offset: u32, bit: bool) -> Result<u8> {
        self.run("setbit", |conn| {
            conn.setbit(key, offset, bit)?
                .ok_or_else(|| command_failed(conn, "SETBIT", key))
        })
    }

    /// Run a cached script by its SHA1 digest. All `args` are passed as keys.
    ///
    /// A server error left by the call is cleared and returned as
    /// `ScriptExecutionFailed`.
    pub fn eval_sha(&mut self, sha: &str, args: &[String]) -> Result<RespValue> {
        self.run("evalsha", |conn| {
            conn.clear_last_error();
            let reply = conn.evalsha(sha, args, args.len())?;
            if let Some(message) = conn.last_error().map(str::to_owned) {
                conn.clear_last_error();
                return Err(ClientError::ScriptExecutionFailed(message));
            }
            Ok(reply)
        })
    }

    /// Add members to a set. Returns how many were new.
    pub fn sadd(&mut self, key: &str, members: &[String]) -> Result<i64> {
        self.run("sadd", |conn| {
            conn.sadd(key, members)?
                .ok_or_else(|| command_failed(conn, "SADD", key))
        })
    }

    pub fn smembers(&mut self, key: &str) -> Result<Vec<String>> {
        self.run("smembers", |conn| {
            conn.smembers(key)?
                .ok_or_else(|| command_failed(conn, "SMEMBERS", key))
        })
    }

    /// Store the members of the first set that are in none of the others.
    /// Returns the size of the stored set.
    pub fn sdiffstore(&mut self, destination: &str, keys: &[String]) -> Result<i64> {
        self.run("sdiffstore", |conn| {
            conn.sdiffstore(destination, keys)?
                .ok_or_else(|| command_failed(conn, "SDIFFSTORE", destination))
        })
    }
}

fn command_failed<C: Connection>(conn: &C, command: &str, key: &str) -> ClientError {
    match conn.last_error() {
        Some(message) => ClientError::ConnectFailed(format!("{} {}: {}", command, key, message)),
        None => ClientError::ConnectFailed(format!("{} {} failed", command, key)),
    }
}
