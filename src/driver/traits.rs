use crate::error::TransportFault;
use crate::protocol::RespValue;
use std::fmt;
use std::time::Duration;

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// `None` blocks until the operating system gives up.
    pub timeout: Option<Duration>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Opens driver sessions.
///
/// Both connect methods report three outcomes:
/// `Ok(Some(conn))` on success, `Ok(None)` for an ordinary failed attempt
/// that may be retried, and `Err(fault)` for a transport fault.
pub trait Driver {
    type Connection: Connection;

    /// Open a transient connection.
    fn connect(&mut self, endpoint: &Endpoint) -> Result<Option<Self::Connection>, TransportFault>;

    /// Open a persistent connection. Drivers without connection reuse treat
    /// this like [`Driver::connect`].
    fn pconnect(&mut self, endpoint: &Endpoint) -> Result<Option<Self::Connection>, TransportFault> {
        self.connect(endpoint)
    }
}

/// One live driver session.
///
/// `Err` is always a transport fault. The `Ok` payload carries the driver's
/// own success signal: `None`/`false` means the command failed, and a server
/// error reply is kept as the session's last error.
pub trait Connection {
    /// INCR
    fn incr(&mut self, key: &str) -> Result<Option<i64>, TransportFault>;

    /// INCRBY
    fn incr_by(&mut self, key: &str, amount: i64) -> Result<Option<i64>, TransportFault>;

    /// GET. `None` when the key has no value.
    fn get(&mut self, key: &str) -> Result<Option<String>, TransportFault>;

    /// SET
    fn set(&mut self, key: &str, value: &str) -> Result<bool, TransportFault>;

    /// PSETEX: set with an expiry in milliseconds.
    fn psetex(&mut self, key: &str, ttl_millis: u64, value: &str) -> Result<bool, TransportFault>;

    /// SETNX: `true` only if the key was absent and is now set.
    fn setnx(&mut self, key: &str, value: &str) -> Result<bool, TransportFault>;

    /// SETBIT. Returns the previous bit value.
    fn setbit(&mut self, key: &str, offset: u32, value: bool) -> Result<Option<u8>, TransportFault>;

    /// EVALSHA. The first `num_keys` of `args` are keys.
    fn evalsha(&mut self, sha: &str, args: &[String], num_keys: usize) -> Result<RespValue, TransportFault>;

    /// SADD. Returns the number of members added.
    fn sadd(&mut self, key: &str, members: &[String]) -> Result<Option<i64>, TransportFault>;

    /// SMEMBERS
    fn smembers(&mut self, key: &str) -> Result<Option<Vec<String>>, TransportFault>;

    /// SDIFFSTORE. Returns the cardinality of the stored set.
    fn sdiffstore(&mut self, destination: &str, keys: &[String]) -> Result<Option<i64>, TransportFault>;

    /// Last error reported by the server, if any.
    fn last_error(&self) -> Option<&str>;

    fn clear_last_error(&mut self);
}
