use super::{Connection, Driver, Endpoint};
use crate::error::TransportFault;
use crate::protocol::{RespParser, RespValue};
use dashmap::DashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use tracing::{debug, trace, warn};

type IdlePool = Arc<DashMap<String, Vec<TcpStream>>>;

/// Blocking RESP2 driver over TCP.
///
/// Transient connections close when dropped. Persistent connections come
/// from, and go back to, an idle pool keyed by `host:port` that is shared by
/// clones of the driver.
#[derive(Debug, Clone, Default)]
pub struct TcpDriver {
    pool: IdlePool,
}

impl TcpDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pooled idle streams for `endpoint`.
    pub fn idle_connections(&self, endpoint: &Endpoint) -> usize {
        self.pool
            .get(&endpoint.to_string())
            .map(|idle| idle.len())
            .unwrap_or(0)
    }

    /// Pop the most recent idle stream that the server has not closed.
    fn take_idle(&self, key: &str) -> Option<TcpStream> {
        let mut idle = self.pool.get_mut(key)?;
        while let Some(stream) = idle.pop() {
            if is_open(&stream) {
                return Some(stream);
            }
            debug!("Discarding closed pooled connection to {}", key);
        }
        None
    }

    fn open_stream(endpoint: &Endpoint) -> Result<Option<TcpStream>, TransportFault> {
        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()?
            .collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no address found for {}", endpoint),
            )
            .into());
        }

        for addr in addrs {
            let attempt = match endpoint.timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("Connected to {} ({})", endpoint, addr);
                    return Ok(Some(stream));
                }
                Err(e) if is_retryable(&e) => {
                    debug!("Connect to {} ({}) failed: {}", endpoint, addr, e);
                }
                Err(e) => {
                    warn!("Connect to {} ({}) raised a fault: {}", endpoint, addr, e);
                    return Err(e.into());
                }
            }
        }

        Ok(None)
    }
}

/// An idle stream is usable only while a non-blocking peek would block:
/// EOF means the server hung up and unsolicited bytes mean it is out of sync.
fn is_open(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return false;
    }
    let mut byte = [0; 1];
    let open = matches!(
        stream.peek(&mut byte),
        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock
    );
    open && stream.set_nonblocking(false).is_ok()
}

/// Connect errors that count as an ordinary failed attempt.
fn is_retryable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::Interrupted
    )
}

impl Driver for TcpDriver {
    type Connection = TcpConnection;

    fn connect(&mut self, endpoint: &Endpoint) -> Result<Option<TcpConnection>, TransportFault> {
        Ok(Self::open_stream(endpoint)?.map(|stream| TcpConnection::new(stream, None)))
    }

    fn pconnect(&mut self, endpoint: &Endpoint) -> Result<Option<TcpConnection>, TransportFault> {
        let key = endpoint.to_string();
        let stream = match self.take_idle(&key) {
            Some(stream) => {
                debug!("Reusing pooled connection to {}", key);
                Some(stream)
            }
            None => Self::open_stream(endpoint)?,
        };

        Ok(stream.map(|stream| {
            TcpConnection::new(
                stream,
                Some(PoolSlot {
                    pool: Arc::clone(&self.pool),
                    key,
                }),
            )
        }))
    }
}

#[derive(Debug)]
struct PoolSlot {
    pool: IdlePool,
    key: String,
}

/// One TCP session. Each command writes a request frame and blocks until a
/// full reply has been read.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    parser: RespParser,
    last_error: Option<String>,
    slot: Option<PoolSlot>,
    broken: bool,
}

impl TcpConnection {
    fn new(stream: TcpStream, slot: Option<PoolSlot>) -> Self {
        Self {
            stream,
            parser: RespParser::new(),
            last_error: None,
            slot,
            broken: false,
        }
    }

    /// Whether the connection goes back to the idle pool when dropped.
    pub fn is_persistent(&self) -> bool {
        self.slot.is_some()
    }

    fn call<S: AsRef<str>>(&mut self, args: &[S]) -> Result<RespValue, TransportFault> {
        let frame = RespValue::command(args).to_bytes();
        let outcome = self
            .stream
            .write_all(&frame)
            .and_then(|_| self.stream.flush())
            .map_err(TransportFault::from)
            .and_then(|_| self.read_reply());

        if outcome.is_err() {
            self.broken = true;
        }
        outcome
    }

    fn read_reply(&mut self) -> Result<RespValue, TransportFault> {
        let mut buffer = [0; 4096];
        loop {
            match self.parser.parse() {
                Ok(Some(value)) => {
                    trace!("Received reply: {:?}", value);
                    return Ok(value);
                }
                Ok(None) => {}
                Err(e) => {
                    // Drop the undecodable frame so the next command starts clean.
                    self.parser.reset();
                    return Err(TransportFault::Protocol(e.to_string()));
                }
            }

            let n = self.stream.read(&mut buffer)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )
                .into());
            }
            self.parser.add_data(&buffer[..n]);
        }
    }

    /// Keep server error replies as the last error; anything else goes to
    /// `extract`.
    fn reply<T>(&mut self, reply: RespValue, extract: impl FnOnce(RespValue) -> Option<T>) -> Option<T> {
        match reply {
            RespValue::Error(message) => {
                self.last_error = Some(message);
                None
            }
            other => extract(other),
        }
    }

    fn integer_reply(&mut self, reply: RespValue) -> Option<i64> {
        self.reply(reply, |value| match value {
            RespValue::Integer(n) => Some(n),
            _ => None,
        })
    }

    fn ok_reply(&mut self, reply: RespValue) -> bool {
        self.reply(reply, |value| match value {
            RespValue::SimpleString(s) if s == "OK" => Some(()),
            _ => None,
        })
        .is_some()
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        if self.broken || self.parser.buffered() > 0 {
            return;
        }
        if let Some(slot) = &self.slot {
            if let Ok(stream) = self.stream.try_clone() {
                slot.pool.entry(slot.key.clone()).or_default().push(stream);
            }
        }
    }
}

impl Connection for TcpConnection {
    fn incr(&mut self, key: &str) -> Result<Option<i64>, TransportFault> {
        let reply = self.call(&["INCR", key])?;
        Ok(self.integer_reply(reply))
    }

    fn incr_by(&mut self, key: &str, amount: i64) -> Result<Option<i64>, TransportFault> {
        let amount = amount.to_string();
        let reply = self.call(&["INCRBY", key, amount.as_str()])?;
        Ok(self.integer_reply(reply))
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, TransportFault> {
        let reply = self.call(&["GET", key])?;
        Ok(self.reply(reply, |value| match value {
            RespValue::BulkString(s) => s,
            _ => None,
        }))
    }

    fn set(&mut self, key: &str, value: &str) -> Result<bool, TransportFault> {
        let reply = self.call(&["SET", key, value])?;
        Ok(self.ok_reply(reply))
    }

    fn psetex(&mut self, key: &str, ttl_millis: u64, value: &str) -> Result<bool, TransportFault> {
        let ttl = ttl_millis.to_string();
        let reply = self.call(&["PSETEX", key, ttl.as_str(), value])?;
        Ok(self.ok_reply(reply))
    }

    fn setnx(&mut self, key: &str, value: &str) -> Result<bool, TransportFault> {
        let reply = self.call(&["SETNX", key, value])?;
        Ok(self.integer_reply(reply) == Some(1))
    }

    fn setbit(&mut self, key: &str, offset: u32, value: bool) -> Result<Option<u8>, TransportFault> {
        let offset = offset.to_string();
        let bit = if value { "1" } else { "0" };
        let reply = self.call(&["SETBIT", key, offset.as_str(), bit])?;
        Ok(self.integer_reply(reply).map(|previous| u8::from(previous != 0)))
    }

    fn evalsha(&mut self, sha: &str, args: &[String], num_keys: usize) -> Result<RespValue, TransportFault> {
        let num_keys = num_keys.to_string();
        let mut command = vec!["EVALSHA", sha, num_keys.as_str()];
        command.extend(args.iter().map(String::as_str));

        let reply = self.call(&command)?;
        Ok(self
            .reply(reply, Some)
            .unwrap_or(RespValue::Null))
    }

    fn sadd(&mut self, key: &str, members: &[String]) -> Result<Option<i64>, TransportFault> {
        let mut command = vec!["SADD", key];
        command.extend(members.iter().map(String::as_str));

        let reply = self.call(&command)?;
        Ok(self.integer_reply(reply))
    }

    fn smembers(&mut self, key: &str) -> Result<Option<Vec<String>>, TransportFault> {
        let reply = self.call(&["SMEMBERS", key])?;
        Ok(self.reply(reply, |value| {
            let items = match value {
                RespValue::Array(Some(items)) | RespValue::Set(items) => items,
                _ => return None,
            };
            items
                .into_iter()
                .map(|item| match item {
                    RespValue::BulkString(Some(s)) | RespValue::SimpleString(s) => Some(s),
                    _ => None,
                })
                .collect()
        }))
    }

    fn sdiffstore(&mut self, destination: &str, keys: &[String]) -> Result<Option<i64>, TransportFault> {
        let mut command = vec!["SDIFFSTORE", destination];
        command.extend(keys.iter().map(String::as_str));

        let reply = self.call(&command)?;
        Ok(self.integer_reply(reply))
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn clear_last_error(&mut self) {
        self.last_error = None;
    }
}
