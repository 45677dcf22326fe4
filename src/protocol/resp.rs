use bytes::{Buf, BytesMut};
use std::io;

/// RESP (Redis Serialization Protocol) value types.
///
/// Requests are always RESP2 arrays of bulk strings; replies may carry any of
/// the RESP2 or RESP3 core types.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    // RESP2 types
    SimpleString(String),           // +
    Error(String),                  // -
    Integer(i64),                   // :
    BulkString(Option<String>),     // $ (None = null in RESP2)
    Array(Option<Vec<RespValue>>),  // * (None = null in RESP2)

    // RESP3 types
    Null,                             // _
    Boolean(bool),                    // #
    Double(f64),                      // ,
    Set(Vec<RespValue>),              // ~
    Map(Vec<(RespValue, RespValue)>), // %
}

impl RespValue {
    /// Build a request frame: an array of bulk strings.
    pub fn command<S: AsRef<str>>(args: &[S]) -> Self {
        RespValue::Array(Some(
            args.iter()
                .map(|arg| RespValue::BulkString(Some(arg.as_ref().to_string())))
                .collect(),
        ))
    }

    /// Serialize this value to Redis wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            RespValue::SimpleString(s) => format!("+{}\r\n", s).into_bytes(),
            RespValue::Error(e) => format!("-{}\r\n", e).into_bytes(),
            RespValue::Integer(i) => format!(":{}\r\n", i).into_bytes(),
            RespValue::BulkString(Some(s)) => format!("${}\r\n{}\r\n", s.len(), s).into_bytes(),
            RespValue::BulkString(None) => b"$-1\r\n".to_vec(),
            RespValue::Array(Some(arr)) => aggregate_bytes(b'*', arr),
            RespValue::Array(None) => b"*-1\r\n".to_vec(),

            RespValue::Null => b"_\r\n".to_vec(),
            RespValue::Boolean(true) => b"#t\r\n".to_vec(),
            RespValue::Boolean(false) => b"#f\r\n".to_vec(),
            RespValue::Double(d) => format!(",{}\r\n", d).into_bytes(),
            RespValue::Set(items) => aggregate_bytes(b'~', items),
            RespValue::Map(pairs) => {
                let mut result = format!("%{}\r\n", pairs.len()).into_bytes();
                for (key, value) in pairs {
                    result.extend_from_slice(&key.to_bytes());
                    result.extend_from_slice(&value.to_bytes());
                }
                result
            }
        }
    }
}

fn aggregate_bytes(prefix: u8, items: &[RespValue]) -> Vec<u8> {
    let mut result = vec![prefix];
    result.extend_from_slice(format!("{}\r\n", items.len()).as_bytes());
    for item in items {
        result.extend_from_slice(&item.to_bytes());
    }
    result
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Stateful parser for Redis protocol messages.
///
/// Accumulates data in a buffer and parses complete RESP values. Bytes are
/// only consumed once a whole value is available.
#[derive(Debug)]
pub struct RespParser {
    buffer: BytesMut,
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add incoming bytes to the parser buffer.
    pub fn add_data(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Discard buffered bytes after a protocol error.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Parse next complete value. Returns None if incomplete.
    pub fn parse(&mut self) -> Result<Option<RespValue>, io::Error> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        tracing::trace!("Parsing buffer: {} bytes", self.buffer.len());

        let parsed = {
            let mut cursor = Cursor {
                buf: &self.buffer[..],
                pos: 0,
            };
            cursor.value()?.map(|value| (value, cursor.pos))
        };

        match parsed {
            Some((value, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

/// Read position over the parser buffer.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn value(&mut self) -> Result<Option<RespValue>, io::Error> {
        let Some(&type_byte) = self.buf.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;

        match type_byte {
            b'+' => Ok(self.line()?.map(RespValue::SimpleString)),
            b'-' => Ok(self.line()?.map(RespValue::Error)),
            b':' => match self.line()? {
                Some(line) => {
                    let num = line.parse::<i64>().map_err(|_| invalid("Invalid integer"))?;
                    Ok(Some(RespValue::Integer(num)))
                }
                None => Ok(None),
            },
            b'$' => self.bulk_string(),
            b'*' => match self.length("array")? {
                Some(None) => Ok(Some(RespValue::Array(None))),
                Some(Some(len)) => Ok(self.items(len)?.map(|items| RespValue::Array(Some(items)))),
                None => Ok(None),
            },

            b'_' => Ok(self.line()?.map(|_| RespValue::Null)),
            b'#' => match self.line()?.as_deref() {
                Some("t") => Ok(Some(RespValue::Boolean(true))),
                Some("f") => Ok(Some(RespValue::Boolean(false))),
                Some(other) => Err(invalid(format!("Invalid boolean value: {}", other))),
                None => Ok(None),
            },
            b',' => match self.line()? {
                Some(line) => {
                    let num = line.parse::<f64>().map_err(|_| invalid("Invalid double"))?;
                    Ok(Some(RespValue::Double(num)))
                }
                None => Ok(None),
            },
            b'~' => match self.length("set")? {
                Some(Some(len)) => Ok(self.items(len)?.map(RespValue::Set)),
                Some(None) => Err(invalid("Invalid set length")),
                None => Ok(None),
            },
            b'%' => match self.length("map")? {
                Some(Some(len)) => match self.items(len.saturating_mul(2))? {
                    Some(items) => {
                        let mut iter = items.into_iter();
                        let mut pairs = Vec::with_capacity(len);
                        while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                            pairs.push((k, v));
                        }
                        Ok(Some(RespValue::Map(pairs)))
                    }
                    None => Ok(None),
                },
                Some(None) => Err(invalid("Invalid map length")),
                None => Ok(None),
            },

            _ => Err(invalid(format!(
                "Invalid RESP type byte: {}",
                type_byte as char
            ))),
        }
    }

    fn line(&mut self) -> Result<Option<String>, io::Error> {
        let rest = &self.buf[self.pos..];
        match rest.windows(2).position(|w| w == b"\r\n") {
            Some(end) => {
                let line = std::str::from_utf8(&rest[..end])
                    .map_err(|_| invalid("Invalid UTF-8"))?
                    .to_string();
                self.pos += end + 2;
                Ok(Some(line))
            }
            None => Ok(None),
        }
    }

    /// Length header: `Some(None)` for the -1 null marker.
    fn length(&mut self, what: &str) -> Result<Option<Option<usize>>, io::Error> {
        let Some(line) = self.line()? else {
            return Ok(None);
        };
        let length = line
            .parse::<i64>()
            .map_err(|_| invalid(format!("Invalid {} length", what)))?;
        match length {
            -1 => Ok(Some(None)),
            n if n < 0 => Err(invalid(format!("Invalid {} length", what))),
            n => Ok(Some(Some(n as usize))),
        }
    }

    fn bulk_string(&mut self) -> Result<Option<RespValue>, io::Error> {
        let length = match self.length("bulk string")? {
            Some(Some(length)) => length,
            Some(None) => return Ok(Some(RespValue::BulkString(None))),
            None => return Ok(None),
        };

        let rest = &self.buf[self.pos..];
        if rest.len() < length + 2 {
            return Ok(None);
        }
        if &rest[length..length + 2] != b"\r\n" {
            return Err(invalid("Bulk string is not terminated by CRLF"));
        }

        // Payloads are binary-safe; bytes outside UTF-8 decode lossily.
        let string = String::from_utf8_lossy(&rest[..length]).into_owned();
        self.pos += length + 2;
        Ok(Some(RespValue::BulkString(Some(string))))
    }

    fn items(&mut self, count: usize) -> Result<Option<Vec<RespValue>>, io::Error> {
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            match self.value()? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(items))
    }
}
