use super::{Connection, Driver, Endpoint};
use crate::error::TransportFault;
use crate::protocol::RespValue;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";
const NOT_AN_INTEGER: &str = "ERR value is not an integer or out of range";
const NOSCRIPT: &str = "NOSCRIPT No matching script. Please use EVAL.";

#[derive(Debug, Clone)]
enum Value {
    Str(Vec<u8>),
    Set(BTreeSet<String>),
}

/// Stored value with optional expiry time.
#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn new_with_expiry(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() > expires_at,
            None => false,
        }
    }
}

/// Concurrent keyspace shared by every connection of a [`MemoryDriver`].
///
/// Expired keys are removed lazily when touched. Operations return the
/// server error message in `Err`.
#[derive(Debug, Default)]
struct Keyspace {
    data: DashMap<String, StoredValue>,
}

impl Keyspace {
    fn purge_expired(&self, key: &str) {
        self.data.remove_if(key, |_, stored| stored.is_expired());
    }

    fn get(&self, key: &str) -> Result<Option<String>, String> {
        self.purge_expired(key);
        match self.data.get(key) {
            Some(stored) => match &stored.value {
                Value::Str(bytes) => Ok(Some(String::from_utf8_lossy(bytes).into_owned())),
                Value::Set(_) => Err(WRONGTYPE.to_string()),
            },
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let value = Value::Str(value.as_bytes().to_vec());
        let stored = match ttl {
            Some(ttl) => StoredValue::new_with_expiry(value, ttl),
            None => StoredValue::new(value),
        };
        self.data.insert(key.to_string(), stored);
    }

    fn setnx(&self, key: &str, value: &str) -> bool {
        self.purge_expired(key);
        match self.data.entry(key.to_string()) {
            MapEntry::Occupied(_) => false,
            MapEntry::Vacant(slot) => {
                slot.insert(StoredValue::new(Value::Str(value.as_bytes().to_vec())));
                true
            }
        }
    }

    fn incr_by(&self, key: &str, amount: i64) -> Result<i64, String> {
        self.purge_expired(key);
        let mut stored = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::new(Value::Str(b"0".to_vec())));

        let Value::Str(bytes) = &mut stored.value else {
            return Err(WRONGTYPE.to_string());
        };
        let current = std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| NOT_AN_INTEGER.to_string())?;
        let next = current
            .checked_add(amount)
            .ok_or_else(|| "ERR increment or decrement would overflow".to_string())?;
        *bytes = next.to_string().into_bytes();
        Ok(next)
    }

    /// Bit 0 is the most significant bit of the first byte.
    fn setbit(&self, key: &str, offset: u32, bit: bool) -> Result<u8, String> {
        self.purge_expired(key);
        let mut stored = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::new(Value::Str(Vec::new())));

        let Value::Str(bytes) = &mut stored.value else {
            return Err(WRONGTYPE.to_string());
        };
        let index = (offset / 8) as usize;
        let shift = 7 - (offset % 8);
        if bytes.len() <= index {
            bytes.resize(index + 1, 0);
        }
        let previous = (bytes[index] >> shift) & 1;
        if bit {
            bytes[index] |= 1 << shift;
        } else {
            bytes[index] &= !(1 << shift);
        }
        Ok(previous)
    }

    fn sadd(&self, key: &str, members: &[String]) -> Result<i64, String> {
        self.purge_expired(key);
        let mut stored = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| StoredValue::new(Value::Set(BTreeSet::new())));

        let Value::Set(set) = &mut stored.value else {
            return Err(WRONGTYPE.to_string());
        };
        let added = members
            .iter()
            .filter(|member| set.insert((*member).clone()))
            .count();
        Ok(added as i64)
    }

    fn members(&self, key: &str) -> Result<BTreeSet<String>, String> {
        self.purge_expired(key);
        match self.data.get(key) {
            Some(stored) => match &stored.value {
                Value::Set(set) => Ok(set.clone()),
                Value::Str(_) => Err(WRONGTYPE.to_string()),
            },
            None => Ok(BTreeSet::new()),
        }
    }

    fn sdiffstore(&self, destination: &str, keys: &[String]) -> Result<i64, String> {
        let Some((first, others)) = keys.split_first() else {
            return Err("ERR wrong number of arguments for 'sdiffstore' command".to_string());
        };

        // Each read releases its shard lock before the next one is taken.
        let mut diff = self.members(first)?;
        for key in others {
            let other = self.members(key)?;
            diff.retain(|member| !other.contains(member));
        }

        let cardinality = diff.len() as i64;
        if diff.is_empty() {
            self.data.remove(destination);
        } else {
            self.data
                .insert(destination.to_string(), StoredValue::new(Value::Set(diff)));
        }
        Ok(cardinality)
    }
}

/// In-process driver backed by a concurrent hashmap.
///
/// Clones share the same keyspace and script table, so several clients can
/// observe each other's writes. Data is volatile.
#[derive(Debug, Clone)]
pub struct MemoryDriver {
    keyspace: Arc<Keyspace>,
    scripts: Arc<DashMap<String, RespValue>>,
    reachable: Arc<AtomicBool>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            keyspace: Arc::new(Keyspace::default()),
            scripts: Arc::new(DashMap::new()),
            reachable: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Make EVALSHA with `sha` reply with `reply`. An error reply is recorded
    /// as the connection's last error.
    pub fn register_script(&self, sha: impl Into<String>, reply: RespValue) {
        self.scripts.insert(sha.into(), reply);
    }

    /// When unreachable, every connect attempt fails without a fault.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn open(&self, endpoint: &Endpoint) -> Option<MemoryConnection> {
        if !self.reachable.load(Ordering::SeqCst) {
            debug!("Memory driver unreachable for {}", endpoint);
            return None;
        }
        Some(MemoryConnection {
            keyspace: Arc::clone(&self.keyspace),
            scripts: Arc::clone(&self.scripts),
            last_error: None,
        })
    }
}

impl Driver for MemoryDriver {
    type Connection = MemoryConnection;

    fn connect(&mut self, endpoint: &Endpoint) -> Result<Option<MemoryConnection>, TransportFault> {
        Ok(self.open(endpoint))
    }
}

/// Session on a [`MemoryDriver`] keyspace.
#[derive(Debug)]
pub struct MemoryConnection {
    keyspace: Arc<Keyspace>,
    scripts: Arc<DashMap<String, RespValue>>,
    last_error: Option<String>,
}

impl MemoryConnection {
    fn record<T>(&mut self, outcome: Result<T, String>) -> Option<T> {
        match outcome {
            Ok(value) => Some(value),
            Err(message) => {
                self.last_error = Some(message);
                None
            }
        }
    }
}

impl Connection for MemoryConnection {
    fn incr(&mut self, key: &str) -> Result<Option<i64>, TransportFault> {
        self.incr_by(key, 1)
    }

    fn incr_by(&mut self, key: &str, amount: i64) -> Result<Option<i64>, TransportFault> {
        let outcome = self.keyspace.incr_by(key, amount);
        Ok(self.record(outcome))
    }

    fn get(&mut self, key: &str) -> Result<Option<String>, TransportFault> {
        let outcome = self.keyspace.get(key);
        Ok(self.record(outcome).flatten())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<bool, TransportFault> {
        self.keyspace.set(key, value, None);
        Ok(true)
    }

    fn psetex(&mut self, key: &str, ttl_millis: u64, value: &str) -> Result<bool, TransportFault> {
        if ttl_millis == 0 {
            self.last_error = Some("ERR invalid expire time in 'psetex' command".to_string());
            return Ok(false);
        }
        self.keyspace
            .set(key, value, Some(Duration::from_millis(ttl_millis)));
        Ok(true)
    }

    fn setnx(&mut self, key: &str, value: &str) -> Result<bool, TransportFault> {
        Ok(self.keyspace.setnx(key, value))
    }

    fn setbit(&mut self, key: &str, offset: u32, value: bool) -> Result<Option<u8>, TransportFault> {
        let outcome = self.keyspace.setbit(key, offset, value);
        Ok(self.record(outcome))
    }

    fn evalsha(&mut self, sha: &str, _args: &[String], _num_keys: usize) -> Result<RespValue, TransportFault> {
        let reply = self.scripts.get(sha).map(|reply| reply.value().clone());
        match reply {
            Some(RespValue::Error(message)) => {
                self.last_error = Some(message);
                Ok(RespValue::Null)
            }
            Some(reply) => Ok(reply),
            None => {
                self.last_error = Some(NOSCRIPT.to_string());
                Ok(RespValue::Null)
            }
        }
    }

    fn sadd(&mut self, key: &str, members: &[String]) -> Result<Option<i64>, TransportFault> {
        let outcome = self.keyspace.sadd(key, members);
        Ok(self.record(outcome))
    }

    fn smembers(&mut self, key: &str) -> Result<Option<Vec<String>>, TransportFault> {
        let outcome = self
            .keyspace
            .members(key)
            .map(|set| set.into_iter().collect());
        Ok(self.record(outcome))
    }

    fn sdiffstore(&mut self, destination: &str, keys: &[String]) -> Result<Option<i64>, TransportFault> {
        let outcome = self.keyspace.sdiffstore(destination, keys);
        Ok(self.record(outcome))
    }

    fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn clear_last_error(&mut self) {
        self.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn connection() -> (MemoryDriver, MemoryConnection) {
        let mut driver = MemoryDriver::new();
        let conn = driver
            .connect(&Endpoint::new("memory", 0))
            .unwrap()
            .unwrap();
        (driver, conn)
    }

    #[test]
    fn test_memory_basic_set_get() {
        let (_driver, mut conn) = connection();
        assert!(conn.set("key1", "value1").unwrap());

        assert_eq!(conn.get("key1").unwrap(), Some("value1".to_string()));
        assert_eq!(conn.get("nonexistent").unwrap(), None);
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn test_memory_expiry() {
        let (_driver, mut conn) = connection();
        assert!(conn.psetex("expiring_key", 50, "value").unwrap());
        assert_eq!(conn.get("expiring_key").unwrap(), Some("value".to_string()));

        thread::sleep(Duration::from_millis(100));

        assert_eq!(conn.get("expiring_key").unwrap(), None);
        assert!(conn.setnx("expiring_key", "fresh").unwrap());
    }

    #[test]
    fn test_memory_incr() {
        let (_driver, mut conn) = connection();
        assert_eq!(conn.incr("counter").unwrap(), Some(1));
        assert_eq!(conn.incr_by("counter", 10).unwrap(), Some(11));

        conn.set("text", "abc").unwrap();
        assert_eq!(conn.incr("text").unwrap(), None);
        assert_eq!(conn.last_error(), Some(NOT_AN_INTEGER));
    }

    #[test]
    fn test_memory_setnx() {
        let (_driver, mut conn) = connection();
        assert!(conn.setnx("lock", "a").unwrap());
        assert!(!conn.setnx("lock", "b").unwrap());
        assert_eq!(conn.get("lock").unwrap(), Some("a".to_string()));
    }

    #[test]
    fn test_memory_setbit_bit_order() {
        let (_driver, mut conn) = connection();
        assert_eq!(conn.setbit("bits", 7, true).unwrap(), Some(0));
        assert_eq!(conn.setbit("bits", 7, true).unwrap(), Some(1));
        assert_eq!(conn.setbit("bits", 1, true).unwrap(), Some(0));
        // 0b0100_0001
        assert_eq!(conn.get("bits").unwrap(), Some("A".to_string()));
        assert_eq!(conn.setbit("bits", 7, false).unwrap(), Some(1));
    }

    #[test]
    fn test_memory_wrong_type() {
        let (_driver, mut conn) = connection();
        conn.sadd("set", &["a".to_string()]).unwrap();

        assert_eq!(conn.get("set").unwrap(), None);
        assert_eq!(conn.last_error(), Some(WRONGTYPE));
        conn.clear_last_error();
        assert!(conn.last_error().is_none());
    }

    #[test]
    fn test_memory_sets() {
        let (_driver, mut conn) = connection();
        let members: Vec<String> = ["1", "2", "3"].iter().map(|s| s.to_string()).collect();
        assert_eq!(conn.sadd("test1", &members).unwrap(), Some(3));
        assert_eq!(conn.sadd("test1", &members[..1]).unwrap(), Some(0));
        assert_eq!(conn.sadd("test2", &members[1..2]).unwrap(), Some(1));

        let keys = vec!["test1".to_string(), "test2".to_string()];
        assert_eq!(conn.sdiffstore("test3", &keys).unwrap(), Some(2));
        assert_eq!(
            conn.smembers("test3").unwrap(),
            Some(vec!["1".to_string(), "3".to_string()])
        );
        assert_eq!(conn.smembers("missing").unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_memory_scripts() {
        let (driver, mut conn) = connection();
        driver.register_script("abc", RespValue::Integer(7));
        driver.register_script("bad", RespValue::Error("ERR boom".to_string()));

        assert_eq!(conn.evalsha("abc", &[], 0).unwrap(), RespValue::Integer(7));
        assert!(conn.last_error().is_none());

        conn.evalsha("bad", &[], 0).unwrap();
        assert_eq!(conn.last_error(), Some("ERR boom"));
        conn.clear_last_error();

        conn.evalsha("unknown", &[], 0).unwrap();
        assert_eq!(conn.last_error(), Some(NOSCRIPT));
    }

    #[test]
    fn test_memory_unreachable() {
        let mut driver = MemoryDriver::new();
        driver.set_reachable(false);
        assert!(driver.connect(&Endpoint::new("memory", 0)).unwrap().is_none());
    }

    #[test]
    fn test_memory_shared_keyspace() {
        let (mut driver, mut conn1) = connection();
        let mut conn2 = driver.connect(&Endpoint::new("memory", 0)).unwrap().unwrap();

        conn1.set("shared_key", "shared_value").unwrap();
        assert_eq!(
            conn2.get("shared_key").unwrap(),
            Some("shared_value".to_string())
        );
    }
}
