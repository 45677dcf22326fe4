use coral_client::{ClientError, Connection, Endpoint, MemoryDriver, RedisClient, RespParser, RespValue, TcpDriver};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

fn memory_client(driver: &MemoryDriver) -> RedisClient<MemoryDriver> {
    let mut client = RedisClient::new(driver.clone());
    client.set_host("localhost").unwrap().set_port(6379).unwrap();
    client
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_memory_round_trip() {
    let driver = MemoryDriver::new();
    let mut client = memory_client(&driver);

    client.set("testkey", "testvalue").unwrap();
    assert_eq!(client.get("testkey").unwrap(), "testvalue");

    assert!(matches!(client.get("missing"), Err(ClientError::KeyNotFound(_))));

    assert_eq!(client.incr("hits").unwrap(), 1);
    assert_eq!(client.incr_by("hits", 10).unwrap(), 11);
    assert_eq!(client.get("hits").unwrap(), "11");
}

#[test]
fn test_memory_set_difference() {
    let driver = MemoryDriver::new();
    let mut client = memory_client(&driver);

    client.sadd("test1", &strings(&["1"])).unwrap();
    client.sadd("test1", &strings(&["2"])).unwrap();
    client.sadd("test1", &strings(&["3"])).unwrap();
    client.sadd("test2", &strings(&["2"])).unwrap();

    let stored = client.sdiffstore("test3", &strings(&["test1", "test2"])).unwrap();
    assert_eq!(stored, 2);
    assert_eq!(client.smembers("test3").unwrap(), strings(&["1", "3"]));
}

#[test]
fn test_memory_set_bit_on_set_key_fails() {
    let driver = MemoryDriver::new();
    let mut client = memory_client(&driver);

    client.sadd("members", &strings(&["a"])).unwrap();
    match client.set_bit("members", 0, true) {
        Err(ClientError::ConnectFailed(msg)) => assert!(msg.contains("WRONGTYPE")),
        other => panic!("Expected ConnectFailed, got {:?}", other),
    }
    assert_eq!(client.set_bit("flags", 0, true).unwrap(), 0);
    assert_eq!(client.set_bit("flags", 0, false).unwrap(), 1);
}

#[test]
fn test_memory_multiple_clients() {
    let driver = MemoryDriver::new();
    let mut client1 = memory_client(&driver);
    let mut client2 = memory_client(&driver);

    assert!(client1.set_if_absent("shared_key", "shared_value").unwrap());
    assert!(!client2.set_if_absent("shared_key", "other").unwrap());
    assert_eq!(client2.get("shared_key").unwrap(), "shared_value");
}

#[test]
fn test_memory_scripts() {
    let driver = MemoryDriver::new();
    driver.register_script("ok", RespValue::BulkString(Some("done".to_string())));
    driver.register_script("broken", RespValue::Error("ERR Error running script".to_string()));
    let mut client = memory_client(&driver);

    assert_eq!(
        client.eval_sha("ok", &strings(&["k"])).unwrap(),
        RespValue::BulkString(Some("done".to_string()))
    );
    match client.eval_sha("broken", &[]) {
        Err(ClientError::ScriptExecutionFailed(msg)) => assert_eq!(msg, "ERR Error running script"),
        other => panic!("Expected ScriptExecutionFailed, got {:?}", other),
    }
    match client.eval_sha("unknown", &[]) {
        Err(ClientError::ScriptExecutionFailed(msg)) => assert!(msg.starts_with("NOSCRIPT")),
        other => panic!("Expected ScriptExecutionFailed, got {:?}", other),
    }
    // The error is not carried over to the next call.
    assert!(client.eval_sha("ok", &[]).is_ok());
}

#[test]
fn test_memory_unreachable_then_recovered() {
    let driver = MemoryDriver::new();
    let mut client = memory_client(&driver);
    client.set_connect_tries(2).unwrap();

    driver.set_reachable(false);
    assert!(matches!(
        client.set("k", "v"),
        Err(ClientError::RetriesExhausted { attempts: 2, .. })
    ));

    driver.set_reachable(true);
    client.set("k", "v").unwrap();
    assert_eq!(client.get("k").unwrap(), "v");
}

/// Minimal RESP server backed by a shared map, one thread per connection.
struct FakeServer {
    port: u16,
    accepted: Arc<AtomicUsize>,
}

impl FakeServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let store: Arc<Mutex<HashMap<String, String>>> = Arc::new(Mutex::new(HashMap::new()));

        let counter = Arc::clone(&accepted);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                let store = Arc::clone(&store);
                thread::spawn(move || serve(stream, store));
            }
        });

        Self { port, accepted }
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

fn serve(mut stream: TcpStream, store: Arc<Mutex<HashMap<String, String>>>) {
    let mut parser = RespParser::new();
    let mut buffer = [0; 1024];
    loop {
        let n = match stream.read(&mut buffer) {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        parser.add_data(&buffer[..n]);

        while let Ok(Some(RespValue::Array(Some(parts)))) = parser.parse() {
            let args: Vec<String> = parts
                .into_iter()
                .filter_map(|part| match part {
                    RespValue::BulkString(s) => s,
                    _ => None,
                })
                .collect();
            let reply = raw_reply(&args).unwrap_or_else(|| respond(&args, &store).to_bytes());
            if stream.write_all(&reply).is_err() {
                return;
            }
        }
    }
}

/// Replies a real server can send that `RespValue` cannot carry.
fn raw_reply(args: &[String]) -> Option<Vec<u8>> {
    match (args.first().map(|s| s.to_ascii_uppercase()).as_deref(), args.get(1).map(String::as_str)) {
        (Some("GET"), Some("bits")) => Some(b"$1\r\n\x80\r\n".to_vec()),
        (Some("GET"), Some("garbled")) => Some(b"$-5\r\n".to_vec()),
        _ => None,
    }
}

fn respond(args: &[String], store: &Mutex<HashMap<String, String>>) -> RespValue {
    let mut store = store.lock().unwrap();
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
    match args.first().map(|s| s.to_ascii_uppercase()).as_deref() {
        Some("GET") => RespValue::BulkString(store.get(&arg(1)).cloned()),
        Some("SET") => {
            store.insert(arg(1), arg(2));
            RespValue::SimpleString("OK".to_string())
        }
        Some("PSETEX") => {
            store.insert(arg(1), arg(3));
            RespValue::SimpleString("OK".to_string())
        }
        Some("SETNX") => {
            if store.contains_key(&arg(1)) {
                RespValue::Integer(0)
            } else {
                store.insert(arg(1), arg(2));
                RespValue::Integer(1)
            }
        }
        Some(cmd @ ("INCR" | "INCRBY")) => {
            let by = if cmd == "INCR" { 1 } else { arg(2).parse().unwrap_or(0) };
            let current = store.get(&arg(1)).cloned().unwrap_or_else(|| "0".to_string());
            match current.parse::<i64>() {
                Ok(n) => {
                    store.insert(arg(1), (n + by).to_string());
                    RespValue::Integer(n + by)
                }
                Err(_) => RespValue::Error("ERR value is not an integer or out of range".to_string()),
            }
        }
        Some("EVALSHA") if arg(1) == "known" => RespValue::Array(Some(
            args[3..]
                .iter()
                .map(|key| RespValue::BulkString(Some(key.clone())))
                .collect(),
        )),
        Some("EVALSHA") => RespValue::Error("NOSCRIPT No matching script. Please use EVAL.".to_string()),
        _ => RespValue::Error(format!("ERR unknown command '{}'", arg(0))),
    }
}

fn tcp_client(driver: TcpDriver, port: u16) -> RedisClient<TcpDriver> {
    let mut client = RedisClient::new(driver);
    client
        .set_host("127.0.0.1")
        .and_then(|c| c.set_port(i64::from(port)))
        .and_then(|c| c.set_connect_timeout(2.0))
        .unwrap();
    client
}

#[test]
fn test_tcp_commands() {
    let server = FakeServer::start();
    let mut client = tcp_client(TcpDriver::new(), server.port);

    client.set("greeting", "hello world").unwrap();
    assert_eq!(client.get("greeting").unwrap(), "hello world");
    assert!(matches!(client.get("missing"), Err(ClientError::KeyNotFound(_))));

    assert_eq!(client.incr("n").unwrap(), 1);
    assert_eq!(client.incr_by("n", 4).unwrap(), 5);
    assert!(matches!(client.incr("greeting"), Err(ClientError::ConnectFailed(_))));

    client.set_with_ttl("temp", "x", 5000).unwrap();
    assert_eq!(client.get("temp").unwrap(), "x");

    assert!(client.set_if_absent("lock", "1").unwrap());
    assert!(!client.set_if_absent("lock", "2").unwrap());

    assert_eq!(server.accepted(), 1);
}

#[test]
fn test_tcp_binary_reply_keeps_connection_usable() {
    let server = FakeServer::start();
    let mut client = tcp_client(TcpDriver::new(), server.port);

    assert_eq!(client.get("bits").unwrap(), "\u{FFFD}");

    client.set("k", "v").unwrap();
    client.set("k2", "v").unwrap();
    assert_eq!(client.get("k2").unwrap(), "v");
    assert_eq!(server.accepted(), 1);
}

#[test]
fn test_tcp_malformed_reply_resyncs_connection() {
    let server = FakeServer::start();
    let mut client = tcp_client(TcpDriver::new(), server.port);

    match client.get("garbled") {
        Err(ClientError::ConnectFailed(msg)) => assert!(msg.starts_with("protocol error")),
        other => panic!("Expected ConnectFailed, got {:?}", other),
    }
    assert!(client.is_connected());

    client.set("k", "v").unwrap();
    client.set("k2", "v").unwrap();
    assert_eq!(client.get("k").unwrap(), "v");
    assert_eq!(server.accepted(), 1);
}

#[test]
fn test_tcp_eval_sha() {
    let server = FakeServer::start();
    let mut client = tcp_client(TcpDriver::new(), server.port);

    let reply = client.eval_sha("known", &strings(&["a", "b"])).unwrap();
    assert_eq!(
        reply,
        RespValue::Array(Some(vec![
            RespValue::BulkString(Some("a".to_string())),
            RespValue::BulkString(Some("b".to_string())),
        ]))
    );

    match client.eval_sha("missing", &[]) {
        Err(ClientError::ScriptExecutionFailed(msg)) => assert!(msg.starts_with("NOSCRIPT")),
        other => panic!("Expected ScriptExecutionFailed, got {:?}", other),
    }
    assert!(client.connection().unwrap().last_error().is_none());
}

#[test]
fn test_tcp_persistent_connection_is_reused() {
    let server = FakeServer::start();
    let driver = TcpDriver::new();
    let endpoint = Endpoint::new("127.0.0.1", server.port);

    {
        let mut client = tcp_client(driver.clone(), server.port);
        client.set_persistent(true);
        client.set("k", "v").unwrap();
        assert!(client.connection().unwrap().is_persistent());
    }
    assert_eq!(driver.idle_connections(&endpoint), 1);

    let mut client = tcp_client(driver.clone(), server.port);
    client.set_persistent(true);
    assert_eq!(client.get("k").unwrap(), "v");
    assert_eq!(driver.idle_connections(&endpoint), 0);
    assert_eq!(server.accepted(), 1);
    drop(client);

    // Transient connections never enter the pool.
    let mut client = tcp_client(driver.clone(), server.port);
    client.get("k").unwrap();
    drop(client);
    assert_eq!(driver.idle_connections(&endpoint), 1);
    assert_eq!(server.accepted(), 2);
}

#[test]
fn test_tcp_refused_exhausts_retries() {
    let port = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let mut client = tcp_client(TcpDriver::new(), port);
    client.set_connect_tries(3).unwrap();

    match client.get("k") {
        Err(ClientError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("Expected RetriesExhausted, got {:?}", other),
    }
}

#[test]
fn test_tcp_unresolvable_host_is_a_fault() {
    let mut client = RedisClient::new(TcpDriver::new());
    client
        .set_host("nonexistent.invalid")
        .and_then(|c| c.set_port(6379))
        .and_then(|c| c.set_connect_tries(3))
        .unwrap();

    assert!(matches!(client.get("k"), Err(ClientError::ConnectFailed(_))));
}
