use crate::client::RedisClient;
use crate::driver::Driver;
use crate::error::Result;
use crate::protocol::RespValue;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "coral-cli")]
#[command(about = "Run a single Redis command through the coral client")]
#[command(version)]
pub struct Cli {
    /// Redis host
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Redis port
    #[arg(short, long)]
    pub port: Option<i64>,

    /// Connect timeout in seconds (0 disables it)
    #[arg(short, long)]
    pub timeout: Option<f64>,

    /// Connect attempts before giving up
    #[arg(long)]
    pub tries: Option<i64>,

    /// Use a persistent connection
    #[arg(long, overrides_with = "no_persistent")]
    pub persistent: bool,

    /// Use a transient connection even if the file or environment asks for
    /// a persistent one
    #[arg(long, overrides_with = "persistent")]
    pub no_persistent: bool,

    /// Configuration file path (JSON format)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Increment a counter
    Incr {
        key: String,
        /// Amount to add; values of 1 or less add one
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        by: i64,
    },
    /// Read a string value
    Get { key: String },
    /// Write a string value
    Set {
        key: String,
        value: String,
        /// Expiry in milliseconds (0 = none)
        #[arg(long, default_value_t = 0)]
        ttl: u64,
    },
    /// Write a value only if the key is absent
    Setnx { key: String, value: String },
    /// Set or clear one bit
    Setbit {
        key: String,
        offset: u32,
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        bit: u8,
    },
    /// Run a cached script by SHA1 digest
    Evalsha { sha: String, args: Vec<String> },
    /// Add members to a set
    Sadd {
        key: String,
        #[arg(required = true)]
        members: Vec<String>,
    },
    /// List the members of a set
    Smembers { key: String },
    /// Store the difference of sets
    Sdiffstore {
        destination: String,
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Persistence chosen on the command line, if any. The last of
    /// `--persistent` and `--no-persistent` wins.
    pub fn persistent_override(&self) -> Option<bool> {
        match (self.persistent, self.no_persistent) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }

    /// Log filter selected by the verbosity flags.
    pub fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }
}

impl Command {
    /// Run the command and render its result for the terminal.
    pub fn execute<D: Driver>(&self, client: &mut RedisClient<D>) -> Result<String> {
        let output = match self {
            Command::Incr { key, by } => client.incr_by(key, *by)?.to_string(),
            Command::Get { key } => client.get(key)?,
            Command::Set { key, value, ttl } => {
                client.set_with_ttl(key, value, *ttl)?;
                "OK".to_string()
            }
            Command::Setnx { key, value } => u8::from(client.set_if_absent(key, value)?).to_string(),
            Command::Setbit { key, offset, bit } => client.set_bit(key, *offset, *bit != 0)?.to_string(),
            Command::Evalsha { sha, args } => render(&client.eval_sha(sha, args)?),
            Command::Sadd { key, members } => client.sadd(key, members)?.to_string(),
            Command::Smembers { key } => client.smembers(key)?.join("\n"),
            Command::Sdiffstore { destination, keys } => client.sdiffstore(destination, keys)?.to_string(),
        };
        Ok(output)
    }
}

/// Plain text form of a reply.
pub fn render(value: &RespValue) -> String {
    match value {
        RespValue::SimpleString(s) | RespValue::BulkString(Some(s)) => s.clone(),
        RespValue::Error(e) => format!("(error) {}", e),
        RespValue::Integer(i) => i.to_string(),
        RespValue::Double(d) => d.to_string(),
        RespValue::Boolean(b) => b.to_string(),
        RespValue::BulkString(None) | RespValue::Array(None) | RespValue::Null => "(nil)".to_string(),
        RespValue::Array(Some(items)) | RespValue::Set(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}) {}", i + 1, render(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        RespValue::Map(pairs) => pairs
            .iter()
            .map(|(k, v)| format!("{} => {}", render(k), render(v)))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}
