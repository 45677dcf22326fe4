pub mod cli;
pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod telemetry;

pub use client::{ConnectionConfig, RedisClient};
pub use driver::{Connection, Driver, Endpoint};
#[cfg(feature = "memory")]
pub use driver::MemoryDriver;
#[cfg(feature = "tcp")]
pub use driver::TcpDriver;
pub use error::{ClientError, Result, TransportFault};
pub use protocol::{RespParser, RespValue};
