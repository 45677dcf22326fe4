//! Redis Serialization Protocol (RESP2/RESP3) codec used by the TCP driver.

pub mod resp;

pub use resp::*;
