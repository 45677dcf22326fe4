//! Driver abstraction and implementations.
//!
//! The client only talks to Redis through these traits. Ships an in-memory
//! driver and a blocking TCP driver speaking RESP2.

pub mod traits;
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "tcp")]
pub mod tcp;

pub use traits::*;

#[cfg(feature = "memory")]
pub use memory::{MemoryConnection, MemoryDriver};
#[cfg(feature = "tcp")]
pub use tcp::{TcpConnection, TcpDriver};
