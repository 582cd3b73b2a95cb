//! A pooled client for the memcached text protocol.
//!
//! `Client` wraps a per-process, named [`pool::Pool`] of blocking TCP
//! connections spread across a weighted set of servers (§4.D). Keys are
//! routed to servers with one of three interchangeable hash functions
//! (§4.B) and values cross the wire either through a small tagged
//! native encoding for common primitive shapes or, for everything else,
//! an opaque `bincode` blob — both optionally gzip-compressed above a
//! configurable size threshold (§4.A).
//!
//! ```no_run
//! use mcpool::{Client, Config, ServerSpec};
//!
//! let config = Config::new(vec![ServerSpec::new("127.0.0.1:11211", 1)]);
//! let client = Client::new("default", config);
//! client.initialize()?;
//! client.set_value("greeting", "hello", 0)?;
//! let value = client.get_value("greeting")?;
//! # Ok::<(), mcpool::Error>(())
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod hash;
pub mod pool;
pub mod protocol;
pub mod registry;

pub use client::Client;
pub use codec::Value;
pub use config::{Config, HashAlg, ServerSpec};
pub use error::{Error, Result};
pub use pool::Pool;
