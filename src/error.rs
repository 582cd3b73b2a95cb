use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::io;

/// All errors that can occur while talking to a memcached cluster.
///
/// `Io` and `ConnectTimeout` destroy the connection that produced them;
/// `DeadHost`/`Config` are raised before any socket I/O is attempted. A
/// missing key or a failed `add`/`replace` precondition is not an error
/// at all: the client methods return `None`/`false`/`-1` for those, per
/// the protocol's own `NOT_FOUND`/`NOT_STORED` responses.
#[derive(Debug)]
pub enum Error {
    /// Invalid or missing configuration (e.g. an empty server list).
    Config(String),
    /// The target host is in its backoff window; no attempt was made.
    DeadHost(String),
    /// `connect()` did not complete within `connectTimeoutMs`.
    ConnectTimeout(String),
    /// A read/write/close failed on a live socket.
    Io(io::Error),
    /// The server sent a response line the protocol engine didn't expect.
    Protocol(String),
    /// Encoding, decoding or (de)compression of a value failed.
    Codec(String),
    /// The pool has no server reachable for this key's bucket.
    NoServerAvailable,
    /// The connection pool has not been initialized, or was already shut
    /// down.
    NotInitialized,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Self::Codec(format!("bincode: {}", err))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Error::Config(msg) => write!(f, "config error: {}", msg),
            Error::DeadHost(host) => write!(f, "dead host: {}", host),
            Error::ConnectTimeout(host) => write!(f, "connect timeout: {}", host),
            Error::Io(err) => write!(f, "io error: {}", err),
            Error::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Error::Codec(msg) => write!(f, "codec error: {}", msg),
            Error::NoServerAvailable => write!(f, "no server available for key"),
            Error::NotInitialized => write!(f, "pool is not initialized"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
