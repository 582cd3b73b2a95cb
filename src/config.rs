use crate::error::{Error, Result};
use std::time::Duration;

/// Which key→int32 hash function the pool uses to pick a bucket.
///
/// `Native` is fast and stable within one process but not portable across
/// languages or process restarts; the `*Compat` variants exist so a Rust
/// client can agree on bucket placement with clients written in other
/// languages that implement the same two algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Native,
    OldCompat,
    NewCompat,
}

/// A single memcached server and its relative weight in the bucket vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub host: String,
    pub weight: u32,
}

impl ServerSpec {
    pub fn new(host: impl Into<String>, weight: u32) -> Self {
        Self {
            host: host.into(),
            weight,
        }
    }
}

impl From<&str> for ServerSpec {
    fn from(host: &str) -> Self {
        ServerSpec::new(host, 1)
    }
}

impl From<String> for ServerSpec {
    fn from(host: String) -> Self {
        ServerSpec::new(host, 1)
    }
}

/// Pool and protocol configuration. All fields carry sensible defaults;
/// use the `with_*` builders to override them before calling
/// `Pool::initialize`.
#[derive(Debug, Clone)]
pub struct Config {
    pub servers: Vec<ServerSpec>,
    pub init_conn: usize,
    pub min_conn: usize,
    pub max_conn: usize,
    pub max_idle: Duration,
    pub max_busy: Duration,
    pub maint_sleep: Duration,
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    pub failover: bool,
    pub nagle: bool,
    pub hash_alg: HashAlg,
    pub compress_enable: bool,
    pub compress_threshold_bytes: usize,
    pub primitive_as_string: bool,
    pub default_text_encoding: &'static str,
}

/// `poolMultiplier` from §3: derives `maxCreate` and the shrink-batch size
/// in `selfMaint`.
pub const POOL_MULTIPLIER: usize = 4;

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            init_conn: 3,
            min_conn: 3,
            max_conn: 10,
            max_idle: Duration::from_secs(3 * 60),
            max_busy: Duration::from_secs(5 * 60),
            maint_sleep: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_millis(0),
            failover: true,
            nagle: true,
            hash_alg: HashAlg::Native,
            compress_enable: false,
            compress_threshold_bytes: 30 * 1024,
            primitive_as_string: false,
            default_text_encoding: "UTF-8",
        }
    }
}

impl Config {
    pub fn new(servers: Vec<ServerSpec>) -> Self {
        Self {
            servers,
            ..Default::default()
        }
    }

    pub fn with_init_conn(mut self, n: usize) -> Self {
        self.init_conn = n;
        self
    }

    pub fn with_min_conn(mut self, n: usize) -> Self {
        self.min_conn = n;
        self
    }

    pub fn with_max_conn(mut self, n: usize) -> Self {
        self.max_conn = n;
        self
    }

    pub fn with_max_idle(mut self, d: Duration) -> Self {
        self.max_idle = d;
        self
    }

    pub fn with_max_busy(mut self, d: Duration) -> Self {
        self.max_busy = d;
        self
    }

    pub fn with_maint_sleep(mut self, d: Duration) -> Self {
        self.maint_sleep = d;
        self
    }

    pub fn with_read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self
    }

    pub fn with_connect_timeout(mut self, d: Duration) -> Self {
        self.connect_timeout = d;
        self
    }

    pub fn with_failover(mut self, on: bool) -> Self {
        self.failover = on;
        self
    }

    pub fn with_nagle(mut self, on: bool) -> Self {
        self.nagle = on;
        self
    }

    pub fn with_hash_alg(mut self, alg: HashAlg) -> Self {
        self.hash_alg = alg;
        self
    }

    pub fn with_compress_enable(mut self, on: bool) -> Self {
        self.compress_enable = on;
        self
    }

    pub fn with_compress_threshold_bytes(mut self, n: usize) -> Self {
        self.compress_threshold_bytes = n;
        self
    }

    pub fn with_primitive_as_string(mut self, on: bool) -> Self {
        self.primitive_as_string = on;
        self
    }

    /// `max(1, floor(minConn / poolMultiplier))`, the cap on how many
    /// connections a single empty-pool checkout batch may create.
    pub fn max_create(&self) -> usize {
        std::cmp::max(1, self.min_conn / POOL_MULTIPLIER)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::Config("no servers configured".into()));
        }
        if self.servers.iter().any(|s| s.weight == 0) {
            return Err(Error::Config("server weight must be >= 1".into()));
        }
        Ok(())
    }
}
