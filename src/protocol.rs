//! The text-protocol wire engine: turns a logical request (set,
//! get, get-multi, delete, incr/decr, flush_all, stats) into bytes on a
//! checked-out connection and parses the matching response.
//!
//! Every function here checks a connection out, drives one exchange,
//! and lets the `PooledConnection` check itself back in on return
//! (`Drop`/`release`) — a connection an I/O error left in a broken
//! state simply isn't re-added to the available set (see `pool.rs`).

use crate::error::{Error, Result};
use crate::pool::Pool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

const MAX_RELATIVE_EXPTIME_SECS: i64 = 60 * 60 * 24 * 30;

/// Resolve a caller-supplied exptime (seconds) to the value placed on
/// the wire: 0 means "never expire"; values under 30 days are relative
/// (memcached's own convention); anything larger is converted to an
/// absolute Unix timestamp.
pub fn resolve_exptime(exptime_secs: i64) -> i64 {
    if exptime_secs <= 0 {
        return 0;
    }
    if exptime_secs <= MAX_RELATIVE_EXPTIME_SECS {
        return exptime_secs;
    }
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    now + exptime_secs
}

pub struct StoredValue {
    pub bytes: Vec<u8>,
    pub flags: u16,
}

/// `set`/`add`/`replace`. Returns `true` on `STORED`, `false` on
/// `NOT_STORED` (the precondition for `add`/`replace` failed) or
/// `EXISTS` (unused here since this crate never sends a CAS token, kept
/// for forward compatibility with servers that answer it anyway).
pub fn store(pool: &Arc<Pool>, cmd: &str, key: &str, value: &StoredValue, exptime_secs: i64) -> Result<bool> {
    let conn = pool.checkout_key(key, None)?;
    let exptime = resolve_exptime(exptime_secs);
    let header = format!(
        "{} {} {} {} {}\r\n",
        cmd,
        key,
        value.flags,
        exptime,
        value.bytes.len()
    );
    conn.write_bytes(header.as_bytes())?;
    conn.write_bytes(&value.bytes)?;
    conn.write_bytes(b"\r\n")?;
    conn.flush()?;

    let line = conn.read_line()?;
    match line.as_str() {
        "STORED" => Ok(true),
        "NOT_STORED" | "EXISTS" => Ok(false),
        other => Err(Error::Protocol(format!("unexpected response to {}: {}", cmd, other))),
    }
}

/// `get <key>`. `None` on `END` with no preceding `VALUE` line.
pub fn get(pool: &Arc<Pool>, key: &str) -> Result<Option<StoredValue>> {
    let conn = pool.checkout_key(key, None)?;
    conn.write_bytes(format!("get {}\r\n", key).as_bytes())?;
    conn.flush()?;

    let line = conn.read_line()?;
    if line == "END" {
        return Ok(None);
    }
    let (_, flags, len) = parse_value_line(&line)?;
    let mut body = vec![0u8; len];
    conn.read_n(&mut body)?;
    conn.clear_eol()?;
    let end = conn.read_line()?;
    if end != "END" {
        return Err(Error::Protocol(format!("expected END after value, got {}", end)));
    }
    Ok(Some(StoredValue { bytes: body, flags }))
}

/// `get <k1> <k2> ...`, split per-bucket so each host receives exactly
/// one `get` line for the keys it owns, regardless of failover.
pub fn get_multi(pool: &Arc<Pool>, keys: &[String]) -> Result<HashMap<String, StoredValue>> {
    let mut by_host: HashMap<String, Vec<String>> = HashMap::new();
    let config = pool.config();
    for key in keys {
        let hv = crate::hash::hash_key(config.hash_alg, key);
        let host = {
            // Route the same way checkout_key would, without taking a
            // connection yet, so keys that share a bucket share a
            // request line.
            let buckets = pool.bucket_snapshot();
            if buckets.is_empty() {
                return Err(Error::NoServerAvailable);
            }
            let idx = crate::hash::bucket_index(hv, buckets.len());
            buckets[idx].clone()
        };
        by_host.entry(host).or_default().push(key.clone());
    }

    let mut results = HashMap::new();
    for (host, host_keys) in by_host {
        // A failure partway through one host's exchange must not lose
        // the values already read from other hosts, nor stop the
        // remaining hosts from being tried: fetch into a scratch map
        // and only fold it into `results` on success, discarding just
        // this host's contribution on error.
        match get_multi_one_host(pool, &host, &host_keys) {
            Ok(host_results) => results.extend(host_results),
            Err(err) => log::warn!("get_multi: dropping host {} after error: {}", host, err),
        }
    }
    Ok(results)
}

fn get_multi_one_host(
    pool: &Arc<Pool>,
    host: &str,
    host_keys: &[String],
) -> Result<HashMap<String, StoredValue>> {
    let conn = pool.checkout_host(host)?;
    let line = format!("get {}\r\n", host_keys.join(" "));
    conn.write_bytes(line.as_bytes())?;
    conn.flush()?;
    let mut results = HashMap::new();
    loop {
        let line = conn.read_line()?;
        if line == "END" {
            break;
        }
        let (vkey, flags, len) = parse_value_line(&line)?;
        let mut body = vec![0u8; len];
        conn.read_n(&mut body)?;
        conn.clear_eol()?;
        results.insert(vkey, StoredValue { bytes: body, flags });
    }
    Ok(results)
}

fn parse_value_line(line: &str) -> Result<(String, u16, usize)> {
    let mut parts = line.split(' ');
    let tag = parts.next().unwrap_or("");
    if tag != "VALUE" {
        return Err(Error::Protocol(format!("expected VALUE line, got: {}", line)));
    }
    let key = parts
        .next()
        .ok_or_else(|| Error::Protocol("VALUE line missing key".into()))?
        .to_string();
    let flags: u16 = parts
        .next()
        .ok_or_else(|| Error::Protocol("VALUE line missing flags".into()))?
        .parse()
        .map_err(|_| Error::Protocol("VALUE line has non-numeric flags".into()))?;
    let len: usize = parts
        .next()
        .ok_or_else(|| Error::Protocol("VALUE line missing length".into()))?
        .parse()
        .map_err(|_| Error::Protocol("VALUE line has non-numeric length".into()))?;
    Ok((key, flags, len))
}

/// `delete <key>`. `false` on `NOT_FOUND`.
pub fn delete(pool: &Arc<Pool>, key: &str) -> Result<bool> {
    let conn = pool.checkout_key(key, None)?;
    conn.write_bytes(format!("delete {}\r\n", key).as_bytes())?;
    conn.flush()?;
    match conn.read_line()?.as_str() {
        "DELETED" => Ok(true),
        "NOT_FOUND" => Ok(false),
        other => Err(Error::Protocol(format!("unexpected response to delete: {}", other))),
    }
}

/// `incr`/`decr <key> <delta>`. `None` on `NOT_FOUND`.
pub fn incr_decr(pool: &Arc<Pool>, cmd: &str, key: &str, delta: u64) -> Result<Option<u64>> {
    let conn = pool.checkout_key(key, None)?;
    conn.write_bytes(format!("{} {} {}\r\n", cmd, key, delta).as_bytes())?;
    conn.flush()?;
    let line = conn.read_line()?;
    if line == "NOT_FOUND" {
        return Ok(None);
    }
    line.parse::<u64>()
        .map(Some)
        .map_err(|_| Error::Protocol(format!("unexpected response to {}: {}", cmd, line)))
}

/// `flush_all` against every configured host.
pub fn flush_all(pool: &Arc<Pool>) -> Result<()> {
    for host in pool.all_hosts() {
        let conn = pool.checkout_host(&host)?;
        conn.write_bytes(b"flush_all\r\n")?;
        conn.flush()?;
        let line = conn.read_line()?;
        if line != "OK" {
            return Err(Error::Protocol(format!("unexpected response to flush_all on {}: {}", host, line)));
        }
    }
    Ok(())
}

/// `stats`, keyed by host, each value a map of stat name to value.
pub fn stats(pool: &Arc<Pool>) -> Result<HashMap<String, HashMap<String, String>>> {
    let mut out = HashMap::new();
    for host in pool.all_hosts() {
        let conn = pool.checkout_host(&host)?;
        conn.write_bytes(b"stats\r\n")?;
        conn.flush()?;
        let mut host_stats = HashMap::new();
        loop {
            let line = conn.read_line()?;
            if line == "END" {
                break;
            }
            let mut parts = line.splitn(3, ' ');
            match (parts.next(), parts.next(), parts.next()) {
                (Some("STAT"), Some(name), Some(value)) => {
                    host_stats.insert(name.to_string(), value.to_string());
                }
                _ => return Err(Error::Protocol(format!("unexpected stats line: {}", line))),
            }
        }
        out.insert(host, host_stats);
    }
    Ok(out)
}

/// Encode an integer counter the way `incr`/`decr` require: a bare
/// ASCII decimal with no tag byte and no opaque flag, regardless of the
/// client's `primitive_as_string` setting — counters always use this
/// representation since the server parses the stored bytes itself.
pub fn counter_value(n: i64) -> StoredValue {
    StoredValue {
        bytes: n.to_string().into_bytes(),
        flags: 0,
    }
}

pub fn store_counter(pool: &Arc<Pool>, key: &str, value: i64, exptime_secs: i64) -> Result<bool> {
    store(pool, "set", key, &counter_value(value), exptime_secs)
}

pub fn get_counter(pool: &Arc<Pool>, key: &str) -> Result<Option<i64>> {
    match get(pool, key)? {
        None => Ok(None),
        Some(v) => {
            let text = String::from_utf8(v.bytes)
                .map_err(|e| Error::Protocol(format!("counter value is not utf-8: {}", e)))?;
            text.trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| Error::Protocol(format!("counter value is not an integer: {}", text)))
        }
    }
}
