//! The public façade (§4.F): a cheaply `Clone`-able handle over a named
//! pool, with the encode/decode and compression policy a caller's
//! `Config` selects layered on top of the raw protocol engine.

use crate::codec::{self, DecodedPayload, Value};
use crate::config::Config;
use crate::error::Result;
use crate::pool::Pool;
use crate::protocol::{self, StoredValue};
use crate::registry;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A memcached client bound to one named, shared pool. Cloning a
/// `Client` is cheap — it only clones an `Arc<Pool>` and a small,
/// `Copy`-ish set of encode/decode settings — so a single client can be
/// handed out to many threads.
#[derive(Clone)]
pub struct Client {
    pool: Arc<Pool>,
    compress_enable: bool,
    compress_threshold_bytes: usize,
    primitive_as_string: bool,
}

impl Client {
    /// Build a client over the named pool, creating it from `config` the
    /// first time this process asks for `pool_name`. Subsequent calls
    /// with the same name share the existing pool and ignore `config`.
    pub fn new(pool_name: &str, config: Config) -> Self {
        let compress_enable = config.compress_enable;
        let compress_threshold_bytes = config.compress_threshold_bytes;
        let primitive_as_string = config.primitive_as_string;
        let pool = registry::get_instance(pool_name, move || config);
        Client {
            pool,
            compress_enable,
            compress_threshold_bytes,
            primitive_as_string,
        }
    }

    pub fn initialize(&self) -> Result<()> {
        self.pool.initialize()
    }

    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.is_initialized()
    }

    fn encode_for_wire(&self, value: Value) -> Result<StoredValue> {
        let raw = if self.primitive_as_string {
            primitive_as_string(&value).into_bytes()
        } else {
            codec::encode_native(&value)
        };
        let (bytes, compress_flag) =
            codec::maybe_compress(raw, self.compress_enable, self.compress_threshold_bytes)?;
        Ok(StoredValue {
            bytes,
            flags: compress_flag,
        })
    }

    fn encode_opaque_for_wire<T: Serialize + ?Sized>(&self, value: &T) -> Result<StoredValue> {
        let raw = codec::encode_opaque(value)?;
        let (bytes, compress_flag) =
            codec::maybe_compress(raw, self.compress_enable, self.compress_threshold_bytes)?;
        Ok(StoredValue {
            bytes,
            flags: codec::FLAG_OPAQUE | compress_flag,
        })
    }

    fn decode_from_wire(&self, raw: StoredValue) -> Result<DecodedPayload> {
        codec::decode_payload(&raw.bytes, raw.flags)
    }

    /// Store one of the native primitive shapes under `key`. `exptime_secs`
    /// follows §4.E's resolution rules (0 = never, < 30 days = relative,
    /// otherwise absolute).
    pub fn set_value(&self, key: &str, value: impl Into<Value>, exptime_secs: i64) -> Result<bool> {
        let wire = self.encode_for_wire(value.into())?;
        protocol::store(&self.pool, "set", key, &wire, exptime_secs)
    }

    pub fn add_value(&self, key: &str, value: impl Into<Value>, exptime_secs: i64) -> Result<bool> {
        let wire = self.encode_for_wire(value.into())?;
        protocol::store(&self.pool, "add", key, &wire, exptime_secs)
    }

    pub fn replace_value(&self, key: &str, value: impl Into<Value>, exptime_secs: i64) -> Result<bool> {
        let wire = self.encode_for_wire(value.into())?;
        protocol::store(&self.pool, "replace", key, &wire, exptime_secs)
    }

    /// Fetch `key` and decode it as one of the native primitive shapes.
    pub fn get_value(&self, key: &str) -> Result<Option<Value>> {
        match protocol::get(&self.pool, key)? {
            None => Ok(None),
            Some(raw) => {
                let decoded = self.decode_from_wire(raw)?;
                if decoded.is_opaque() {
                    return Err(crate::error::Error::Codec(
                        "value was stored opaquely; use get::<T>() to read it".into(),
                    ));
                }
                if self.primitive_as_string {
                    Ok(Some(Value::Str(decoded.as_string()?)))
                } else {
                    Ok(Some(decoded.as_native()?))
                }
            }
        }
    }

    /// Store an arbitrary `Serialize` value, opaque-encoded with
    /// `bincode`.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, exptime_secs: i64) -> Result<bool> {
        let wire = self.encode_opaque_for_wire(value)?;
        protocol::store(&self.pool, "set", key, &wire, exptime_secs)
    }

    pub fn add<T: Serialize + ?Sized>(&self, key: &str, value: &T, exptime_secs: i64) -> Result<bool> {
        let wire = self.encode_opaque_for_wire(value)?;
        protocol::store(&self.pool, "add", key, &wire, exptime_secs)
    }

    pub fn replace<T: Serialize + ?Sized>(&self, key: &str, value: &T, exptime_secs: i64) -> Result<bool> {
        let wire = self.encode_opaque_for_wire(value)?;
        protocol::store(&self.pool, "replace", key, &wire, exptime_secs)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match protocol::get(&self.pool, key)? {
            None => Ok(None),
            Some(raw) => {
                let decoded = self.decode_from_wire(raw)?;
                Ok(Some(decoded.deserialize()?))
            }
        }
    }

    /// Fetch several keys at once, routed so each server receives a
    /// single batched `get`. Keys absent on the server are simply
    /// missing from the returned map.
    pub fn get_multi_value(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let raw = protocol::get_multi(&self.pool, keys)?;
        let mut out = HashMap::with_capacity(raw.len());
        for (key, value) in raw {
            let decoded = self.decode_from_wire(value)?;
            let parsed = if self.primitive_as_string {
                Value::Str(decoded.as_string()?)
            } else {
                decoded.as_native()?
            };
            out.insert(key, parsed);
        }
        Ok(out)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        protocol::delete(&self.pool, key)
    }

    pub fn incr(&self, key: &str, delta: u64) -> Result<Option<u64>> {
        protocol::incr_decr(&self.pool, "incr", key, delta)
    }

    pub fn decr(&self, key: &str, delta: u64) -> Result<Option<u64>> {
        protocol::incr_decr(&self.pool, "decr", key, delta)
    }

    /// Store an integer counter. Always encoded as a bare decimal
    /// string regardless of this client's `primitive_as_string`
    /// setting, since `incr`/`decr` require the server to parse the
    /// stored bytes as a number (§9).
    pub fn store_counter(&self, key: &str, value: i64, exptime_secs: i64) -> Result<bool> {
        protocol::store_counter(&self.pool, key, value, exptime_secs)
    }

    pub fn get_counter(&self, key: &str) -> Result<Option<i64>> {
        protocol::get_counter(&self.pool, key)
    }

    pub fn flush_all(&self) -> Result<()> {
        protocol::flush_all(&self.pool)
    }

    pub fn stats(&self) -> Result<HashMap<String, HashMap<String, String>>> {
        protocol::stats(&self.pool)
    }
}

/// The decimal/text rendering used when `primitive_as_string` is on:
/// the same value with no tag byte and no flags, so another client (or
/// `incr`/`decr`) can read it as plain text.
fn primitive_as_string(value: &Value) -> String {
    match value {
        Value::Byte(b) => b.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::I32(n) => n.to_string(),
        Value::I64(n) => n.to_string(),
        Value::Char(c) => char::from_u32(*c as u32).map(|c| c.to_string()).unwrap_or_default(),
        Value::Str(s) | Value::StringBuilder(s) => s.clone(),
        Value::F32(f) => f.to_string(),
        Value::I16(n) => n.to_string(),
        Value::F64(f) => f.to_string(),
        Value::Date(ticks) => ticks.to_string(),
    }
}

impl From<u8> for Value {
    fn from(v: u8) -> Self {
        Value::Byte(v)
    }
}
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}
impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::I16(v)
    }
}
impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerSpec;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    fn scripted_server(responses: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut writer = stream;
            for resp in responses {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap_or(0) == 0 {
                    break;
                }
                writer.write_all(resp.as_bytes()).unwrap();
            }
        });
        addr
    }

    #[test]
    fn set_then_get_round_trips_a_native_value() {
        let addr = scripted_server(vec!["STORED\r\n", "VALUE k 0 5\r\nhello\r\nEND\r\n"]);
        let config = Config::new(vec![ServerSpec::new(addr, 1)])
            .with_maint_sleep(std::time::Duration::ZERO)
            .with_primitive_as_string(true);
        let client = Client::new(&format!("test-client-{}", line!()), config);
        client.initialize().unwrap();

        assert!(client.set_value("k", "hello", 0).unwrap());
        let value = client.get_value("k").unwrap();
        assert_eq!(value, Some(Value::Str("hello".into())));
    }

    #[test]
    fn get_returns_none_on_miss() {
        let addr = scripted_server(vec!["END\r\n"]);
        let config = Config::new(vec![ServerSpec::new(addr, 1)]).with_maint_sleep(std::time::Duration::ZERO);
        let client = Client::new(&format!("test-client-{}", line!()), config);
        client.initialize().unwrap();

        assert_eq!(client.get_value("missing").unwrap(), None);
    }

    #[test]
    fn delete_reports_not_found() {
        let addr = scripted_server(vec!["NOT_FOUND\r\n"]);
        let config = Config::new(vec![ServerSpec::new(addr, 1)]).with_maint_sleep(std::time::Duration::ZERO);
        let client = Client::new(&format!("test-client-{}", line!()), config);
        client.initialize().unwrap();

        assert!(!client.delete("k").unwrap());
    }
}
