use crate::config::{HashAlg, ServerSpec};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Expand a weighted server list into the bucket vector: server `S`
/// appears `weight(S)` times, contiguously, in configuration order.
pub fn expand_buckets(servers: &[ServerSpec]) -> Vec<String> {
    let mut buckets = Vec::new();
    for server in servers {
        for _ in 0..server.weight {
            buckets.push(server.host.clone());
        }
    }
    buckets
}

/// Rust's standard string hash. Stable within one process, not portable
/// across processes or languages — this is the NATIVE algorithm's whole
/// contract: fast, in-process only, no cross-language compatibility.
pub fn native_hash(key: &str) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as i32
}

/// `h = 0; for each UTF-16 code unit c: h = h*33 + c`, wrapping on
/// overflow like the native integer arithmetic this mirrors.
pub fn old_compat_hash(key: &str) -> i32 {
    let mut h: i32 = 0;
    for unit in key.encode_utf16() {
        h = h.wrapping_mul(33).wrapping_add(unit as i32);
    }
    h
}

/// CRC32 of the UTF-8 bytes, folded into the low 15 bits of the high
/// half-word: `(crc >> 16) & 0x7fff`.
pub fn new_compat_hash(key: &str) -> i32 {
    let crc = crc32fast::hash(key.as_bytes());
    ((crc >> 16) & 0x7fff) as i32
}

pub fn hash_key(alg: HashAlg, key: &str) -> i32 {
    match alg {
        HashAlg::Native => native_hash(key),
        HashAlg::OldCompat => old_compat_hash(key),
        HashAlg::NewCompat => new_compat_hash(key),
    }
}

/// `idx = ((hv mod n) + n) mod n`, always non-negative for `n > 0`.
pub fn bucket_index(hv: i32, n: usize) -> usize {
    debug_assert!(n > 0);
    let n = n as i64;
    let hv = hv as i64;
    (((hv % n) + n) % n) as usize
}

/// The key presented to the hash function on failover retry `t`:
/// `"" + t + key`, i.e. the retry counter followed by the original key.
pub fn salted_key(retry: u32, key: &str) -> String {
    format!("{}{}", retry, key)
}
