//! A minimal, stateful mock memcached server used by the integration
//! tests in this directory. It understands enough of the ASCII text
//! protocol (`set`/`add`/`replace`/`get`/`delete`/`incr`/`decr`/
//! `flush_all`) to drive the tests without a real memcached binary or
//! Docker daemon.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

type Store = Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>;

pub struct MockServer {
    pub addr: String,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Start a stateful mock memcached server on an OS-assigned port. A
    /// pool routinely holds several concurrent connections open to the
    /// same host, so each accepted connection is served on its own
    /// thread against a shared store rather than blocking the accept
    /// loop on one connection at a time.
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_worker = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let store: Store = Arc::new(Mutex::new(HashMap::new()));
            let mut workers = Vec::new();
            loop {
                if stop_worker.load(Ordering::SeqCst) {
                    break;
                }
                match listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false).unwrap();
                        let store = Arc::clone(&store);
                        workers.push(thread::spawn(move || serve_connection(stream, &store)));
                    }
                    Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(std::time::Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
            for worker in workers {
                let _ = worker.join();
            }
        });

        MockServer {
            addr,
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn serve_connection(stream: TcpStream, store: &Store) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut writer = stream;
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {}
            Err(_) => return,
        }
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.split(' ');
        let cmd = parts.next().unwrap_or("");
        match cmd {
            "set" | "add" | "replace" => {
                let key = parts.next().unwrap_or("").to_string();
                let flags: u16 = parts.next().unwrap_or("0").parse().unwrap_or(0);
                let _exptime = parts.next();
                let len: usize = parts.next().unwrap_or("0").parse().unwrap_or(0);
                let mut body = vec![0u8; len];
                if reader.read_exact(&mut body).is_err() {
                    return;
                }
                let mut crlf = [0u8; 2];
                if reader.read_exact(&mut crlf).is_err() {
                    return;
                }

                let mut guard = store.lock().unwrap();
                let exists = guard.contains_key(&key);
                let ok = match cmd {
                    "add" => !exists,
                    "replace" => exists,
                    _ => true,
                };
                if ok {
                    guard.insert(key, (flags, body));
                    drop(guard);
                    if writer.write_all(b"STORED\r\n").is_err() {
                        return;
                    }
                } else {
                    drop(guard);
                    if writer.write_all(b"NOT_STORED\r\n").is_err() {
                        return;
                    }
                }
            }
            "get" => {
                let keys: Vec<&str> = parts.collect();
                let guard = store.lock().unwrap();
                for key in keys {
                    if let Some((flags, body)) = guard.get(key) {
                        let header = format!("VALUE {} {} {}\r\n", key, flags, body.len());
                        if writer.write_all(header.as_bytes()).is_err() {
                            return;
                        }
                        if writer.write_all(body).is_err() {
                            return;
                        }
                        if writer.write_all(b"\r\n").is_err() {
                            return;
                        }
                    }
                }
                drop(guard);
                if writer.write_all(b"END\r\n").is_err() {
                    return;
                }
            }
            "delete" => {
                let key = parts.next().unwrap_or("");
                let removed = store.lock().unwrap().remove(key).is_some();
                let resp: &[u8] = if removed { b"DELETED\r\n" } else { b"NOT_FOUND\r\n" };
                if writer.write_all(resp).is_err() {
                    return;
                }
            }
            "incr" | "decr" => {
                let key = parts.next().unwrap_or("").to_string();
                let delta: i64 = parts.next().unwrap_or("0").parse().unwrap_or(0);
                let mut guard = store.lock().unwrap();
                match guard.get(&key) {
                    None => {
                        drop(guard);
                        if writer.write_all(b"NOT_FOUND\r\n").is_err() {
                            return;
                        }
                    }
                    Some((flags, body)) => {
                        let current: i64 =
                            String::from_utf8_lossy(body).trim().parse().unwrap_or(0);
                        let updated = if cmd == "incr" {
                            current + delta
                        } else {
                            (current - delta).max(0)
                        };
                        let flags = *flags;
                        guard.insert(key, (flags, updated.to_string().into_bytes()));
                        drop(guard);
                        let resp = format!("{}\r\n", updated);
                        if writer.write_all(resp.as_bytes()).is_err() {
                            return;
                        }
                    }
                }
            }
            "flush_all" => {
                store.lock().unwrap().clear();
                if writer.write_all(b"OK\r\n").is_err() {
                    return;
                }
            }
            "stats" => {
                let count = store.lock().unwrap().len();
                let body = format!("STAT curr_items {}\r\nEND\r\n", count);
                if writer.write_all(body.as_bytes()).is_err() {
                    return;
                }
            }
            "" => return,
            other => {
                let resp = format!("ERROR unknown command {}\r\n", other);
                if writer.write_all(resp.as_bytes()).is_err() {
                    return;
                }
            }
        }
    }
}
