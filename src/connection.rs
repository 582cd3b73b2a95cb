//! A single pooled TCP connection: line-buffered reads, a small write
//! buffer, a timeout-bounded connect, and the read/write primitives the
//! protocol engine builds requests and parses responses on top of.

use crate::error::{Error, Result};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const CONNECT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// One TCP socket to a memcached server, plus the line-buffered reader
/// and write buffer the protocol engine uses to frame requests/responses.
///
/// A `Connection` is owned exclusively by whichever of the pool's
/// available/busy collections currently holds it (see `pool::Pool`); it
/// holds no back-reference to its pool, since Rust's ownership model
/// already makes the pool the sole place a connection can be reached
/// from.
pub struct Connection {
    host: String,
    stream: TcpStream,
    reader: BufReader<TcpStream>,
    write_buf: Vec<u8>,
    connected: bool,
}

impl Connection {
    /// Open a TCP connection to `host` ("host:port"). If `connect_timeout`
    /// is zero, connects with no deadline (blocking connect). Otherwise
    /// the connect runs on a helper thread and is polled every 25ms
    /// until it completes or the deadline elapses.
    pub fn connect(
        host: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
        nagle: bool,
    ) -> Result<Self> {
        let stream = if connect_timeout.is_zero() {
            TcpStream::connect(host)?
        } else {
            Self::connect_with_polling(host, connect_timeout)?
        };

        if !read_timeout.is_zero() {
            stream.set_read_timeout(Some(read_timeout))?;
        }
        stream.set_nodelay(!nagle)?;

        let reader_handle = stream.try_clone()?;
        Ok(Connection {
            host: host.to_string(),
            stream,
            reader: BufReader::new(reader_handle),
            write_buf: Vec::new(),
            connected: true,
        })
    }

    fn connect_with_polling(host: &str, deadline: Duration) -> Result<TcpStream> {
        let addr = host
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::ConnectTimeout(host.to_string()))?;
        let (tx, rx) = mpsc::sync_channel::<std::io::Result<TcpStream>>(1);
        thread::spawn(move || {
            let _ = tx.send(TcpStream::connect(addr));
        });

        let started = Instant::now();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= deadline {
                return Err(Error::ConnectTimeout(host.to_string()));
            }
            let wait = std::cmp::min(CONNECT_POLL_INTERVAL, deadline - elapsed);
            match rx.recv_timeout(wait) {
                Ok(Ok(stream)) => return Ok(stream),
                Ok(Err(err)) => return Err(Error::Io(err)),
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(Error::ConnectTimeout(host.to_string()))
                }
            }
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Append bytes to the write buffer. Call `flush()` to send them.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_buf.extend_from_slice(bytes);
    }

    /// Flush the write buffer to the socket.
    pub fn flush(&mut self) -> Result<()> {
        let result = self.stream.write_all(&self.write_buf);
        self.write_buf.clear();
        match result {
            Ok(()) => Ok(()),
            Err(err) => {
                self.connected = false;
                Err(err.into())
            }
        }
    }

    /// Read a line up to and including CRLF, returning the text with the
    /// trailing CRLF stripped. Fails with `Io` if the socket was already
    /// marked closed on entry.
    pub fn read_line(&mut self) -> Result<String> {
        if !self.connected {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "connection closed",
            )));
        }
        let mut buf = Vec::new();
        let n = match self.reader.read_until(b'\n', &mut buf) {
            Ok(n) => n,
            Err(err) => {
                self.connected = false;
                return Err(err.into());
            }
        };
        if n == 0 {
            self.connected = false;
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed by peer",
            )));
        }
        while buf.last() == Some(&b'\n') || buf.last() == Some(&b'\r') {
            buf.pop();
        }
        String::from_utf8(buf).map_err(|e| Error::Protocol(format!("non-utf8 line: {}", e)))
    }

    /// Read exactly `buf.len()` bytes, looping over short reads.
    pub fn read_n(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.reader.read_exact(buf) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.connected = false;
                Err(err.into())
            }
        }
    }

    /// Drain the stream until (and including) the next CRLF, discarding
    /// the data. Used to consume the trailing CRLF after a `VALUE` body.
    pub fn clear_eol(&mut self) -> Result<()> {
        self.read_line().map(|_| ())
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Close the reader, writer and socket, in that order, collecting the
    /// first error encountered. After this the connection is permanently
    /// unusable.
    pub fn true_close(&mut self) -> Result<()> {
        self.connected = false;
        let result = self.stream.shutdown(Shutdown::Both);
        match result {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
