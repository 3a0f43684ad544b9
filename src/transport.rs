//! Pluggable transport hook.
//!
//! The core never implements ciphers or certificate validation itself.
//! It sees only three operations — handshake progression, read, write
//! — through this trait, and falls back to talking to the raw socket
//! directly when no transport is attached (`Connection::transport` is
//! `None`), so enabling the `tls` feature costs nothing on connections
//! that don't use it.

use std::io;

use mio::net::TcpStream;

/// A pluggable capability that intercepts reads, writes, and handshake
/// progression on a connection.
pub trait Transport: std::fmt::Debug + Send {
    /// Drive the handshake forward by one non-blocking step.
    ///
    /// Returns `Ok(true)` once the handshake has completed, `Ok(false)`
    /// if it would block and should be retried on the next readiness
    /// event, or `Err` on a hard failure.
    fn try_handshake(&mut self, stream: &mut TcpStream) -> io::Result<bool>;

    /// Read decrypted application bytes from `stream` into `buf`.
    fn read(&mut self, stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize>;

    /// Write application bytes from `buf` to `stream`, encrypting them
    /// first if applicable.
    fn write(&mut self, stream: &mut TcpStream, buf: &[u8]) -> io::Result<usize>;
}

/// The identity transport: handshake is trivially complete, reads and
/// writes pass straight through to the socket. Connections created
/// without `use_tls` never allocate one of these — the core's read and
/// write paths call `TcpStream::read`/`write` directly — but it is
/// available for callers that want a uniform `Transport` code path in
/// tests or custom integrations.
#[derive(Debug, Default)]
pub struct PlaintextTransport;

impl Transport for PlaintextTransport {
    fn try_handshake(&mut self, _stream: &mut TcpStream) -> io::Result<bool> {
        Ok(true)
    }

    fn read(&mut self, stream: &mut TcpStream, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        stream.read(buf)
    }

    fn write(&mut self, stream: &mut TcpStream, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        stream.write(buf)
    }
}

#[cfg(feature = "tls")]
pub use tls::{TlsRole, TlsTransport};

#[cfg(feature = "tls")]
mod tls {
    use super::*;
    use std::io::{Read, Write};
    use std::sync::Arc;

    /// Which side of the handshake a [`TlsTransport`] plays.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum TlsRole {
        /// The connection initiated the TCP connect and drives a
        /// client handshake.
        Client,
    }

    /// A `rustls`-backed [`Transport`].
    ///
    /// Only the client role is implemented: `Server::connect` is the
    /// one public entry point that takes a `use_tls` flag; attaching
    /// TLS to accepted connections is left to integrators who need
    /// server certificates, via their own `Transport` implementation.
    #[derive(Debug)]
    pub struct TlsTransport {
        conn: rustls::ClientConnection,
        role: TlsRole,
    }

    impl TlsTransport {
        /// Build a client-side TLS transport for `server_name`, using
        /// the platform's webpki root store.
        pub fn client(server_name: &str) -> std::io::Result<Self> {
            let mut roots = rustls::RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            let config = rustls::ClientConfig::builder()
                .with_safe_defaults()
                .with_root_certificates(roots)
                .with_no_client_auth();

            let name = rustls::ServerName::try_from(server_name)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

            let conn = rustls::ClientConnection::new(Arc::new(config), name)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

            Ok(Self { conn, role: TlsRole::Client })
        }
    }

    impl Transport for TlsTransport {
        fn try_handshake(&mut self, stream: &mut TcpStream) -> std::io::Result<bool> {
            if !self.conn.is_handshaking() {
                return Ok(true);
            }

            if self.conn.wants_write() {
                match self.conn.write_tls(stream) {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                    Err(e) => return Err(e),
                }
            }

            if self.conn.wants_read() {
                match self.conn.read_tls(stream) {
                    Ok(0) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "peer closed during TLS handshake",
                        ))
                    }
                    Ok(_) => {
                        self.conn
                            .process_new_packets()
                            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                    Err(e) => return Err(e),
                }
            }

            Ok(!self.conn.is_handshaking())
        }

        fn read(&mut self, stream: &mut TcpStream, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.conn.wants_read() {
                match self.conn.read_tls(stream) {
                    Ok(0) => return Ok(0),
                    Ok(_) => {
                        self.conn
                            .process_new_packets()
                            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
            }
            let mut reader = self.conn.reader();
            match reader.read(buf) {
                Ok(n) => Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
                Err(e) => Err(e),
            }
        }

        fn write(&mut self, stream: &mut TcpStream, buf: &[u8]) -> std::io::Result<usize> {
            let n = self.conn.writer().write(buf)?;
            while self.conn.wants_write() {
                match self.conn.write_tls(stream) {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            Ok(n)
        }
    }

    impl TlsTransport {
        /// Which role this transport is playing in the handshake.
        pub fn role(&self) -> TlsRole {
            self.role
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_handshake_is_immediate() {
        let mut t = PlaintextTransport;
        // No socket needed: handshake never touches it for plaintext.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let std_stream = std::net::TcpStream::connect(addr).unwrap();
        std_stream.set_nonblocking(true).unwrap();
        let mut stream = TcpStream::from_std(std_stream);
        assert!(t.try_handshake(&mut stream).unwrap());
    }
}
