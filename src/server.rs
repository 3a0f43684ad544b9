//! The `Server`: owns the listener, the active-connection arena, and
//! the user's callback. Lifecycle and the two connection-creating
//! operations (`bind_to`, `connect`) live here; the poll loop itself —
//! the hard part — lives in `reactor.rs` as further `impl Server`
//! methods.

use std::any::Any;
use std::collections::VecDeque;
use std::net::ToSocketAddrs;
use std::time::Duration;

use mio::net::TcpStream;
use mio::{Interest, Poll, Token};
use slotmap::SlotMap;
use tracing::{debug, warn};

use crate::addr::{self, parse_endpoint};
use crate::conn::{ConnFlags, ConnId, Connection};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::event::Callback;
use crate::transport::Transport;

/// Reserved token for the listening socket; connection tokens are
/// derived from `ConnId`'s slotmap `KeyData`, which never collides
/// with this value (slotmap keys are always smaller than
/// `usize::MAX`'s sentinel use here).
pub(crate) const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Owns a listening socket, the set of active connections, and the
/// user callback that is driven by [`Server::poll`].
///
/// A `Server` is strictly single-threaded: `poll`, `connect`, and
/// `Connection::send` must all be called from the same thread (or
/// externally serialized by the embedder). There is no internal lock.
pub struct Server {
    pub(crate) listener: Option<mio::net::TcpListener>,
    pub(crate) poll: Poll,
    pub(crate) events: mio::Events,
    pub(crate) conns: SlotMap<ConnId, Connection>,
    pub(crate) active: VecDeque<ConnId>,
    pub(crate) callback: Callback,
    pub(crate) user_data: Option<Box<dyn Any + Send>>,
    pub(crate) config: Config,
}

impl Server {
    /// Create a `Server` with no listener bound yet. Call
    /// [`Server::bind_to`] to start accepting connections.
    pub fn new(
        user_data: Option<Box<dyn Any + Send>>,
        callback: Callback,
        config: Config,
    ) -> Result<Self> {
        let poll = Poll::new().map_err(Error::Io)?;
        Ok(Self {
            listener: None,
            poll,
            events: mio::Events::with_capacity(1024),
            conns: SlotMap::with_key(),
            active: VecDeque::new(),
            callback,
            user_data,
            config,
        })
    }

    /// Parse `addr_str` per the endpoint grammar, open a listener, and
    /// register it with the reactor. Returns the port actually bound
    /// (host byte order), or `0` on any failure (bad grammar, bind
    /// failure, or registration failure).
    pub fn bind_to(&mut self, addr_str: &str) -> u16 {
        let Some(sock_addr) = parse_endpoint(addr_str) else {
            warn!(addr = addr_str, "bind_to: invalid endpoint grammar");
            return 0;
        };

        let mut listener = match addr::open_listener(sock_addr, self.config.listen_backlog) {
            Ok(l) => l,
            Err(e) => {
                warn!(addr = addr_str, error = %e, "bind_to: failed to open listener");
                return 0;
            }
        };

        if let Err(e) = self
            .poll
            .registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
        {
            warn!(error = %e, "bind_to: failed to register listener");
            return 0;
        }

        let port = listener.local_addr().map(|a| a.port()).unwrap_or(0);
        self.listener = Some(listener);
        debug!(port, "bind_to: listening");
        port
    }

    /// Resolve `host`, initiate a non-blocking outbound connect, and
    /// link the resulting connection into the active set. Completion
    /// (including any TLS handshake) is observed later by
    /// [`Server::poll`] via the `Connect` event.
    ///
    /// Host resolution is performed with blocking
    /// [`std::net::ToSocketAddrs`] — a known, deliberate limitation,
    /// not something this core tries to paper over with a background
    /// thread.
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        use_tls: bool,
        conn_data: Option<Box<dyn Any + Send>>,
    ) -> bool {
        let resolved = match (host, port).to_socket_addrs() {
            Ok(mut it) => it.next(),
            Err(e) => {
                warn!(host, port, error = %e, "connect: resolution failed");
                None
            }
        };
        let Some(sock_addr) = resolved else {
            return false;
        };

        let stream = match TcpStream::connect(sock_addr) {
            Ok(s) => s,
            Err(e) => {
                warn!(host, port, error = %e, "connect: hard failure");
                return false;
            }
        };

        let transport: Option<Box<dyn Transport>> = if use_tls {
            #[cfg(feature = "tls")]
            {
                match crate::transport::TlsTransport::client(host) {
                    Ok(t) => Some(Box::new(t)),
                    Err(e) => {
                        warn!(host, error = %e, "connect: TLS transport setup failed");
                        return false;
                    }
                }
            }
            #[cfg(not(feature = "tls"))]
            {
                warn!("connect: use_tls requested but the `tls` feature is not enabled");
                None
            }
        } else {
            None
        };

        let config = self.config.clone();
        let id = self.conns.insert_with_key(|id| {
            Connection::new(id, stream, ConnFlags::CONNECTING, &config, conn_data, transport)
        });

        if let Err(e) = self.poll.registry().register(
            self.conns[id].stream_mut(),
            token_for(id),
            Interest::READABLE | Interest::WRITABLE,
        ) {
            warn!(error = %e, "connect: failed to register outbound socket");
            self.conns.remove(id);
            return false;
        }

        self.active.push_front(id);
        debug!(host, port, "connect: outbound connection initiated");
        true
    }

    /// Number of connections currently in the active set.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// The caller-supplied opaque value attached at construction.
    pub fn user_data(&self) -> Option<&(dyn Any + Send)> {
        self.user_data.as_deref()
    }

    /// Mutable access to the caller-supplied opaque value.
    pub fn user_data_mut(&mut self) -> Option<&mut (dyn Any + Send)> {
        self.user_data.as_deref_mut()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Flush any already-set close-immediately flags under normal
        // event semantics before forcibly closing what remains, so
        // `Close` is always observed exactly once per connection even
        // during teardown.
        let _ = self.poll(Duration::from_secs(0));
        let remaining: Vec<ConnId> = self.active.iter().copied().collect();
        for id in remaining {
            self.close_conn(id);
        }
    }
}

pub(crate) fn token_for(id: ConnId) -> Token {
    use slotmap::Key;
    Token(id.data().as_ffi() as usize)
}

pub(crate) fn conn_id_from_token(token: Token) -> ConnId {
    use slotmap::KeyData;
    KeyData::from_ffi(token.0 as u64).into()
}

impl Server {
    /// Emit `Close`, unlink from the active set, drop the connection
    /// (closing its socket and releasing its buffers). Delegates to
    /// `reactor.rs`, which is where every other poll-loop state
    /// transition lives.
    pub(crate) fn close_conn(&mut self, id: ConnId) {
        crate::reactor::close_conn(self, id);
    }
}
