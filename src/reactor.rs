//! The poll loop.
//!
//! Everything here is further `impl Server` methods plus a handful of
//! free functions; it is split out from `server.rs` only because it is
//! the single largest and most stateful piece of the core. A full pass
//! is, in order: walk every active connection once (fire `Poll`, arm
//! interest, reap anything already marked for close), wait for
//! readiness, admit at most one new connection, service every ready
//! connection, then reap whatever closed during servicing.

use std::io;
use std::time::Duration;

use mio::{Interest, Token};
use tracing::warn;

#[cfg(feature = "hexdump")]
use crate::hexdump::{self, Direction};

use crate::conn::{is_hard_error, ConnFlags, ConnId, Connection};
use crate::event::{Callback, Event};
use crate::server::{conn_id_from_token, token_for, Server, LISTENER_TOKEN};

/// Invoke the user callback on a connection. A free function, not a
/// `Server` method, so call sites can borrow `self.callback` and
/// `self.conns` as the disjoint fields they are instead of taking
/// `&mut self` as a whole — which would conflict with a `&mut
/// Connection` already borrowed out of `self.conns`.
fn fire(callback: &mut Callback, conn: &mut Connection, event: Event) {
    let _ = callback(conn, event);
}

impl Server {
    /// Run one pass of the poll loop: wait up to `timeout` for
    /// readiness, service whatever is ready, and reap closed
    /// connections. Returns the number of connections still active
    /// afterward.
    ///
    /// A `Server` with no listener bound yet is a no-op that always
    /// returns `0`.
    pub fn poll(&mut self, timeout: Duration) -> usize {
        if self.listener.is_none() {
            return 0;
        }

        self.pre_select_walk();

        self.events.clear();
        if let Err(e) = self.poll.poll(&mut self.events, Some(timeout)) {
            warn!(error = %e, "poll: readiness wait failed");
            self.reap();
            return self.active.len();
        }

        // Copy what each event was about before touching `self.conns`:
        // `self.events` borrows `self` immutably for as long as we
        // iterate it, and servicing a connection needs `self` mutably.
        let batch: Vec<(Token, bool, bool)> = self
            .events
            .iter()
            .map(|e| (e.token(), e.is_readable(), e.is_writable()))
            .collect();

        let listener_ready = batch.iter().any(|(t, r, _)| *t == LISTENER_TOKEN && *r);
        if listener_ready {
            self.accept_one();
        }

        for (token, readable, writable) in batch {
            if token == LISTENER_TOKEN {
                continue;
            }
            let id = conn_id_from_token(token);
            if !self.conns.contains_key(id) {
                continue;
            }
            self.service_connection(id, readable, writable);
        }

        self.reap();
        self.active.len()
    }

    /// Step one of a pass: fire `Poll` on every active connection in
    /// order, then reap anything already marked for close and
    /// (re)arm mio interest for what remains before the wait.
    fn pre_select_walk(&mut self) {
        let ids: Vec<ConnId> = self.active.iter().copied().collect();

        for &id in &ids {
            if let Some(conn) = self.conns.get_mut(id) {
                fire(&mut self.callback, conn, Event::Poll);
            }
        }

        let mut to_reap = Vec::new();
        for id in ids {
            let wants_write = match self.conns.get(id) {
                Some(conn) if conn.is_closing() => {
                    to_reap.push(id);
                    continue;
                }
                Some(conn) => conn.wants_write_interest(),
                None => continue,
            };

            let mut interest = Interest::READABLE;
            if wants_write {
                interest |= Interest::WRITABLE;
            }
            if let Err(e) =
                self.poll
                    .registry()
                    .reregister(self.conns[id].stream_mut(), token_for(id), interest)
            {
                warn!(error = %e, "poll: failed to reregister connection interest");
            }
        }

        for id in to_reap {
            self.close_conn(id);
        }
    }

    /// Admit exactly one pending inbound connection, if the listener
    /// has one ready. Accepting more than one per pass would let a
    /// single busy listener starve already-active connections of
    /// service time in the same pass.
    fn accept_one(&mut self) {
        let accepted = match self.listener.as_ref() {
            Some(l) => l.accept(),
            None => return,
        };

        match accepted {
            Ok((stream, peer)) => {
                let config = self.config.clone();
                let id = self.conns.insert_with_key(|id| {
                    Connection::new(id, stream, ConnFlags::ACCEPTED, &config, None, None)
                });

                if let Err(e) = self.poll.registry().register(
                    self.conns[id].stream_mut(),
                    token_for(id),
                    Interest::READABLE,
                ) {
                    warn!(error = %e, peer = %peer, "accept: failed to register accepted socket");
                    self.conns.remove(id);
                    return;
                }

                self.active.push_front(id);
                let conn = self.conns.get_mut(id).unwrap();
                conn.touch();
                fire(&mut self.callback, conn, Event::Accept);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!(error = %e, "accept: failed"),
        }
    }

    /// Service whichever of readable/writable fired for `id`.
    fn service_connection(&mut self, id: ConnId, readable: bool, writable: bool) {
        if readable {
            if let Some(conn) = self.conns.get_mut(id) {
                conn.touch();
            }
            self.do_recv(id);
        }

        if writable && self.conns.contains_key(id) {
            if self.conns[id].is_connecting() {
                self.do_connect_complete(id);
            } else {
                if let Some(conn) = self.conns.get_mut(id) {
                    conn.touch();
                }
                self.do_send(id);
            }
        }
    }

    /// Read once into a scratch buffer and append whatever arrived to
    /// the connection's receive buffer. A zero-byte read is an orderly
    /// peer close; any other hard error schedules teardown. Soft
    /// errors (would-block, interrupted) are left for the next
    /// readiness event.
    fn do_recv(&mut self, id: ConnId) {
        let scratch_size = self.config.recv_scratch_size;
        let mut scratch = vec![0u8; scratch_size];

        let conn = match self.conns.get_mut(id) {
            Some(c) => c,
            None => return,
        };

        match conn.raw_read(&mut scratch) {
            Ok(0) => conn.close_immediately(),
            Ok(n) => {
                #[cfg(feature = "hexdump")]
                hexdump::dump(Direction::Recv, &scratch[..n]);

                let accepted = conn.recv_buf_mut().append(&scratch[..n]);
                if accepted > 0 {
                    let conn = self.conns.get_mut(id).unwrap();
                    fire(&mut self.callback, conn, Event::Recv);
                }
            }
            Err(e) => {
                if is_hard_error(&e) {
                    conn.close_immediately();
                }
            }
        }
    }

    /// Attempt one write of whatever the send buffer currently holds,
    /// emit `Send`, and close the connection once a finished-sending
    /// send buffer has fully drained. A write that returns exactly zero
    /// bytes (asked for more, got nothing) is a hard error, same as a
    /// zero-byte read in `do_recv`, and schedules teardown.
    fn do_send(&mut self, id: ConnId) {
        let conn = match self.conns.get_mut(id) {
            Some(c) => c,
            None => return,
        };
        if conn.send_buf_is_empty() {
            return;
        }

        // `raw_write` needs a mutable borrow of the whole connection,
        // so the pending bytes are copied out before the call rather
        // than held as a borrow of the send buffer across it.
        let chunk = conn.send_buf_mut().as_slice().to_vec();

        match conn.raw_write(&chunk) {
            Ok(0) => conn.close_immediately(),
            Ok(n) => {
                #[cfg(feature = "hexdump")]
                hexdump::dump(Direction::Send, &chunk[..n]);
                conn.send_buf_mut().remove(n);
            }
            Err(e) => {
                if is_hard_error(&e) {
                    conn.close_immediately();
                }
            }
        }

        let conn = self.conns.get_mut(id).unwrap();
        if conn.send_buf_is_empty() && conn.finished_sending() {
            conn.close_immediately();
        }

        let conn = self.conns.get_mut(id).unwrap();
        fire(&mut self.callback, conn, Event::Send);
    }

    /// Resolve an outbound connect's completion.
    ///
    /// The first writable readiness on a connecting socket queries its
    /// pending socket error via `SO_ERROR` and delivers it once,
    /// through `Connect`. If a transport is attached and the status
    /// was success, handshake progression starts (or continues on
    /// later readiness events — `connect_pending_report` guards
    /// against re-querying the socket error or re-firing `Connect` on
    /// those later passes). `CONNECTING` does not clear until the
    /// handshake (if any) is complete.
    fn do_connect_complete(&mut self, id: ConnId) {
        let conn = match self.conns.get_mut(id) {
            Some(c) => c,
            None => return,
        };

        if !conn.connect_pending_report() {
            match conn.drive_handshake() {
                Ok(true) => conn.finish_handshake(),
                Ok(false) => {}
                Err(_) => conn.close_immediately(),
            }
            return;
        }

        let status: i32 = match conn.stream_mut().take_error() {
            Ok(None) => 0,
            Ok(Some(err)) => err.raw_os_error().unwrap_or(-1),
            Err(err) => err.raw_os_error().unwrap_or(-1),
        };
        conn.mark_connect_reported();

        let conn = self.conns.get_mut(id).unwrap();
        fire(&mut self.callback, conn, Event::Connect { status });

        if status != 0 {
            self.conns.get_mut(id).unwrap().close_immediately();
            return;
        }

        let conn = self.conns.get_mut(id).unwrap();
        match conn.drive_handshake() {
            Ok(true) => conn.finish_handshake(),
            Ok(false) => {}
            Err(_) => conn.close_immediately(),
        }
    }

    /// Reap every active connection flagged `close_immediately`.
    fn reap(&mut self) {
        let ids: Vec<ConnId> = self.active.iter().copied().collect();
        for id in ids {
            if self.conns.get(id).map(|c| c.is_closing()).unwrap_or(false) {
                self.close_conn(id);
            }
        }
    }
}

/// Emit `Close`, unlink `id` from the active set, deregister its
/// socket, and drop the connection record (freeing its buffers and
/// closing the socket). Called from [`Server::close_conn`], which
/// exists so other modules can schedule a close without depending on
/// this module directly.
pub(crate) fn close_conn(server: &mut Server, id: ConnId) {
    match server.conns.get_mut(id) {
        Some(conn) => fire(&mut server.callback, conn, Event::Close),
        None => return,
    }

    server.active.retain(|&active_id| active_id != id);

    if let Some(mut conn) = server.conns.remove(id) {
        let _ = server.poll.registry().deregister(conn.stream_mut());
        conn.recv_buf_mut().free();
        conn.send_buf_mut().free();
    }
}
