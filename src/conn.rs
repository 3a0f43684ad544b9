//! A single active TCP endpoint and its state-machine flags.

use std::any::Any;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;

use mio::net::TcpStream;
use slotmap::new_key_type;

use crate::buffer::ByteBuffer;
use crate::config::Config;
use crate::transport::Transport;

new_key_type! {
    /// A stable handle identifying one [`Connection`] inside a
    /// [`crate::server::Server`]'s arena.
    ///
    /// Round-trips through `mio::Token` via `slotmap`'s FFI
    /// representation (`KeyData::as_ffi` / `from_ffi`) — an
    /// arena-of-handles in place of an intrusive linked list.
    pub struct ConnId;
}

/// Independent, OR-combined state bits for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnFlags(u8);

impl ConnFlags {
    /// Created from an inbound accept.
    pub const ACCEPTED: Self = Self(1 << 0);
    /// Outbound connect not yet completed.
    pub const CONNECTING: Self = Self(1 << 1);
    /// The attached transport has completed its handshake.
    pub const SSL_HANDSHAKE_DONE: Self = Self(1 << 2);
    /// User signaled end-of-stream; close once the send buffer drains.
    pub const FINISHED_SENDING: Self = Self(1 << 3);
    /// Suppress writable interest even if the send buffer is non-empty.
    pub const BUFFER_BUT_DONT_SEND: Self = Self(1 << 4);
    /// Schedule destruction on the next poll sweep. Monotonic: never
    /// cleared once set.
    pub const CLOSE_IMMEDIATELY: Self = Self(1 << 5);

    fn insert(&mut self, bit: Self) {
        self.0 |= bit.0;
    }

    fn remove(&mut self, bit: Self) {
        self.0 &= !bit.0;
    }

    fn contains(&self, bit: Self) -> bool {
        self.0 & bit.0 != 0
    }
}

/// One accepted or connected TCP endpoint.
pub struct Connection {
    id: ConnId,
    stream: TcpStream,
    recv_buf: ByteBuffer,
    send_buf: ByteBuffer,
    flags: ConnFlags,
    last_active: Instant,
    user_data: Option<Box<dyn Any + Send>>,
    transport: Option<Box<dyn Transport>>,
    /// Whether the one-time `Connect` status has already been reported.
    /// Only meaningful while `CONNECTING` is set; irrelevant (and left
    /// `true`) for accepted connections. Not part of the public flag
    /// word because it is bookkeeping for the poll loop, not state an
    /// embedder inspects.
    connect_reported: bool,
}

impl Connection {
    pub(crate) fn new(
        id: ConnId,
        stream: TcpStream,
        flags: ConnFlags,
        config: &Config,
        user_data: Option<Box<dyn Any + Send>>,
        transport: Option<Box<dyn Transport>>,
    ) -> Self {
        let connect_reported = !flags.contains(ConnFlags::CONNECTING);
        Self {
            id,
            stream,
            recv_buf: new_buffer(config),
            send_buf: new_buffer(config),
            flags,
            last_active: Instant::now(),
            user_data,
            transport,
            connect_reported,
        }
    }

    /// This connection's handle within its owning [`crate::server::Server`].
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Append `data` to the send buffer.
    ///
    /// Returns how many bytes were accepted; a return smaller than
    /// `data.len()` (including zero) signals backpressure — the
    /// caller should retry after the send buffer has drained.
    pub fn send(&mut self, data: &[u8]) -> usize {
        self.send_buf.append(data)
    }

    /// Bytes currently buffered to be received by the user — the
    /// bytes most recently appended by the poll loop's receive pass.
    pub fn recv_data(&self) -> &[u8] {
        self.recv_buf.as_slice()
    }

    /// Consume the first `n` bytes of the receive buffer, typically
    /// called from the `Recv` event handler once those bytes have
    /// been parsed.
    pub fn consume_recv(&mut self, n: usize) {
        self.recv_buf.remove(n);
    }

    /// Signal end-of-stream: the connection closes once the send
    /// buffer has fully drained.
    pub fn finish_sending(&mut self) {
        self.flags.insert(ConnFlags::FINISHED_SENDING);
    }

    /// Suppress or re-enable writable interest regardless of whether
    /// the send buffer holds data.
    pub fn set_buffer_but_dont_send(&mut self, hold: bool) {
        if hold {
            self.flags.insert(ConnFlags::BUFFER_BUT_DONT_SEND);
        } else {
            self.flags.remove(ConnFlags::BUFFER_BUT_DONT_SEND);
        }
    }

    /// Schedule destruction on the next poll sweep. Idempotent and
    /// irreversible.
    pub fn close_immediately(&mut self) {
        self.flags.insert(ConnFlags::CLOSE_IMMEDIATELY);
    }

    /// True once [`Connection::close_immediately`] has been called (by
    /// the user or by the core's own error handling).
    pub fn is_closing(&self) -> bool {
        self.flags.contains(ConnFlags::CLOSE_IMMEDIATELY)
    }

    /// True while an outbound connect has not yet completed.
    pub fn is_connecting(&self) -> bool {
        self.flags.contains(ConnFlags::CONNECTING)
    }

    /// True if this connection was created by accepting an inbound
    /// socket (as opposed to an outbound connect).
    pub fn is_accepted(&self) -> bool {
        self.flags.contains(ConnFlags::ACCEPTED)
    }

    /// True once the attached transport (if any) has finished its
    /// handshake.
    pub fn handshake_done(&self) -> bool {
        self.flags.contains(ConnFlags::SSL_HANDSHAKE_DONE)
    }

    /// Monotonic-enough timestamp of the connection's last I/O
    /// activity, for idle accounting the integrator may want to do
    /// from the `Poll` event.
    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    /// The caller-supplied opaque value attached at creation time.
    pub fn user_data(&self) -> Option<&(dyn Any + Send)> {
        self.user_data.as_deref()
    }

    /// Mutable access to the caller-supplied opaque value.
    pub fn user_data_mut(&mut self) -> Option<&mut (dyn Any + Send)> {
        self.user_data.as_deref_mut()
    }

    /// The remote peer's address, if the socket is still connected.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    // --- internals used only by the poll loop ---

    pub(crate) fn send_buf_is_empty(&self) -> bool {
        self.send_buf.is_empty()
    }

    pub(crate) fn finished_sending(&self) -> bool {
        self.flags.contains(ConnFlags::FINISHED_SENDING)
    }

    /// Whether writable interest should be armed: still connecting, or
    /// the send buffer holds data the user hasn't asked us to sit on.
    pub(crate) fn wants_write_interest(&self) -> bool {
        self.flags.contains(ConnFlags::CONNECTING)
            || (!self.send_buf.is_empty() && !self.flags.contains(ConnFlags::BUFFER_BUT_DONT_SEND))
    }

    /// True while the one-time `Connect` status for this (outbound)
    /// connection has not yet been delivered.
    pub(crate) fn connect_pending_report(&self) -> bool {
        self.flags.contains(ConnFlags::CONNECTING) && !self.connect_reported
    }

    pub(crate) fn mark_connect_reported(&mut self) {
        self.connect_reported = true;
    }

    /// The attached transport (if any) has finished its handshake;
    /// clear `CONNECTING` and set `SSL_HANDSHAKE_DONE`.
    pub(crate) fn finish_handshake(&mut self) {
        self.flags.insert(ConnFlags::SSL_HANDSHAKE_DONE);
        self.flags.remove(ConnFlags::CONNECTING);
    }

    pub(crate) fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub(crate) fn recv_buf_mut(&mut self) -> &mut ByteBuffer {
        &mut self.recv_buf
    }

    pub(crate) fn send_buf_mut(&mut self) -> &mut ByteBuffer {
        &mut self.send_buf
    }

    /// Drive the attached transport's handshake forward, or report it
    /// already complete when no transport is attached.
    pub(crate) fn drive_handshake(&mut self) -> io::Result<bool> {
        match self.transport.as_mut() {
            Some(t) => t.try_handshake(&mut self.stream),
            None => Ok(true),
        }
    }

    /// Read through the attached transport if any, else straight from
    /// the socket. Kept as one method (rather than exposing the
    /// transport and stream separately) so both fields can be
    /// borrowed from `self` at once without the caller juggling two
    /// mutable borrows of the same connection.
    pub(crate) fn raw_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use std::io::Read;
        match self.transport.as_mut() {
            Some(t) => t.read(&mut self.stream, buf),
            None => self.stream.read(buf),
        }
    }

    /// Write through the attached transport if any, else straight to
    /// the socket.
    pub(crate) fn raw_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        use std::io::Write;
        match self.transport.as_mut() {
            Some(t) => t.write(&mut self.stream, buf),
            None => self.stream.write(buf),
        }
    }
}

/// Build a receive/send buffer per `config`, redirecting through its
/// attached allocator hook when the `allocator-hook` feature is on and
/// one is configured.
fn new_buffer(config: &Config) -> ByteBuffer {
    #[cfg(feature = "allocator-hook")]
    {
        if let Some(allocator) = config.allocator.clone() {
            return ByteBuffer::with_allocator(0, config.growth_factor, allocator);
        }
    }
    ByteBuffer::with_capacity(0, config.growth_factor)
}

/// Classify an I/O error as hard (forces teardown) or soft (transient,
/// retried on the next readiness event).
///
/// A read or write is a hard error if the error kind is anything other
/// than would-block or interrupted; a successful read/write of exactly
/// zero bytes when more was requested (orderly peer close) is handled
/// separately by the caller, since `Ok(0)` carries no `ErrorKind` to
/// classify.
pub(crate) fn is_hard_error(err: &io::Error) -> bool {
    !matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_is_soft() {
        let err = io::Error::from(io::ErrorKind::WouldBlock);
        assert!(!is_hard_error(&err));
    }

    #[test]
    fn interrupted_is_soft() {
        let err = io::Error::from(io::ErrorKind::Interrupted);
        assert!(!is_hard_error(&err));
    }

    #[test]
    fn connection_reset_is_hard() {
        let err = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(is_hard_error(&err));
    }

    #[test]
    fn flags_are_independent_bits() {
        let mut flags = ConnFlags::default();
        flags.insert(ConnFlags::ACCEPTED);
        flags.insert(ConnFlags::FINISHED_SENDING);
        assert!(flags.contains(ConnFlags::ACCEPTED));
        assert!(flags.contains(ConnFlags::FINISHED_SENDING));
        assert!(!flags.contains(ConnFlags::CONNECTING));
    }

    #[test]
    fn close_immediately_is_monotonic() {
        let mut flags = ConnFlags::default();
        flags.insert(ConnFlags::CLOSE_IMMEDIATELY);
        flags.remove(ConnFlags::ACCEPTED);
        assert!(flags.contains(ConnFlags::CLOSE_IMMEDIATELY));
    }
}
