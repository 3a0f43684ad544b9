//! The event callback contract that drives user code from the poll loop.

use crate::conn::Connection;

/// Events delivered to the user callback. `Connect` carries its status
/// inline instead of through a payload pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Just after an inbound connection is linked into the active set.
    Accept,
    /// Just after an outbound connect resolves. `status` is `0` on
    /// success.
    Connect {
        /// `0` on success; non-zero socket error code otherwise.
        status: i32,
    },
    /// After appending freshly read bytes to the receive buffer.
    Recv,
    /// After every write attempt, successful or not.
    Send,
    /// Once per connection, at the start of every poll pass, before
    /// any other event for that pass.
    Poll,
    /// Immediately before the connection is torn down.
    Close,
}

/// The user's event callback.
///
/// The return value is not interpreted by the core. Implementors may
/// always return `0`.
pub type Callback = Box<dyn FnMut(&mut Connection, Event) -> i32>;
