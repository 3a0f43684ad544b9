//! Optional hexadecimal packet dump, gated behind the `hexdump`
//! feature.
//!
//! The core calls [`dump`] with every chunk it reads or writes; what
//! happens with that dump is entirely up to the sink the integrator
//! wires up through [`set_sink`]. The default sink writes to
//! `tracing::trace!`, matching the way the rest of the crate reports
//! diagnostics.

#[cfg(feature = "hexdump")]
use std::sync::atomic::{AtomicPtr, Ordering};

/// Direction a dumped chunk travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes read from the peer.
    Recv,
    /// Bytes written to the peer.
    Send,
}

/// A sink that receives every dumped chunk.
pub type Sink = fn(Direction, &[u8]);

#[cfg(feature = "hexdump")]
static SINK: AtomicPtr<()> = AtomicPtr::new(default_sink as *mut ());

#[cfg(feature = "hexdump")]
fn default_sink(direction: Direction, bytes: &[u8]) {
    tracing::trace!(?direction, len = bytes.len(), dump = %format_hex(bytes), "hexdump");
}

#[cfg(feature = "hexdump")]
fn format_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Install a custom dump sink, replacing the default `tracing::trace!`
/// sink. Intended to be called once, early in process startup.
#[cfg(feature = "hexdump")]
pub fn set_sink(sink: Sink) {
    SINK.store(sink as *mut (), Ordering::SeqCst);
}

/// Dump a chunk of bytes through the installed sink. A no-op unless
/// built with the `hexdump` feature.
#[cfg(feature = "hexdump")]
pub fn dump(direction: Direction, bytes: &[u8]) {
    let ptr = SINK.load(Ordering::SeqCst);
    // SAFETY: only ever stores function pointers of type `Sink` via
    // `set_sink`, and is initialized to `default_sink` above.
    let sink: Sink = unsafe { std::mem::transmute(ptr) };
    sink(direction, bytes);
}

/// Dump a chunk of bytes through the installed sink. A no-op unless
/// built with the `hexdump` feature.
#[cfg(not(feature = "hexdump"))]
#[inline(always)]
pub fn dump(_direction: Direction, _bytes: &[u8]) {}

#[cfg(all(test, feature = "hexdump"))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as O};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counting_sink(_direction: Direction, _bytes: &[u8]) {
        CALLS.fetch_add(1, O::SeqCst);
    }

    #[test]
    fn custom_sink_receives_dumps() {
        set_sink(counting_sink);
        let before = CALLS.load(O::SeqCst);
        dump(Direction::Recv, b"hi");
        assert_eq!(CALLS.load(O::SeqCst), before + 1);
        set_sink(default_sink);
    }
}
