//! An embeddable, single-threaded, non-blocking TCP event loop.
//!
//! A [`Server`] owns a listening socket, an arena of active
//! connections, and a user-supplied callback. [`Server::poll`] runs one
//! pass of the reactor: it waits for readiness on the underlying
//! `mio::Poll`, admits at most one new inbound connection, services
//! whatever is ready, and reaps anything the callback (or the core's
//! own error handling) marked for close. Everything runs on the
//! calling thread; there is no internal locking or background work.
//!
//! ```no_run
//! use std::time::Duration;
//! use evmux::{Config, Server};
//!
//! let mut server = Server::new(None, Box::new(|conn, event| {
//!     match event {
//!         evmux::Event::Recv => {
//!             let data = conn.recv_data().to_vec();
//!             conn.consume_recv(data.len());
//!             conn.send(&data);
//!         }
//!         evmux::Event::Close => {}
//!         _ => {}
//!     }
//!     0
//! }), Config::default()).unwrap();
//!
//! server.bind_to("127.0.0.1:0");
//! loop {
//!     server.poll(Duration::from_millis(100));
//!     # break;
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod addr;
pub mod buffer;
pub mod conn;
pub mod config;
pub mod error;
pub mod event;
pub mod hexdump;
pub mod reactor;
pub mod server;
pub mod transport;

pub use buffer::ByteBuffer;
pub use conn::{ConnFlags, ConnId, Connection};
pub use config::Config;
pub use error::{Error, Result};
pub use event::{Callback, Event};
pub use server::Server;
pub use transport::{PlaintextTransport, Transport};

#[cfg(feature = "tls")]
pub use transport::{TlsRole, TlsTransport};
