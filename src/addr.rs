//! Endpoint string parsing and non-blocking listener creation.
//!
//! Grammar, tried in order:
//!   1. `A.B.C.D:P`   — IPv4 literal, specific bind
//!   2. `[addr]:P`    — IPv6 literal, specific bind (feature `ipv6`)
//!   3. `P`           — port only, IPv4 wildcard bind
//!
//! A parse only succeeds if the port is in `1..=65535` and the whole
//! input was consumed; port `0` is rejected here even though the OS
//! would happily hand out an ephemeral port for it — callers that want
//! an ephemeral port must arrange that outside this grammar.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
#[cfg(feature = "ipv6")]
use std::net::{Ipv6Addr, SocketAddrV6};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::{Error, Result};

/// Parse an endpoint specification string per the grammar above.
pub fn parse_endpoint(s: &str) -> Option<SocketAddr> {
    #[cfg(feature = "ipv6")]
    if let Some(addr) = parse_ipv6_literal(s) {
        return Some(addr);
    }

    if let Some(addr) = parse_ipv4_literal(s) {
        return Some(addr);
    }

    parse_port_only(s)
}

fn valid_port(p: u32) -> Option<u16> {
    if p >= 1 && p <= u16::MAX as u32 {
        Some(p as u16)
    } else {
        None
    }
}

fn parse_ipv4_literal(s: &str) -> Option<SocketAddr> {
    let (host, port) = s.rsplit_once(':')?;
    let ip: Ipv4Addr = host.parse().ok()?;
    let port: u32 = port.parse().ok()?;
    let port = valid_port(port)?;
    Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

#[cfg(feature = "ipv6")]
fn parse_ipv6_literal(s: &str) -> Option<SocketAddr> {
    let rest = s.strip_prefix('[')?;
    let (host, rest) = rest.split_once(']')?;
    let port_part = rest.strip_prefix(':')?;
    let ip: Ipv6Addr = host.parse().ok()?;
    let port: u32 = port_part.parse().ok()?;
    let port = valid_port(port)?;
    Some(SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0)))
}

fn parse_port_only(s: &str) -> Option<SocketAddr> {
    let port: u32 = s.parse().ok()?;
    let port = valid_port(port)?;
    Some(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port)))
}

/// Default listen backlog; generous enough that a portable embedder
/// rarely needs to tune it.
pub const DEFAULT_BACKLOG: i32 = 1024;

/// Open a non-blocking, address-reusable listening socket bound to
/// `addr`.
///
/// On any step's failure, any partially-opened socket is dropped and
/// the error is propagated; the caller (`Server::bind_to`) turns that
/// into the "bind failed" zero-port return.
pub fn open_listener(addr: SocketAddr, backlog: i32) -> Result<mio::net::TcpListener> {
    let domain = match addr {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(Error::Io)?;
    socket.set_reuse_address(true).map_err(Error::Io)?;
    socket.bind(&addr.into()).map_err(Error::Io)?;
    socket.listen(backlog).map_err(Error::Io)?;
    socket.set_nonblocking(true).map_err(Error::Io)?;

    Ok(mio::net::TcpListener::from_std(socket.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_port_only() {
        assert!(parse_endpoint("80").is_some());
    }

    #[test]
    fn accepts_ipv4_literal() {
        let addr = parse_endpoint("127.0.0.1:8080").unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse().unwrap());
    }

    #[cfg(feature = "ipv6")]
    #[test]
    fn accepts_ipv6_literal() {
        assert!(parse_endpoint("[::1]:8080").is_some());
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_endpoint("80x").is_none());
    }

    #[test]
    fn rejects_missing_host() {
        assert!(parse_endpoint(":80").is_none());
    }

    #[test]
    fn rejects_malformed_ipv4() {
        assert!(parse_endpoint("1.2.3:80").is_none());
    }

    #[test]
    fn rejects_port_overflow() {
        assert!(parse_endpoint("65536").is_none());
    }

    #[test]
    fn rejects_port_zero() {
        assert!(parse_endpoint("0").is_none());
        assert!(parse_endpoint("127.0.0.1:0").is_none());
    }
}
