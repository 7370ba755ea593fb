// Copyright 2026 Fanout contributors

use std::borrow::Borrow;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use derive_more::{Display, From, Into};

/// The port used when a host address does not carry one.
pub const DEFAULT_PORT: u16 = 80;

/// The network address of one server instance, as `name:port` or `name`.
///
/// A `Host` is the unit of pooling, selection and shard membership. It is an
/// opaque string; it is only resolved when a connection is established.
#[derive(
    Clone, Debug, Display, Eq, From, Hash, Into, Ord, PartialOrd, PartialEq,
)]
pub struct Host(String);

impl Host {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The `Host` header value for requests sent to this host.
    pub fn authority(&self) -> &str {
        &self.0
    }

    /// Resolve the address, applying `DEFAULT_PORT` when none is given.
    pub fn socket_addrs(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs = if has_port(&self.0) {
            self.0.to_socket_addrs()?
        } else {
            (self.0.trim_matches(|c| c == '[' || c == ']'), DEFAULT_PORT)
                .to_socket_addrs()?
        };
        Ok(addrs.collect())
    }
}

// A bare IPv6 address has colons but no port, "[::1]:80" and "name:80" do.
fn has_port(address: &str) -> bool {
    match address.rfind(':') {
        Some(idx) => {
            let (head, tail) = address.split_at(idx);
            let port_ok = tail[1..].parse::<u16>().is_ok();
            port_ok && (!head.contains(':') || head.ends_with(']'))
        }
        None => false,
    }
}

impl From<&str> for Host {
    fn from(address: &str) -> Self {
        Host(address.to_string())
    }
}

impl From<&String> for Host {
    fn from(address: &String) -> Self {
        Host(address.clone())
    }
}

impl From<&Host> for Host {
    fn from(host: &Host) -> Self {
        host.clone()
    }
}

impl From<SocketAddr> for Host {
    fn from(addr: SocketAddr) -> Self {
        Host(addr.to_string())
    }
}

impl Borrow<str> for Host {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Host {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
