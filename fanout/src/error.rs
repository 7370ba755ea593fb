// Copyright 2026 Fanout contributors

use std::io;

use thiserror::Error;

use crate::host::Host;

/// The error type for every dispatch operation.
///
/// Only `Timeout` is handled internally by `Resources` (the request is
/// re-issued). The other variants propagate to the caller unmodified so it
/// can tell "retry elsewhere" (`Connectivity`) from "the server rejected the
/// request" (`Protocol`) and "fix the configuration" (`Configuration`).
#[derive(Debug, Error)]
pub enum Error {
    /// The server answered with a non-2xx status other than 408.
    #[error("{status} {reason}: {body}")]
    Protocol {
        status: u16,
        reason: String,
        body: String,
    },
    /// The transport to a host failed: refused or reset connection, or a
    /// response that could not be parsed.
    #[error("connectivity failure on {host}: {source}")]
    Connectivity {
        host: Host,
        #[source]
        source: io::Error,
    },
    /// The request timed out, either signaled by the server with a 408 status
    /// or detected locally by the read deadline or an expired keep-alive
    /// connection.
    #[error("request to {host} timed out")]
    Timeout { host: Host },
    /// The request cannot be dispatched as configured.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub(crate) fn connectivity<E>(host: &Host, kind: io::ErrorKind, err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Connectivity {
            host: host.clone(),
            source: io::Error::new(kind, err),
        }
    }

    /// Whether sending the same request to another host might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connectivity { .. } | Error::Timeout { .. } => true,
            Error::Protocol { .. } | Error::Configuration(_) => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// The HTTP status of a `Protocol` error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Protocol { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        let host = Host::from("localhost:8080");
        let refused = Error::connectivity(
            &host,
            io::ErrorKind::ConnectionRefused,
            "connection refused",
        );
        assert!(refused.is_retryable());
        assert!(Error::Timeout { host: host.clone() }.is_retryable());

        let protocol = Error::Protocol {
            status: 404,
            reason: "Not Found".into(),
            body: String::new(),
        };
        assert!(!protocol.is_retryable());
        assert_eq!(protocol.status(), Some(404));
        assert!(!Error::Configuration("no hosts".into()).is_retryable());
    }

    #[test]
    fn display_carries_detail() {
        let protocol = Error::Protocol {
            status: 400,
            reason: "Bad Request".into(),
            body: "missing q".into(),
        };
        assert_eq!(protocol.to_string(), "400 Bad Request: missing q");

        let timeout = Error::Timeout {
            host: Host::from("a:1"),
        };
        assert_eq!(timeout.to_string(), "request to a:1 timed out");
    }
}
