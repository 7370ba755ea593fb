// Copyright 2026 Fanout contributors

use crate::error::Error;
use crate::request::{self, Body, Content, Method, Response};

/// Unblocks a `response` call waiting on another thread. The interrupted
/// call returns an error and leaves its connection broken.
pub type Interrupt = Box<dyn Fn() + Send + Sync>;

/// Fanout connection
///
/// The `Connection` trait defines the interface that must be implemented in
/// order to participate in a fanout connection pool. A connection is a
/// persistent, reusable channel to exactly one host. It is owned by a single
/// caller between checkout and return, so none of these methods need to be
/// thread safe beyond the `Send` bound that lets the pool hand a connection
/// to another thread.
///
/// [`HttpConnection`](../http_connection/struct.HttpConnection.html) is the
/// implementation used against query nodes. Other implementations are useful
/// for tests or for transports other than plain TCP.
pub trait Connection: Send + Sized + 'static {
    /// Send a request. The connection is established first if it is not
    /// already. Returns `Error::Timeout` when a reused keep-alive connection
    /// turns out to have been closed by the server.
    fn request(
        &mut self,
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<(), Error>;

    /// Block until the complete response to the last request is received.
    fn response(&mut self) -> Result<Response, Error>;

    /// Send a request and return the evaluated response body.
    fn call(
        &mut self,
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<Content, Error> {
        self.request(method, path, body)?;
        self.response()?.content()
    }

    /// `GET` `path` with `params` appended as a url-encoded query string.
    fn get<I, K, V>(&mut self, path: &str, params: I) -> Result<Content, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let path = request::with_query(path, params);
        self.call(Method::Get, &path, &Body::Empty)
    }

    fn post(&mut self, path: &str, body: &Body) -> Result<Content, Error> {
        self.call(Method::Post, path, body)
    }

    fn put(&mut self, path: &str, body: &Body) -> Result<Content, Error> {
        self.call(Method::Put, path, body)
    }

    fn delete(&mut self, path: &str) -> Result<Content, Error> {
        self.call(Method::Delete, path, &Body::Empty)
    }

    /// A handle that can be used from another thread to abort a `response`
    /// call blocked on this connection, once a request has been sent. Returns
    /// `None` if the connection cannot be interrupted.
    fn interrupter(&self) -> Option<Interrupt> {
        None
    }

    /// Whether the connection hit a failure that makes it unusable. A broken
    /// connection is never returned to the pool.
    fn has_broken(&self) -> bool;

    /// A cheap check that an idle connection can still be used, run before a
    /// connection is handed out of the pool and by the periodic connection
    /// check.
    fn is_valid(&mut self) -> bool {
        !self.has_broken()
    }

    /// Close the connection to the host.
    fn close(&mut self) -> Result<(), Error>;
}
