// Copyright 2026 Fanout contributors

//! Load-balanced dispatch over a set of interchangeable hosts.
//!
//! `Resources` keeps one idle connection list per host and offers two ways
//! to send a request: [`unicast`](struct.Resources.html#method.unicast)
//! picks one host at random, biased towards hosts with more idle
//! connections, and [`broadcast`](struct.Resources.html#method.broadcast)
//! sends the request to every host in parallel.
//!
//! A request that times out (the server answers 408, the read deadline
//! expires, or an idle keep-alive connection turns out to have been closed)
//! is re-issued transparently. Every other failure is returned to the caller
//! as is.

use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use slog::{debug, info, trace, warn, Logger};

use crate::connection::{Connection, Interrupt};
use crate::connection_pool::types::{ConnectionPoolOptions, ConnectionPoolStats};
use crate::connection_pool::{ConnectionPool, PoolConnection};
use crate::error::Error;
use crate::host::Host;
use crate::http_connection::{HttpConnection, HttpConnectionOptions};
use crate::request::{Body, Content, Method, Response};
use crate::select;

// Timeouts tolerated per host within a single call
const DEFAULT_MAX_TIMEOUT_RETRIES: u32 = 3;

/// The configuration options for `Resources` and `Shards`.
#[derive(Debug, Default)]
pub struct ResourcesOptions {
    /// An optional maximum number of idle connections cached per host. If not
    /// specified the idle lists are unbounded.
    pub limit: Option<u32>,
    /// An optional timeout in milliseconds for establishing a connection. If
    /// not specified connection attempts block until the OS gives up.
    pub connect_timeout: Option<u64>,
    /// An optional timeout in milliseconds for each read of a response. An
    /// expired read is treated like a 408 response and the request is
    /// re-issued. If not specified reads block indefinitely.
    pub read_timeout: Option<u64>,
    /// An optional number of timeouts tolerated from one host within a single
    /// unicast or broadcast before the host is given up on. The default is 3.
    pub max_timeout_retries: Option<u32>,
    /// Optional idle connection check interval in seconds. The default is 30
    /// seconds.
    pub connection_check_interval: Option<u64>,
    /// An optional `slog` logger instance. If none is provided the logging
    /// falls back to the `slog-stdlog` drain.
    pub log: Option<Logger>,
}

impl ResourcesOptions {
    /// Options with only the idle connection limit set.
    pub fn with_limit(limit: u32) -> Self {
        ResourcesOptions {
            limit: Some(limit),
            ..Default::default()
        }
    }

    fn http_connection_options(&self) -> HttpConnectionOptions {
        HttpConnectionOptions {
            connect_timeout: self.connect_timeout.map(Duration::from_millis),
            read_timeout: self.read_timeout.map(Duration::from_millis),
        }
    }
}

/// A thread-safe set of hosts with pooled persistent connections.
pub struct Resources<C = HttpConnection>
where
    C: Connection,
{
    pool: ConnectionPool<C>,
    max_timeout_retries: u32,
    log: Logger,
}

impl<C> Debug for Resources<C>
where
    C: Connection,
{
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Resources")
            .field("hosts", &self.pool.hosts())
            .field("stats", &self.pool.stats())
            .field("max_timeout_retries", &self.max_timeout_retries)
            .finish()
    }
}

impl Resources<HttpConnection> {
    /// Create resources for the given host addresses, connecting over HTTP.
    pub fn new<I, H>(hosts: I, options: ResourcesOptions) -> Self
    where
        I: IntoIterator<Item = H>,
        H: Into<Host>,
    {
        let create_connection =
            HttpConnection::connection_creator(options.http_connection_options());
        Resources::with_connector(hosts, options, create_connection)
    }
}

impl<C> Resources<C>
where
    C: Connection,
{
    /// Create resources whose connections are built by `create_connection`.
    /// The connect and read timeouts in `options` only apply to
    /// `HttpConnection` and are ignored here.
    pub fn with_connector<I, H, F>(
        hosts: I,
        options: ResourcesOptions,
        create_connection: F,
    ) -> Self
    where
        I: IntoIterator<Item = H>,
        H: Into<Host>,
        F: Fn(&Host) -> C + Send + Sync + 'static,
    {
        let max_timeout_retries = options
            .max_timeout_retries
            .unwrap_or(DEFAULT_MAX_TIMEOUT_RETRIES);

        let cpo = ConnectionPoolOptions {
            max_idle: options.limit,
            connection_check_interval: options.connection_check_interval,
            log: options.log,
        };
        let pool = ConnectionPool::new(
            cpo,
            hosts.into_iter().map(Into::into),
            create_connection,
        );
        let log = pool.log().clone();

        Resources {
            pool,
            max_timeout_retries,
            log,
        }
    }

    /// Add a host. Returns false if it was already known.
    pub fn add<H>(&self, host: H) -> bool
    where
        H: Into<Host>,
    {
        self.pool.add_host(host.into())
    }

    /// Remove a host. Requests already dispatched to it run to completion;
    /// later calls no longer consider it. Returns false if it was not known.
    pub fn remove(&self, host: &Host) -> bool {
        self.pool.remove_host(host)
    }

    /// The known hosts in the order they were added.
    pub fn hosts(&self) -> Vec<Host> {
        self.pool.hosts()
    }

    pub fn contains(&self, host: &Host) -> bool {
        self.pool.contains(host)
    }

    pub fn len(&self) -> usize {
        self.pool.stats().hosts
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of idle connections cached for `host`.
    pub fn idle_count(&self, host: &Host) -> usize {
        self.pool.idle_count(host)
    }

    pub fn stats(&self) -> ConnectionPoolStats {
        self.pool.stats()
    }

    pub fn pool(&self) -> &ConnectionPool<C> {
        &self.pool
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    /// Check out a connection for `host` and send a request on it. The
    /// connection is returned exclusively to the caller until its response is
    /// read with [`response`](#method.response).
    pub fn request(
        &self,
        host: &Host,
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<PoolConnection<C>, Error> {
        let mut conn = self.pool.get(host);
        match conn.request(method, path, body) {
            Ok(()) => {
                trace!(self.log, "request sent";
                    "host" => %host, "method" => %method, "path" => path);
                Ok(conn)
            }
            Err(e) => {
                conn.discard();
                Err(e)
            }
        }
    }

    /// Read the response for a connection returned by
    /// [`request`](#method.request). The connection goes back to the pool
    /// unless the request timed out or the transport failed. A timeout is
    /// returned as `Ok(None)`.
    pub fn response(
        &self,
        mut conn: PoolConnection<C>,
    ) -> Result<Option<Response>, Error> {
        let result = conn.response();
        self.settle(conn, result)
    }

    /// Send a request to any one host and return its evaluated response.
    pub fn unicast(
        &self,
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<Content, Error> {
        self.unicast_to(&self.hosts(), method, path, body)
    }

    /// Send a request to one host chosen from `hosts` and return its
    /// evaluated response.
    ///
    /// The host is chosen at random, weighted by its idle connection count,
    /// or uniformly if no candidate has idle connections. A timeout re-runs
    /// the choice over the same candidates; a host that times out more than
    /// the configured number of times is dropped from the candidates, and
    /// `Error::Connectivity` is returned once none are left. A host that
    /// cannot be sent the request at all (refused connection) is dropped
    /// immediately. Failures after the request was sent are not retried.
    pub fn unicast_to(
        &self,
        hosts: &[Host],
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<Content, Error> {
        let mut candidates = self.members(hosts)?;
        let mut timeouts: HashMap<Host, u32> = HashMap::new();
        let mut rng = rand::thread_rng();
        let mut last_host = None;

        loop {
            let weights = self.pool.idle_counts(&candidates);
            let idx = match select::weighted_index(&weights, &mut rng) {
                Some(idx) => idx,
                None => {
                    let host = last_host.unwrap_or_else(|| hosts[0].clone());
                    return Err(timeouts_exhausted(&host));
                }
            };
            let host = candidates[idx].clone();

            let outcome = match self.request(&host, method, path, body) {
                Ok(conn) => self.response(conn)?,
                Err(Error::Timeout { .. }) => None,
                // Nothing was delivered, so another candidate may take it
                Err(e @ Error::Connectivity { .. }) => {
                    warn!(self.log, "host unreachable, trying another";
                        "host" => %host, "error" => %e);
                    candidates.remove(idx);
                    if candidates.is_empty() {
                        return Err(e);
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };
            if let Some(response) = outcome {
                return response.content();
            }

            let count = timeouts.entry(host.clone()).or_insert(0);
            *count += 1;
            warn!(self.log, "request timed out, retrying";
                "host" => %host, "method" => %method, "path" => path,
                "timeouts" => *count);
            if *count > self.max_timeout_retries {
                debug!(self.log, "excluding host from unicast"; "host" => %host);
                candidates.remove(idx);
            }
            last_host = Some(host);
        }
    }

    /// Send a request to every host and return the evaluated responses in
    /// host order.
    pub fn broadcast(
        &self,
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<Vec<Content>, Error> {
        self.broadcast_to(&self.hosts(), method, path, body)
    }

    /// Send a request to each of `hosts` and return the evaluated responses
    /// in the same order.
    ///
    /// All requests are sent before any response is read, and responses are
    /// read in parallel, so the call takes as long as the slowest host. A
    /// host that times out is sent the request again. The first transport
    /// failure on any host fails the whole call with `Error::Connectivity`
    /// and interrupts the reads still outstanding on the other hosts. A
    /// non-2xx response fails it with `Error::Protocol` once every response
    /// has been read. There are no partial results.
    pub fn broadcast_to(
        &self,
        hosts: &[Host],
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<Vec<Content>, Error> {
        let hosts = self.members(hosts)?;
        debug!(self.log, "broadcast";
            "hosts" => hosts.len(), "method" => %method, "path" => path);

        let mut dispatched = Vec::with_capacity(hosts.len());
        for host in &hosts {
            match self.dispatch(host, method, path, body) {
                Ok(conn) => dispatched.push(conn),
                Err(e) => {
                    // Responses to requests already sent are never read
                    dispatched.into_iter().for_each(PoolConnection::discard);
                    return Err(e);
                }
            }
        }

        let abort = Abort::new(dispatched.len());
        let mut responses: Vec<Option<Response>> = dispatched.iter().map(|_| None).collect();
        let mut failure = None;
        thread::scope(|scope| {
            let (tx, rx) = mpsc::channel();
            for (slot, conn) in dispatched.into_iter().enumerate() {
                let tx = tx.clone();
                let abort = &abort;
                scope.spawn(move || {
                    let result = self.gather(conn, slot, abort, method, path, body);
                    let _ = tx.send((slot, result));
                });
            }
            drop(tx);

            for (slot, result) in rx {
                match result {
                    Ok(response) => responses[slot] = Some(response),
                    Err(e) if failure.is_none() => {
                        warn!(self.log, "broadcast failed, interrupting other hosts";
                            "error" => %e);
                        abort.trigger();
                        failure = Some(e);
                    }
                    Err(_) => (),
                }
            }
        });

        if let Some(e) = failure {
            return Err(e);
        }
        responses.iter().flatten().map(Response::content).collect()
    }

    // The hosts to dispatch to, all of which must be members.
    fn members(&self, hosts: &[Host]) -> Result<Vec<Host>, Error> {
        if hosts.is_empty() {
            return Err(Error::Configuration(String::from(
                "no hosts to dispatch to",
            )));
        }
        let unknown: Vec<String> = hosts
            .iter()
            .filter(|host| !self.pool.contains(host))
            .map(ToString::to_string)
            .collect();
        if !unknown.is_empty() {
            return Err(Error::Configuration(format!(
                "unknown hosts: {}",
                unknown.join(", ")
            )));
        }
        Ok(hosts.to_vec())
    }

    // Return `conn` to the pool unless the exchange on it failed or timed
    // out. A timeout is `Ok(None)`.
    fn settle(
        &self,
        conn: PoolConnection<C>,
        result: Result<Response, Error>,
    ) -> Result<Option<Response>, Error> {
        match result {
            Ok(response) if response.is_timeout() => {
                conn.discard();
                Ok(None)
            }
            Ok(response) => Ok(Some(response)),
            Err(Error::Timeout { .. }) => {
                conn.discard();
                Ok(None)
            }
            Err(e) => {
                conn.discard();
                Err(e)
            }
        }
    }

    // Send the request, retrying sends that hit an expired connection.
    fn dispatch(
        &self,
        host: &Host,
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<PoolConnection<C>, Error> {
        let mut timeouts = 0;
        loop {
            match self.request(host, method, path, body) {
                Err(Error::Timeout { .. }) if timeouts < self.max_timeout_retries => {
                    timeouts += 1;
                    debug!(self.log, "connection expired before send, retrying";
                        "host" => %host);
                }
                Err(Error::Timeout { .. }) => return Err(timeouts_exhausted(host)),
                result => return result,
            }
        }
    }

    // Wait for the response on `conn`, re-issuing the request to the same
    // host for as long as it times out within the retry budget. Each read is
    // registered in `slot` of `abort` so another host's failure can cut it
    // short.
    fn gather<'a>(
        &'a self,
        mut conn: PoolConnection<'a, C>,
        slot: usize,
        abort: &Abort,
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<Response, Error> {
        let host = conn.host().clone();
        let mut timeouts = 0;
        loop {
            if !abort.arm(slot, &*conn) {
                conn.discard();
                return Err(aborted(&host));
            }
            let result = conn.response();
            abort.disarm(slot);
            if abort.is_set() {
                // The stream may have been shut down under the read
                conn.discard();
                return Err(aborted(&host));
            }

            if let Some(response) = self.settle(conn, result)? {
                return Ok(response);
            }
            timeouts += 1;
            warn!(self.log, "request timed out, retrying";
                "host" => %host, "method" => %method, "path" => path,
                "timeouts" => timeouts);
            if timeouts > self.max_timeout_retries {
                return Err(timeouts_exhausted(&host));
            }
            conn = self.dispatch(&host, method, path, body)?;
        }
    }
}

// Shared by the reader threads of one broadcast. Each slot holds the
// interrupter of the read in progress on that host, if any.
struct Abort {
    aborted: AtomicBool,
    interrupts: Mutex<Vec<Option<Interrupt>>>,
}

impl Abort {
    fn new(slots: usize) -> Self {
        Abort {
            aborted: AtomicBool::new(false),
            interrupts: Mutex::new((0..slots).map(|_| None).collect()),
        }
    }

    // Register a read on `conn`. False once the broadcast has been aborted.
    fn arm<C: Connection>(&self, slot: usize, conn: &C) -> bool {
        let mut interrupts = self.lock();
        if self.is_set() {
            return false;
        }
        interrupts[slot] = conn.interrupter();
        true
    }

    fn disarm(&self, slot: usize) {
        self.lock()[slot] = None;
    }

    fn is_set(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn trigger(&self) {
        let mut interrupts = self.lock();
        self.aborted.store(true, Ordering::SeqCst);
        for interrupt in interrupts.iter_mut().filter_map(Option::take) {
            interrupt();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Option<Interrupt>>> {
        // Poisoned only by a panicking reader; the slots stay usable
        self.interrupts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C> Drop for Resources<C>
where
    C: Connection,
{
    fn drop(&mut self) {
        info!(self.log, "closing resources"; "stats" => ?self.pool.stats());
    }
}

fn aborted(host: &Host) -> Error {
    Error::Connectivity {
        host: host.clone(),
        source: io::Error::new(io::ErrorKind::Interrupted, "broadcast aborted"),
    }
}

fn timeouts_exhausted(host: &Host) -> Error {
    Error::Connectivity {
        host: host.clone(),
        source: io::Error::new(
            io::ErrorKind::TimedOut,
            "request timed out on every attempt",
        ),
    }
}
