// Copyright 2026 Fanout contributors

pub mod types;

use std::collections::VecDeque;
use std::fmt::{self, Debug, Formatter};
use std::ops::{Deref, DerefMut};

use chrono::Duration;
use slog::{debug, info, o, trace, warn, Drain, Logger};
use timer::Guard;

use crate::connection::Connection;
use crate::connection_pool::types::{
    ConnectionData, ConnectionPoolOptions, ConnectionPoolStats, ProtectedData,
};
use crate::host::Host;

// Connection health check interval in seconds
const DEFAULT_CONNECTION_CHECK_INTERVAL: u64 = 30;

type CreateConnection<C> = Box<dyn Fn(&Host) -> C + Send + Sync>;

/// A pool of idle persistent connections, kept per host.
///
/// Checking a connection out with [`get`](#method.get) pops the most
/// recently returned idle connection for the host, or creates a new one when
/// the idle list is empty. The pool never blocks waiting for a connection and
/// only holds its lock while an idle list is mutated, never across network
/// I/O.
pub struct ConnectionPool<C>
where
    C: Connection,
{
    protected_data: ProtectedData<C>,
    create_connection: CreateConnection<C>,
    max_idle: Option<u32>,
    log: Logger,
    connection_check_timer: Option<timer::Timer>,
    _connection_check_timer_guard: Option<Guard>,
}

impl<C> Debug for ConnectionPool<C>
where
    C: Connection + Debug,
{
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("protected_data", &self.protected_data)
            .field("max_idle", &self.max_idle)
            .field("log", &self.log)
            .finish()
    }
}

impl<C> ConnectionPool<C>
where
    C: Connection,
{
    pub fn new<I, F>(
        cpo: ConnectionPoolOptions,
        hosts: I,
        create_connection: F,
    ) -> Self
    where
        I: IntoIterator<Item = Host>,
        F: Fn(&Host) -> C + Send + Sync + 'static,
    {
        let logger = cpo
            .log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));

        let connection_data = ConnectionData::new(hosts.into_iter().collect());
        let protected_data = ProtectedData::new(connection_data);

        let connection_check_interval = cpo
            .connection_check_interval
            .unwrap_or(DEFAULT_CONNECTION_CHECK_INTERVAL);

        let connection_check_timer = timer::Timer::new();

        let connection_check_timer_guard = start_connection_check(
            &connection_check_timer,
            connection_check_interval,
            protected_data.clone(),
            cpo.max_idle,
            logger.clone(),
        );

        ConnectionPool {
            protected_data,
            create_connection: Box::new(create_connection),
            max_idle: cpo.max_idle,
            log: logger,
            connection_check_timer: Some(connection_check_timer),
            _connection_check_timer_guard: Some(connection_check_timer_guard),
        }
    }

    pub fn log(&self) -> &Logger {
        &self.log
    }

    /// Add a host to the membership. Returns false if it is already a member.
    pub fn add_host(&self, host: Host) -> bool {
        let added = self.protected_data.connection_data_lock().insert(host.clone());
        if added {
            info!(self.log, "added host"; "host" => %host);
        }
        added
    }

    /// Remove a host from the membership and close its idle connections.
    /// Connections checked out for the host are unaffected, and are closed
    /// when they are returned.
    pub fn remove_host(&self, host: &Host) -> bool {
        let removed = self.protected_data.connection_data_lock().remove(host);
        match removed {
            Some(idle) => {
                info!(self.log, "removed host";
                    "host" => %host, "idle_connections" => idle.len());
                idle.into_iter()
                    .for_each(|conn| close_connection(&self.log, host, conn));
                true
            }
            None => false,
        }
    }

    /// The member hosts in insertion order.
    pub fn hosts(&self) -> Vec<Host> {
        self.protected_data.connection_data_lock().hosts.clone()
    }

    pub fn contains(&self, host: &Host) -> bool {
        self.protected_data
            .connection_data_lock()
            .idle
            .contains_key(host)
    }

    pub fn idle_count(&self, host: &Host) -> usize {
        self.protected_data.connection_data_lock().idle_count(host)
    }

    /// Idle counts for several hosts, read under a single lock.
    pub fn idle_counts(&self, hosts: &[Host]) -> Vec<usize> {
        let connection_data = self.protected_data.connection_data_lock();
        hosts.iter().map(|h| connection_data.idle_count(h)).collect()
    }

    pub fn stats(&self) -> ConnectionPoolStats {
        self.protected_data.connection_data_lock().stats()
    }

    /// Check out a connection for `host`: an idle one if any passes its
    /// validity check, otherwise a newly created one. Invalid idle
    /// connections found on the way are closed.
    pub fn get(&self, host: &Host) -> PoolConnection<C> {
        loop {
            let m_conn = {
                let mut connection_data =
                    self.protected_data.connection_data_lock();
                let m_conn = connection_data
                    .idle
                    .get_mut(host)
                    .and_then(|idle| idle.pop_back());
                connection_data.claimed += 1u32.into();
                m_conn
            };

            match m_conn {
                Some(mut conn) => {
                    if conn.is_valid() {
                        trace!(self.log, "found idle connection"; "host" => %host);
                        return self.claimed(host, conn);
                    }
                    debug!(self.log, "discarding invalid idle connection";
                        "host" => %host);
                    self.unclaim();
                    close_connection(&self.log, host, conn);
                }
                None => {
                    trace!(self.log, "creating connection"; "host" => %host);
                    let conn = (self.create_connection)(host);
                    return self.claimed(host, conn);
                }
            }
        }
    }

    /// Return an idle connection for `host`. Broken connections, connections
    /// beyond the idle limit and connections for hosts that are no longer
    /// members are closed instead.
    pub fn put(&self, host: &Host, conn: C) {
        self.replace(host, conn, false)
    }

    fn claimed(&self, host: &Host, conn: C) -> PoolConnection<C> {
        PoolConnection {
            connection_pool: self,
            host: host.clone(),
            connection: Some(conn),
        }
    }

    fn unclaim(&self) {
        let mut connection_data = self.protected_data.connection_data_lock();
        connection_data.claimed = connection_data.claimed.saturating_dec();
    }

    fn replace(&self, host: &Host, conn: C, claimed: bool) {
        if conn.has_broken() {
            if claimed {
                self.unclaim();
            }
            debug!(self.log, "found a broken connection, not returning to the pool";
                "host" => %host);
            close_connection(&self.log, host, conn);
            return;
        }

        let rejected = {
            let mut connection_data = self.protected_data.connection_data_lock();
            if claimed {
                connection_data.claimed = connection_data.claimed.saturating_dec();
            }
            let max_idle = self.max_idle;
            match connection_data.idle.get_mut(host) {
                Some(idle) if max_idle.map_or(true, |max| idle.len() < max as usize) => {
                    idle.push_back(conn);
                    None
                }
                Some(_) => Some((conn, "idle limit reached")),
                None => Some((conn, "host is no longer a member")),
            }
        };

        if let Some((conn, reason)) = rejected {
            debug!(self.log, "closing returned connection";
                "host" => %host, "reason" => reason);
            close_connection(&self.log, host, conn);
        }
    }
}

impl<C> Drop for ConnectionPool<C>
where
    C: Connection,
{
    fn drop(&mut self) {
        // Dropping the guard cancels the schedule, dropping the timer stops
        // its thread.
        self._connection_check_timer_guard.take();
        self.connection_check_timer.take();

        let mut connection_data = self.protected_data.connection_data_lock();
        let idle: Vec<(Host, VecDeque<C>)> = connection_data.idle.drain().collect();
        connection_data.hosts.clear();
        drop(connection_data);

        for (host, conns) in idle {
            conns
                .into_iter()
                .for_each(|conn| close_connection(&self.log, &host, conn));
        }
    }
}

/// A connection checked out of the pool. It is returned to the pool when it
/// falls out of scope, unless it is broken.
pub struct PoolConnection<'a, C>
where
    C: Connection,
{
    connection_pool: &'a ConnectionPool<C>,
    host: Host,
    connection: Option<C>,
}

impl<'a, C> PoolConnection<'a, C>
where
    C: Connection,
{
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Close the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if let Some(conn) = self.connection.take() {
            self.connection_pool.unclaim();
            close_connection(&self.connection_pool.log, &self.host, conn);
        }
    }

    /// Take the connection out of the pool's accounting. It may be handed
    /// back later with [`ConnectionPool::put`](struct.ConnectionPool.html#method.put).
    pub fn detach(mut self) -> Option<C> {
        let conn = self.connection.take();
        if conn.is_some() {
            self.connection_pool.unclaim();
        }
        conn
    }
}

impl<'a, C> Debug for PoolConnection<'a, C>
where
    C: Connection + Debug,
{
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("PoolConnection")
            .field("host", &self.host)
            .field("connection", &self.connection)
            .finish()
    }
}

impl<'a, C> Drop for PoolConnection<'a, C>
where
    C: Connection,
{
    fn drop(&mut self) {
        if let Some(conn) = self.connection.take() {
            self.connection_pool.replace(&self.host, conn, true);
        }
    }
}

impl<'a, C> Deref for PoolConnection<'a, C>
where
    C: Connection,
{
    type Target = C;

    fn deref(&self) -> &C {
        self.connection
            .as_ref()
            .expect("pool connection is present until dropped")
    }
}

impl<'a, C> DerefMut for PoolConnection<'a, C>
where
    C: Connection,
{
    fn deref_mut(&mut self) -> &mut C {
        self.connection
            .as_mut()
            .expect("pool connection is present until dropped")
    }
}

fn close_connection<C>(log: &Logger, host: &Host, mut conn: C)
where
    C: Connection,
{
    match conn.close() {
        Ok(()) => trace!(log, "closed connection"; "host" => %host),
        Err(err) => {
            warn!(log, "error closing connection"; "host" => %host, "error" => %err)
        }
    }
}

/// Start a thread to run periodic health checks on the idle connections
fn start_connection_check<C>(
    timer: &timer::Timer,
    conn_check_interval: u64,
    protected_data: ProtectedData<C>,
    max_idle: Option<u32>,
    log: Logger,
) -> Guard
where
    C: Connection,
{
    debug!(
        log,
        "starting connection health task, interval {} seconds",
        conn_check_interval
    );
    timer.schedule_repeating(
        Duration::seconds(conn_check_interval as i64),
        move || check_pool_connections(protected_data.clone(), max_idle, log.clone()),
    )
}

// The idle lists are taken out of the pool for the duration of the checks,
// so `get` creates fresh connections in the meantime rather than waiting.
// Connections that pass go back in front of anything returned since, or are
// closed if their host was removed or its list filled up.
fn check_pool_connections<C>(
    protected_data: ProtectedData<C>,
    max_idle: Option<u32>,
    log: Logger,
) where
    C: Connection,
{
    let taken: Vec<(Host, VecDeque<C>)> = {
        let mut connection_data = protected_data.connection_data_lock();
        connection_data
            .idle
            .iter_mut()
            .filter(|(_, idle)| !idle.is_empty())
            .map(|(host, idle)| (host.clone(), std::mem::take(idle)))
            .collect()
    };

    let mut removed = Vec::new();
    let mut valid = Vec::with_capacity(taken.len());
    for (host, idle) in taken {
        let mut kept = VecDeque::with_capacity(idle.len());
        for mut conn in idle {
            if conn.is_valid() {
                kept.push_back(conn);
            } else {
                removed.push((host.clone(), conn));
            }
        }
        valid.push((host, kept));
    }

    let mut rejected = Vec::new();
    {
        let mut connection_data = protected_data.connection_data_lock();
        for (host, kept) in valid {
            match connection_data.idle.get_mut(&host) {
                Some(idle) => {
                    for conn in kept.into_iter().rev() {
                        if max_idle.map_or(true, |max| idle.len() < max as usize) {
                            idle.push_front(conn);
                        } else {
                            rejected.push((host.clone(), conn));
                        }
                    }
                }
                None => rejected.extend(kept.into_iter().map(|conn| (host.clone(), conn))),
            }
        }
    }

    if removed.is_empty() && rejected.is_empty() {
        trace!(log, "connection check found no invalid idle connections");
        return;
    }

    debug!(log, "removing idle connections";
        "invalid" => removed.len(), "rejected" => rejected.len());
    for (host, conn) in removed.into_iter().chain(rejected) {
        close_connection(&log, &host, conn);
    }
}
