// Copyright 2026 Fanout contributors

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use derive_more::{Add, AddAssign, Display, From, Into};
use slog::Logger;

use crate::connection::Connection;
use crate::host::Host;

/// The connection counts for the connection pool
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectionPoolStats {
    /// The number of member hosts
    pub hosts: usize,
    /// The count of idle connections across all hosts
    pub idle_connections: ConnectionCount,
    /// The count of connections currently checked out of the pool
    pub claimed_connections: ConnectionCount,
}

/// The configuration options for a fanout connection pool.
#[derive(Debug, Default)]
pub struct ConnectionPoolOptions {
    /// An optional maximum number of idle connections cached per host.
    /// Connections returned beyond the limit are closed. If not specified the
    /// idle lists are unbounded and grow with the peak concurrency per host.
    pub max_idle: Option<u32>,
    /// Optional connection check interval in seconds. This represents the
    /// length of the period of the idle connection check task. If not
    /// specified the default is 30 seconds.
    pub connection_check_interval: Option<u64>,
    /// An optional `slog` logger instance. If none is provided then the
    /// logging will fall back to using the
    /// [`slog-stdlog`](https://docs.rs/slog-stdlog) drain which is
    /// essentially the same as using the rust standard
    /// [`log`](https://docs.rs/log) crate.
    pub log: Option<Logger>,
}

/// A newtype wrapper around u32 used for counts of connections maintained by
/// the connection pool.
#[derive(
    Add,
    AddAssign,
    Clone,
    Copy,
    Debug,
    Default,
    Display,
    Eq,
    From,
    Into,
    Ord,
    PartialOrd,
    PartialEq,
)]
pub struct ConnectionCount(u32);

impl ConnectionCount {
    pub fn saturating_dec(self) -> Self {
        ConnectionCount(self.0.saturating_sub(1))
    }
}

impl From<usize> for ConnectionCount {
    fn from(count: usize) -> Self {
        ConnectionCount(u32::try_from(count).unwrap_or(u32::MAX))
    }
}

// The internal data structures used to manage the connection pool. The host
// list preserves insertion order and is the membership; `idle` holds an entry
// for every member.
#[doc(hidden)]
#[derive(Debug)]
pub struct ConnectionData<C> {
    pub hosts: Vec<Host>,
    pub idle: HashMap<Host, VecDeque<C>>,
    pub claimed: ConnectionCount,
}

impl<C> ConnectionData<C>
where
    C: Connection,
{
    #[doc(hidden)]
    pub fn new(hosts: Vec<Host>) -> Self {
        let mut data = ConnectionData {
            hosts: Vec::with_capacity(hosts.len()),
            idle: HashMap::with_capacity(hosts.len()),
            claimed: ConnectionCount::from(0u32),
        };
        for host in hosts {
            data.insert(host);
        }
        data
    }

    pub fn insert(&mut self, host: Host) -> bool {
        if self.idle.contains_key(&host) {
            return false;
        }
        self.idle.insert(host.clone(), VecDeque::new());
        self.hosts.push(host);
        true
    }

    pub fn remove(&mut self, host: &Host) -> Option<VecDeque<C>> {
        let idle = self.idle.remove(host)?;
        self.hosts.retain(|h| h != host);
        Some(idle)
    }

    pub fn idle_count(&self, host: &Host) -> usize {
        self.idle.get(host).map(VecDeque::len).unwrap_or(0)
    }

    pub fn stats(&self) -> ConnectionPoolStats {
        ConnectionPoolStats {
            hosts: self.hosts.len(),
            idle_connections: self
                .idle
                .values()
                .map(VecDeque::len)
                .sum::<usize>()
                .into(),
            claimed_connections: self.claimed,
        }
    }
}

// Protected access to the internal connection pool data structures
#[doc(hidden)]
#[derive(Debug)]
pub struct ProtectedData<C>(Arc<Mutex<ConnectionData<C>>>);

impl<C> ProtectedData<C>
where
    C: Connection,
{
    pub fn new(connection_data: ConnectionData<C>) -> Self {
        ProtectedData(Arc::new(Mutex::new(connection_data)))
    }

    // The data is a set of idle lists that stay consistent across a panic in
    // another thread, so a poisoned lock is still usable.
    pub fn connection_data_lock(&self) -> MutexGuard<ConnectionData<C>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
impl<C> ProtectedData<C> {
    pub fn is_locked(&self) -> bool {
        self.0.try_lock().is_err()
    }
}

impl<C> Clone for ProtectedData<C>
where
    C: Connection,
{
    fn clone(&self) -> ProtectedData<C> {
        ProtectedData(Arc::clone(&self.0))
    }
}
