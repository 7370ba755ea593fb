// Copyright 2026 Fanout contributors

//! Partition-aware dispatch.
//!
//! A [`ShardMap`] assigns every shard key the set of hosts that replicate
//! that key's partition. [`Shards`] layers it over a single [`Resources`]
//! spanning all of those hosts, so connections are pooled per host no matter
//! how many keys a host serves.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Debug, Display, Formatter};

use slog::{debug, trace};

use crate::connection::Connection;
use crate::cover::{self, MAX_COVER_CANDIDATES};
use crate::error::Error;
use crate::host::Host;
use crate::http_connection::HttpConnection;
use crate::request::{Body, Content, Method};
use crate::resources::{Resources, ResourcesOptions};
use crate::select;

/// An immutable mapping of shard keys to their owner hosts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardMap<K>
where
    K: Ord,
{
    owners: BTreeMap<K, BTreeSet<Host>>,
}

impl<K> ShardMap<K>
where
    K: Ord + Clone,
{
    /// Build a map from `(key, hosts)` entries. Entries repeating a key are
    /// merged.
    pub fn new<I, S, H>(shards: I) -> Self
    where
        I: IntoIterator<Item = (K, S)>,
        S: IntoIterator<Item = H>,
        H: Into<Host>,
    {
        let mut owners: BTreeMap<K, BTreeSet<Host>> = BTreeMap::new();
        for (key, hosts) in shards {
            owners
                .entry(key)
                .or_default()
                .extend(hosts.into_iter().map(Into::into));
        }
        ShardMap { owners }
    }

    /// Build a map from `(host, key)` pairs, one per key a host serves.
    pub fn from_pairs<I, H>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (H, K)>,
        H: Into<Host>,
    {
        ShardMap::new(
            pairs
                .into_iter()
                .map(|(host, key)| (key, std::iter::once(host))),
        )
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.owners.keys()
    }

    pub fn owners(&self, key: &K) -> Option<&BTreeSet<Host>> {
        self.owners.get(key)
    }

    /// Every host owning at least one key.
    pub fn hosts(&self) -> BTreeSet<Host> {
        self.owners.values().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Dispatch to the hosts of one or more shard keys.
pub struct Shards<K, C = HttpConnection>
where
    K: Ord,
    C: Connection,
{
    map: ShardMap<K>,
    resources: Resources<C>,
}

impl<K, C> Debug for Shards<K, C>
where
    K: Ord + Debug,
    C: Connection,
{
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Shards")
            .field("map", &self.map)
            .field("resources", &self.resources)
            .finish()
    }
}

impl<K> Shards<K, HttpConnection>
where
    K: Ord + Clone + Display,
{
    /// Create shards from `(key, hosts)` entries, connecting over HTTP.
    pub fn new<I, S, H>(shards: I, options: ResourcesOptions) -> Self
    where
        I: IntoIterator<Item = (K, S)>,
        S: IntoIterator<Item = H>,
        H: Into<Host>,
    {
        Shards::from_map(ShardMap::new(shards), options)
    }

    /// Create shards from `(host, key)` pairs, connecting over HTTP.
    pub fn from_pairs<I, H>(pairs: I, options: ResourcesOptions) -> Self
    where
        I: IntoIterator<Item = (H, K)>,
        H: Into<Host>,
    {
        Shards::from_map(ShardMap::from_pairs(pairs), options)
    }

    pub fn from_map(map: ShardMap<K>, options: ResourcesOptions) -> Self {
        let resources = Resources::new(map.hosts(), options);
        Shards { map, resources }
    }
}

impl<K, C> Shards<K, C>
where
    K: Ord + Clone + Display,
    C: Connection,
{
    /// Create shards whose connections are built by `create_connection`.
    pub fn with_connector<F>(
        map: ShardMap<K>,
        options: ResourcesOptions,
        create_connection: F,
    ) -> Self
    where
        F: Fn(&Host) -> C + Send + Sync + 'static,
    {
        let resources =
            Resources::with_connector(map.hosts(), options, create_connection);
        Shards { map, resources }
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.map.keys()
    }

    /// The configured owners of `key`, whether or not they are still members
    /// of the resources.
    pub fn hosts(&self, key: &K) -> Option<&BTreeSet<Host>> {
        self.map.owners(key)
    }

    pub fn map(&self) -> &ShardMap<K> {
        &self.map
    }

    /// The shared resources. Removing a host here takes it out of every
    /// key's candidates.
    pub fn resources(&self) -> &Resources<C> {
        &self.resources
    }

    /// Send a request to one live owner of `key`.
    pub fn unicast(
        &self,
        key: &K,
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<Content, Error> {
        let owners = self.live_owners(std::slice::from_ref(key))?;
        let hosts: Vec<Host> = owners.into_iter().flatten().collect();
        self.resources.unicast_to(&hosts, method, path, body)
    }

    /// Send a request to every live owner of `key`.
    pub fn broadcast(
        &self,
        key: &K,
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<Vec<Content>, Error> {
        let owners = self.live_owners(std::slice::from_ref(key))?;
        let hosts: Vec<Host> = owners.into_iter().flatten().collect();
        self.resources.broadcast_to(&hosts, method, path, body)
    }

    /// Send a request to a smallest set of hosts that together own every one
    /// of `keys`, returning each host's response. The caller is responsible
    /// for merging them.
    pub fn multicast(
        &self,
        keys: &[K],
        method: Method,
        path: &str,
        body: &Body,
    ) -> Result<Vec<(Host, Content)>, Error> {
        let hosts = self.cover(keys)?;
        let contents = self.resources.broadcast_to(&hosts, method, path, body)?;
        Ok(hosts.into_iter().zip(contents).collect())
    }

    /// Choose the hosts a multicast over `keys` would be sent to.
    ///
    /// Among all covers of minimum size one is picked at random, weighted by
    /// the total idle connection count of its hosts. When there are too many
    /// owner combinations to enumerate, a greedy cover is used instead, which
    /// may be larger than the minimum.
    pub fn cover(&self, keys: &[K]) -> Result<Vec<Host>, Error> {
        let owner_sets = self.live_owners(keys)?;

        let candidates: Vec<Host> = owner_sets
            .iter()
            .flatten()
            .cloned()
            .collect::<BTreeSet<Host>>()
            .into_iter()
            .collect();
        let idle: HashMap<Host, usize> = candidates
            .iter()
            .cloned()
            .zip(self.resources.pool().idle_counts(&candidates))
            .collect();
        let idle_count = |host: &Host| idle.get(host).copied().unwrap_or(0);

        let cover = match cover::minimum_covers(&owner_sets, MAX_COVER_CANDIDATES) {
            Some(mut covers) => {
                let weights: Vec<usize> = covers
                    .iter()
                    .map(|cover| cover.iter().map(idle_count).sum())
                    .collect();
                let idx = select::weighted_index(&weights, &mut rand::thread_rng())
                    .unwrap_or(0);
                trace!(self.resources.log(), "chose minimum cover";
                    "candidates" => covers.len(), "size" => covers[idx].len());
                covers.swap_remove(idx)
            }
            None => {
                debug!(self.resources.log(), "too many owner combinations, using greedy cover";
                    "keys" => keys.len(),
                    "combinations" => cover::combinations(&owner_sets));
                cover::greedy_cover(&owner_sets, idle_count)
            }
        };
        Ok(cover.into_iter().collect())
    }

    // The owner sets of `keys` restricted to current members, or an error
    // naming every key that cannot be reached.
    fn live_owners(&self, keys: &[K]) -> Result<Vec<BTreeSet<Host>>, Error> {
        if keys.is_empty() {
            return Err(Error::Configuration(String::from("no shard keys given")));
        }

        let mut unknown = Vec::new();
        let mut unreachable = Vec::new();
        let mut owner_sets = Vec::with_capacity(keys.len());
        for key in keys {
            match self.map.owners(key) {
                None => unknown.push(key.to_string()),
                Some(owners) => {
                    let live: BTreeSet<Host> = owners
                        .iter()
                        .filter(|host| self.resources.contains(host))
                        .cloned()
                        .collect();
                    if live.is_empty() {
                        unreachable.push(key.to_string());
                    } else {
                        owner_sets.push(live);
                    }
                }
            }
        }

        match (unknown.is_empty(), unreachable.is_empty()) {
            (true, true) => Ok(owner_sets),
            (false, _) => Err(Error::Configuration(format!(
                "unknown shard keys: {}",
                unknown.join(", ")
            ))),
            (true, false) => Err(Error::Configuration(format!(
                "no live hosts for shard keys: {}",
                unreachable.join(", ")
            ))),
        }
    }
}
