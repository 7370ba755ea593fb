// Copyright 2026 Fanout contributors

//! Pooled, load-balanced and sharded dispatch to a cluster of query nodes
//!
//! Fanout is a client-side library for talking to a set of HTTP servers that
//! either all serve the same data (replicas) or each serve a subset of it
//! (shards). It is built from four layers, each using the one below it:
//!
//! * a [`Connection`](connection/trait.Connection.html) is a persistent,
//!   reusable channel to one host;
//! * a [`ConnectionPool`](connection_pool/struct.ConnectionPool.html) keeps
//!   the idle connections of every host, growing on demand;
//! * [`Resources`](resources/struct.Resources.html) dispatches a request to
//!   one host (unicast) or to all of them (broadcast);
//! * [`Shards`](shards/struct.Shards.html) maps shard keys to the hosts that
//!   own them and dispatches per key, or across keys to a smallest covering
//!   set of hosts (multicast).
//!
//! ## Load balancing
//!
//! A unicast picks its host at random, weighted by the number of idle
//! connections the pool holds for each candidate. A host that has recently
//! served many concurrent requests has more idle connections and is
//! therefore more likely to be chosen. When no candidate has an idle
//! connection the choice is uniform.
//!
//! ## Timeouts
//!
//! A server that gives up on a request answers with the 408 status. Fanout
//! treats that, an expired read deadline, and a keep-alive connection found
//! closed by the server as the same timeout signal: the connection is
//! discarded and the request is sent again on a fresh one, up to
//! `max_timeout_retries` times per host. Every other error is returned to
//! the caller as an [`Error`](error/enum.Error.html).
//!
//! ## Example
//!
//! ```rust,no_run
//! use fanout::request::{Body, Method};
//! use fanout::resources::{Resources, ResourcesOptions};
//! use fanout::shards::Shards;
//!
//! let resources = Resources::new(
//!     vec!["node1:8080", "node2:8080", "node3:8080"],
//!     ResourcesOptions::default(),
//! );
//! let stats = resources.unicast(Method::Get, "/stats", &Body::Empty)?;
//! let everywhere = resources.broadcast(Method::Post, "/refresh", &Body::Empty)?;
//!
//! let shards = Shards::new(
//!     vec![
//!         (0, vec!["node1:8080", "node2:8080"]),
//!         (1, vec!["node2:8080", "node3:8080"]),
//!     ],
//!     ResourcesOptions::default(),
//! );
//! // node2 owns both keys, so this is sent to node2 alone
//! let hits = shards.multicast(
//!     &[0, 1],
//!     Method::Get,
//!     "/search",
//!     &Body::form(vec![("q", "text")]),
//! )?;
//! # Ok::<(), fanout::error::Error>(())
//! ```

pub mod connection;
pub mod connection_pool;
pub mod cover;
pub mod error;
pub mod host;
pub mod http_connection;
pub mod request;
pub mod resources;
pub mod select;
pub mod shards;

pub use crate::error::Error;
pub use crate::host::Host;
pub use crate::request::{Body, Content, Method};
pub use crate::resources::{Resources, ResourcesOptions};
pub use crate::shards::{ShardMap, Shards};
