// Copyright 2026 Fanout contributors

use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::json;
use slog::{info, o, Drain, Logger};

use fanout::connection::Connection;
use fanout::error::Error;
use fanout::host::Host;
use fanout::request::{Body, Method, Response};
use fanout::resources::ResourcesOptions;
use fanout::shards::{ShardMap, Shards};

// Answers every request after a short delay with the host name and path.
#[derive(Debug)]
pub struct DummyConnection {
    host: Host,
    path: Option<String>,
}

impl DummyConnection {
    fn new(host: &Host) -> Self {
        DummyConnection {
            host: host.clone(),
            path: None,
        }
    }
}

impl Connection for DummyConnection {
    fn request(&mut self, _: Method, path: &str, _: &Body) -> Result<(), Error> {
        self.path = Some(path.to_string());
        Ok(())
    }

    fn response(&mut self) -> Result<Response, Error> {
        thread::sleep(Duration::from_millis(50));
        let body = json!({ "host": self.host.as_str(), "path": self.path.take() });
        Ok(Response {
            host: self.host.clone(),
            status: 200,
            reason: String::from("OK"),
            headers: vec![(String::from("Content-Type"), String::from("application/json"))],
            body: body.to_string().into_bytes(),
        })
    }

    fn has_broken(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

fn main() {
    let plain = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let log = Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("build-id" => "0.1.0"),
    );

    info!(log, "running basic fanout example");

    // Four shards over four hosts, each shard replicated on two of them
    let map = ShardMap::from_pairs(vec![
        ("node0:8080", 0),
        ("node1:8080", 0),
        ("node1:8080", 1),
        ("node2:8080", 1),
        ("node2:8080", 2),
        ("node3:8080", 2),
        ("node3:8080", 3),
        ("node0:8080", 3),
    ]);
    let opts = ResourcesOptions {
        limit: Some(4),
        log: Some(log.clone()),
        ..Default::default()
    };
    let shards = Arc::new(Shards::with_connector(map, opts, DummyConnection::new));

    // Concurrent unicasts grow the idle lists of the hosts they land on
    let barrier = Arc::new(Barrier::new(4));
    let handles: Vec<_> = (0..4u32)
        .map(|key| {
            let shards = shards.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                shards.unicast(&key, Method::Get, "/search", &Body::Empty)
            })
        })
        .collect();
    for handle in handles {
        match handle.join() {
            Ok(Ok(content)) => info!(log, "unicast"; "content" => ?content),
            Ok(Err(err)) => info!(log, "unicast failed"; "error" => %err),
            Err(_) => info!(log, "unicast thread panicked"),
        }
    }
    info!(log, "pool after unicasts"; "stats" => ?shards.resources().stats());

    // Every shard through the fewest hosts
    match shards.multicast(&[0, 1, 2, 3], Method::Get, "/search", &Body::Empty) {
        Ok(results) => {
            for (host, content) in results {
                info!(log, "multicast"; "host" => %host, "content" => ?content);
            }
        }
        Err(err) => info!(log, "multicast failed"; "error" => %err),
    }

    match shards
        .resources()
        .broadcast(Method::Post, "/update", &Body::Empty)
    {
        Ok(results) => info!(log, "broadcast"; "responses" => results.len()),
        Err(err) => info!(log, "broadcast failed"; "error" => %err),
    }
    info!(log, "pool after broadcast"; "stats" => ?shards.resources().stats());
}
