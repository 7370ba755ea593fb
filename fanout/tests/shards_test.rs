// Copyright 2026 Fanout contributors

mod common;

use std::collections::BTreeSet;

use serde_json::json;

use fanout::error::Error;
use fanout::host::Host;
use fanout::request::{Body, Content, Method};
use fanout::resources::ResourcesOptions;
use fanout::shards::{ShardMap, Shards};

use common::{Event, Outcome, Script, ScriptedConnection};

fn shards(map: ShardMap<u32>, script: &Script) -> Shards<u32, ScriptedConnection> {
    let options = ResourcesOptions {
        log: Some(common::log()),
        ..Default::default()
    };
    Shards::with_connector(map, options, script.connector())
}

// Three hosts, each replicating two of three keys.
fn rotated() -> ShardMap<u32> {
    ShardMap::from_pairs(vec![
        ("h0:1", 0),
        ("h1:1", 0),
        ("h2:1", 1),
        ("h0:1", 1),
        ("h1:1", 2),
        ("h2:1", 2),
    ])
}

fn disjoint() -> ShardMap<u32> {
    ShardMap::new(vec![
        (0, vec!["a0:1", "a1:1"]),
        (1, vec!["b0:1", "b1:1"]),
        (2, vec!["c0:1", "c1:1"]),
    ])
}

fn owns(shards: &Shards<u32, ScriptedConnection>, host: &Host, key: u32) -> bool {
    shards.hosts(&key).map_or(false, |owners| owners.contains(host))
}

#[test]
fn multicast_single_key_contacts_one_host() {
    let script = Script::new();
    let shards = shards(disjoint(), &script);
    for key in 0..3 {
        let results = shards
            .multicast(&[key], Method::Get, "/search", &Body::Empty)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(owns(&shards, &results[0].0, key));
    }
}

#[test]
fn multicast_overlapping_keys_uses_shared_host() {
    let script = Script::new();
    let shards = shards(rotated(), &script);
    for _ in 0..10 {
        let results = shards
            .multicast(&[0, 1], Method::Get, "/search", &Body::Empty)
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, Host::from("h0:1"));
    }

    let results = shards
        .multicast(&[0, 1, 2], Method::Get, "/search", &Body::Empty)
        .unwrap();
    assert_eq!(results.len(), 2);
    for key in 0..3 {
        assert!(results.iter().any(|(host, _)| owns(&shards, host, key)));
    }
}

#[test]
fn multicast_disjoint_keys_uses_one_host_each() {
    let script = Script::new();
    let shards = shards(disjoint(), &script);
    let results = shards
        .multicast(&[0, 1, 2], Method::Get, "/search", &Body::Empty)
        .unwrap();
    assert_eq!(results.len(), 3);
    for (key, (host, content)) in results.iter().enumerate() {
        assert!(owns(&shards, host, key as u32));
        assert_eq!(content, &Content::Json(json!({ "host": host.as_str() })));
    }
}

#[test]
fn cover_prefers_hosts_with_idle_connections() {
    let script = Script::new();
    let shards = shards(disjoint(), &script);
    let warm = Host::from("b1:1");
    let conns: Vec<_> = (0..3)
        .map(|_| {
            shards
                .resources()
                .request(&warm, Method::Get, "/", &Body::Empty)
                .unwrap()
        })
        .collect();
    for conn in conns {
        shards.resources().response(conn).unwrap();
    }

    for _ in 0..10 {
        let cover = shards.cover(&[0, 1, 2]).unwrap();
        assert!(cover.contains(&warm), "{:?}", cover);
    }
}

#[test]
fn unicast_survives_while_one_owner_is_reachable() {
    let script = Script::new();
    let map = ShardMap::new(vec![(0, vec!["a:1", "b:1", "c:1"])]);
    let shards = shards(map, &script);

    script.unreachable("a:1");
    script.unreachable("b:1");
    for _ in 0..10 {
        let content = shards.unicast(&0, Method::Get, "/x", &Body::Empty).unwrap();
        assert_eq!(content, Content::Json(json!({ "host": "c:1" })));
    }

    script.unreachable("c:1");
    let err = shards.unicast(&0, Method::Get, "/x", &Body::Empty).unwrap_err();
    assert!(matches!(err, Error::Connectivity { .. }), "{:?}", err);
}

#[test]
fn unicast_hides_timeout_signal() {
    let script = Script::new();
    script.push("a:1", Outcome::Reply(408, json!(null)));
    let map = ShardMap::new(vec![(0, vec!["a:1"])]);
    let shards = shards(map, &script);

    let content = shards.unicast(&0, Method::Get, "/x", &Body::Empty).unwrap();
    assert_eq!(content, Content::Json(json!({ "host": "a:1" })));
    assert_eq!(script.count(&Event::Sent(Host::from("a:1"))), 2);
}

#[test]
fn broadcast_reaches_every_live_owner() {
    let script = Script::new();
    let shards = shards(rotated(), &script);

    let results = shards.broadcast(&1, Method::Get, "/", &Body::Empty).unwrap();
    let hosts: BTreeSet<String> = results
        .iter()
        .filter_map(|content| content.as_json()?["host"].as_str().map(String::from))
        .collect();
    assert_eq!(hosts, ["h0:1", "h2:1"].iter().map(|h| h.to_string()).collect());

    shards.resources().remove(&Host::from("h2:1"));
    let results = shards.broadcast(&1, Method::Get, "/", &Body::Empty).unwrap();
    assert_eq!(results, vec![Content::Json(json!({ "host": "h0:1" }))]);
}

#[test]
fn broadcast_fails_when_an_owner_is_down() {
    let script = Script::new();
    script.unreachable("h0:1");
    let shards = shards(rotated(), &script);

    let err = shards.broadcast(&0, Method::Get, "/", &Body::Empty).unwrap_err();
    assert!(matches!(err, Error::Connectivity { .. }));

    // A multicast can still avoid the down host once it is removed
    shards.resources().remove(&Host::from("h0:1"));
    let results = shards
        .multicast(&[0, 1, 2], Method::Get, "/", &Body::Empty)
        .unwrap();
    assert_eq!(results.len(), 2);
}

#[test]
fn uncoverable_keys_are_configuration_errors() {
    let script = Script::new();
    let shards = shards(disjoint(), &script);

    shards.resources().remove(&Host::from("c0:1"));
    shards.resources().remove(&Host::from("c1:1"));
    match shards.multicast(&[0, 2], Method::Get, "/", &Body::Empty) {
        Err(Error::Configuration(msg)) => assert!(msg.contains('2'), "{}", msg),
        other => panic!("unexpected result: {:?}", other),
    }
    assert!(matches!(
        shards.broadcast(&5, Method::Get, "/", &Body::Empty),
        Err(Error::Configuration(_))
    ));
    assert!(script.events().is_empty());
}
