// Key placement and hand-off across joins and departures, on the m = 3 demo
// ring {0, 3, 6}.
use std::time::Duration;

use anyhow::Result;

use chordnet::directory::{DirectoryClient, RunningRegistry};
use chordnet::node::NodeConfig;
use chordnet::ring::{Id, IdSpace};
use chordnet::rpc::{http_client, RemoteNode};
use chordnet::server::{start_node, NodeOptions, RunningNode};

const URLS: [&str; 4] = ["cubaeduca.cu", "etecsa.cu", "uci.cu", "evea.uh.cu"];

async fn start_test_registry() -> Result<RunningRegistry> {
    let _ = env_logger::builder().is_test(true).try_init();
    Ok(chordnet::directory::start_registry("127.0.0.1", 0).await?)
}

async fn start_atomic_node(ns_addr: &str, id: u64) -> Result<RunningNode> {
    Ok(start_node(NodeOptions {
        bits: 3,
        id: Some(id),
        anchor: None,
        node: NodeConfig {
            use_stabilization: false,
            // Roomy enough that eviction never interferes with the hand-off
            // assertions.
            cache_size: 64,
            ..NodeConfig::default()
        },
        ns_addr: ns_addr.to_string(),
        host: "127.0.0.1".to_string(),
    })
    .await?)
}

fn remote(node: &RunningNode) -> RemoteNode {
    RemoteNode::new(node.id, node.base_url.clone(), http_client().unwrap())
}

/// First live id clockwise-at-or-after `key`.
fn owner_of(key: Id, live: &[Id]) -> Id {
    let mut sorted = live.to_vec();
    sorted.sort_unstable();
    *sorted.iter().find(|id| **id >= key).unwrap_or(&sorted[0])
}

/// Enough distinct keys to land a few in every arc of the demo ring.
fn workload(space: &IdSpace, count: usize) -> Vec<(String, Id)> {
    (0..count)
        .map(|i| {
            let key = format!("key-{i}");
            let hash = space.hash_key(&key);
            (key, hash)
        })
        .collect()
}

#[actix_web::test]
async fn test_key_placement_follows_the_hash() -> Result<()> {
    let registry = start_test_registry().await?;
    let ns = registry.addr_string();
    let space = IdSpace::new(3);

    let n0 = start_atomic_node(&ns, 0).await?;
    let n3 = start_atomic_node(&ns, 3).await?;
    let n6 = start_atomic_node(&ns, 6).await?;
    let c0 = remote(&n0);

    for url in URLS {
        c0.insert(url, &format!("page of {url}"), 0).await?;
    }

    // Every node answers every key with the same value.
    for node in [&remote(&n0), &remote(&n3), &remote(&n6)] {
        for url in URLS {
            assert_eq!(
                node.get(url, 0).await?,
                Some(format!("page of {url}")),
                "lookup of {url} via node {}",
                node.id()
            );
        }
    }

    // The storing node is the successor of the key's hash.
    for url in URLS {
        let expected = owner_of(space.hash_key(url), &[0, 3, 6]);
        for node in [&remote(&n0), &remote(&n3), &remote(&n6)] {
            let stored = node.keys().await?.contains(&url.to_string());
            assert_eq!(
                stored,
                node.id() == expected,
                "{url} (hash {}) should live on {expected} only",
                space.hash_key(url)
            );
        }
    }

    n0.kill().await;
    n3.kill().await;
    n6.kill().await;
    registry.stop().await;
    Ok(())
}

// When a node joins, the keys in (predecessor, new-node] must move off the
// old owner before the join call returns.
#[actix_web::test]
async fn test_handoff_on_join() -> Result<()> {
    let registry = start_test_registry().await?;
    let ns = registry.addr_string();
    let space = IdSpace::new(3);

    let n0 = start_atomic_node(&ns, 0).await?;
    let n6 = start_atomic_node(&ns, 6).await?;
    let c0 = remote(&n0);
    let c6 = remote(&n6);

    let keys = workload(&space, 24);
    for (key, _) in &keys {
        c0.insert(key, "v", 0).await?;
    }

    let n3 = start_atomic_node(&ns, 3).await?;
    let c3 = remote(&n3);

    let on3 = c3.keys().await?;
    let on6 = c6.keys().await?;
    for (key, hash) in &keys {
        let claimed = space.in_between(*hash, 1, 4, true); // (0, 3]
        if claimed {
            assert!(on3.contains(key), "{key} (hash {hash}) should be on 3");
            assert!(!on6.contains(key), "{key} (hash {hash}) should have left 6");
        } else {
            assert!(!on3.contains(key), "{key} (hash {hash}) should not be on 3");
        }
    }

    n0.kill().await;
    n3.kill().await;
    n6.kill().await;
    registry.stop().await;
    Ok(())
}

// Graceful departure: the leaver's keys land on its successor and every key
// keeps answering with its original value.
#[actix_web::test]
async fn test_graceful_departure() -> Result<()> {
    let registry = start_test_registry().await?;
    let ns = registry.addr_string();
    let client = http_client()?;
    let dir = DirectoryClient::new(&ns, client);

    let n0 = start_atomic_node(&ns, 0).await?;
    let n3 = start_atomic_node(&ns, 3).await?;
    let n6 = start_atomic_node(&ns, 6).await?;
    let c0 = remote(&n0);
    let c3 = remote(&n3);
    let c6 = remote(&n6);

    let keys: Vec<String> = (0..6).map(|i| format!("departure-{i}")).collect();
    for key in &keys {
        c0.insert(key, &format!("value of {key}"), 0).await?;
    }

    let formerly_on_3 = c3.keys().await?;
    c3.disconnect().await?;

    // The registration is released asynchronously after the hand-off.
    let mut deregistered = false;
    for _ in 0..50 {
        if !dir.chord_ids().await?.contains(&3) {
            deregistered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(deregistered, "node 3 should leave the directory");

    // Everything node 3 held is now on its successor.
    let on6 = c6.keys().await?;
    for key in &formerly_on_3 {
        assert!(on6.contains(key), "{key} should have moved to node 6");
    }

    // Every key is still retrievable, from either surviving node.
    for entry_point in [&c0, &c6] {
        for key in &keys {
            assert_eq!(
                entry_point.get(key, 0).await?,
                Some(format!("value of {key}")),
                "lookup of {key} via node {}",
                entry_point.id()
            );
        }
    }

    n0.kill().await;
    n6.kill().await;
    registry.stop().await;
    Ok(())
}
