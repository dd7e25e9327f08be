// Name-service contracts: idempotent registration, conflict on a stolen
// name, tag listing, and identifier exhaustion.
use anyhow::Result;

use chordnet::directory::DirectoryClient;
use chordnet::error::ChordError;
use chordnet::ring::IdSpace;
use chordnet::rpc::http_client;

async fn client() -> Result<(chordnet::directory::RunningRegistry, DirectoryClient)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = chordnet::directory::start_registry("127.0.0.1", 0).await?;
    let dir = DirectoryClient::new(&registry.addr_string(), http_client()?);
    Ok((registry, dir))
}

#[actix_web::test]
async fn test_register_is_idempotent_per_uri() -> Result<()> {
    let (registry, dir) = client().await?;

    dir.register_chord_node(4, "http://127.0.0.1:4000").await?;
    // Same name, same uri: fine.
    dir.register_chord_node(4, "http://127.0.0.1:4000").await?;
    // Same name, different uri: the compare-and-set loses.
    let conflict = dir.register_chord_node(4, "http://127.0.0.1:4001").await;
    assert!(matches!(conflict, Err(ChordError::NameConflict(_))));

    registry.stop().await;
    Ok(())
}

#[actix_web::test]
async fn test_resolve_and_remove() -> Result<()> {
    let (registry, dir) = client().await?;

    dir.register_chord_node(2, "http://127.0.0.1:4002").await?;
    let node = dir.resolve_chord(2).await?;
    assert_eq!(node.id(), 2);
    assert_eq!(node.base_url(), "http://127.0.0.1:4002");

    dir.remove_chord_node(2).await?;
    assert!(matches!(
        dir.resolve_chord(2).await,
        Err(ChordError::UnknownNode(_))
    ));
    // Removing again is harmless.
    dir.remove_chord_node(2).await?;

    registry.stop().await;
    Ok(())
}

#[actix_web::test]
async fn test_free_id_avoids_taken_ids_and_fails_when_full() -> Result<()> {
    let (registry, dir) = client().await?;
    let space = IdSpace::new(1);

    dir.register_chord_node(0, "http://127.0.0.1:4010").await?;
    let free = dir.free_chord_id(&space).await?;
    assert_eq!(free, 1);

    dir.register_chord_node(1, "http://127.0.0.1:4011").await?;
    let exhausted = dir.free_chord_id(&space).await;
    assert!(matches!(
        exhausted,
        Err(ChordError::IdentifiersExhausted(2))
    ));

    registry.stop().await;
    Ok(())
}

#[actix_web::test]
async fn test_listing_is_scoped_by_tag() -> Result<()> {
    let (registry, dir) = client().await?;

    dir.register_chord_node(0, "http://127.0.0.1:4020").await?;
    dir.register_chord_node(5, "http://127.0.0.1:4021").await?;
    dir.register("node.router.1", "http://127.0.0.1:4022", vec!["node.router".to_string()])
        .await?;

    assert_eq!(dir.chord_ids().await?, vec![0, 5]);
    let routers = dir.list(Some("node.router")).await?;
    assert_eq!(routers.len(), 1);
    assert_eq!(routers[0].name, "node.router.1");
    let everything = dir.list(None).await?;
    assert_eq!(everything.len(), 3);

    registry.stop().await;
    Ok(())
}
