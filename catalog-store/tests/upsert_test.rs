//! Integration tests against a live Postgres instance.
//! Run with: DATABASE_URL=... cargo test -p catalog-store -- --ignored

use catalog_core::{EnrichmentFields, Game};
use catalog_store::CatalogStore;

fn make_game(download_url: &str, region: &str) -> Game {
    Game {
        id: None,
        download_url: download_url.to_string(),
        game_name: "Super Mario Bros".to_string(),
        filename: "Super Mario Bros. (USA).nes".to_string(),
        platform: "nes".to_string(),
        group_name: "nintendo".to_string(),
        region: region.to_string(),
        size: "40 KB".to_string(),
        tags: vec!["USA".to_string()],
        description: None,
        rating: None,
        release_date: None,
        developer: None,
        publisher: None,
        genre: None,
        images: None,
        created_at: None,
    }
}

async fn connect() -> CatalogStore {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required for this test");
    let store = CatalogStore::connect(&url, 5).await.expect("connect");
    store.init().await.expect("init schema");
    store
}

#[tokio::test]
#[ignore] // requires a live Postgres database
async fn upsert_is_idempotent_on_download_url() {
    let store = connect().await;
    let game = make_game("https://archive.example/nes/Super Mario Bros. (USA).nes", "USA");

    let first = store.batch_upsert(&[game.clone()]).await.unwrap();
    let second = store.batch_upsert(&[game]).await.unwrap();

    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 1);
    assert_eq!(first[0].id, second[0].id, "upsert must preserve row id across passes");
}

#[tokio::test]
#[ignore] // requires a live Postgres database
async fn conflict_upsert_preserves_enrichment_fields() {
    let store = connect().await;
    let url = "https://archive.example/nes/conflict-test.nes";
    let seeded = store.batch_upsert(&[make_game(url, "USA")]).await.unwrap();
    let id = seeded[0].id;

    store
        .update_fields(
            id,
            &EnrichmentFields {
                description: Some("lore".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // Re-crawl with a different region but same download_url.
    store.batch_upsert(&[make_game(url, "Europe")]).await.unwrap();

    let rows = store.read_by_ids(&[id]).await.unwrap();
    assert_eq!(rows[0].region, "Europe");
    assert_eq!(rows[0].description.as_deref(), Some("lore"));
    assert_eq!(rows[0].id, Some(id));
}

#[tokio::test]
#[ignore] // requires a live Postgres database
async fn stale_urls_are_deleted() {
    let store = connect().await;
    let keep = "https://archive.example/nes/keep.nes";
    let drop = "https://archive.example/nes/drop.nes";
    store.batch_upsert(&[make_game(keep, "USA"), make_game(drop, "USA")]).await.unwrap();

    let all = store.read_all_urls().await.unwrap();
    let seen_this_run = vec![keep.to_string()];
    let stale: Vec<String> = all.into_iter().filter(|u| !seen_this_run.contains(u)).collect();
    store.delete_by_urls(&stale).await.unwrap();

    let remaining = store.read_all_urls().await.unwrap();
    assert!(remaining.contains(&keep.to_string()));
    assert!(!remaining.contains(&drop.to_string()));
}
