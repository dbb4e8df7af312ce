//! Index Adapter (spec §4.4): idempotent batched document upserts against
//! the search engine, and schema (index settings) initialization.

use catalog_core::Game;
use meilisearch_sdk::client::Client;
use meilisearch_sdk::indexes::Index;
use serde::Serialize;
use tracing::{info, warn};

const INDEX_NAME: &str = "games";

const SEARCHABLE_ATTRIBUTES: &[&str] = &["game_name", "genre", "developer", "description", "tags"];
const FILTERABLE_ATTRIBUTES: &[&str] = &["platform", "region", "tags", "genre"];
const SORTABLE_ATTRIBUTES: &[&str] = &["rating", "release_date"];

pub struct SearchIndex {
    client: Client,
}

impl SearchIndex {
    pub fn new(host: &str, api_key: &str) -> catalog_core::Result<Self> {
        let client = Client::new(host, Some(api_key))
            .map_err(|e| catalog_core::Error::Index(e.to_string()))?;
        Ok(Self { client })
    }

    /// Ensure the index exists with the primary key and attribute settings
    /// of spec §4.4. Idempotent: safe to call on every startup.
    pub async fn init(&self) -> catalog_core::Result<()> {
        let task = self
            .client
            .create_index(INDEX_NAME, Some("id"))
            .await
            .map_err(|e| catalog_core::Error::Index(e.to_string()))?;
        task.wait_for_completion(&self.client, None, None)
            .await
            .map_err(|e| catalog_core::Error::Index(e.to_string()))?;

        let index = self.client.index(INDEX_NAME);
        self.apply_settings(&index).await
    }

    async fn apply_settings(&self, index: &Index) -> catalog_core::Result<()> {
        let searchable: Vec<String> = SEARCHABLE_ATTRIBUTES.iter().map(|s| s.to_string()).collect();
        let filterable: Vec<String> = FILTERABLE_ATTRIBUTES.iter().map(|s| s.to_string()).collect();
        let sortable: Vec<String> = SORTABLE_ATTRIBUTES.iter().map(|s| s.to_string()).collect();

        index
            .set_searchable_attributes(&searchable)
            .await
            .map_err(|e| catalog_core::Error::Index(e.to_string()))?;
        index
            .set_filterable_attributes(&filterable)
            .await
            .map_err(|e| catalog_core::Error::Index(e.to_string()))?;
        index
            .set_sortable_attributes(&sortable)
            .await
            .map_err(|e| catalog_core::Error::Index(e.to_string()))?;

        info!("search index settings applied");
        Ok(())
    }

    /// Upsert a batch of documents by primary key. Failures increment a
    /// counter and log, but never fail the catalog writes that preceded
    /// them (spec §4.4).
    pub async fn add_documents(&self, games: &[Game]) -> usize {
        if games.is_empty() {
            return 0;
        }

        let docs: Vec<IndexDocument> = games.iter().map(IndexDocument::from).collect();
        let index = self.client.index(INDEX_NAME);

        match index.add_documents(&docs, Some("id")).await {
            Ok(_) => docs.len(),
            Err(e) => {
                warn!(error = %e, batch = docs.len(), "index add_documents failed");
                0
            }
        }
    }

    /// Delete every document in the index (clean-mode wipe).
    pub async fn delete_all(&self) -> catalog_core::Result<()> {
        self.client
            .index(INDEX_NAME)
            .delete_all_documents()
            .await
            .map_err(|e| catalog_core::Error::Index(e.to_string()))?;
        Ok(())
    }

    /// Total document count, for the admin status endpoint.
    pub async fn document_count(&self) -> catalog_core::Result<usize> {
        let stats = self
            .client
            .index(INDEX_NAME)
            .get_stats()
            .await
            .map_err(|e| catalog_core::Error::Index(e.to_string()))?;
        Ok(stats.number_of_documents)
    }
}

/// Wire shape sent to the search engine. `rating`/`release_date`/other
/// optional fields always serialize — null when absent, never omitted.
#[derive(Debug, Serialize)]
struct IndexDocument {
    id: i64,
    game_name: String,
    filename: String,
    platform: String,
    group_name: String,
    region: String,
    size: String,
    tags: Vec<String>,
    description: Option<String>,
    rating: Option<f64>,
    release_date: Option<String>,
    developer: Option<String>,
    publisher: Option<String>,
    genre: Option<String>,
    images: Option<Vec<String>>,
}

impl From<&Game> for IndexDocument {
    fn from(g: &Game) -> Self {
        Self {
            id: g.id.unwrap_or_default(),
            game_name: g.game_name.clone(),
            filename: g.filename.clone(),
            platform: g.platform.clone(),
            group_name: g.group_name.clone(),
            region: g.region.clone(),
            size: g.size.clone(),
            tags: g.tags.clone(),
            description: g.description.clone(),
            rating: g.rating,
            release_date: g.release_date.map(|d| d.format("%Y-%m-%d").to_string()),
            developer: g.developer.clone(),
            publisher: g.publisher.clone(),
            genre: g.genre.clone(),
            images: g.images.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_game() -> Game {
        Game {
            id: Some(7),
            download_url: "https://archive.example/nes/mario.nes".to_string(),
            game_name: "Super Mario Bros".to_string(),
            filename: "Super Mario Bros. (USA).nes".to_string(),
            platform: "nes".to_string(),
            group_name: "nintendo".to_string(),
            region: "USA".to_string(),
            size: "40 KB".to_string(),
            tags: vec!["USA".to_string()],
            description: Some("A classic platformer".to_string()),
            rating: Some(4.5),
            release_date: NaiveDate::from_ymd_opt(1985, 9, 13),
            developer: Some("Nintendo".to_string()),
            publisher: Some("Nintendo".to_string()),
            genre: Some("Platformer".to_string()),
            images: Some(vec!["https://example/img.png".to_string()]),
            created_at: None,
        }
    }

    #[test]
    fn release_date_serializes_as_iso_date() {
        let doc = IndexDocument::from(&sample_game());
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["release_date"], "1985-09-13");
        assert_eq!(json["rating"], 4.5);
    }

    #[test]
    fn null_fields_transmit_as_null_not_absent() {
        let mut g = sample_game();
        g.description = None;
        g.rating = None;
        let doc = IndexDocument::from(&g);
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("description").is_some());
        assert!(json["description"].is_null());
        assert!(json["rating"].is_null());
    }
}
