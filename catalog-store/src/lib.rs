//! Catalog Store Adapter (spec §4.3): batched upsert, selective update,
//! bulk read, stale-row pruning, and search-log append against the
//! relational store of record.

use std::collections::HashMap;

use catalog_core::{Error, Game, Result, SearchLogEntry};
use chrono::{NaiveDate, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool, QueryBuilder, Row};
use tracing::{info, warn};

pub struct CatalogStore {
    pool: PgPool,
}

impl CatalogStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Build a store whose pool defers connecting until first use. Useful
    /// for wiring handlers in tests that never reach the database.
    pub fn connect_lazy(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(max_connections).connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Ensure schema is present and prune `search_logs` older than one year.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS games (
                id BIGSERIAL PRIMARY KEY,
                download_url TEXT NOT NULL UNIQUE,
                game_name TEXT NOT NULL,
                filename TEXT NOT NULL,
                platform TEXT NOT NULL,
                group_name TEXT NOT NULL,
                region TEXT NOT NULL DEFAULT '',
                size TEXT NOT NULL DEFAULT '',
                tags TEXT[] NOT NULL DEFAULT '{}',
                description TEXT,
                rating DOUBLE PRECISION,
                release_date DATE,
                developer TEXT,
                publisher TEXT,
                genre TEXT,
                images TEXT[],
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS games_platform_idx ON games (platform)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS games_group_name_idx ON games (group_name)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS search_logs (
                id BIGSERIAL PRIMARY KEY,
                query TEXT NOT NULL,
                results BIGINT NOT NULL,
                searched_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS search_logs_searched_at_idx ON search_logs (searched_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS search_logs_query_idx ON search_logs (query)")
            .execute(&self.pool)
            .await?;

        let pruned = sqlx::query("DELETE FROM search_logs WHERE searched_at < now() - interval '1 year'")
            .execute(&self.pool)
            .await?
            .rows_affected();
        if pruned > 0 {
            info!(pruned, "pruned stale search_logs rows");
        }

        Ok(())
    }

    /// Insert or update a batch of records in one statement. On conflict on
    /// `download_url`, only the crawl-derived fields are updated —
    /// enrichment fields already on the row are preserved (spec I4, S4).
    /// Returns `{id, game_name, description, filename}` per input row, in
    /// input order.
    pub async fn batch_upsert(&self, records: &[Game]) -> Result<Vec<UpsertedRow>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<sqlx::Postgres>::new(
            "WITH incoming(download_url, game_name, filename, platform, group_name, region, size, tags) AS (VALUES ",
        );

        let mut first = true;
        for r in records {
            if !first {
                qb.push(", ");
            }
            first = false;
            qb.push("(")
                .push_bind(r.download_url.clone())
                .push(", ")
                .push_bind(r.game_name.clone())
                .push(", ")
                .push_bind(r.filename.clone())
                .push(", ")
                .push_bind(r.platform.clone())
                .push(", ")
                .push_bind(r.group_name.clone())
                .push(", ")
                .push_bind(r.region.clone())
                .push(", ")
                .push_bind(r.size.clone())
                .push(", ")
                .push_bind(r.tags.clone())
                .push(")");
        }

        qb.push(
            ") INSERT INTO games (download_url, game_name, filename, platform, group_name, region, size, tags) \
               SELECT download_url, game_name, filename, platform, group_name, region, size, tags FROM incoming \
               ON CONFLICT (download_url) DO UPDATE SET \
                 game_name = EXCLUDED.game_name, \
                 platform = EXCLUDED.platform, \
                 group_name = EXCLUDED.group_name, \
                 region = EXCLUDED.region, \
                 size = EXCLUDED.size, \
                 tags = EXCLUDED.tags \
               RETURNING id, download_url, game_name, description, filename, (xmax = 0) AS inserted",
        );

        let rows = match qb.build().fetch_all(&self.pool).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, batch = records.len(), "batch upsert failed, dropping batch");
                return Err(Error::from(e));
            }
        };

        let mut by_url: HashMap<String, UpsertedRow> = HashMap::with_capacity(rows.len());
        for row in rows {
            let url: String = row.get("download_url");
            by_url.insert(
                url.clone(),
                UpsertedRow {
                    id: row.get("id"),
                    download_url: url,
                    game_name: row.get("game_name"),
                    description: row.get("description"),
                    filename: row.get("filename"),
                    inserted: row.get("inserted"),
                },
            );
        }

        Ok(records
            .iter()
            .filter_map(|r| by_url.get(&r.download_url).cloned())
            .collect())
    }

    /// Set the provided subset of enrichment fields on one row and return
    /// the full resulting record.
    pub async fn update_fields(&self, id: i64, fields: &catalog_core::EnrichmentFields) -> Result<Game> {
        let mut qb = QueryBuilder::<sqlx::Postgres>::new("UPDATE games SET ");
        let mut first = true;

        macro_rules! set_field {
            ($col:literal, $val:expr) => {
                if let Some(v) = $val {
                    if !first {
                        qb.push(", ");
                    }
                    first = false;
                    qb.push(concat!($col, " = ")).push_bind(v.clone());
                }
            };
        }

        set_field!("description", &fields.description);
        set_field!("rating", &fields.rating);
        set_field!("release_date", &fields.release_date);
        set_field!("developer", &fields.developer);
        set_field!("publisher", &fields.publisher);
        set_field!("genre", &fields.genre);
        set_field!("images", &fields.images);

        if first {
            // Nothing to set; just read the row back.
            return self.read_one(id).await;
        }

        qb.push(" WHERE id = ").push_bind(id).push(
            " RETURNING id, download_url, game_name, filename, platform, group_name, region, \
               size, tags, description, rating, release_date, developer, publisher, genre, images, created_at",
        );

        let row = qb.build().fetch_one(&self.pool).await?;
        Ok(row_to_game(&row))
    }

    async fn read_one(&self, id: i64) -> Result<Game> {
        let row = sqlx::query(
            "SELECT id, download_url, game_name, filename, platform, group_name, region, size, \
               tags, description, rating, release_date, developer, publisher, genre, images, created_at \
             FROM games WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row_to_game(&row))
    }

    /// Bulk select of full rows by id.
    pub async fn read_by_ids(&self, ids: &[i64]) -> Result<Vec<Game>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT id, download_url, game_name, filename, platform, group_name, region, size, \
               tags, description, rating, release_date, developer, publisher, genre, images, created_at \
             FROM games WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_game).collect())
    }

    /// Stream (fetch all) of every `download_url` in the store, for stale
    /// pruning after an incremental crawl.
    pub async fn read_all_urls(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT download_url FROM games")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("download_url")).collect())
    }

    /// Bulk delete by `download_url`.
    pub async fn delete_by_urls(&self, urls: &[String]) -> Result<u64> {
        if urls.is_empty() {
            return Ok(0);
        }
        let affected = sqlx::query("DELETE FROM games WHERE download_url = ANY($1)")
            .bind(urls)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected)
    }

    /// Delete every row (clean-mode wipe). Failures are the caller's concern
    /// to log as warnings, not abort the run (spec §4.8).
    pub async fn delete_all(&self) -> Result<u64> {
        let affected = sqlx::query("DELETE FROM games").execute(&self.pool).await?.rows_affected();
        Ok(affected)
    }

    /// Append one search-log row. Best-effort: errors are logged, never
    /// raised to the caller (spec §4.3).
    pub async fn append_search_log(&self, query: &str, results: i64) {
        let q = query.trim().to_lowercase();
        let res = sqlx::query("INSERT INTO search_logs (query, results) VALUES ($1, $2)")
            .bind(&q)
            .bind(results)
            .execute(&self.pool)
            .await;
        if let Err(e) = res {
            warn!(error = %e, query = %q, "failed to append search log (ignored)");
        }
    }

    /// Recent search log entries, newest first. Used by admin/status reads.
    pub async fn recent_search_logs(&self, limit: i64) -> Result<Vec<SearchLogEntry>> {
        let rows = sqlx::query(
            "SELECT query, results, searched_at FROM search_logs ORDER BY searched_at DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| SearchLogEntry {
                query: r.get("query"),
                results: r.get("results"),
                searched_at: r.get("searched_at"),
            })
            .collect())
    }

    /// Total row count, for the admin status endpoint.
    pub async fn row_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT count(*) AS n FROM games").fetch_one(&self.pool).await?;
        Ok(row.get("n"))
    }
}

#[derive(Debug, Clone)]
pub struct UpsertedRow {
    pub id: i64,
    pub download_url: String,
    pub game_name: String,
    pub description: Option<String>,
    pub filename: String,
    /// `true` when this upsert inserted a new row rather than updating an
    /// existing one (`xmax = 0` on the `RETURNING` row), i.e. the spec's
    /// `scrapeNew` counter should count this row.
    pub inserted: bool,
}

impl UpsertedRow {
    /// A row still needs enrichment when `description` has never been set.
    pub fn needs_enrichment(&self) -> bool {
        self.description.is_none()
    }
}

fn row_to_game(row: &sqlx::postgres::PgRow) -> Game {
    Game {
        id: Some(row.get("id")),
        download_url: row.get("download_url"),
        game_name: row.get("game_name"),
        filename: row.get("filename"),
        platform: row.get("platform"),
        group_name: row.get("group_name"),
        region: row.get("region"),
        size: row.get("size"),
        tags: row.get("tags"),
        description: row.get("description"),
        rating: row.get("rating"),
        release_date: row.get::<Option<NaiveDate>, _>("release_date"),
        developer: row.get("developer"),
        publisher: row.get("publisher"),
        genre: row.get("genre"),
        images: row.get("images"),
        created_at: row.get("created_at"),
    }
}

/// Timestamp helper shared by tests that need a deterministic "now".
pub fn utc_now() -> chrono::DateTime<Utc> {
    Utc::now()
}
