//! Metadata Client (spec §4.5): OAuth2 client-credentials authentication
//! against the provider's token endpoint, and batched multiquery lookups.
//!
//! The client is stateless with respect to pacing — rate-limiting is the
//! enrich workers' job (spec §4.7). This crate only authenticates, builds
//! the multiquery body, and normalizes hits into catalog fields.

use std::collections::HashMap;

use catalog_core::EnrichmentFields;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Up to this many aliased subqueries travel in one multiquery request
/// (spec §4.5).
pub const MAX_BATCH: usize = 10;

pub struct MetadataClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    auth_host: String,
    api_host: String,
    token: Mutex<Option<String>>,
}

impl MetadataClient {
    pub fn new(client_id: String, client_secret: String, auth_host: String, api_host: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            client_id,
            client_secret,
            auth_host,
            api_host,
            token: Mutex::new(None),
        }
    }

    /// Authenticate once per run and cache the bearer token. Safe to call
    /// repeatedly — subsequent calls reuse the cached token.
    pub async fn authenticate(&self) -> catalog_core::Result<()> {
        let mut guard = self.token.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let url = format!(
            "https://{}/oauth2/token?client_id={}&client_secret={}&grant_type=client_credentials",
            self.auth_host,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&self.client_secret),
        );

        let resp = self.http.post(&url).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(catalog_core::Error::Http(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = resp.json().await?;
        *guard = Some(token.access_token);
        Ok(())
    }

    /// Look up up to [`MAX_BATCH`] names in one multiquery request. The
    /// returned map is keyed by the caller's own id, not the provider's
    /// alias — callers never see `q_<i>` outside this module. Missing or
    /// malformed entries are simply absent from the result map; the caller
    /// treats an absent id as a miss (spec §4.5, "no hit").
    pub async fn batch_lookup(&self, items: &[(i64, String)]) -> catalog_core::Result<HashMap<i64, EnrichmentFields>> {
        if items.is_empty() {
            return Ok(HashMap::new());
        }
        if items.len() > MAX_BATCH {
            return Err(catalog_core::Error::Config(format!(
                "batch_lookup called with {} items, max is {MAX_BATCH}",
                items.len()
            )));
        }

        self.authenticate().await?;
        let token = self.token.lock().await.clone().ok_or_else(|| {
            catalog_core::Error::Http("metadata client has no cached token".to_string())
        })?;

        let body = build_multiquery(items);
        let url = format!("https://{}/v4/multiquery", self.api_host);

        let resp = self
            .http
            .post(&url)
            .header("Client-ID", &self.client_id)
            .bearer_auth(&token)
            .header("Content-Type", "text/plain")
            .body(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, %body, "metadata provider returned an error, treating batch as all-misses");
            return Ok(HashMap::new());
        }

        let blocks: Vec<MultiqueryBlock> = resp.json().await.unwrap_or_default();
        let mut by_alias: HashMap<usize, IgdbHit> = HashMap::with_capacity(blocks.len());
        for block in blocks {
            if let Some(alias_idx) = parse_alias(&block.name) {
                if let Some(hit) = block.result.into_iter().next() {
                    by_alias.insert(alias_idx, hit);
                }
            }
        }

        let mut out = HashMap::with_capacity(items.len());
        for (alias_idx, (id, _name)) in items.iter().enumerate() {
            let fields = match by_alias.get(&alias_idx) {
                Some(hit) => normalize_hit(hit),
                None => {
                    debug!(id, "metadata provider miss");
                    EnrichmentFields {
                        description: Some(String::new()),
                        ..Default::default()
                    }
                }
            };
            out.insert(*id, fields);
        }

        Ok(out)
    }
}

fn build_multiquery(items: &[(i64, String)]) -> String {
    let mut body = String::new();
    for (alias_idx, (_id, name)) in items.iter().enumerate() {
        let escaped = name.replace('"', "\\\"");
        body.push_str(&format!(
            "query games \"q_{alias_idx}\" {{\n  \
             search \"{escaped}*\";\n  \
             fields name,summary,rating,first_release_date,involved_companies.company.name,genres.name,cover.url,screenshots.url;\n  \
             sort popularity desc;\n  \
             limit 1;\n}};\n"
        ));
    }
    body
}

fn parse_alias(name: &str) -> Option<usize> {
    name.strip_prefix("q_").and_then(|n| n.parse().ok())
}

/// Map a hit into catalog enrichment fields (spec §4.5 normalization rules).
fn normalize_hit(hit: &IgdbHit) -> EnrichmentFields {
    let developer = hit
        .involved_companies
        .first()
        .map(|c| c.company.name.clone());

    EnrichmentFields {
        description: hit.summary.clone().or_else(|| Some(String::new())),
        rating: hit
            .rating
            .map(|r| (r / 20.0 * 100.0).round() / 100.0),
        release_date: hit
            .first_release_date
            .and_then(unix_seconds_to_date),
        developer: developer.clone(),
        publisher: developer,
        genre: if hit.genres.is_empty() {
            None
        } else {
            Some(hit.genres.iter().map(|g| g.name.clone()).collect::<Vec<_>>().join(", "))
        },
        images: Some(normalize_images(hit)),
    }
}

fn normalize_images(hit: &IgdbHit) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    if let Some(cover) = &hit.cover {
        urls.push(cover.url.clone());
    }
    for shot in hit.screenshots.iter().take(2) {
        urls.push(shot.url.clone());
    }
    urls.into_iter().map(normalize_image_url).collect()
}

fn normalize_image_url(url: String) -> String {
    let url = if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        url
    };
    url.replace("t_thumb", "t_1080p")
}

fn unix_seconds_to_date(secs: i64) -> Option<chrono::NaiveDate> {
    DateTime::<Utc>::from_timestamp(secs, 0).map(|dt| dt.date_naive())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct MultiqueryBlock {
    name: String,
    #[serde(default)]
    result: Vec<IgdbHit>,
}

#[derive(Debug, Deserialize)]
struct IgdbHit {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    first_release_date: Option<i64>,
    #[serde(default)]
    involved_companies: Vec<InvolvedCompany>,
    #[serde(default)]
    genres: Vec<Genre>,
    #[serde(default)]
    cover: Option<Cover>,
    #[serde(default)]
    screenshots: Vec<Screenshot>,
}

#[derive(Debug, Deserialize)]
struct InvolvedCompany {
    company: Company,
}

#[derive(Debug, Deserialize)]
struct Company {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Genre {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Cover {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Screenshot {
    url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(summary: Option<&str>, rating: Option<f64>) -> IgdbHit {
        IgdbHit {
            summary: summary.map(|s| s.to_string()),
            rating,
            first_release_date: Some(500_000_000),
            involved_companies: vec![InvolvedCompany {
                company: Company { name: "Nintendo".to_string() },
            }],
            genres: vec![Genre { name: "Platformer".to_string() }, Genre { name: "Action".to_string() }],
            cover: Some(Cover { url: "//images.igdb.com/t_thumb/cover.jpg".to_string() }),
            screenshots: vec![
                Screenshot { url: "//images.igdb.com/t_thumb/shot1.jpg".to_string() },
                Screenshot { url: "//images.igdb.com/t_thumb/shot2.jpg".to_string() },
                Screenshot { url: "//images.igdb.com/t_thumb/shot3.jpg".to_string() },
            ],
        }
    }

    #[test]
    fn normalizes_rating_from_0_100_to_0_5() {
        let fields = normalize_hit(&hit(Some("desc"), Some(90.0)));
        assert_eq!(fields.rating, Some(4.5));
    }

    #[test]
    fn image_urls_gain_scheme_and_swap_thumb_for_1080p() {
        let fields = normalize_hit(&hit(Some("desc"), Some(80.0)));
        let images = fields.images.unwrap();
        assert_eq!(images[0], "https://images.igdb.com/t_1080p/cover.jpg");
        assert!(images.iter().all(|u| u.starts_with("https://")));
        // cover + at most 2 screenshots
        assert_eq!(images.len(), 3);
    }

    #[test]
    fn genres_are_comma_joined() {
        let fields = normalize_hit(&hit(Some("desc"), None));
        assert_eq!(fields.genre.as_deref(), Some("Platformer, Action"));
    }

    #[test]
    fn miss_sets_empty_string_description_sentinel() {
        let by_alias: HashMap<usize, IgdbHit> = HashMap::new();
        let items = vec![(1_i64, "Some Game".to_string())];
        let mut out = HashMap::new();
        for (alias_idx, (id, _)) in items.iter().enumerate() {
            let fields = match by_alias.get(&alias_idx) {
                Some(h) => normalize_hit(h),
                None => EnrichmentFields { description: Some(String::new()), ..Default::default() },
            };
            out.insert(*id, fields);
        }
        assert_eq!(out[&1].description.as_deref(), Some(""));
    }

    #[test]
    fn alias_parsing_extracts_index() {
        assert_eq!(parse_alias("q_0"), Some(0));
        assert_eq!(parse_alias("q_9"), Some(9));
        assert_eq!(parse_alias("garbage"), None);
    }

    #[test]
    fn multiquery_body_contains_one_block_per_item() {
        let items = vec![(1_i64, "Mario".to_string()), (2_i64, "Zelda".to_string())];
        let body = build_multiquery(&items);
        assert!(body.contains("\"q_0\""));
        assert!(body.contains("\"q_1\""));
        assert!(body.contains("search \"Mario*\""));
    }
}
