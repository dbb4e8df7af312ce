//! Crawler (spec §4.6): breadth-first, bounded-concurrency traversal of
//! directory-listing pages, producing parsed file records and pruning
//! stale rows at the end of an incremental run.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use catalog_core::{EnrichItem, EnrichQueue, Game, PipelineState, RunMode};
use catalog_index::SearchIndex;
use catalog_store::CatalogStore;
use scraper::{Html, Selector};
use tokio::task::JoinSet;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub base_url: String,
    pub concurrency: usize,
    pub db_batch_size: usize,
}

pub struct Crawler {
    http: reqwest::Client,
    base_url: Url,
    concurrency: usize,
    db_batch_size: usize,
    store: Arc<CatalogStore>,
    index: Arc<SearchIndex>,
    queue: Arc<EnrichQueue>,
    state: Arc<PipelineState>,
}

impl Crawler {
    pub fn new(
        config: CrawlerConfig,
        store: Arc<CatalogStore>,
        index: Arc<SearchIndex>,
        queue: Arc<EnrichQueue>,
        state: Arc<PipelineState>,
    ) -> catalog_core::Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| catalog_core::Error::Config(format!("invalid ARCHIVE_BASE_URL: {e}")))?;

        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(config.concurrency + 5)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url,
            concurrency: config.concurrency,
            db_batch_size: config.db_batch_size,
            store,
            index,
            queue,
            state,
        })
    }

    /// Run one full crawl pass in the given mode, flushing and pruning as
    /// it goes (spec §4.6).
    pub async fn run(&self, mode: RunMode) -> catalog_core::Result<()> {
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(self.base_url.to_string());
        let mut visited: HashSet<String> = HashSet::new();
        let mut seen_urls: HashSet<String> = HashSet::new();
        let mut buffer: Vec<Game> = Vec::new();
        let mut in_flight: JoinSet<(String, Result<PageResult, catalog_core::Error>)> = JoinSet::new();

        loop {
            let cancelled = self.state.is_cancelled();

            if !cancelled {
                while in_flight.len() < self.concurrency {
                    let Some(url) = queue.pop_front() else { break };
                    if !visited.insert(url.clone()) {
                        continue;
                    }
                    let http = self.http.clone();
                    let base = self.base_url.clone();
                    let task_url = url.clone();
                    in_flight.spawn(async move { (task_url, fetch_page(http, url, base).await) });
                }
            }

            if in_flight.is_empty() {
                break;
            }

            match in_flight.join_next().await {
                Some(Ok((_, Ok(page)))) => {
                    if !cancelled {
                        for dir in page.dirs {
                            if !visited.contains(&dir) {
                                queue.push_back(dir);
                            }
                        }
                    }
                    for file in page.files {
                        seen_urls.insert(file.download_url.clone());
                        self.state.incr_scrape_total();
                        buffer.push(file);
                    }
                    if buffer.len() >= self.db_batch_size {
                        self.flush_buffer(&mut buffer, mode).await;
                    }
                }
                Some(Ok((url, Err(e)))) => {
                    warn!(url = %url, error = %e, "crawl fetch failed, dropping");
                    self.state.log(format!("fetch error ({url}): {e}")).await;
                }
                Some(Err(join_err)) => {
                    warn!(error = %join_err, "crawl fetch task panicked");
                }
                None => {}
            }
        }

        self.flush_buffer(&mut buffer, mode).await;

        if mode == RunMode::Incremental && !self.state.is_cancelled() {
            if let Err(e) = self.prune_stale(&seen_urls).await {
                warn!(error = %e, "stale pruning failed");
                self.state.log(format!("prune error: {e}")).await;
            }
        }

        self.state.set_scrape_complete();
        info!(scraped = seen_urls.len(), "crawl complete");
        Ok(())
    }

    async fn flush_buffer(&self, buffer: &mut Vec<Game>, mode: RunMode) {
        if buffer.is_empty() {
            return;
        }
        let batch = std::mem::take(buffer);
        let len = batch.len();

        match self.store.batch_upsert(&batch).await {
            Ok(rows) => {
                for row in rows {
                    if row.inserted {
                        self.state.incr_scrape_new();
                    }

                    let eligible = catalog_core::filter::is_eligible(&row.filename);
                    let needs_enrichment = mode == RunMode::Clean || row.needs_enrichment();

                    if needs_enrichment && eligible {
                        self.queue
                            .push(EnrichItem { id: row.id, game_name: row.game_name })
                            .await;
                    } else if let Ok(games) = self.store.read_by_ids(&[row.id]).await {
                        self.index.add_documents(&games).await;
                    }
                }
                self.state.set_queue_size(self.queue.len().await as i64);
            }
            Err(e) => {
                warn!(error = %e, batch = len, "dropping batch after upsert failure");
                self.state.log(format!("batch upsert failed ({len} records): {e}")).await;
            }
        }
    }

    async fn prune_stale(&self, seen_urls: &HashSet<String>) -> catalog_core::Result<()> {
        let all = self.store.read_all_urls().await?;
        let stale: Vec<String> = all.into_iter().filter(|u| !seen_urls.contains(u)).collect();
        if stale.is_empty() {
            return Ok(());
        }
        let affected = self.store.delete_by_urls(&stale).await?;
        self.state.log(format!("pruned {affected} stale urls")).await;
        Ok(())
    }
}

struct PageResult {
    dirs: Vec<String>,
    files: Vec<Game>,
}

async fn fetch_page(http: reqwest::Client, url: String, base_url: Url) -> Result<PageResult, catalog_core::Error> {
    let resp = http.get(&url).send().await?;
    let body = resp.text().await?;
    let document = Html::parse_document(&body);

    let row_sel = Selector::parse("tr").expect("static selector");
    let href_sel = Selector::parse("a[href]").expect("static selector");
    let size_sel = Selector::parse("td.size").expect("static selector");

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut any_row_entry = false;

    for row in document.select(&row_sel) {
        let Some(a) = row.select(&href_sel).next() else { continue };
        let Some(href) = a.value().attr("href") else { continue };
        any_row_entry = true;
        let size = row
            .select(&size_sel)
            .next()
            .map(|cell| cell.text().collect::<String>().trim().to_string())
            .filter(|s| !s.is_empty() && s != "-")
            .unwrap_or_default();
        classify_href(&url, href, &base_url, size, &mut dirs, &mut files);
    }

    if !any_row_entry {
        for a in document.select(&href_sel) {
            let Some(href) = a.value().attr("href") else { continue };
            classify_href(&url, href, &base_url, String::new(), &mut dirs, &mut files);
        }
    }

    Ok(PageResult { dirs, files })
}

fn classify_href(
    current_url: &str,
    href: &str,
    base_url: &Url,
    size: String,
    dirs: &mut Vec<String>,
    files: &mut Vec<Game>,
) {
    if is_rejected_href(href) {
        return;
    }

    let current = match Url::parse(current_url) {
        Ok(u) => u,
        Err(_) => return,
    };
    let resolved = match current.join(href) {
        Ok(u) => u,
        Err(_) => return,
    };

    if resolved.path().ends_with('/') {
        dirs.push(resolved.to_string());
        return;
    }

    let (group, platform) = derive_group_platform(base_url, &resolved);
    let leaf = resolved
        .path_segments()
        .and_then(|mut segs| segs.next_back())
        .unwrap_or_default();
    let filename = urlencoding::decode(leaf).map(|s| s.into_owned()).unwrap_or_else(|_| leaf.to_string());
    if filename.is_empty() {
        return;
    }

    let parsed = catalog_core::parser::parse(&filename);

    files.push(Game {
        id: None,
        download_url: resolved.to_string(),
        game_name: parsed.base_name,
        filename,
        platform,
        group_name: group,
        region: parsed.region,
        size,
        tags: parsed.tags,
        description: None,
        rating: None,
        release_date: None,
        developer: None,
        publisher: None,
        genre: None,
        images: None,
        created_at: None,
    });
}

/// Reject query-only, absolute-scheme, root-absolute, parent-relative, and
/// self-link hrefs (spec §4.6 step 3).
fn is_rejected_href(href: &str) -> bool {
    if href.is_empty() || href == "./" {
        return true;
    }
    if href.starts_with('?') || href.starts_with('/') {
        return true;
    }
    if href.contains("..") {
        return true;
    }
    if let Some(colon) = href.find(':') {
        let is_scheme = match href.find('/') {
            Some(slash) => colon < slash,
            None => true,
        };
        if is_scheme {
            return true;
        }
    }
    false
}

/// `group` is path segment[0], `platform` is segment[1] (falling back to
/// `group` when absent), both measured relative to the archive root.
fn derive_group_platform(base_url: &Url, resolved: &Url) -> (String, String) {
    let base_path = base_url.path().trim_end_matches('/');
    let full_path = resolved.path();
    let rel = full_path.strip_prefix(base_path).unwrap_or(full_path).trim_start_matches('/');

    let mut segments = rel.split('/').filter(|s| !s.is_empty());
    let group = segments.next().unwrap_or_default().to_string();
    let platform = segments.next().map(|s| s.to_string()).unwrap_or_else(|| group.clone());
    (group, platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_query_only_links() {
        assert!(is_rejected_href("?C=N;O=D"));
    }

    #[test]
    fn rejects_absolute_scheme_links() {
        assert!(is_rejected_href("https://other.example/x"));
    }

    #[test]
    fn rejects_root_absolute_links() {
        assert!(is_rejected_href("/elsewhere"));
    }

    #[test]
    fn rejects_parent_relative_links() {
        assert!(is_rejected_href("../sibling/"));
    }

    #[test]
    fn rejects_self_link() {
        assert!(is_rejected_href("./"));
    }

    #[test]
    fn accepts_plain_relative_links() {
        assert!(!is_rejected_href("Super%20Mario%20Bros.%20%28USA%29.nes"));
        assert!(!is_rejected_href("subdir/"));
    }

    #[test]
    fn derives_group_and_platform_from_path_segments() {
        let base = Url::parse("https://archive.example/roms/").unwrap();
        let file = Url::parse("https://archive.example/roms/nintendo/nes/Mario.nes").unwrap();
        let (group, platform) = derive_group_platform(&base, &file);
        assert_eq!(group, "nintendo");
        assert_eq!(platform, "nes");
    }

    #[test]
    fn platform_falls_back_to_group_when_absent() {
        let base = Url::parse("https://archive.example/roms/").unwrap();
        let file = Url::parse("https://archive.example/roms/nintendo/Mario.nes").unwrap();
        let (group, platform) = derive_group_platform(&base, &file);
        assert_eq!(group, "nintendo");
        assert_eq!(platform, "nintendo");
    }

    // S1 (spec §8): single-file leaf listing page, fetched and parsed end to
    // end through `fetch_page` (the part of the crawler that doesn't need a
    // live store/index).
    #[tokio::test]
    async fn single_file_leaf_listing_parses_into_one_game_record() {
        let server = wiremock::MockServer::start().await;
        let html = r#"<html><body><table>
            <tr><td><a href="Super%20Mario%20Bros.%20%28USA%29.nes">Super Mario Bros. (USA).nes</a></td><td class="size">40 KB</td></tr>
        </table></body></html>"#;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/nintendo/nes/"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;

        let base_url = format!("{}/nintendo/nes/", server.uri());
        let base = Url::parse(&base_url).unwrap();
        let http = reqwest::Client::new();
        let page = fetch_page(http, base_url.clone(), base).await.unwrap();

        assert!(page.dirs.is_empty());
        assert_eq!(page.files.len(), 1);

        let game = &page.files[0];
        assert_eq!(game.filename, "Super Mario Bros. (USA).nes");
        assert_eq!(game.game_name, "Super Mario Bros.");
        assert_eq!(game.tags, vec!["USA".to_string()]);
        assert_eq!(game.region, "USA");
        assert_eq!(game.size, "40 KB");
        assert_eq!(game.group_name, "nintendo");
        assert_eq!(game.platform, "nes");
        assert!(game.download_url.ends_with("Super%20Mario%20Bros.%20%28USA%29.nes"));
    }

    // S2 (spec §8): a non-game file is still parsed and would still be
    // inserted, but the non-game filter marks it ineligible for enrichment.
    #[tokio::test]
    async fn manual_pdf_leaf_is_parsed_but_filtered_from_enrichment() {
        let server = wiremock::MockServer::start().await;
        let html = r#"<html><body><table>
            <tr><td><a href="Final%20Fantasy%20VII%20%28Manual%29.pdf">Final Fantasy VII (Manual).pdf</a></td><td class="size">2 MB</td></tr>
        </table></body></html>"#;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/sony/ps1/"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;

        let base_url = format!("{}/sony/ps1/", server.uri());
        let base = Url::parse(&base_url).unwrap();
        let http = reqwest::Client::new();
        let page = fetch_page(http, base_url, base).await.unwrap();

        assert_eq!(page.files.len(), 1);
        let game = &page.files[0];
        assert_eq!(game.filename, "Final Fantasy VII (Manual).pdf");
        assert!(!catalog_core::filter::is_eligible(&game.filename));
    }

    // S3 (spec §8): multi-region and language-tag filenames.
    #[tokio::test]
    async fn multi_region_and_language_tags_classify_correctly() {
        let server = wiremock::MockServer::start().await;
        let html = r#"<html><body><table>
            <tr><td><a href="Mega%20Man%20%28USA%2C%20Europe%29.zip">Mega Man (USA, Europe).zip</a></td><td class="size">1 MB</td></tr>
            <tr><td><a href="Chrono%20Trigger%20%28En%2CFr%2CDe%29.smc">Chrono Trigger (En,Fr,De).smc</a></td><td class="size">4 MB</td></tr>
        </table></body></html>"#;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/nintendo/snes/"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(html))
            .mount(&server)
            .await;

        let base_url = format!("{}/nintendo/snes/", server.uri());
        let base = Url::parse(&base_url).unwrap();
        let http = reqwest::Client::new();
        let page = fetch_page(http, base_url, base).await.unwrap();

        assert_eq!(page.files.len(), 2);
        assert_eq!(page.files[0].tags, vec!["USA, Europe".to_string()]);
        assert_eq!(page.files[0].region, "USA, Europe");
        assert_eq!(page.files[1].tags, vec!["En,Fr,De".to_string()]);
        assert_eq!(page.files[1].region, "");
    }
}
