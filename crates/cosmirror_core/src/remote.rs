use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow, bail};
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::ResolvedConfig;
use crate::link_graph::PageLinks;
use crate::provider::{LinkSnapshot, PageDetail, PageProvider, PageSummary, RelatedPages};

const LIST_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct CosenseClientConfig {
    pub origin: String,
    pub user_agent: String,
    pub session_id: Option<String>,
    pub timeout_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl CosenseClientConfig {
    pub fn from_resolved(config: &ResolvedConfig) -> Self {
        Self {
            origin: config.origin.clone(),
            user_agent: config.user_agent.clone(),
            session_id: config.session_id.clone(),
            timeout_ms: config.timeout_ms,
            max_retries: config.max_retries,
            retry_delay_ms: config.retry_delay_ms,
        }
    }
}

/// Read-only client for one project on a Cosense server.
pub struct CosenseClient {
    client: Client,
    config: CosenseClientConfig,
    project: String,
    request_count: AtomicUsize,
}

impl CosenseClient {
    pub fn new(config: CosenseClientConfig, project: &str) -> Result<Self> {
        if project.trim().is_empty() {
            bail!("project name cannot be empty");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Cosense HTTP client")?;

        Ok(Self {
            client,
            config,
            project: project.trim().to_string(),
            request_count: AtomicUsize::new(0),
        })
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// `{origin}/api/pages/{project}/{extra...}` with every segment percent-encoded.
    fn pages_url(&self, extra: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.config.origin)
            .with_context(|| format!("invalid Cosense origin: {}", self.config.origin))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("Cosense origin cannot be a base URL: {}", self.config.origin))?
            .pop_if_empty()
            .extend(["api", "pages", self.project.as_str()])
            .extend(extra);
        Ok(url)
    }

    fn request_json<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T> {
        for attempt in 0..=self.config.max_retries {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            debug!(%url, attempt, "GET");
            let mut request = self
                .client
                .get(url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(query);
            if let Some(sid) = &self.config.session_id {
                request = request.header("Cookie", format!("connect.sid={sid}"));
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("Cosense API request to {url} failed with HTTP {status}");
                    }
                    return response
                        .json()
                        .with_context(|| format!("failed to decode Cosense API JSON from {url}"));
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).with_context(|| format!("failed to call {url}"));
                }
            }
        }

        bail!("Cosense API request exhausted retry budget")
    }

    fn wait_before_retry(&self, attempt: usize) {
        let exponent = u32::try_from(attempt).unwrap_or(16);
        let base = self
            .config
            .retry_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent));
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|duration| u64::from(duration.subsec_millis() % 100))
            .unwrap_or(0);
        sleep(Duration::from_millis(base.saturating_add(jitter)));
    }
}

impl PageProvider for CosenseClient {
    fn project_name(&self) -> &str {
        &self.project
    }

    fn list_pages(&self) -> Result<Vec<PageSummary>> {
        let url = self.pages_url(&[])?;
        let mut summaries = Vec::new();
        let mut skip = 0usize;
        loop {
            let payload: PageListPayload = self
                .request_json(
                    url.clone(),
                    &[
                        ("limit", LIST_PAGE_SIZE.to_string()),
                        ("skip", skip.to_string()),
                        ("sort", "updated".to_string()),
                    ],
                )
                .with_context(|| format!("failed to list pages of {}", self.project))?;
            let next = next_list_offset(skip, payload.pages.len(), payload.count);
            summaries.extend(payload.pages.into_iter().filter_map(summary_from_entry));
            match next {
                Some(offset) => skip = offset,
                None => break,
            }
        }
        info!(project = %self.project, pages = summaries.len(), "fetched page list");
        Ok(summaries)
    }

    fn link_snapshot(&self) -> Result<Option<LinkSnapshot>> {
        let url = self.pages_url(&["search", "titles"])?;
        let mut pages = Vec::new();
        let mut following: Option<String> = None;
        loop {
            let query = following
                .iter()
                .map(|id| ("followingId", id.clone()))
                .collect::<Vec<_>>();
            let batch: Vec<TitleLinksPayload> = self
                .request_json(url.clone(), &query)
                .with_context(|| format!("failed to fetch link snapshot of {}", self.project))?;
            let Some(last) = next_following_id(following.as_deref(), &batch) else {
                break;
            };
            pages.extend(batch.into_iter().map(|entry| PageLinks {
                title: entry.title,
                links: entry.links,
            }));
            following = Some(last);
        }
        debug!(project = %self.project, pages = pages.len(), "fetched link snapshot");
        Ok(Some(LinkSnapshot {
            pages,
            two_hop: true,
        }))
    }

    fn fetch_page(&self, summary: &PageSummary) -> Result<PageDetail> {
        let url = self.pages_url(&[summary.title.as_str()])?;
        let payload: PagePayload = self.request_json(url, &[])?;
        Ok(payload.into_detail(&summary.title))
    }
}

/// Offset of the next list request, or `None` once the listing is exhausted.
fn next_list_offset(skip: usize, received: usize, count: usize) -> Option<usize> {
    let next = skip + received;
    (received > 0 && next < count).then_some(next)
}

/// Cursor for the next title batch. An empty batch, or one ending on the
/// cursor it was requested with, ends the walk.
fn next_following_id(following: Option<&str>, batch: &[TitleLinksPayload]) -> Option<String> {
    let last = batch.last()?.id.as_str();
    (following != Some(last)).then(|| last.to_string())
}

fn summary_from_entry(entry: Value) -> Option<PageSummary> {
    let Some(title) = entry.get("title").and_then(Value::as_str).map(str::to_string) else {
        warn!("page list entry without a title; ignoring it");
        return None;
    };
    let updated = entry.get("updated").and_then(Value::as_i64).unwrap_or(0);
    Some(PageSummary {
        title,
        updated,
        metadata: entry,
    })
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize)]
struct PageListPayload {
    #[serde(default)]
    count: usize,
    #[serde(default)]
    pages: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TitleLinksPayload {
    id: String,
    title: String,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PagePayload {
    title: Option<String>,
    #[serde(default)]
    lines: Vec<LinePayload>,
    #[serde(default, rename = "relatedPages")]
    related_pages: Option<RelatedPages>,
}

#[derive(Debug, Deserialize)]
struct LinePayload {
    #[serde(default)]
    text: String,
}

impl PagePayload {
    fn into_detail(self, requested_title: &str) -> PageDetail {
        PageDetail {
            title: self.title.unwrap_or_else(|| requested_title.to_string()),
            lines: self.lines.into_iter().map(|line| line.text).collect(),
            related: self.related_pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(origin: &str, project: &str) -> CosenseClient {
        CosenseClient::new(
            CosenseClientConfig {
                origin: origin.to_string(),
                user_agent: "test".to_string(),
                session_id: None,
                timeout_ms: 1_000,
                max_retries: 0,
                retry_delay_ms: 0,
            },
            project,
        )
        .expect("client")
    }

    #[test]
    fn page_urls_encode_every_segment() {
        let client = client("https://scrapbox.io", "my-project");
        assert_eq!(
            client.pages_url(&[]).expect("url").as_str(),
            "https://scrapbox.io/api/pages/my-project"
        );
        assert_eq!(
            client.pages_url(&["a/b c?"]).expect("url").as_str(),
            "https://scrapbox.io/api/pages/my-project/a%2Fb%20c%3F"
        );
        assert_eq!(
            client.pages_url(&["search", "titles"]).expect("url").as_str(),
            "https://scrapbox.io/api/pages/my-project/search/titles"
        );
    }

    #[test]
    fn empty_project_is_rejected() {
        let config = CosenseClientConfig {
            origin: "https://scrapbox.io".to_string(),
            user_agent: "test".to_string(),
            session_id: None,
            timeout_ms: 1_000,
            max_retries: 0,
            retry_delay_ms: 0,
        };
        assert!(CosenseClient::new(config, "  ").is_err());
    }

    #[test]
    fn list_entries_keep_raw_metadata() {
        let payload: PageListPayload = serde_json::from_str(
            r#"{"count": 2, "pages": [
                {"id": "1", "title": "Home", "updated": 1700000000, "views": 3},
                {"id": "2", "updated": 5}
            ]}"#,
        )
        .expect("payload");
        assert_eq!(payload.count, 2);
        let summaries = payload
            .pages
            .into_iter()
            .filter_map(summary_from_entry)
            .collect::<Vec<_>>();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].title, "Home");
        assert_eq!(summaries[0].updated, 1_700_000_000);
        assert_eq!(summaries[0].metadata["views"], 3);
    }

    #[test]
    fn page_payload_decodes_lines_and_related_pages() {
        let payload: PagePayload = serde_json::from_str(
            r#"{
                "title": "Notes",
                "lines": [{"id": "a", "text": "Notes"}, {"id": "b", "text": "code:foo.py"}],
                "relatedPages": {
                    "links1hop": [{"title": "Home", "linksLc": ["notes"]}],
                    "links2hop": []
                }
            }"#,
        )
        .expect("payload");
        let detail = payload.into_detail("Notes");
        assert_eq!(detail.lines, vec!["Notes".to_string(), "code:foo.py".to_string()]);
        let related = detail.related.expect("related pages");
        assert_eq!(related.links_1hop.len(), 1);
        assert_eq!(related.links_1hop[0].links_lc, vec!["notes".to_string()]);
    }

    #[test]
    fn list_offsets_stop_at_the_reported_count() {
        assert_eq!(next_list_offset(0, 1000, 2500), Some(1000));
        assert_eq!(next_list_offset(2000, 500, 2500), None);
        assert_eq!(next_list_offset(0, 3, 3), None);
        assert_eq!(next_list_offset(1000, 0, 2500), None);
    }

    #[test]
    fn title_cursor_stops_on_empty_or_repeated_batches() {
        let batch: Vec<TitleLinksPayload> = serde_json::from_str(
            r#"[
                {"id": "p1", "title": "Home", "links": ["Notes"]},
                {"id": "p2", "title": "Notes"}
            ]"#,
        )
        .expect("batch");
        assert_eq!(next_following_id(None, &batch), Some("p2".to_string()));
        assert_eq!(next_following_id(Some("p0"), &batch), Some("p2".to_string()));
        assert_eq!(next_following_id(Some("p2"), &batch), None);
        assert_eq!(next_following_id(Some("p2"), &[]), None);
    }

    #[test]
    fn retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }
}
