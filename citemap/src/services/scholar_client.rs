//! HTTP scholarly source client
//!
//! Concrete [`SourceClient`] over the public scholar web pages. Every request
//! goes through the shared [`RateLimiterHandle`] and the retry policy; pages
//! are decoded by [`scholar_parser`](super::scholar_parser).

use crate::models::{Author, CitingWork, Publication};
use crate::services::rate_limiter::RateLimiterHandle;
use crate::services::scholar_parser::{
    detect_block, parse_author_page, parse_citations_page, parse_org_page, parse_profile_page,
    ScholarParseError, CITATIONS_PAGE_SIZE, PROFILE_PAGE_SIZE,
};
use crate::services::source_client::{
    CitingWorkStream, FetchFailure, SourceClient, SourceError, WorkUnit,
};
use crate::utils::{execute_with_retry, RetryError, RetryPolicy};
use async_trait::async_trait;
use citemap_common::TomlConfig;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// How outgoing requests reach the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyMode {
    /// Direct connection; proxy environment variables ignored
    Disabled,
    /// Proxy taken from the standard environment variables
    System,
    /// Every request through the given proxy URL
    Explicit(String),
}

impl ProxyMode {
    pub fn from_config(use_network_proxy: bool, proxy_url: Option<&str>) -> Self {
        match (use_network_proxy, proxy_url.map(str::trim)) {
            (false, _) => ProxyMode::Disabled,
            (true, Some(url)) if !url.is_empty() => ProxyMode::Explicit(url.to_string()),
            (true, _) => ProxyMode::System,
        }
    }
}

/// Scholar web client
pub struct ScholarClient {
    http_client: reqwest::Client,
    base_url: String,
    limiter: RateLimiterHandle,
    retry: RetryPolicy,
    max_profile_pages: usize,
    max_citation_pages: usize,
    /// Author id -> profile (None when the profile no longer exists)
    authors: Mutex<HashMap<String, Option<Author>>>,
    /// Organization id -> official name
    organizations: Mutex<HashMap<String, Option<String>>>,
    unlinked: AtomicUsize,
}

impl ScholarClient {
    pub fn new(config: &TomlConfig, limiter: RateLimiterHandle) -> Result<Self, SourceError> {
        let harvest = &config.harvest;
        let proxy = ProxyMode::from_config(config.use_network_proxy, config.proxy_url.as_deref());

        let mut builder = reqwest::Client::builder()
            .user_agent(harvest.user_agent.as_str())
            .timeout(Duration::from_secs(harvest.request_timeout_secs));

        builder = match &proxy {
            ProxyMode::Disabled => builder.no_proxy(),
            ProxyMode::System => builder,
            ProxyMode::Explicit(url) => builder.proxy(
                reqwest::Proxy::all(url.as_str())
                    .map_err(|e| SourceError::Client(format!("invalid proxy URL: {}", e)))?,
            ),
        };

        let http_client = builder
            .build()
            .map_err(|e| SourceError::Client(e.to_string()))?;

        tracing::debug!(
            base_url = %harvest.base_url,
            proxy = ?proxy,
            "Scholar client created"
        );

        Ok(Self {
            http_client,
            base_url: harvest.base_url.trim_end_matches('/').to_string(),
            limiter,
            retry: RetryPolicy::from(&config.retry),
            max_profile_pages: harvest.max_profile_pages.max(1),
            max_citation_pages: harvest.max_citation_pages.max(1),
            authors: Mutex::new(HashMap::new()),
            organizations: Mutex::new(HashMap::new()),
            unlinked: AtomicUsize::new(0),
        })
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<String, SourceError> {
        reqwest::Url::parse_with_params(&format!("{}/{}", self.base_url, path), params)
            .map(String::from)
            .map_err(|e| SourceError::Client(format!("invalid URL for {}: {}", path, e)))
    }

    /// One rate-limited GET, classified into success or [`FetchFailure`]
    async fn get_html(&self, url: &str) -> Result<String, FetchFailure> {
        self.limiter.acquire().await;

        tracing::debug!(url = %url, "Fetching scholar page");

        let result = self.send(url).await;
        match &result {
            Ok(_) => self.limiter.report_success().await,
            Err(failure) if failure.is_block() => {
                tracing::warn!(url = %url, reason = %failure, "Upstream block detected");
                self.limiter.report_block().await;
            }
            Err(_) => {}
        }
        result
    }

    async fn send(&self, url: &str) -> Result<String, FetchFailure> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;

        let status = response.status();
        match status.as_u16() {
            404 => return Err(FetchFailure::NotFound),
            403 => return Err(FetchFailure::HardBlock("HTTP 403".to_string())),
            429 => return Err(FetchFailure::SoftBlock("HTTP 429".to_string())),
            code if !status.is_success() => return Err(FetchFailure::Status(code)),
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;

        if let Some(marker) = detect_block(&body) {
            return Err(FetchFailure::HardBlock(marker.to_string()));
        }
        Ok(body)
    }

    /// Fetch and parse one page under the retry policy
    ///
    /// Parsing runs inside the retried operation, so a truncated or
    /// interstitial page gets another attempt. A blocked attempt has already
    /// lengthened the limiter spacing, so the next `acquire` waits longer on
    /// top of the retry backoff.
    async fn fetch_parsed<T, P>(&self, unit: WorkUnit, url: &str, parse: P) -> Result<T, SourceError>
    where
        P: Fn(&str) -> Result<T, ScholarParseError> + Sync,
    {
        let parse = &parse;
        let operation = unit.to_string();
        let result = execute_with_retry(&operation, &self.retry, FetchFailure::is_retryable, move |_| {
            async move {
                let body = self.get_html(url).await?;
                parse(&body).map_err(FetchFailure::from)
            }
        })
        .await;

        result.map_err(|err| classify_failure(unit, err))
    }

    /// Citing author's profile, fetched at most once per id
    async fn author_profile(&self, author_id: &str) -> Result<Option<Author>, SourceError> {
        let cached = lock(&self.authors).get(author_id).cloned();
        if let Some(cached) = cached {
            return Ok(cached);
        }

        let url = self.url("citations", &[("user", author_id), ("hl", "en")])?;
        let profile = match self
            .fetch_parsed(WorkUnit::Author(author_id.to_string()), &url, parse_author_page)
            .await
        {
            Ok(profile) => profile,
            Err(SourceError::NotFound(_)) => {
                tracing::debug!(author_id = %author_id, "Author profile not found");
                lock(&self.authors).insert(author_id.to_string(), None);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let mut author = Author::new(profile.name);
        author.profile_id = Some(author_id.to_string());
        author.raw_affiliation_strings.extend(profile.affiliation);
        author.verified_email_domain = profile.email_domain;

        // Organization links only matter when the email domain is confirmed
        if author.verified_email_domain.is_some() {
            if let Some(org_id) = profile.organization_id {
                author.verified_organization = self.organization_name(&org_id).await;
            }
        }

        lock(&self.authors).insert(author_id.to_string(), Some(author.clone()));
        Ok(Some(author))
    }

    /// Official organization name; failures degrade to `None`
    async fn organization_name(&self, org_id: &str) -> Option<String> {
        let cached = lock(&self.organizations).get(org_id).cloned();
        if let Some(cached) = cached {
            return cached;
        }

        let url = match self.url("citations", &[("view_op", "view_org"), ("org", org_id), ("hl", "en")]) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "Skipping organization lookup");
                return None;
            }
        };

        let name = match self
            .fetch_parsed(WorkUnit::Author(format!("org:{}", org_id)), &url, parse_org_page)
            .await
        {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::warn!(org_id = %org_id, error = %e, "Organization lookup failed");
                None
            }
        };

        lock(&self.organizations).insert(org_id.to_string(), name.clone());
        name
    }
}

#[async_trait]
impl SourceClient for ScholarClient {
    async fn fetch_profile(&self, identifier: &str) -> Result<Vec<Publication>, SourceError> {
        let unit = WorkUnit::Profile(identifier.to_string());
        self.unlinked.store(0, Ordering::Relaxed);
        let page_size = PROFILE_PAGE_SIZE.to_string();
        let mut publications = Vec::new();

        for page in 0..self.max_profile_pages {
            let cstart = (page * PROFILE_PAGE_SIZE).to_string();
            let url = self.url(
                "citations",
                &[
                    ("user", identifier),
                    ("hl", "en"),
                    ("cstart", cstart.as_str()),
                    ("pagesize", page_size.as_str()),
                ],
            )?;

            let parsed = self.fetch_parsed(unit.clone(), &url, parse_profile_page).await?;
            let row_count = parsed.rows.len();

            if page == 0 {
                tracing::info!(identifier = %identifier, name = %parsed.name, "Fetched subject profile");
            }

            publications.extend(
                parsed
                    .rows
                    .into_iter()
                    .map(|row| Publication::subject(row.title, row.citation_count, row.cites_ids)),
            );

            if row_count < PROFILE_PAGE_SIZE {
                break;
            }
        }

        tracing::info!(
            identifier = %identifier,
            publications = publications.len(),
            "Subject publications listed"
        );
        Ok(publications)
    }

    fn fetch_citing_works<'a>(&'a self, publication: &'a Publication) -> CitingWorkStream<'a> {
        Box::pin(async_stream::stream! {
            let unit = WorkUnit::Publication(publication.title.clone());

            'ids: for cites_id in &publication.cites_ids {
                for page in 0..self.max_citation_pages {
                    let start = (page * CITATIONS_PAGE_SIZE).to_string();
                    let url = match self.url(
                        "scholar",
                        &[("hl", "en"), ("cites", cites_id.as_str()), ("start", start.as_str())],
                    ) {
                        Ok(url) => url,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };

                    let parsed = match self
                        .fetch_parsed(unit.clone(), &url, |html| parse_citations_page(html, page))
                        .await
                    {
                        Ok(parsed) => parsed,
                        Err(SourceError::NotFound(_)) => continue 'ids,
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    };

                    for entry in parsed.entries {
                        if entry.author_ids.is_empty() {
                            self.unlinked.fetch_add(1, Ordering::Relaxed);
                            continue;
                        }
                        for author_id in &entry.author_ids {
                            match self.author_profile(author_id).await {
                                Ok(Some(author)) => {
                                    yield Ok(CitingWork {
                                        author,
                                        citing_paper: Publication::citing(entry.title.clone(), entry.cited_by),
                                    });
                                }
                                Ok(None) => {}
                                Err(e) => yield Err(e),
                            }
                        }
                    }

                    if !parsed.has_next {
                        break;
                    }
                }
            }
        })
    }

    fn unlinked_citations(&self) -> usize {
        self.unlinked.load(Ordering::Relaxed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Map a retry outcome onto the source error taxonomy
///
/// Retries exhausted while still blocked count as a block.
fn classify_failure(unit: WorkUnit, err: RetryError<FetchFailure>) -> SourceError {
    match err {
        RetryError::Fatal {
            error: FetchFailure::NotFound,
            ..
        } => SourceError::NotFound(unit),
        RetryError::Fatal {
            error: FetchFailure::HardBlock(reason),
            ..
        } => SourceError::Blocked { unit, reason },
        RetryError::Fatal { error, .. } => SourceError::Request { unit, cause: error },
        RetryError::Exhausted {
            last_error: FetchFailure::SoftBlock(reason) | FetchFailure::HardBlock(reason),
            ..
        } => SourceError::Blocked { unit, reason },
        RetryError::Exhausted {
            attempts,
            last_error,
            ..
        } => SourceError::FetchExhausted {
            unit,
            attempts,
            cause: last_error,
        },
    }
}
