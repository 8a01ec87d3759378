//! Component E: the frontier-driven crawl engine.
//!
//! A single [`Engine::run`] call owns the frontier, the `seen` dedup set, and the per-URL
//! `records` map for the whole build; only this loop ever mutates them; fetches run concurrently
//! off to the side and report back through a [`FuturesUnordered`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use reqwest::{Client, StatusCode};
use strum::Display;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::rt::Discover;
use crate::html_extract;
use crate::materializer::Materializer;
use crate::url_normalize::CanonicalUrl;

const USER_AGENT: &str = concat!("Fledge/", env!("CARGO_PKG_VERSION"));
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: [Duration; 2] = [Duration::from_millis(100), Duration::from_millis(400)];
/// The per-request timeout used when `requestTimeout` is not set in the config file.
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A unit of crawl work: a canonical URL at a known depth, discovered from a known referrer.
#[derive(Debug, Clone)]
pub struct CrawlTarget {
    pub url: CanonicalUrl,
    pub depth: u32,
    pub referrer: Option<Url>,
}

/// The terminal outcome recorded for a canonical URL once the engine is done with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Outcome {
    Fetched,
    Redirected,
    SkippedIgnored,
    SkippedDepth,
    FailedPermanent,
    FailedNetwork,
}

/// One row of the crawl's audit trail, returned to the caller as part of the build summary.
#[derive(Debug, Clone)]
pub struct UrlRecord {
    pub url: Url,
    pub depth: u32,
    pub status: Option<u16>,
    pub attempts: u32,
    pub outcome: Outcome,
}

/// The result of draining the frontier: every terminal record, and whether a cancellation cut
/// the crawl short before the frontier emptied.
pub struct CrawlStats {
    pub records: Vec<UrlRecord>,
    pub aborted: bool,
}

/// How a single fetch attempt resolved, before the engine folds it into a [`UrlRecord`].
enum FetchKind {
    Success {
        status: u16,
        content_type: String,
        body: Bytes,
    },
    Redirect {
        location: Option<Url>,
    },
    Failed {
        status: Option<u16>,
        network: bool,
    },
}

struct FetchResult {
    attempts: u32,
    kind: FetchKind,
}

/// Drains a frontier of same-origin URLs against one server, honoring `maxConcurrency` and the
/// configured discovery policy.
pub struct Engine {
    origin: Url,
    client: Client,
    discover: Discover,
    max_concurrency: usize,
    cancellation: CancellationToken,
}

impl Engine {
    pub fn new(
        origin: Url,
        discover: Discover,
        max_concurrency: usize,
        request_timeout: Duration,
        cancellation: CancellationToken,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            origin,
            client,
            discover,
            max_concurrency: max_concurrency.max(1),
            cancellation,
        })
    }

    /// Seed the frontier from `routes`, then drain it to completion (or cancellation),
    /// materializing every successful fetch through `materializer`.
    ///
    /// Returns `Err` only for a fatal, build-aborting materializer failure (notably
    /// `FledgeError::OutputCollision`); per-URL fetch failures are folded into the returned
    /// `CrawlStats` instead.
    pub async fn run(&mut self, routes: Vec<String>, materializer: &mut Materializer) -> anyhow::Result<CrawlStats> {
        let mut frontier: VecDeque<CrawlTarget> = VecDeque::new();
        let mut seen: HashSet<CanonicalUrl> = HashSet::new();
        let mut records: HashMap<CanonicalUrl, UrlRecord> = HashMap::new();

        for raw in routes {
            match CanonicalUrl::resolve(&raw, &self.origin) {
                Ok(canonical) => {
                    if seen.insert(canonical.clone()) {
                        frontier.push_back(CrawlTarget {
                            url: canonical,
                            depth: 0,
                            referrer: None,
                        });
                    }
                }
                Err(err) => tracing::warn!(route = raw, %err, "skipping unresolvable seed route"),
            }
        }

        let mut inflight: FuturesUnordered<BoxFuture<'static, (CrawlTarget, FetchResult)>> =
            FuturesUnordered::new();
        let mut aborted = false;

        loop {
            while inflight.len() < self.max_concurrency {
                let Some(target) = frontier.pop_front() else {
                    break;
                };
                let client = self.client.clone();
                let url = target.url.as_url().clone();
                inflight.push(Box::pin(async move {
                    let result = fetch_one(&client, url).await;
                    (target, result)
                }));
            }

            if inflight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => {
                    aborted = true;
                    break;
                }
                next = inflight.next() => {
                    let Some((target, result)) = next else { break };
                    self.dispatch(target, result, &mut frontier, &mut seen, &mut records, materializer).await?;
                }
            }
        }

        Ok(CrawlStats {
            records: records.into_values().collect(),
            aborted,
        })
    }

    async fn dispatch(
        &self,
        target: CrawlTarget,
        result: FetchResult,
        frontier: &mut VecDeque<CrawlTarget>,
        seen: &mut HashSet<CanonicalUrl>,
        records: &mut HashMap<CanonicalUrl, UrlRecord>,
        materializer: &mut Materializer,
    ) -> anyhow::Result<()> {
        let canonical = target.url.clone();
        match result.kind {
            FetchKind::Success {
                status,
                content_type,
                body,
            } => {
                records.insert(
                    canonical.clone(),
                    UrlRecord {
                        url: canonical.as_url().clone(),
                        depth: target.depth,
                        status: Some(status),
                        attempts: result.attempts,
                        outcome: Outcome::Fetched,
                    },
                );

                let is_html = html_extract::is_html(&content_type, &body);
                materializer.materialize(&canonical, &content_type, &body).await?;
                if is_html {
                    self.discover_links(&target, &body, frontier, seen);
                }
            }
            FetchKind::Redirect { location } => {
                let same_origin_target = location
                    .as_ref()
                    .and_then(|loc| CanonicalUrl::canonicalize(loc.clone()).ok())
                    .filter(|loc| loc.is_same_origin(&self.origin));

                if let Some(loc_canonical) = same_origin_target {
                    if seen.insert(loc_canonical.clone()) {
                        frontier.push_back(CrawlTarget {
                            url: loc_canonical,
                            depth: target.depth,
                            referrer: Some(canonical.as_url().clone()),
                        });
                    }
                    records.insert(
                        canonical.clone(),
                        UrlRecord {
                            url: canonical.as_url().clone(),
                            depth: target.depth,
                            status: None,
                            attempts: result.attempts,
                            outcome: Outcome::Redirected,
                        },
                    );
                } else {
                    records.insert(
                        canonical.clone(),
                        UrlRecord {
                            url: canonical.as_url().clone(),
                            depth: target.depth,
                            status: None,
                            attempts: result.attempts,
                            outcome: Outcome::FailedPermanent,
                        },
                    );
                }
            }
            FetchKind::Failed { status, network } => {
                records.insert(
                    canonical.clone(),
                    UrlRecord {
                        url: canonical.as_url().clone(),
                        depth: target.depth,
                        status,
                        attempts: result.attempts,
                        outcome: if network {
                            Outcome::FailedNetwork
                        } else {
                            Outcome::FailedPermanent
                        },
                    },
                );
            }
        }
        Ok(())
    }

    /// Discover same-origin links in a fetched HTML body, gate them against the configured
    /// discovery policy, and enqueue the survivors at `target.depth + 1`.
    fn discover_links(
        &self,
        target: &CrawlTarget,
        body: &[u8],
        frontier: &mut VecDeque<CrawlTarget>,
        seen: &mut HashSet<CanonicalUrl>,
    ) {
        if matches!(self.discover, Discover::Disabled) {
            return;
        }

        let spans = match html_extract::extract(body) {
            Ok(spans) => spans,
            Err(err) => {
                tracing::warn!(url = %target.url, %err, "html body is not valid utf-8, skipping discovery");
                return;
            }
        };

        for span in spans {
            let Ok(canonical) = CanonicalUrl::resolve(&span.raw, target.url.as_url()) else {
                continue;
            };
            if !canonical.is_same_origin(&self.origin) {
                continue;
            }

            let next_depth = target.depth + 1;
            match &self.discover {
                Discover::Disabled => continue,
                Discover::Unlimited => {}
                Discover::Scoped { depth, ignore } => {
                    if next_depth > *depth {
                        continue;
                    }
                    if ignore.matches(&canonical.site_path()) {
                        continue;
                    }
                }
            }

            if seen.insert(canonical.clone()) {
                frontier.push_back(CrawlTarget {
                    url: canonical,
                    depth: next_depth,
                    referrer: Some(target.url.as_url().clone()),
                });
            }
        }
    }
}

/// Perform one logical fetch, retrying up to [`MAX_ATTEMPTS`] times with the fixed backoff
/// schedule. Redirects are never followed by the client; the caller decides whether to chase
/// `Location` based on same-origin policy.
async fn fetch_one(client: &Client, url: Url) -> FetchResult {
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        match client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::ACCEPT, "*/*")
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status();

                if status.is_redirection() {
                    let location = response
                        .headers()
                        .get(reqwest::header::LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|raw| url.join(raw).ok());
                    return FetchResult {
                        attempts,
                        kind: FetchKind::Redirect { location },
                    };
                }

                if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
                    return FetchResult {
                        attempts,
                        kind: FetchKind::Failed {
                            status: Some(status.as_u16()),
                            network: false,
                        },
                    };
                }

                if status.is_success() {
                    let content_type = response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    let body = response.bytes().await.unwrap_or_default();
                    return FetchResult {
                        attempts,
                        kind: FetchKind::Success {
                            status: status.as_u16(),
                            content_type,
                            body,
                        },
                    };
                }

                // Other 4xx/5xx, including 429, are retriable until attempts run out.
                if attempts >= MAX_ATTEMPTS {
                    return FetchResult {
                        attempts,
                        kind: FetchKind::Failed {
                            status: Some(status.as_u16()),
                            network: false,
                        },
                    };
                }
                let delay = retry_after(&response).unwrap_or(RETRY_BACKOFF[(attempts - 1) as usize]);
                tokio::time::sleep(delay).await;
            }
            Err(_source) => {
                if attempts >= MAX_ATTEMPTS {
                    return FetchResult {
                        attempts,
                        kind: FetchKind::Failed {
                            status: None,
                            network: true,
                        },
                    };
                }
                tokio::time::sleep(RETRY_BACKOFF[(attempts - 1) as usize]).await;
            }
        }
    }
}

/// Parse a `Retry-After` header given in delay-seconds form. The HTTP-date form is not supported;
/// a response using it falls back to the fixed backoff schedule.
fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    let raw = response.headers().get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    parse_retry_after_seconds(raw)
}

/// The delay-seconds parse at the core of [`retry_after`], split out so it's testable without
/// constructing a full [`reqwest::Response`].
fn parse_retry_after_seconds(raw: &str) -> Option<Duration> {
    let secs: u64 = raw.trim().parse().ok()?;
    Some(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url_normalize::IgnoreSet;
    use axum::response::IntoResponse;
    use axum::routing::{get, Router};
    use std::net::SocketAddr;

    async fn spawn_test_server(app: Router) -> (Url, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (Url::parse(&format!("http://{addr}/")).unwrap(), handle)
    }

    #[tokio::test]
    async fn crawls_linked_pages_and_stops_at_depth_limit() {
        let app = Router::new()
            .route("/", get(|| async { axum::response::Html(r#"<a href="/a">a</a>"#) }))
            .route(
                "/a",
                get(|| async { axum::response::Html(r#"<a href="/b">b</a>"#) }),
            )
            .route("/b", get(|| async { axum::response::Html("leaf") }));
        let (origin, _server) = spawn_test_server(app).await;

        let discover = Discover::Scoped {
            depth: 1,
            ignore: IgnoreSet::compile(&[]).unwrap(),
        };
        let mut engine = Engine::new(origin.clone(), discover, 4, DEFAULT_REQUEST_TIMEOUT, CancellationToken::new()).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let mut materializer = Materializer::new(
            dir.path().to_path_buf(),
            "/".to_string(),
            origin.clone(),
            Default::default(),
        );

        let stats = engine.run(vec!["/".to_string()], &mut materializer).await.unwrap();
        assert!(!stats.aborted);

        let fetched: HashSet<String> = stats
            .records
            .iter()
            .filter(|r| r.outcome == Outcome::Fetched)
            .map(|r| r.url.path().to_string())
            .collect();
        assert_eq!(fetched, HashSet::from(["/".to_string(), "/a".to_string()]));
    }

    #[tokio::test]
    async fn disabled_discovery_only_crawls_seed_routes() {
        let app = Router::new()
            .route("/", get(|| async { axum::response::Html(r#"<a href="/a">a</a>"#) }))
            .route("/a", get(|| async { "a" }));
        let (origin, _server) = spawn_test_server(app).await;

        let mut engine = Engine::new(origin.clone(), Discover::Disabled, 4, DEFAULT_REQUEST_TIMEOUT, CancellationToken::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut materializer = Materializer::new(dir.path().to_path_buf(), "/".to_string(), origin, Default::default());

        let stats = engine.run(vec!["/".to_string()], &mut materializer).await.unwrap();
        assert_eq!(stats.records.len(), 1);
        assert_eq!(stats.records[0].outcome, Outcome::Fetched);
    }

    #[tokio::test]
    async fn not_found_is_recorded_as_failed_permanent_without_retry() {
        let app = Router::new().route("/missing", get(|| async { axum::http::StatusCode::NOT_FOUND }));
        let (origin, _server) = spawn_test_server(app).await;

        let mut engine = Engine::new(origin.clone(), Discover::Disabled, 4, DEFAULT_REQUEST_TIMEOUT, CancellationToken::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut materializer = Materializer::new(dir.path().to_path_buf(), "/".to_string(), origin, Default::default());

        let stats = engine.run(vec!["/missing".to_string()], &mut materializer).await.unwrap();
        assert_eq!(stats.records.len(), 1);
        assert_eq!(stats.records[0].outcome, Outcome::FailedPermanent);
        assert_eq!(stats.records[0].attempts, 1);
        assert_eq!(stats.records[0].status, Some(404));
    }

    #[tokio::test]
    async fn cross_origin_links_are_never_enqueued() {
        let app = Router::new().route(
            "/",
            get(|| async { axum::response::Html(r#"<a href="https://other.example/x">x</a>"#) }),
        );
        let (origin, _server) = spawn_test_server(app).await;

        let discover = Discover::Unlimited;
        let mut engine = Engine::new(origin.clone(), discover, 4, DEFAULT_REQUEST_TIMEOUT, CancellationToken::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut materializer = Materializer::new(dir.path().to_path_buf(), "/".to_string(), origin, Default::default());

        let stats = engine.run(vec!["/".to_string()], &mut materializer).await.unwrap();
        assert_eq!(stats.records.len(), 1);
    }

    #[tokio::test]
    async fn retriable_status_eventually_succeeds_without_exhausting_attempts() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let calls = Arc::new(AtomicU32::new(0));
        let app_calls = Arc::clone(&calls);
        let app = Router::new().route(
            "/flaky",
            get(move || {
                let calls = Arc::clone(&app_calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        axum::http::StatusCode::TOO_MANY_REQUESTS.into_response()
                    } else {
                        axum::response::Html("recovered").into_response()
                    }
                }
            }),
        );
        let (origin, _server) = spawn_test_server(app).await;

        let mut engine = Engine::new(origin.clone(), Discover::Disabled, 4, DEFAULT_REQUEST_TIMEOUT, CancellationToken::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut materializer = Materializer::new(dir.path().to_path_buf(), "/".to_string(), origin, Default::default());

        let stats = engine.run(vec!["/flaky".to_string()], &mut materializer).await.unwrap();
        assert_eq!(stats.records.len(), 1);
        assert_eq!(stats.records[0].outcome, Outcome::Fetched);
        assert_eq!(stats.records[0].attempts, 2);
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn retry_after_parses_delay_seconds_and_ignores_http_date() {
        // Only the delay-seconds form of `Retry-After` is understood; the HTTP-date form falls
        // back to the fixed backoff schedule (SPEC_FULL §9 Open Questions).
        assert_eq!(parse_retry_after_seconds("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after_seconds("  120  "), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after_seconds("Wed, 21 Oct 2026 07:28:00 GMT"), None);
    }
}
