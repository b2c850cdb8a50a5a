//! Fetcher role: HTTP download plus link extraction.
//!
//! The [`DocumentFetcher`] trait abstracts the network so the executor
//! can be tested with canned responses. [`HttpFetcher`] is the real
//! implementation over a pooled `reqwest` client.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, warn};
use url::Url;

use crate::protocol::{
    encode_document, AssignmentPayload, FailureKind, FetchOutcome, WorkOutcome, WorkerFailure,
    WorkerRole,
};

use super::runner::RoleExecutor;
use super::WorkerError;

/// Fetches one URL and reports the document, links, and failure class.
pub trait DocumentFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> impl Future<Output = FetchOutcome> + Send;
}

/// Real fetcher over HTTP.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout_seconds: u64, user_agent: &str) -> Result<Self, WorkerError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(timeout_seconds))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| WorkerError::HttpClient(e.to_string()))?;
        Ok(Self { client })
    }

    /// Classifies a transport-level failure.
    fn classify(url: &str, error: &reqwest::Error) -> WorkerFailure {
        if error.is_timeout() {
            return WorkerFailure::new(FailureKind::Timeout, error.to_string());
        }
        // reqwest buries DNS failures inside the error chain; the rendered
        // chain names them explicitly.
        let rendered = format!("{error:?}").to_lowercase();
        if rendered.contains("dns error") || rendered.contains("failed to lookup address") {
            let host = crate::store::extract_host(url).unwrap_or_default();
            // This exact signature is what the dispatcher's log scanner
            // matches as a fallback.
            warn!("Failed to resolve '{host}'");
            return WorkerFailure::new(FailureKind::Dns, error.to_string());
        }
        WorkerFailure::new(FailureKind::Connection, error.to_string())
    }
}

impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(%url, error = %e, "Fetch failed");
                return FetchOutcome {
                    error: Some(Self::classify(url, &e)),
                    ..Default::default()
                };
            }
        };

        let status = response.status().as_u16();
        if !response.status().is_success() {
            debug!(%url, status, "Fetch returned an error status");
            return FetchOutcome {
                http_status: Some(status),
                error: Some(WorkerFailure::new(
                    FailureKind::Http,
                    format!("HTTP {status}"),
                )),
                ..Default::default()
            };
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_string());

        let body = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                return FetchOutcome {
                    http_status: Some(status),
                    error: Some(Self::classify(url, &e)),
                    ..Default::default()
                };
            }
        };

        let links = if mime_type.as_deref() == Some("text/html") {
            extract_links(&String::from_utf8_lossy(&body), url)
        } else {
            Vec::new()
        };

        debug!(%url, status, size = body.len(), links = links.len(), "Fetched");
        FetchOutcome {
            http_status: Some(status),
            mime_type,
            size_bytes: body.len() as u64,
            document: encode_document(&body),
            links,
            error: None,
        }
    }
}

/// Extracts absolute http(s) links from an HTML document, fragments
/// stripped, duplicates removed, document order preserved.
pub fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    let selector = Selector::parse("a[href], link[href]").expect("selector is valid");

    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let Ok(mut absolute) = base.join(href) else {
            continue;
        };
        if !matches!(absolute.scheme(), "http" | "https") {
            continue;
        }
        absolute.set_fragment(None);
        let rendered = absolute.to_string();
        if seen.insert(rendered.clone()) {
            links.push(rendered);
        }
    }
    links
}

/// Fetcher executor for the worker runner.
pub struct FetchExecutor<F: DocumentFetcher> {
    fetcher: F,
}

impl<F: DocumentFetcher> FetchExecutor<F> {
    pub fn new(fetcher: F) -> Self {
        Self { fetcher }
    }
}

impl<F: DocumentFetcher> RoleExecutor for FetchExecutor<F> {
    fn role(&self) -> WorkerRole {
        WorkerRole::Fetcher
    }

    async fn execute(&self, payload: AssignmentPayload) -> WorkOutcome {
        match payload {
            AssignmentPayload::Fetch { url, .. } => {
                WorkOutcome::Fetch(self.fetcher.fetch(&url).await)
            }
            other => {
                warn!(?other, "Fetcher received a foreign assignment");
                WorkOutcome::Fetch(FetchOutcome {
                    error: Some(WorkerFailure::new(
                        FailureKind::Internal,
                        "assignment kind does not match role",
                    )),
                    ..Default::default()
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_links_resolves_relative() {
        let html = r#"<html><body>
            <a href="/tunes/reel.abc">reel</a>
            <a href="other.html">other</a>
            <link rel="next" href="http://elsewhere.example/page">
        </body></html>"#;
        let links = extract_links(html, "http://h.example/dir/index.html");
        assert_eq!(
            links,
            vec![
                "http://h.example/tunes/reel.abc",
                "http://h.example/dir/other.html",
                "http://elsewhere.example/page",
            ]
        );
    }

    #[test]
    fn test_extract_links_skips_non_http_and_fragments() {
        let html = r#"
            <a href="mailto:x@y">mail</a>
            <a href="javascript:void(0)">js</a>
            <a href="/page#section">anchored</a>
            <a href="/page">plain</a>
        "#;
        let links = extract_links(html, "http://h.example/");
        assert_eq!(links, vec!["http://h.example/page"]);
    }

    #[test]
    fn test_extract_links_empty_document() {
        assert!(extract_links("", "http://h.example/").is_empty());
        assert!(extract_links("<p>hi</p>", "not a url").is_empty());
    }

    /// Canned fetcher for executor tests.
    struct CannedFetcher(FetchOutcome);

    impl DocumentFetcher for CannedFetcher {
        async fn fetch(&self, _url: &str) -> FetchOutcome {
            self.0.clone()
        }
    }

    #[tokio::test]
    async fn test_executor_passes_through_outcome() {
        let canned = FetchOutcome {
            http_status: Some(200),
            size_bytes: 3,
            document: encode_document(b"ABC"),
            ..Default::default()
        };
        let executor = FetchExecutor::new(CannedFetcher(canned.clone()));

        let outcome = executor
            .execute(AssignmentPayload::Fetch {
                url_id: 1,
                url: "http://h/x".to_string(),
            })
            .await;
        assert_eq!(outcome, WorkOutcome::Fetch(canned));
    }

    #[tokio::test]
    async fn test_executor_rejects_foreign_payload() {
        let executor = FetchExecutor::new(CannedFetcher(FetchOutcome::default()));
        let outcome = executor
            .execute(AssignmentPayload::Index {
                tunebook_id: 1,
                tunes: vec![],
            })
            .await;
        let WorkOutcome::Fetch(fetch) = outcome else {
            panic!("wrong outcome kind");
        };
        assert_eq!(fetch.error.unwrap().kind, FailureKind::Internal);
    }
}
