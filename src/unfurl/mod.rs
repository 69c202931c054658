//! Link unfurling: gate a caller-supplied URL, fetch it within bounds and
//! summarize its preview metadata.

mod address;
mod extract;
mod fetch;
mod gate;

pub use gate::{Resolver, SystemResolver};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::UnfurlConfig;
use crate::error::UnfurlError;
use extract::extract_metadata;
use fetch::Fetcher;
use gate::SafetyGate;

/// Link preview returned to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewResult {
    /// Final URL after redirects
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
}

pub struct Unfurler {
    gate: SafetyGate,
    fetcher: Fetcher,
    timeout: Duration,
}

impl Unfurler {
    pub fn new(config: &UnfurlConfig, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            gate: SafetyGate::new(config, resolver),
            fetcher: Fetcher::new(config),
            timeout: config.timeout,
        }
    }

    /// Unfurl a raw URL string.
    ///
    /// The configured timeout bounds every network step together: DNS, HEAD,
    /// GET and body read across all redirect hops. Expiry drops whatever is
    /// in flight.
    pub async fn unfurl(&self, raw: &str) -> Result<PreviewResult, UnfurlError> {
        tokio::time::timeout(self.timeout, self.unfurl_inner(raw))
            .await
            .map_err(|_| UnfurlError::Timeout)?
    }

    async fn unfurl_inner(&self, raw: &str) -> Result<PreviewResult, UnfurlError> {
        let target = self.gate.check(raw).await?;

        debug!("Fetching link preview for: {}", target.url);
        let page = self.fetcher.fetch(&self.gate, target).await?;

        let meta = extract_metadata(&page.html, &page.final_url);
        debug!(
            "Link preview for {}: title={:?}, image={:?}",
            page.final_url, meta.title, meta.image
        );

        Ok(PreviewResult {
            url: page.final_url.to_string(),
            title: meta.title,
            description: meta.description,
            image: meta.image,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{local_config, spawn_upstream};
    use super::*;
    use axum::{response::Html, routing::get, Router};

    #[tokio::test]
    async fn test_unfurl_end_to_end() {
        let router = Router::new()
            .route(
                "/old",
                get(|| async { axum::response::Redirect::permanent("/path/page.html") }),
            )
            .route(
                "/path/page.html",
                get(|| async {
                    Html(
                        r#"<html><head>
                            <title>Fallback title</title>
                            <meta property="og:title" content="Hello">
                            <meta name="description" content="A page">
                            <meta property="og:image" content="/img/a.png">
                        </head></html>"#,
                    )
                }),
            );
        let addr = spawn_upstream(router).await;

        let unfurler = Unfurler::new(&local_config(), testing::StaticResolver::new(&[]));
        let preview = unfurler
            .unfurl(&format!("http://{addr}/old"))
            .await
            .unwrap();

        assert_eq!(
            preview,
            PreviewResult {
                url: format!("http://{addr}/path/page.html"),
                title: Some("Hello".to_string()),
                description: Some("A page".to_string()),
                image: Some(format!("http://{addr}/img/a.png")),
            }
        );
    }

    #[tokio::test]
    async fn test_favicon_fallback_uses_final_url() {
        let router = Router::new().route(
            "/bare",
            get(|| async { Html("<html><body>hi</body></html>") }),
        );
        let addr = spawn_upstream(router).await;

        let unfurler = Unfurler::new(&local_config(), testing::StaticResolver::new(&[]));
        let preview = unfurler.unfurl(&format!("http://{addr}/bare")).await.unwrap();
        assert_eq!(preview.title, None);
        assert_eq!(preview.image, Some(format!("http://{addr}/favicon.ico")));
    }

    #[tokio::test]
    async fn test_blocked_target_is_never_fetched() {
        let unfurler = Unfurler::new(
            &UnfurlConfig::default(),
            testing::StaticResolver::new(&[("internal.example", &["10.0.0.5"])]),
        );
        let err = unfurler
            .unfurl("http://internal.example/admin")
            .await
            .unwrap_err();
        assert!(matches!(err, UnfurlError::BlockedAddress { .. }));
    }

    #[tokio::test]
    async fn test_combined_steps_share_one_deadline() {
        // Each step fits the timeout on its own, the sum does not.
        let router = Router::new().route(
            "/slowish",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Html("<title>late</title>")
            })
            .head(|| async {
                tokio::time::sleep(Duration::from_millis(150)).await;
                axum::http::StatusCode::OK
            }),
        );
        let addr = spawn_upstream(router).await;

        let config = UnfurlConfig {
            timeout: Duration::from_millis(200),
            ..local_config()
        };
        let unfurler = Unfurler::new(&config, testing::StaticResolver::new(&[]));
        let err = unfurler
            .unfurl(&format!("http://{addr}/slowish"))
            .await
            .unwrap_err();
        assert!(matches!(err, UnfurlError::Timeout));
        assert_eq!(err.status(), axum::http::StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_preview_serializes_nulls() {
        let preview = PreviewResult {
            url: "https://site.example/".to_string(),
            title: Some("T".to_string()),
            description: None,
            image: None,
        };
        let json = serde_json::to_value(&preview).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "url": "https://site.example/",
                "title": "T",
                "description": null,
                "image": null,
            })
        );
    }
}
