//! Web server exposing the unfurl endpoint.

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{debug, error, info, warn};

use crate::error::UnfurlError;
use crate::unfurl::Unfurler;

const PREVIEW_CACHE_CONTROL: &str = "s-maxage=3600, stale-while-revalidate=86400";

/// Shared application state
pub struct AppState {
    pub unfurler: Unfurler,
}

impl AppState {
    pub fn new(unfurler: Unfurler) -> Arc<Self> {
        Arc::new(Self { unfurler })
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Deserialize)]
struct UnfurlQuery {
    url: Option<String>,
}

/// Create the web server router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/unfurl", get(get_unfurl))
        .route("/api/health", get(get_health))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state)
}

/// Start the web server
pub async fn start_server(state: Arc<AppState>, host: &str, port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    let router = create_router(state);

    info!("Web server running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down...");
}

// API Handlers

async fn get_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Unfurl a URL into a link preview.
///
/// Dropping this future (client disconnect) cancels the in-flight fetch.
async fn get_unfurl(
    State(state): State<Arc<AppState>>,
    query: Result<Query<UnfurlQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    let query = match query {
        Ok(Query(query)) => query,
        Err(rejection) => {
            debug!("Rejected unfurl query: {}", rejection.body_text());
            return UnfurlError::InvalidUrl(rejection.body_text()).into_response();
        }
    };
    let Some(url) = query.url.filter(|u| !u.trim().is_empty()) else {
        return UnfurlError::MissingUrl.into_response();
    };

    match state.unfurler.unfurl(&url).await {
        Ok(preview) => (
            [(header::CACHE_CONTROL, PREVIEW_CACHE_CONTROL)],
            Json(preview),
        )
            .into_response(),
        Err(e) => {
            log_rejection(&url, &e, &headers);
            e.into_response()
        }
    }
}

fn log_rejection(url: &str, err: &UnfurlError, headers: &HeaderMap) {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    match err {
        UnfurlError::BlockedAddress { host, addrs } => {
            warn!(
                target: "security",
                url = %url,
                host = %host,
                addrs = ?addrs,
                user_agent = %user_agent,
                "Blocked unfurl of private or reserved address"
            );
        }
        UnfurlError::HostDenied(host) | UnfurlError::HostNotAllowed(host) => {
            warn!(
                target: "security",
                url = %url,
                host = %host,
                user_agent = %user_agent,
                "Blocked unfurl by host policy"
            );
        }
        UnfurlError::Internal(e) => {
            error!("Failed to unfurl {}: {:#}", url, e);
        }
        UnfurlError::Timeout | UnfurlError::Upstream(_) | UnfurlError::TooLarge => {
            info!("Failed to unfurl {}: {}", url, err);
        }
        _ => {
            debug!("Rejected unfurl of {}: {}", url, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostList, UnfurlConfig};
    use crate::unfurl::testing::{local_config, spawn_upstream, StaticResolver};
    use axum::{body::Body, http::Request, http::StatusCode, response::Html};
    use tower::ServiceExt;

    fn app(config: UnfurlConfig) -> Router {
        let resolver = StaticResolver::new(&[
            ("evil.example", &["93.184.216.34"]),
            ("internal.example", &["10.0.0.5"]),
        ]);
        create_router(AppState::new(Unfurler::new(&config, resolver)))
    }

    async fn call(router: Router, uri: &str) -> (StatusCode, HeaderMap, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_missing_url_is_bad_request() {
        let (status, _, body) = call(app(UnfurlConfig::default()), "/api/unfurl").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _, _) = call(app(UnfurlConfig::default()), "/api/unfurl?url=").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_query_is_json_error() {
        let (status, headers, body) =
            call(app(UnfurlConfig::default()), "/api/unfurl?url=a&url=b").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            headers.get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert!(body["error"].as_str().unwrap().starts_with("invalid URL"));
    }

    #[tokio::test]
    async fn test_file_scheme_is_bad_request() {
        let (status, headers, body) = call(
            app(UnfurlConfig::default()),
            "/api/unfurl?url=file%3A%2F%2F%2Fetc%2Fpasswd",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "only HTTP(S) schemes are allowed");
        assert!(headers.get(header::CACHE_CONTROL).is_none());
    }

    #[tokio::test]
    async fn test_private_address_is_forbidden() {
        let (status, _, body) = call(
            app(UnfurlConfig::default()),
            "/api/unfurl?url=http%3A%2F%2Finternal.example%2F",
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "private or reserved IP address refused");

        let (status, _, _) = call(
            app(UnfurlConfig::default()),
            "/api/unfurl?url=http%3A%2F%2F169.254.169.254%2Flatest%2Fmeta-data",
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_denied_host_is_forbidden() {
        let config = UnfurlConfig {
            deny_hosts: HostList::from_patterns(["evil.example"]),
            ..UnfurlConfig::default()
        };
        let (status, _, _) =
            call(app(config), "/api/unfurl?url=http%3A%2F%2Fevil.example%2Fx").await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_success_sets_cache_control() {
        let upstream = Router::new().route(
            "/page",
            get(|| async {
                Html(r#"<title>Portfolio</title><meta name="description" content="Work">"#)
            }),
        );
        let addr = spawn_upstream(upstream).await;

        let uri = format!("/api/unfurl?url=http%3A%2F%2F{}%2Fpage", addr);
        let (status, headers, body) = call(app(local_config()), &uri).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            headers.get(header::CACHE_CONTROL).unwrap(),
            PREVIEW_CACHE_CONTROL
        );
        assert_eq!(headers.get(header::X_CONTENT_TYPE_OPTIONS).unwrap(), "nosniff");
        assert_eq!(body["url"], format!("http://{}/page", addr));
        assert_eq!(body["title"], "Portfolio");
        assert_eq!(body["description"], "Work");
        assert_eq!(body["image"], format!("http://{}/favicon.ico", addr));
    }

    #[tokio::test]
    async fn test_upstream_failure_keeps_status() {
        let upstream = Router::new().route(
            "/broken",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let addr = spawn_upstream(upstream).await;

        let uri = format!("/api/unfurl?url=http%3A%2F%2F{}%2Fbroken", addr);
        let (status, _, body) = call(app(local_config()), &uri).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "cannot fetch the link preview");
    }

    #[tokio::test]
    async fn test_health() {
        let (status, _, body) = call(app(UnfurlConfig::default()), "/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }
}
