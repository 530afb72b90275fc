use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header::HeaderValue, StatusCode},
    middleware::map_response,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::aggregator::Aggregator;
use crate::image::ImageResolver;
use crate::model::FeedSource;

pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub images: Arc<ImageResolver>,
}

/// Build the application router: the two engine endpoints plus a health
/// check. Every response carries permissive CORS headers; plain `OPTIONS`
/// preflights get an empty 204 with the same headers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/feeds", get(fetch_feeds).options(preflight))
        .route("/article-image", get(article_image).options(preflight))
        .route("/health", get(health))
        .layer(map_response(apply_cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The UI collaborator is served from another origin; every response echoes
/// the permissive header set the upstream proxy route used.
async fn apply_cors(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("Content-Type"),
    );
    response
}

#[derive(Deserialize)]
pub struct FeedsQuery {
    feeds: Option<String>,
}

/// `GET /feeds?feeds=<JSON array of {url,category}>`
pub async fn fetch_feeds(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FeedsQuery>,
) -> Response {
    let Some(raw) = query.feeds else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No feed URLs provided" })),
        )
            .into_response();
    };

    let sources: Vec<FeedSource> = match serde_json::from_str(&raw) {
        Ok(sources) => sources,
        Err(err) => {
            error!(error = %err, "invalid feeds parameter");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "Failed to fetch feeds",
                    "details": err.to_string(),
                })),
            )
                .into_response();
        }
    };

    let result = state.aggregator.aggregate(sources).await;
    let total = result.items.len();
    Json(json!({
        "items": result.items,
        "errors": result.errors,
        "total": total,
    }))
    .into_response()
}

#[derive(Deserialize)]
pub struct ArticleImageQuery {
    url: Option<String>,
}

/// `GET /article-image?url=<article URL>`
pub async fn article_image(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ArticleImageQuery>,
) -> Response {
    let Some(url) = query.url else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No URL provided" })),
        )
            .into_response();
    };

    let (resolution, cached) = state.images.resolve_article(&url).await;
    Json(json!({
        "imageUrl": resolution.image_url,
        "status": resolution.status,
        "cached": cached,
    }))
    .into_response()
}

pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

pub async fn health() -> impl IntoResponse {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchConfig, Fetcher};
    use crate::image::ImageConfig;
    use crate::limiter::{RateLimitConfig, RateLimiter};
    use crate::normalizer::Normalizer;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tokio::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_app() -> Router {
        let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            window: Duration::from_secs(60),
            max_requests: 1000,
            min_delay: Duration::ZERO,
        }));
        let fetcher = Arc::new(Fetcher::new(
            limiter,
            FetchConfig {
                max_retries: 0,
                backoff_base: Duration::from_millis(10),
                timeout: Duration::from_secs(5),
                proxy_url: None,
            },
        ));
        let aggregator = Arc::new(Aggregator::new(
            fetcher.clone(),
            Normalizer::new(),
            crate::aggregator::AggregatorConfig {
                timeout: Duration::from_secs(5),
                max_concurrency: None,
                cache_ttl: Duration::from_secs(60),
            },
        ));
        let images = Arc::new(ImageResolver::new(
            fetcher,
            ImageConfig {
                min_width: 200,
                min_height: 150,
                placeholder: "/placeholder.svg".to_string(),
                cache_ttl: Duration::from_secs(60),
            },
        ));

        router(Arc::new(AppState { aggregator, images }))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    mod health_tests {
        use super::*;

        #[tokio::test]
        async fn test_health_endpoint() {
            let app = create_test_app();

            let response = app
                .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let body = response.into_body().collect().await.unwrap().to_bytes();
            assert_eq!(&body[..], b"OK");
        }
    }

    mod feeds_tests {
        use super::*;

        #[tokio::test]
        async fn test_missing_feeds_param_is_400() {
            let app = create_test_app();

            let response = app
                .oneshot(Request::builder().uri("/feeds").body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let json = body_json(response).await;
            assert_eq!(json["error"], "No feed URLs provided");
        }

        #[tokio::test]
        async fn test_invalid_feeds_json_is_500_with_details() {
            let app = create_test_app();

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/feeds?feeds=not-json")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            let json = body_json(response).await;
            assert_eq!(json["error"], "Failed to fetch feeds");
            assert!(json["details"].is_string());
        }

        #[tokio::test]
        async fn test_empty_source_list_is_ok() {
            let app = create_test_app();

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/feeds?feeds=%5B%5D")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["total"], 0);
            assert_eq!(json["items"], serde_json::json!([]));
            assert_eq!(json["errors"], serde_json::json!([]));
        }

        #[tokio::test]
        async fn test_feeds_round_trip_against_mock_server() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/feed.xml"))
                .respond_with(ResponseTemplate::new(200).set_body_raw(
                    r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Wire Feed</title>
    <item>
      <title>Hello</title>
      <link>https://example.com/hello</link>
      <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate>
    </item>
  </channel>
</rss>"#,
                    "application/rss+xml",
                ))
                .mount(&server)
                .await;

            let feeds_param = serde_json::to_string(&serde_json::json!([
                { "url": format!("{}/feed.xml", server.uri()), "category": "Tech" }
            ]))
            .unwrap();
            let uri = format!(
                "/feeds?{}",
                serde_urlencoded::to_string([("feeds", feeds_param)]).unwrap()
            );

            let app = create_test_app();
            let response = app
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["total"], 1);
            assert_eq!(json["items"][0]["title"], "Hello");
            assert_eq!(json["items"][0]["source"], "Wire Feed");
            assert_eq!(json["items"][0]["category"], "Tech");
        }
    }

    mod article_image_tests {
        use super::*;

        #[tokio::test]
        async fn test_missing_url_param_is_400() {
            let app = create_test_app();

            let response = app
                .oneshot(
                    Request::builder()
                        .uri("/article-image")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let json = body_json(response).await;
            assert_eq!(json["error"], "No URL provided");
        }

        #[tokio::test]
        async fn test_article_image_resolution_and_cached_flag() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/article"))
                .respond_with(ResponseTemplate::new(200).set_body_raw(
                    r#"<html><head><meta property="og:image" content="/hero.jpg"></head></html>"#,
                    "text/html",
                ))
                .expect(1)
                .mount(&server)
                .await;

            let app = create_test_app();
            let uri = format!(
                "/article-image?{}",
                serde_urlencoded::to_string([("url", format!("{}/article", server.uri()))])
                    .unwrap()
            );

            let first = app
                .clone()
                .oneshot(Request::builder().uri(uri.as_str()).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(first.status(), StatusCode::OK);
            let first_json = body_json(first).await;
            assert_eq!(first_json["status"], "success");
            assert_eq!(first_json["cached"], false);
            assert_eq!(first_json["imageUrl"], format!("{}/hero.jpg", server.uri()));

            let second = app
                .oneshot(Request::builder().uri(uri.as_str()).body(Body::empty()).unwrap())
                .await
                .unwrap();
            let second_json = body_json(second).await;
            assert_eq!(second_json["cached"], true);
        }

        #[tokio::test]
        async fn test_unreachable_article_degrades_to_placeholder() {
            let app = create_test_app();
            let uri = format!(
                "/article-image?{}",
                serde_urlencoded::to_string([("url", "http://127.0.0.1:9/article")]).unwrap()
            );

            let response = app
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let json = body_json(response).await;
            assert_eq!(json["imageUrl"], "/placeholder.svg");
            assert_eq!(json["status"], "error");
        }
    }

    mod cors_tests {
        use super::*;

        #[tokio::test]
        async fn test_responses_carry_cors_headers() {
            let app = create_test_app();

            let response = app
                .oneshot(Request::builder().uri("/feeds").body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(
                response
                    .headers()
                    .get("access-control-allow-origin")
                    .map(|v| v.to_str().unwrap()),
                Some("*")
            );
            assert_eq!(
                response
                    .headers()
                    .get("access-control-allow-methods")
                    .map(|v| v.to_str().unwrap()),
                Some("GET, OPTIONS")
            );
        }

        #[tokio::test]
        async fn test_options_preflight_is_204_with_cors_headers() {
            let app = create_test_app();

            for uri in ["/feeds", "/article-image"] {
                let response = app
                    .clone()
                    .oneshot(
                        Request::builder()
                            .method("OPTIONS")
                            .uri(uri)
                            .body(Body::empty())
                            .unwrap(),
                    )
                    .await
                    .unwrap();

                assert_eq!(response.status(), StatusCode::NO_CONTENT);
                assert!(response.headers().contains_key("access-control-allow-origin"));
                let body = response.into_body().collect().await.unwrap().to_bytes();
                assert!(body.is_empty());
            }
        }
    }

    mod query_tests {
        use super::*;

        #[test]
        fn test_feeds_query_param_optional() {
            let query: FeedsQuery = serde_urlencoded::from_str("").unwrap();
            assert!(query.feeds.is_none());
        }

        #[test]
        fn test_feeds_query_decodes_json_param() {
            let query: FeedsQuery =
                serde_urlencoded::from_str("feeds=%5B%7B%22url%22%3A%22x%22%7D%5D").unwrap();
            assert_eq!(query.feeds.as_deref(), Some(r#"[{"url":"x"}]"#));
        }
    }
}
