//! Guarded HTTP fetch for page extraction.
//!
//! Only `200 OK` textual responses are accepted, and the body is read in
//! chunks so an oversized page is dropped before it is fully buffered.

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, StatusCode};
use url::Url;

/// Browser-like User-Agent; many sites block obvious bots.
pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.5";
const MAX_REDIRECTS: usize = 10;

/// Why a single URL produced no content. Never leaves this crate as an
/// error; [`crate::ContentExtractor::extract`] logs it and returns `None`.
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("invalid URL {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme `{0}`, expected http or https")]
    InvalidScheme(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("response too large ({size} bytes, max {max})")]
    TooLarge { size: u64, max: u64 },

    #[error("HTTP {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("unsupported content type {0}")]
    UnsupportedContent(String),

    #[error("no strategy found at least {min} characters of content")]
    InsufficientContent { min: usize },
}

pub(crate) fn build_client(timeout: Duration) -> reqwest::Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));

    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(timeout)
        .build()
}

/// Fetch `url` and return its body decoded as (lossy) UTF-8.
pub(crate) async fn fetch_html(
    client: &Client,
    url: &Url,
    timeout: Duration,
    max_bytes: u64,
) -> Result<String, ExtractionError> {
    let classify = |e: reqwest::Error| {
        if e.is_timeout() {
            ExtractionError::Timeout(timeout)
        } else {
            ExtractionError::Network(e.to_string())
        }
    };

    let mut response = client.get(url.clone()).send().await.map_err(classify)?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(ExtractionError::Status(status.as_u16()));
    }

    if let Some(content_type) = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        if !is_textual(content_type) {
            return Err(ExtractionError::UnsupportedContent(content_type.to_string()));
        }
    }

    if let Some(size) = response.content_length().filter(|&len| len > max_bytes) {
        return Err(ExtractionError::TooLarge {
            size,
            max: max_bytes,
        });
    }

    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(classify)? {
        let size = (body.len() + chunk.len()) as u64;
        if size > max_bytes {
            return Err(ExtractionError::TooLarge {
                size,
                max: max_bytes,
            });
        }
        body.extend_from_slice(&chunk);
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}

fn is_textual(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.starts_with("text/") || ct.contains("html") || ct.contains("xml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn textual_content_types() {
        assert!(is_textual("text/html; charset=utf-8"));
        assert!(is_textual("application/xhtml+xml"));
        assert!(is_textual("text/plain"));
        assert!(!is_textual("application/pdf"));
        assert!(!is_textual("image/png"));
    }

    #[tokio::test]
    async fn invalid_utf8_is_decoded_lossily() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/latin1"))
            .respond_with(
                wiremock::ResponseTemplate::new(200)
                    .set_body_raw(b"caf\xe9 au lait".to_vec(), "text/html"),
            )
            .mount(&server)
            .await;

        let client = build_client(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&format!("{}/latin1", server.uri())).unwrap();
        let body = fetch_html(&client, &url, Duration::from_secs(5), 1024)
            .await
            .unwrap();
        assert_eq!(body, "caf\u{fffd} au lait");
    }

    #[tokio::test]
    async fn sends_browser_headers() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::header("pragma", "no-cache"))
            .and(wiremock::matchers::header("cache-control", "no-cache"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_raw("ok", "text/html"))
            .mount(&server)
            .await;

        let client = build_client(Duration::from_secs(5)).unwrap();
        let url = Url::parse(&server.uri()).unwrap();
        let body = fetch_html(&client, &url, Duration::from_secs(5), 1024)
            .await
            .unwrap();
        assert_eq!(body, "ok");

        let requests = server.received_requests().await.unwrap();
        let ua = requests[0].headers.get("user-agent").unwrap();
        assert_eq!(ua.to_str().unwrap(), USER_AGENT);
    }
}
