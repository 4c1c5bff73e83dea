use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lazy_regex::regex;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

/// Only the head of a document is searched for the title
const MAX_SCAN_BYTES: usize = 256 * 1024;

/// Looks up a human readable title for a URL
#[async_trait]
pub trait TitleResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<Option<String>>;
}

/// Fetches the page over HTTP and reads its `<title>` tag
pub struct HttpTitleResolver {
    client: reqwest::Client,
}

impl HttpTitleResolver {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("randlink/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("Failed to build HTTP client for titles")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TitleResolver for HttpTitleResolver {
    async fn resolve(&self, url: &str) -> Result<Option<String>> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", url))?
            .error_for_status()
            .with_context(|| format!("Bad status from {}", url))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_html(&content_type) {
            debug!("Skipping title for {}: content type '{}'", url, content_type);
            return Ok(None);
        }

        let mut head = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?
        {
            let room = MAX_SCAN_BYTES - head.len();
            head.extend_from_slice(&chunk[..chunk.len().min(room)]);
            if head.len() >= MAX_SCAN_BYTES {
                break;
            }
        }

        let title = extract_title(&String::from_utf8_lossy(&head));
        debug!("Resolved title for {}: {:?}", url, title);
        Ok(title)
    }
}

fn is_html(content_type: &str) -> bool {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    mime == "text/html" || mime == "application/xhtml+xml"
}

/// Resolver that never finds a title
pub struct NoTitles;

#[async_trait]
impl TitleResolver for NoTitles {
    async fn resolve(&self, _url: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Pull the first `<title>` out of an HTML document.
/// Entities are decoded and runs of whitespace collapsed; a blank title is `None`.
pub fn extract_title(html: &str) -> Option<String> {
    let mut end = html.len().min(MAX_SCAN_BYTES);
    while !html.is_char_boundary(end) {
        end -= 1;
    }

    let raw = regex!(r"(?is)<title(?:\s[^>]*)?>(.*?)</title\s*>")
        .captures(&html[..end])?
        .get(1)?
        .as_str();
    let decoded = html_escape::decode_html_entities(raw);
    let title = decoded.split_whitespace().collect::<Vec<_>>().join(" ");

    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_simple_title() {
        let html = "<html><head><title>Rust Blog</title></head><body></body></html>";
        assert_eq!(extract_title(html).as_deref(), Some("Rust Blog"));
    }

    #[test]
    fn test_title_with_attributes_and_case() {
        let html = r#"<HEAD><TITLE data-rh="true">Announcing Rust 1.80</TITLE></HEAD>"#;
        assert_eq!(extract_title(html).as_deref(), Some("Announcing Rust 1.80"));
    }

    #[test]
    fn test_entities_and_whitespace() {
        let html = "<title>\n   Tom &amp; Jerry\n\t&#8211; Episode 1  </title>";
        assert_eq!(extract_title(html).as_deref(), Some("Tom & Jerry – Episode 1"));
    }

    #[test]
    fn test_missing_or_blank_title() {
        assert_eq!(extract_title("<html><body>no head</body></html>"), None);
        assert_eq!(extract_title("<title>   </title>"), None);
    }

    #[test]
    fn test_ignores_titlebar_like_tags() {
        let html = "<titlebar>nope</titlebar><title>Yes</title>";
        assert_eq!(extract_title(html).as_deref(), Some("Yes"));
    }

    #[test]
    fn test_html_content_types() {
        assert!(is_html("text/html"));
        assert!(is_html("text/html; charset=UTF-8"));
        assert!(is_html("Application/XHTML+XML"));
        assert!(!is_html("application/octet-stream"));
        assert!(!is_html("video/mp4"));
        assert!(!is_html(""));
    }

    /// Serve one canned HTTP response on a local port
    async fn serve_once(content_type: &'static str, body: Vec<u8>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;

            let header = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                content_type,
                body.len()
            );
            let _ = socket.write_all(header.as_bytes()).await;
            let _ = socket.write_all(&body).await;
        });

        format!("http://{}/page", addr)
    }

    #[tokio::test]
    async fn test_non_html_response_has_no_title() {
        let url = serve_once(
            "application/octet-stream",
            b"<title>Not a page</title>".to_vec(),
        )
        .await;
        let resolver = HttpTitleResolver::new(Duration::from_secs(5)).unwrap();

        assert_eq!(resolver.resolve(&url).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_large_html_body_is_read_partially() {
        let mut body = b"<html><head><title>Big page</title></head><body>".to_vec();
        body.resize(MAX_SCAN_BYTES * 8, b'x');
        let url = serve_once("text/html; charset=utf-8", body).await;
        let resolver = HttpTitleResolver::new(Duration::from_secs(5)).unwrap();

        assert_eq!(
            resolver.resolve(&url).await.unwrap().as_deref(),
            Some("Big page")
        );
    }

    #[test]
    fn test_multibyte_body_does_not_panic() {
        let mut html = String::from("<title>Привет</title>");
        html.push_str(&"ж".repeat(MAX_SCAN_BYTES));
        assert_eq!(extract_title(&html).as_deref(), Some("Привет"));
    }
}
