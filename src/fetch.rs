//! One retry-with-backoff fetch helper shared by the two reference caches.
//!
//! Both the district directory and the alert catalog are prerequisites for
//! the poll loop, so a failed fetch is retried indefinitely with a short
//! fixed backoff until it succeeds or shutdown is requested.

use anyhow::{Result, anyhow};
use reqwest::Client as HttpClient;
use reqwest::header::ACCEPT;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Backoff between attempts, matching the poll loop's transient-error sleep.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// GET `url`, decode the body with `decode`, and keep retrying until it
/// works. Returns `None` only when shutdown is requested mid-retry.
///
/// Transport errors and bad status codes are logged and retried after
/// [`RETRY_BACKOFF`]; decode errors (malformed JSON) are logged at error
/// level since they usually mean the endpoint changed shape.
pub async fn fetch_with_retry<T>(
    http: &HttpClient,
    url: &str,
    timeout: Duration,
    shutdown: &mut watch::Receiver<bool>,
    decode: impl Fn(&[u8]) -> Result<T>,
) -> Option<T> {
    loop {
        if *shutdown.borrow() {
            return None;
        }
        let started = Instant::now();
        match attempt(http, url, timeout, &decode).await {
            Ok(value) => {
                info!(
                    "fetched {url} (took {:.2} seconds)",
                    started.elapsed().as_secs_f64()
                );
                return Some(value);
            }
            Err(e) => debug!("failed to fetch {url}: {e:#}, trying again..."),
        }
        tokio::select! {
            _ = tokio::time::sleep(RETRY_BACKOFF) => {}
            _ = shutdown.changed() => {}
        }
    }
}

async fn attempt<T>(
    http: &HttpClient,
    url: &str,
    timeout: Duration,
    decode: &impl Fn(&[u8]) -> Result<T>,
) -> Result<T> {
    let response = http
        .get(url)
        .header(ACCEPT, "application/json")
        .timeout(timeout)
        .send()
        .await?;
    if !response.status().is_success() {
        let status = response.status();
        error!("got bad response status code: {status}");
        return Err(anyhow!("bad status: {status}"));
    }
    let body = response.bytes().await?;
    decode(&body).inspect_err(|e| error!("JSON parsing error: {e:#}"))
}

/// Strip a UTF-8 byte-order mark, which the feed occasionally prepends.
pub fn strip_bom(body: &[u8]) -> &[u8] {
    body.strip_prefix("\u{feff}".as_bytes()).unwrap_or(body)
}

/// The district directory sometimes arrives as a JS assignment
/// (`var districts = [...]`); keep only the JSON value.
pub fn strip_assignment_prefix(body: &str) -> &str {
    match body.find(['[', '{']) {
        Some(start) if body[..start].contains('=') => body[start..].trim_start(),
        _ => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_is_stripped() {
        assert_eq!(strip_bom("\u{feff}{}".as_bytes()), b"{}");
        assert_eq!(strip_bom(b"{}"), b"{}");
    }

    #[test]
    fn assignment_prefix_is_stripped() {
        assert_eq!(
            strip_assignment_prefix("var districts =\n [{\"label\":\"x\"}]"),
            "[{\"label\":\"x\"}]"
        );
        assert_eq!(strip_assignment_prefix("[1,2]"), "[1,2]");
        assert_eq!(strip_assignment_prefix("{\"a\":1}"), "{\"a\":1}");
    }
}
