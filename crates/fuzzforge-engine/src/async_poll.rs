//! Asynchronous resource creation polling
//!
//! Some services acknowledge a creation with `202 Accepted` and a location
//! to poll. The engine polls that URL with an increasing interval until the
//! operation reaches a terminal state or the per-request wait budget runs
//! out; the terminal response is the one handed to the response parser.

use std::time::Duration;

use tracing::debug;

use fuzzforge_trace::TraceTags;
use fuzzforge_transport::HttpResponse;

use crate::error::Result;
use crate::executor::RequestExecutor;

const ACCEPTED_CODE: &str = "202";

/// Whether a response indicates the resource is still being created.
fn is_in_progress(response: &HttpResponse) -> bool {
    if response.status_code() == Some(ACCEPTED_CODE) {
        return true;
    }
    response
        .json_body()
        .and_then(|body| body.get("status").and_then(|s| s.as_str().map(str::to_string)))
        .is_some_and(|status| {
            matches!(status.as_str(), "InProgress" | "Creating" | "Provisioning" | "Accepted")
        })
}

/// The URL to poll, from the response headers.
fn poll_location(response: &HttpResponse) -> Option<String> {
    let location = response
        .header("Location")
        .or_else(|| response.header("Operation-Location"))
        .or_else(|| response.header("Azure-AsyncOperation"))?;
    // Absolute URLs are reduced to their path; the poll goes over the same
    // socket as the original request.
    if let Some(schemeless) = location.split("://").nth(1) {
        let path_start = schemeless.find('/')?;
        Some(schemeless[path_start..].to_string())
    } else {
        Some(location.to_string())
    }
}

fn host_header(payload: &str) -> Option<&str> {
    payload.split("\r\n").find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim().eq_ignore_ascii_case("host").then(|| value.trim())
    })
}

impl RequestExecutor {
    /// Poll until the asynchronous creation finishes, up to `max_wait`.
    ///
    /// `sent_payload` is the original (pre-auth) request payload; its Host
    /// header and auth placeholder carry over to the poll requests. Returns
    /// the original response unchanged when no polling is needed.
    pub async fn try_async_poll(
        &mut self,
        sent_payload: &str,
        response: &HttpResponse,
        max_wait: Duration,
    ) -> Result<HttpResponse> {
        if max_wait.is_zero() || !is_in_progress(response) {
            return Ok(response.clone());
        }
        let Some(path) = poll_location(response) else {
            return Ok(response.clone());
        };

        let host = host_header(sent_payload).unwrap_or("localhost");
        let auth_line = if sent_payload.contains(fuzzforge_grammar::AUTH_MARKER) {
            fuzzforge_grammar::AUTH_MARKER
        } else {
            ""
        };
        let poll_payload = format!(
            "GET {path} HTTP/1.1\r\nAccept: application/json\r\nHost: {host}\r\n{auth_line}\r\n"
        );

        let started = std::time::Instant::now();
        let mut interval = Duration::from_secs(1);
        let mut last = response.clone();

        while started.elapsed() < max_wait {
            tokio::time::sleep(interval).await;
            interval = (interval * 2).min(Duration::from_secs(8));

            let tags = TraceTags { origin: Some("async_poll".to_string()), ..Default::default() };
            let polled = self.send(&poll_payload, "async_poll", tags).await?;
            debug!(status = ?polled.status_code(), path = %path, "async poll");
            let done = !is_in_progress(&polled);
            last = polled;
            if done {
                break;
            }
        }
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_response_is_in_progress() {
        let response = HttpResponse::from_raw("HTTP/1.1 202 Accepted\r\nLocation: /ops/1\r\n\r\n");
        assert!(is_in_progress(&response));
        assert_eq!(poll_location(&response), Some("/ops/1".to_string()));
    }

    #[test]
    fn test_provisioning_body_is_in_progress() {
        let response = HttpResponse::from_raw(
            "HTTP/1.1 201 Created\r\n\r\n{\"status\": \"Provisioning\"}",
        );
        assert!(is_in_progress(&response));
    }

    #[test]
    fn test_completed_response_is_terminal() {
        let response =
            HttpResponse::from_raw("HTTP/1.1 200 OK\r\n\r\n{\"status\": \"Succeeded\"}");
        assert!(!is_in_progress(&response));
    }

    #[test]
    fn test_absolute_location_reduced_to_path() {
        let response = HttpResponse::from_raw(
            "HTTP/1.1 202 Accepted\r\nOperation-Location: https://api.example.com/ops/42\r\n\r\n",
        );
        assert_eq!(poll_location(&response), Some("/ops/42".to_string()));
    }

    #[test]
    fn test_host_header_extraction() {
        assert_eq!(
            host_header("GET / HTTP/1.1\r\nHost: localhost:8888\r\n\r\n"),
            Some("localhost:8888")
        );
        assert_eq!(host_header("GET / HTTP/1.1\r\n\r\n"), None);
    }
}
