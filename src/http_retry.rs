//! HTTP retry helper, grounded directly on the teacher's `utils/http.rs`
//! (`request_with_retry`): retry on network errors and 5xx with doubling
//! backoff, return immediately on other client errors. Narrowed from the
//! teacher's version, which also retries 429: spec §7/§8 property 9 require
//! quota errors (429/402/409) to surface immediately and never be retried,
//! so this helper must return such responses on the first attempt and let
//! the caller classify them as `QuotaError`.
//!
//! None of the cloud providers in this crate call this — each makes a single
//! `reqwest` call per `synthesise()` attempt, and the orchestrator's
//! `invoke_with_retry` owns the only retry budget for a synthesis call (spec
//! §4.16: two retries, 250ms then 1s). This helper is kept for a narrower
//! case it's built for but that no provider currently needs: one bounded
//! retry around a single HTTP call outside the main synthesis path (e.g. a
//! token refresh), where a provider wants its own short retry rather than
//! failing the whole request on a transient blip.

use std::time::Duration;

/// Retry a request closure with exponential backoff, starting at `initial_delay`.
/// Retries on network errors and on 5xx responses; everything else (including
/// 429, which the caller must classify as a non-retriable `QuotaError`) is
/// returned immediately.
pub async fn request_with_retry<F, Fut>(
    mut task: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<reqwest::Response, String>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0;
    let mut delay = initial_delay;

    loop {
        attempt += 1;
        match task().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() || attempt > max_retries {
                    return Ok(response);
                }
                if status.is_server_error() {
                    tracing::warn!(%status, attempt, max_retries, ?delay, "retrying HTTP request");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    continue;
                }
                return Ok(response);
            }
            Err(e) => {
                if attempt > max_retries {
                    return Err(format!("network request failed after {max_retries} attempts: {e}"));
                }
                tracing::warn!(error = %e, attempt, max_retries, ?delay, "retrying after network error");
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn a_429_response_is_returned_on_the_first_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let response = request_with_retry(|| client.get(server.uri()).send(), 2, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 429);
        server.verify().await;
    }

    #[tokio::test]
    async fn a_5xx_response_is_retried_up_to_the_budget() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let response = request_with_retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                client.get(server.uri()).send()
            },
            2,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(response.status().as_u16(), 503);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        server.verify().await;
    }
}
