//! Minimal WebDAV client with ETag-based optimistic concurrency

use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderValue, CONTENT_TYPE, ETAG, IF_MATCH, IF_NONE_MATCH};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};

use crate::error::{Error, Result};

/// Bounded retry budget for transient network failures
const MAX_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a conditional write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The server accepted the write; `etag` is the new resource version
    Committed { etag: Option<String> },
    /// Another writer updated the resource since `if_match` was read
    LostRace,
}

/// The remote snapshot host.
///
/// The WebDAV implementation below is the production one; the seam exists so
/// the engine, service, and scheduler can be exercised against an in-memory
/// fake.
pub trait RemoteStore: Send + Sync {
    /// Idempotent collection creation ("already exists" is success)
    fn ensure_collection(&self, path: &str) -> impl Future<Output = Result<()>> + Send;

    /// Cheap change detection; `None` means no remote snapshot yet (404)
    fn head(&self, path: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Fetch the snapshot body and its ETag
    fn get(&self, path: &str) -> impl Future<Output = Result<(Vec<u8>, Option<String>)>> + Send;

    /// Conditional write; `if_match = None` requires that the resource does
    /// not exist yet, so first-snapshot creation also detects races.
    fn put(
        &self,
        path: &str,
        bytes: Vec<u8>,
        if_match: Option<&str>,
    ) -> impl Future<Output = Result<PutOutcome>> + Send;
}

/// WebDAV client over HTTPS with basic auth
pub struct WebDavRemoteStore {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for WebDavRemoteStore {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("WebDavRemoteStore")
            .field("base_url", &self.base_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl WebDavRemoteStore {
    pub fn new(
        base_url: impl Into<String>,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        let base_url = base_url.into();
        let base_url = base_url.trim();
        if base_url.is_empty() {
            return Err(Error::InvalidInput("base URL must not be empty".to_string()));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(Error::InvalidInput(
                "base URL must include http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|error| Error::Network(error.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: username.map(|user| user.trim().to_string()).filter(|user| !user.is_empty()),
            password,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = join_base_url_and_path(&self.base_url, path);
        let mut builder = self.client.request(method, url);
        if let Some(user) = &self.username {
            builder = builder.basic_auth(user, self.password.as_deref());
        }
        builder
    }

    /// Send a request, retrying transient failures with exponential backoff.
    ///
    /// Auth rejections (401/403) surface immediately and are never retried.
    async fn send_with_retry<F>(&self, build: F) -> Result<Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let build = &build;
        retry_transient(move || async move {
            let response = build().send().await.map_err(|error| classify(&error))?;
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(RetryError::Fatal(Error::Auth(format!(
                    "HTTP {}",
                    status.as_u16()
                ))));
            }
            Ok(response)
        })
        .await
    }
}

/// Why a send attempt failed, from the retry loop's point of view
enum RetryError {
    /// Worth another attempt (timeout, connection refused)
    Transient(String),
    /// Retrying cannot help
    Fatal(Error),
}

fn classify(error: &reqwest::Error) -> RetryError {
    if error.is_timeout() || error.is_connect() {
        RetryError::Transient(error.to_string())
    } else {
        RetryError::Fatal(Error::Network(error.to_string()))
    }
}

/// Run `attempt` until it succeeds, sleeping with a doubling delay between
/// transient failures. At most `MAX_ATTEMPTS` attempts run in total; the
/// last transient failure surfaces as `Error::Network`.
async fn retry_transient<T, F, Fut>(mut attempt: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RetryError>>,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut attempts = 1;

    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(RetryError::Fatal(error)) => return Err(error),
            Err(RetryError::Transient(message)) => {
                if attempts >= MAX_ATTEMPTS {
                    return Err(Error::Network(message));
                }
                tracing::debug!(
                    attempts,
                    "transient network error, retrying in {delay:?}: {message}"
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempts += 1;
            }
        }
    }
}

impl RemoteStore for WebDavRemoteStore {
    async fn ensure_collection(&self, path: &str) -> Result<()> {
        let method = Method::from_bytes(b"MKCOL").map_err(|e| Error::InvalidInput(e.to_string()))?;
        let response = self
            .send_with_retry(|| self.request(method.clone(), path))
            .await?;

        let status = response.status().as_u16();
        if collection_exists_status(status) {
            return Ok(());
        }
        Err(remote_error(response).await)
    }

    async fn head(&self, path: &str) -> Result<Option<String>> {
        let response = self
            .send_with_retry(|| self.request(Method::HEAD, path))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }
        Ok(extract_etag(&response))
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, Option<String>)> {
        let response = self
            .send_with_retry(|| self.request(Method::GET, path))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(path.to_string()));
        }
        if !response.status().is_success() {
            return Err(remote_error(response).await);
        }

        let etag = extract_etag(&response);
        let bytes = response
            .bytes()
            .await
            .map_err(|error| Error::Network(error.to_string()))?;
        Ok((bytes.to_vec(), etag))
    }

    async fn put(&self, path: &str, bytes: Vec<u8>, if_match: Option<&str>) -> Result<PutOutcome> {
        let precondition = match if_match {
            Some(etag) => {
                let value = HeaderValue::from_str(etag)
                    .map_err(|_| Error::InvalidInput(format!("invalid ETag: {etag}")))?;
                (IF_MATCH, value)
            }
            None => (IF_NONE_MATCH, HeaderValue::from_static("*")),
        };

        let response = self
            .send_with_retry(|| {
                self.request(Method::PUT, path)
                    .header(CONTENT_TYPE, "application/json")
                    .header(precondition.0.clone(), precondition.1.clone())
                    .body(bytes.clone())
            })
            .await?;

        let status = response.status();
        if lost_race_status(status.as_u16()) {
            return Ok(PutOutcome::LostRace);
        }
        if status.is_success() || status.as_u16() == 207 {
            return Ok(PutOutcome::Committed {
                etag: extract_etag(&response),
            });
        }
        Err(remote_error(response).await)
    }
}

/// Join a base URL and a resource path without doubling slashes
pub fn join_base_url_and_path(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// MKCOL success set: created, or the collection already exists (405/409)
const fn collection_exists_status(status: u16) -> bool {
    matches!(status, 200 | 201 | 204 | 405 | 409)
}

/// Conditional-write conflict set: another writer got there first
const fn lost_race_status(status: u16) -> bool {
    matches!(status, 409 | 412)
}

fn extract_etag(response: &Response) -> Option<String> {
    response
        .headers()
        .get(ETAG)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Server error bodies can be whole HTML pages; keep the message short
const ERROR_BODY_LIMIT: usize = 200;

async fn remote_error(response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Error::Remote {
        status,
        body: body.trim().chars().take(ERROR_BODY_LIMIT).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn join_base_url_and_path_normalizes_slashes() {
        assert_eq!(
            join_base_url_and_path("https://dav.example.com/dav/", "/Deadliner/snapshot.json"),
            "https://dav.example.com/dav/Deadliner/snapshot.json"
        );
        assert_eq!(
            join_base_url_and_path("https://dav.example.com", "Deadliner"),
            "https://dav.example.com/Deadliner"
        );
    }

    #[test]
    fn new_rejects_invalid_base_url() {
        assert!(WebDavRemoteStore::new("", None, None).is_err());
        assert!(WebDavRemoteStore::new("dav.example.com", None, None).is_err());
        assert!(WebDavRemoteStore::new("https://dav.example.com", None, None).is_ok());
    }

    #[test]
    fn debug_redacts_password() {
        let store = WebDavRemoteStore::new(
            "https://dav.example.com",
            Some("me".to_string()),
            Some("secret".to_string()),
        )
        .unwrap();
        let debug = format!("{store:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn auth_rejection_is_not_retried() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = retry_transient(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(RetryError::Fatal(Error::Auth("HTTP 401".to_string()))) }
        })
        .await;

        assert!(matches!(result, Err(Error::Auth(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_stop_at_the_attempt_budget() {
        let attempts = AtomicUsize::new(0);
        let result: Result<()> = retry_transient(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(RetryError::Transient("connection refused".to_string())) }
        })
        .await;

        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), MAX_ATTEMPTS as usize);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success_recovers() {
        let attempts = AtomicUsize::new(0);
        let result = retry_transient(|| {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if attempt == 1 {
                    Err(RetryError::Transient("timeout".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn status_classification() {
        assert!(collection_exists_status(201));
        assert!(collection_exists_status(405));
        assert!(collection_exists_status(409));
        assert!(!collection_exists_status(500));

        assert!(lost_race_status(412));
        assert!(lost_race_status(409));
        assert!(!lost_race_status(204));
    }
}
