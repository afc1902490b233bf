//! Settings for talking to the expense API.

use std::time::Duration;

/// The API that a default [ClientConfig] talks to.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// How long to wait for a response before giving up on a request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a fetched expense list is reused before it is fetched again.
pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(5);

/// The most times a failed list request is retried.
pub const MAX_LIST_RETRIES: u32 = 1;

/// Settings for the HTTP client and the expense cache.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// The scheme, host and port of the expense API, e.g. `http://localhost:3000`.
    ///
    /// API paths such as `/api/expenses` are appended to this.
    pub base_url: String,

    /// The timeout applied to every request, including direct uploads.
    pub request_timeout: Duration,

    /// How many times a failed list request is retried, at most
    /// [MAX_LIST_RETRIES].
    ///
    /// Only the list is retried because it is the only idempotent call.
    pub list_retries: u32,

    /// How long a fetched list is considered fresh.
    pub stale_time: Duration,
}

impl ClientConfig {
    /// Create a config for the API at `base_url` with default settings.
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            ..Default::default()
        }
    }

    /// Set the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the number of retries for list requests, capped at
    /// [MAX_LIST_RETRIES].
    pub fn list_retries(mut self, retries: u32) -> Self {
        self.list_retries = retries.min(MAX_LIST_RETRIES);
        self
    }

    /// Set how long a fetched list stays fresh.
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = stale_time;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            list_retries: MAX_LIST_RETRIES,
            stale_time: DEFAULT_STALE_TIME,
        }
    }
}
