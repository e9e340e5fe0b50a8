use std::time::Duration;

use url::Url;

/// Connection settings for the remote chat service.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the HTTP API, e.g. `https://chat.example.net/v1/`.
    /// Must end with a trailing slash so endpoint paths join underneath it.
    pub base_url: Url,
    /// Deadline applied to every HTTP request and to live-channel
    /// acknowledgments.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(path)
    }

    /// Address of the push endpoint: same host as the API, `ws`/`wss` scheme,
    /// `/live` path.
    pub fn live_url(&self) -> Result<Url, url::ParseError> {
        let mut url = self.base_url.join("/live")?;
        let scheme = match url.scheme() {
            "https" => "wss",
            _ => "ws",
        };
        // set_scheme only rejects invalid combinations; ws/wss are fine here.
        let _ = url.set_scheme(scheme);
        Ok(url)
    }
}
