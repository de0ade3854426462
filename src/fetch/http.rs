use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use super::{validate_relative_path, ObjectFetcher};
use crate::error::{Error, Result};

/// User agent sent with every request unless configured otherwise.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 6_0 like Mac OS X)";

/// Transport settings for [`HttpFetcher`]
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub user_agent: String,
    pub timeout: Duration,
    /// Accept self-signed or otherwise invalid TLS certificates.
    pub insecure: bool,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(10),
            insecure: false,
        }
    }
}

/// Fetches files from an HTTP(S) server exposing a `.git` directory.
pub struct HttpFetcher {
    base: Url,
    client: Client,
}

impl HttpFetcher {
    /// `base` is the URL of the `.git` directory; a trailing slash is added
    /// when missing so relative joins stay inside it.
    pub fn new(base: &str, options: &HttpOptions) -> Result<Self> {
        let normalized = if base.ends_with('/') {
            base.to_string()
        } else {
            format!("{}/", base)
        };
        let base = Url::parse(&normalized).map_err(|e| Error::Network {
            path: normalized.clone(),
            message: format!("invalid base URL: {}", e),
        })?;

        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .timeout(options.timeout)
            .danger_accept_invalid_certs(options.insecure)
            .build()
            .map_err(|e| Error::Network {
                path: base.to_string(),
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        validate_relative_path(path)?;
        self.base.join(path).map_err(|e| Error::Network {
            path: path.to_string(),
            message: format!("cannot join with base URL: {}", e),
        })
    }
}

#[async_trait]
impl ObjectFetcher for HttpFetcher {
    async fn fetch_ref(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.url_for(path)?;
        tracing::debug!("GET {}", url);

        let network = |message: String| Error::Network {
            path: path.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(Error::NotFound(path.to_string()));
        }
        if !status.is_success() {
            return Err(network(format!("HTTP status {}", status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| network(e.to_string()))?;
        Ok(body.to_vec())
    }
}
