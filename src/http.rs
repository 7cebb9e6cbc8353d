//! Manifest retrieval over HTTP
//!
//! Enabled by the `http` feature. [HttpFetcher] is the [ManifestFetcher] used
//! when a book is served unpacked from a web origin rather than read from its
//! container.

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use url::Url;

use crate::{error::EpubError, store::ManifestFetcher};

#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a preconfigured client, e.g. one carrying credentials or timeouts
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ManifestFetcher for HttpFetcher {
    /// Retrieves the body of `url` as text
    ///
    /// Non-success status codes are reported as [EpubError::HttpError].
    async fn fetch_text(&self, url: &Url) -> Result<String, EpubError> {
        debug!("GET {}", url);
        let response = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?;

        Ok(response.text().await?)
    }
}
