//! HTTP blob backend

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::storage::{Blob, BlobStorage, Fetched, StorageError, StorageResult};

/// Fetches `GET <endpoint>/<id>?<credentials>`
///
/// Credentials are a pre-signed query string (a shared access signature),
/// appended verbatim.
#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpStorage {
    /// Create a client for one storage endpoint
    pub fn new(endpoint: &str, timeout: Duration) -> StorageResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| StorageError::configuration(format!("endpoint {}: {}", endpoint, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                StorageError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    /// Url of a fragment, with the credentials as query string
    pub fn fragment_url(&self, credentials: &str, id: &str) -> StorageResult<Url> {
        let base = self.endpoint.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!("{}/{}", base, id.trim_start_matches('/')))
            .map_err(|e| StorageError::configuration(format!("fragment {}: {}", id, e)))?;
        let credentials = credentials.trim_start_matches('?');
        if !credentials.is_empty() {
            url.set_query(Some(credentials));
        }
        Ok(url)
    }

    fn transport_error(&self, id: &str, e: reqwest::Error) -> StorageError {
        if e.is_timeout() {
            StorageError::Timeout(self.timeout)
        } else {
            StorageError::unavailable(format!("GET {}: {}", id, e))
        }
    }
}

#[async_trait]
impl BlobStorage for HttpStorage {
    async fn get(&self, credentials: &str, id: &str) -> StorageResult<Vec<u8>> {
        match self.get_if_none_match(credentials, id, None).await? {
            Fetched::Modified(blob) => Ok(blob.data),
            Fetched::NotModified => Err(StorageError::unavailable(format!(
                "GET {}: not modified on an unconditional request",
                id
            ))),
        }
    }

    async fn get_if_none_match(
        &self,
        credentials: &str,
        id: &str,
        tag: Option<&str>,
    ) -> StorageResult<Fetched> {
        let url = self.fragment_url(credentials, id)?;
        let mut request = self.client.get(url);
        if let Some(tag) = tag {
            request = request.header(IF_NONE_MATCH, tag);
        }
        let response = request.send().await.map_err(|e| self.transport_error(id, e))?;

        match response.status() {
            StatusCode::OK => {
                let tag = response
                    .headers()
                    .get(ETAG)
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| self.transport_error(id, e))?;
                Ok(Fetched::Modified(Blob {
                    data: body.to_vec(),
                    tag,
                }))
            }
            StatusCode::NOT_MODIFIED => Ok(Fetched::NotModified),
            StatusCode::NOT_FOUND => Err(StorageError::not_found(id)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StorageError::forbidden(id)),
            status => {
                debug!("GET {} returned {}", id, status);
                Err(StorageError::unavailable(format!("GET {}: {}", id, status)))
            }
        }
    }
}
