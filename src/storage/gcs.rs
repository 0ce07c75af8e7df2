//! Cloud Storage JSON API client.
//!
//! Only the handful of calls the pipeline needs are implemented:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | download  | `GET  /storage/v1/b/{bucket}/o/{key}?alt=media` (streamed) |
//! | put       | `POST /upload/storage/v1/b/{bucket}/o?uploadType=media&name={key}` |
//! | exists    | `GET  /storage/v1/b/{bucket}/o/{key}` |
//! | list      | `GET  /storage/v1/b/{bucket}/o?prefix=…&pageToken=…` |
//!
//! `Precondition::DoesNotExist` is sent as `ifGenerationMatch=0`; the service
//! answers `412 Precondition Failed` when the object already exists.

use super::{content_type_for, ObjectStore, Precondition};
use crate::auth::TokenSource;
use crate::error::StorageError;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const DEFAULT_ENDPOINT: &str = "https://storage.googleapis.com";

/// Cloud Storage client sharing one HTTP client and token source.
#[derive(Debug, Clone)]
pub struct GcsObjectStore {
    client: reqwest::Client,
    tokens: Arc<TokenSource>,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    items: Vec<ListItem>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListItem {
    name: String,
}

impl GcsObjectStore {
    pub fn new(client: reqwest::Client, tokens: Arc<TokenSource>) -> Self {
        Self {
            client,
            tokens,
            endpoint: DEFAULT_ENDPOINT.to_string(),
        }
    }

    /// Point at a different endpoint, e.g. a local storage emulator.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url, StorageError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| StorageError::Decode(format!("bad endpoint '{}': {e}", self.endpoint)))?;
        url.path_segments_mut()
            .map_err(|_| StorageError::Decode(format!("bad endpoint '{}'", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Metadata URL of one object. The key is a single path segment, so `/`
    /// inside it is percent-encoded.
    fn object_url(&self, bucket: &str, key: &str) -> Result<Url, StorageError> {
        if key.is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        self.url(&["storage", "v1", "b", bucket, "o", key])
    }

    async fn authorized(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, StorageError> {
        let token = self.tokens.token().await?;
        Ok(request.bearer_auth(token).send().await?)
    }
}

/// Map non-success responses to the storage error taxonomy.
async fn check(
    response: reqwest::Response,
    bucket: &str,
    key: &str,
) -> Result<reqwest::Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let (bucket, key) = (bucket.to_string(), key.to_string());
    Err(match status {
        StatusCode::PRECONDITION_FAILED => StorageError::PreconditionFailed { bucket, key },
        StatusCode::NOT_FOUND => StorageError::NotFound { bucket, key },
        _ => StorageError::Status {
            bucket,
            key,
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        },
    })
}

#[async_trait]
impl ObjectStore for GcsObjectStore {
    async fn download_to(&self, bucket: &str, key: &str, dest: &Path) -> Result<u64, StorageError> {
        let mut url = self.object_url(bucket, key)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = check(self.authorized(self.client.get(url)).await?, bucket, key).await?;

        let io = |e: std::io::Error| StorageError::Io {
            path: dest.to_path_buf(),
            source: e,
        };
        let mut file = tokio::fs::File::create(dest).await.map_err(io)?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await.map_err(io)?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(io)?;
        debug!("Downloaded gs://{}/{} ({} bytes)", bucket, key, written);
        Ok(written)
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        precondition: Precondition,
    ) -> Result<(), StorageError> {
        let mut url = self.url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("uploadType", "media").append_pair("name", key);
            if precondition == Precondition::DoesNotExist {
                q.append_pair("ifGenerationMatch", "0");
            }
        }
        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type_for(key))
            .body(data);
        check(self.authorized(request).await?, bucket, key).await?;
        Ok(())
    }

    async fn read(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let mut url = self.object_url(bucket, key)?;
        url.query_pairs_mut().append_pair("alt", "media");
        let response = check(self.authorized(self.client.get(url)).await?, bucket, key).await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn exists(&self, bucket: &str, key: &str) -> Result<bool, StorageError> {
        let url = self.object_url(bucket, key)?;
        match check(self.authorized(self.client.get(url)).await?, bucket, key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut url = self.url(&["storage", "v1", "b", bucket, "o"])?;
            {
                let mut q = url.query_pairs_mut();
                q.append_pair("prefix", prefix)
                    .append_pair("fields", "items(name),nextPageToken");
                if let Some(ref token) = page_token {
                    q.append_pair("pageToken", token);
                }
            }
            let response =
                check(self.authorized(self.client.get(url)).await?, bucket, prefix).await?;
            let page: ListPage = response
                .json()
                .await
                .map_err(|e| StorageError::Decode(e.to_string()))?;
            keys.extend(page.items.into_iter().map(|i| i.name));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> GcsObjectStore {
        GcsObjectStore::new(reqwest::Client::new(), Arc::new(TokenSource::fixed("t")))
    }

    #[test]
    fn object_url_encodes_slashes_in_key() {
        let url = store().object_url("pages", "abc/00001.pdf").unwrap();
        assert_eq!(
            url.as_str(),
            "https://storage.googleapis.com/storage/v1/b/pages/o/abc%2F00001.pdf"
        );
    }

    #[test]
    fn custom_endpoint_is_used() {
        let s = store().with_endpoint("http://localhost:4443/");
        let url = s.object_url("b", "k").unwrap();
        assert_eq!(url.as_str(), "http://localhost:4443/storage/v1/b/b/o/k");
    }

    #[test]
    fn empty_key_rejected() {
        assert!(matches!(
            store().object_url("b", ""),
            Err(StorageError::InvalidKey(_))
        ));
    }
}
