//! Bearer tokens for the storage, ledger and workflow REST APIs.
//!
//! A [`TokenSource`] is built once at process start and shared (via `Arc`)
//! by every client that needs it. Two sources exist:
//!
//! * **Static** — a token handed in by the caller (`GOOGLE_OAUTH_ACCESS_TOKEN`
//!   or `--access-token`), useful locally and in tests.
//! * **Metadata server** — the instance's service-account token, fetched on
//!   demand and cached until shortly before it expires.

use crate::error::AuthError;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh this long before the reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

#[derive(Debug)]
enum Source {
    Static(String),
    MetadataServer {
        client: reqwest::Client,
        cache: Mutex<Option<CachedToken>>,
    },
}

/// Source of OAuth2 bearer tokens.
#[derive(Debug)]
pub struct TokenSource {
    source: Source,
}

impl TokenSource {
    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            source: Source::Static(token.into()),
        }
    }

    pub fn metadata_server(client: reqwest::Client) -> Self {
        Self {
            source: Source::MetadataServer {
                client,
                cache: Mutex::new(None),
            },
        }
    }

    /// `GOOGLE_OAUTH_ACCESS_TOKEN` when set, otherwise the metadata server.
    pub fn from_env(client: reqwest::Client) -> Self {
        match std::env::var("GOOGLE_OAUTH_ACCESS_TOKEN") {
            Ok(token) if !token.is_empty() => Self::fixed(token),
            _ => Self::metadata_server(client),
        }
    }

    /// Current bearer token, refreshing from the metadata server if needed.
    pub async fn token(&self) -> Result<String, AuthError> {
        match &self.source {
            Source::Static(token) => Ok(token.clone()),
            Source::MetadataServer { client, cache } => {
                let mut guard = cache.lock().await;
                if let Some(cached) = guard.as_ref() {
                    if Instant::now() < cached.refresh_at {
                        return Ok(cached.value.clone());
                    }
                }

                let response = client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(AuthError::Status(response.status().as_u16()));
                }
                let token: MetadataToken = response.json().await?;
                debug!("Fetched access token, expires in {}s", token.expires_in);

                let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
                *guard = Some(CachedToken {
                    value: token.access_token.clone(),
                    refresh_at: Instant::now() + lifetime,
                });
                Ok(token.access_token)
            }
        }
    }
}
