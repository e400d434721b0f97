use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use super::downloader::{download_to_file, DownloadProgress};
use crate::api::{require_id, ApiClient, ApiError};

/// Server-accepted signing window, in seconds
pub const MIN_EXPIRES_IN: u64 = 10;
pub const MAX_EXPIRES_IN: u64 = 3600;
pub const DEFAULT_EXPIRES_IN: u64 = 300;

pub fn clamp_expires_in(expires_in: u64) -> u64 {
    expires_in.clamp(MIN_EXPIRES_IN, MAX_EXPIRES_IN)
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    task_id: &'a str,
    path: &'a str,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    url: String,
}

/// A short-lived capability URL for one file of one task.
///
/// `url` is opaque; only `exp` is read back, to know when to re-sign.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedUrl {
    pub url: String,
    pub absolute: String,
    pub requested_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignedUrl {
    pub fn new(url: String, absolute: String, requested_at: DateTime<Utc>, expires_in: u64) -> Self {
        let expires_at = expiry_from_url(&absolute)
            .unwrap_or_else(|| requested_at + Duration::seconds(expires_in as i64));
        Self {
            url,
            absolute,
            requested_at,
            expires_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        at > self.expires_at
    }
}

/// Read the `exp` unix timestamp from a signed URL's query
fn expiry_from_url(url: &str) -> Option<DateTime<Utc>> {
    let parsed = Url::parse(url)
        .or_else(|_| Url::parse("http://localhost").and_then(|base| base.join(url)))
        .ok()?;
    let exp = parsed
        .query_pairs()
        .find(|(k, _)| k == "exp")
        .and_then(|(_, v)| v.parse::<i64>().ok())?;
    Utc.timestamp_opt(exp, 0).single()
}

impl ApiClient {
    /// Request a signed URL for `relative_path` inside the task's namespace
    pub async fn sign_file(
        &self,
        task_id: &str,
        relative_path: &str,
        expires_in: u64,
    ) -> Result<SignedUrl, ApiError> {
        let task_id = require_id("task_id", task_id)?;
        let path = require_id("path", relative_path)?;
        let expires_in = clamp_expires_in(expires_in);

        let requested_at = Utc::now();
        let response: SignResponse = self
            .post_json(
                "/api/files/sign",
                &SignRequest {
                    task_id,
                    path,
                    expires_in,
                },
            )
            .await?;

        if response.url.trim().is_empty() {
            return Err(ApiError::Decode("sign response carried an empty url".to_string()));
        }

        let absolute = self.resolve(&response.url);
        debug!("Signed {}/{} for {}s", task_id, path, expires_in);
        Ok(SignedUrl::new(response.url, absolute, requested_at, expires_in))
    }

    /// Stream a signed file to `dest`. Expired URLs are refused locally.
    pub async fn download_signed<F>(
        &self,
        signed: &SignedUrl,
        dest: &Path,
        progress_callback: Option<F>,
    ) -> Result<u64, ApiError>
    where
        F: Fn(DownloadProgress) + Send + Sync,
    {
        if signed.is_expired() {
            warn!("Refusing expired signed url (expired {})", signed.expires_at);
            return Err(ApiError::InvalidInput(format!(
                "signed url expired at {}, request a new one",
                signed.expires_at.to_rfc3339()
            )));
        }
        download_to_file(self, &signed.absolute, dest, progress_callback).await
    }

    /// Sign and download in one step
    pub async fn fetch_file<F>(
        &self,
        task_id: &str,
        relative_path: &str,
        dest: &Path,
        progress_callback: Option<F>,
    ) -> Result<u64, ApiError>
    where
        F: Fn(DownloadProgress) + Send + Sync,
    {
        let signed = self
            .sign_file(task_id, relative_path, DEFAULT_EXPIRES_IN)
            .await?;
        self.download_signed(&signed, dest, progress_callback).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp() {
        assert_eq!(clamp_expires_in(0), 10);
        assert_eq!(clamp_expires_in(300), 300);
        assert_eq!(clamp_expires_in(86_400), 3600);
    }

    #[test]
    fn test_expiry_from_relative_url() {
        let exp = expiry_from_url("/api/files/download?task_id=t&p=a.mp4&exp=1700000300&sig=ab").unwrap();
        assert_eq!(exp.timestamp(), 1_700_000_300);
    }

    #[test]
    fn test_expiry_falls_back_to_requested_window() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let signed = SignedUrl::new(
            "/opaque".to_string(),
            "http://h/opaque".to_string(),
            at,
            300,
        );
        assert_eq!(signed.expires_at.timestamp(), 1_700_000_300);
        assert!(!signed.is_expired_at(at + Duration::seconds(300)));
        assert!(signed.is_expired_at(at + Duration::seconds(400)));
    }

    #[test]
    fn test_exp_query_wins_over_window() {
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let url = "http://h/api/files/download?p=x&exp=1700000020&sig=s".to_string();
        let signed = SignedUrl::new(url.clone(), url, at, 300);
        assert_eq!(signed.expires_at.timestamp(), 1_700_000_020);
    }
}
