/**
 * Streaming Downloader
 *
 * Streams a checked response body to disk with throttled progress reports.
 * Shared by signed-file fetches and note exports. The body lands in a
 * `<name>.part` sibling first and is renamed over `dest` once complete.
 */

use futures_util::StreamExt;
use reqwest::{Method, Response};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, RequestOptions};
use crate::paths;

/// Download progress information
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DownloadProgress {
    pub downloaded: u64,
    /// Absent when the server sends no content-length
    pub total: Option<u64>,
    pub percent: Option<f64>,
    pub speed_mbps: f64,
}

impl DownloadProgress {
    fn new(downloaded: u64, total: Option<u64>, start: Instant) -> Self {
        let elapsed = start.elapsed().as_secs_f64();
        let speed_mbps = if elapsed > 0.0 {
            (downloaded as f64 / elapsed) / 1_000_000.0
        } else {
            0.0
        };
        let percent = total
            .filter(|t| *t > 0)
            .map(|t| (downloaded as f64 / t as f64) * 100.0);

        Self {
            downloaded,
            total,
            percent,
            speed_mbps,
        }
    }
}

/// GET `path` (relative to the API base, or absolute) and write it to `dest`.
///
/// Returns the number of bytes written.
pub async fn download_to_file<F>(
    client: &ApiClient,
    path: &str,
    dest: &Path,
    progress_callback: Option<F>,
) -> Result<u64, ApiError>
where
    F: Fn(DownloadProgress) + Send + Sync,
{
    let part = part_path(dest)?;
    let response = client
        .send_raw(Method::GET, path, RequestOptions::new().streaming())
        .await?;

    match write_response(response, &part, progress_callback).await {
        Ok(downloaded) => {
            tokio::fs::rename(&part, dest).await.map_err(|e| {
                ApiError::InvalidInput(format!("cannot move download to {:?}: {}", dest, e))
            })?;
            info!("Downloaded {} bytes to {:?}", downloaded, dest);
            Ok(downloaded)
        }
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&part).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial download {:?}: {}", part, remove_err);
                }
            }
            Err(e)
        }
    }
}

/// `dir/name.ext` -> `dir/name.ext.part`
fn part_path(dest: &Path) -> Result<PathBuf, ApiError> {
    let name = dest
        .file_name()
        .ok_or_else(|| ApiError::InvalidInput(format!("not a file path: {:?}", dest)))?;
    let mut part = name.to_os_string();
    part.push(".part");
    Ok(dest.with_file_name(part))
}

async fn write_response<F>(
    response: Response,
    dest: &Path,
    progress_callback: Option<F>,
) -> Result<u64, ApiError>
where
    F: Fn(DownloadProgress) + Send + Sync,
{
    paths::ensure_parent_exists(dest).map_err(ApiError::InvalidInput)?;

    let total = response.content_length();
    debug!("Downloading {} -> {:?} ({:?} bytes)", response.url(), dest, total);

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| ApiError::InvalidInput(format!("cannot create {:?}: {}", dest, e)))?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;
    let start_time = Instant::now();
    let mut last_progress_time = start_time;

    while let Some(item) = stream.next().await {
        let chunk = item?;
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::InvalidInput(format!("write to {:?} failed: {}", dest, e)))?;
        downloaded += chunk.len() as u64;

        // Report progress every 100ms or at completion
        let now = Instant::now();
        if now.duration_since(last_progress_time).as_millis() >= 100 || Some(downloaded) == total {
            last_progress_time = now;
            if let Some(ref callback) = progress_callback {
                callback(DownloadProgress::new(downloaded, total, start_time));
            }
        }
    }

    file.flush()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("write to {:?} failed: {}", dest, e)))?;

    // Unknown length never hits the completion check above
    if total.is_none() {
        if let Some(ref callback) = progress_callback {
            callback(DownloadProgress::new(downloaded, total, start_time));
        }
    }

    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        let p = DownloadProgress::new(50, Some(200), Instant::now());
        assert_eq!(p.percent, Some(25.0));
        assert_eq!(p.total, Some(200));
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("/tmp/out/frame.jpg")).unwrap(),
            PathBuf::from("/tmp/out/frame.jpg.part")
        );
        assert!(part_path(Path::new("/")).is_err());
    }

    #[test]
    fn test_progress_unknown_total() {
        let p = DownloadProgress::new(50, None, Instant::now());
        assert_eq!(p.percent, None);
        let p = DownloadProgress::new(0, Some(0), Instant::now());
        assert_eq!(p.percent, None);
    }
}
