/**
 * Gateway Module
 *
 * Moves bytes in and out of the backend: multipart video upload,
 * task-scoped signed URLs and streaming downloads.
 */

pub mod downloader;
mod files;
mod upload;

pub use downloader::{download_to_file, DownloadProgress};
pub use files::{clamp_expires_in, SignedUrl, DEFAULT_EXPIRES_IN, MAX_EXPIRES_IN, MIN_EXPIRES_IN};
pub use upload::guess_video_mime;
