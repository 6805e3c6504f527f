//! Reference dataset download into the local cache.
//!
//! The body is streamed into a `.part` file next to the destination and
//! renamed into place once complete, so an interrupted download never
//! leaves a truncated archive at the cache path.

use std::path::{Path, PathBuf};

use futures::StreamExt as _;
use tokio::io::AsyncWriteExt as _;

/// Census Bureau cartographic boundary file for all US counties
/// (1:500,000, `GEOID` and `NAME` attributes, NAD83).
pub const CENSUS_COUNTIES_URL: &str =
    "https://www2.census.gov/geo/tiger/GENZ2023/shp/cb_2023_us_county_500k.zip";

/// Returns `dest` if it already exists, otherwise downloads `url` to it.
///
/// # Errors
///
/// Returns [`DownloadError`] if the download fails.
pub async fn ensure_cached(url: &str, dest: &Path) -> Result<PathBuf, DownloadError> {
    if tokio::fs::try_exists(dest).await.unwrap_or(false) {
        log::info!("Using cached reference dataset {}", dest.display());
        return Ok(dest.to_path_buf());
    }

    download_file(url, dest).await?;
    Ok(dest.to_path_buf())
}

/// Downloads a file from a URL to a local path with progress logging.
///
/// # Errors
///
/// Returns an error if the HTTP request fails, the response is not
/// successful, or the local file cannot be written or renamed.
pub async fn download_file(url: &str, dest: &Path) -> Result<u64, DownloadError> {
    log::info!("Downloading {url}");
    log::info!("  -> {}", dest.display());

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| DownloadError::io(parent, e))?;
    }

    let client = reqwest::Client::builder()
        .user_agent("ava-county/0.1")
        .build()
        .map_err(DownloadError::Http)?;

    let response = client.get(url).send().await.map_err(DownloadError::Http)?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    if let Some(size) = response.content_length() {
        #[allow(clippy::cast_precision_loss)]
        let mb = size as f64 / 1_048_576.0;
        log::info!("  file size: {mb:.1} MB");
    }

    let partial = partial_path(dest);
    let mut file = tokio::fs::File::create(&partial)
        .await
        .map_err(|e| DownloadError::io(&partial, e))?;

    let mut stream = response.bytes_stream();
    let mut downloaded: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(DownloadError::Http)?;
        file.write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(&partial, e))?;
        downloaded += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| DownloadError::io(&partial, e))?;
    drop(file);

    tokio::fs::rename(&partial, dest)
        .await
        .map_err(|e| DownloadError::io(dest, e))?;

    #[allow(clippy::cast_precision_loss)]
    let mb = downloaded as f64 / 1_048_576.0;
    log::info!("  download complete: {mb:.1} MB");

    Ok(downloaded)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

/// Errors from download operations.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// Non-success HTTP status.
    #[error("HTTP {status} for {url}")]
    HttpStatus {
        /// Request URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// I/O error writing to disk.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that caused the error.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

impl DownloadError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_sits_next_to_destination() {
        assert_eq!(
            partial_path(Path::new("data/shared/counties.zip")),
            PathBuf::from("data/shared/counties.zip.part")
        );
    }

    #[tokio::test]
    async fn cached_file_skips_the_network() {
        let dir = std::env::temp_dir().join(format!("ava_county_download_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let dest = dir.join("counties.zip");
        std::fs::write(&dest, b"cached").unwrap();

        let path = ensure_cached("http://127.0.0.1:9/unreachable.zip", &dest)
            .await
            .unwrap();

        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"cached");
    }

    #[tokio::test]
    async fn failed_download_leaves_no_cache_entry() {
        let dir = std::env::temp_dir().join(format!(
            "ava_county_download_fail_{}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let dest = dir.join("counties.zip");

        let result = ensure_cached("http://127.0.0.1:9/unreachable.zip", &dest).await;

        assert!(result.is_err());
        assert!(!dest.exists());
    }
}
