//! Streaming artifact download with timeout, cache reuse, and
//! cooperative cancellation.
//!
//! `http(s)://` URLs stream through reqwest with the timeout from
//! `LEAF_TIMEOUT` (default 10 s); `file://` URLs are copied from the
//! local filesystem. A destination that already exists with the
//! expected hash is reused without touching the network.

use crate::hash::{verify_file, Hash};
use futures_util::StreamExt;
use leaf_core::{constants, Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// How many times a transient network failure is retried.
const NETWORK_RETRIES: u32 = 1;

/// Download `url` into `dest`, verifying against `expected` when
/// given.
///
/// A pre-existing `dest` is kept when its hash matches and deleted
/// otherwise (an unverifiable file is always re-downloaded). The
/// token is checked on every chunk; cancellation removes the partial
/// file and returns `UserCancel`.
pub async fn download_file(
    url: &str,
    dest: &Path,
    expected: Option<&Hash>,
    token: &CancellationToken,
) -> Result<PathBuf> {
    if dest.exists() {
        match expected {
            Some(hash) if verify_file(dest, hash, &dest.to_string_lossy()).is_ok() => {
                debug!(dest = %dest.display(), "file already in cache");
                return Ok(dest.to_path_buf());
            }
            Some(_) => {
                // verify_file already removed the mismatching file.
                debug!(dest = %dest.display(), "cached file hash differs, re-downloading");
            }
            None => {
                debug!(dest = %dest.display(), "cached file cannot be verified, re-downloading");
                std::fs::remove_file(dest).map_err(|e| Error::io(dest, e))?;
            }
        }
    }

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }

    let parsed = Url::parse(url)
        .map_err(|e| Error::invalid_input(format!("invalid url '{url}': {e}")))?;

    let mut attempt = 0;
    loop {
        let result = match parsed.scheme() {
            "file" => copy_local(&parsed, dest),
            "http" | "https" => fetch_http(url, dest, token).await,
            scheme => Err(Error::invalid_input(format!(
                "unsupported url scheme '{scheme}'"
            ))),
        };
        match result {
            Ok(()) => break,
            Err(err @ Error::Network { .. }) if attempt < NETWORK_RETRIES => {
                attempt += 1;
                warn!(url, %err, attempt, "download failed, retrying");
                let _ = std::fs::remove_file(dest);
            }
            Err(err) => {
                let _ = std::fs::remove_file(dest);
                return Err(err);
            }
        }
    }

    if let Some(hash) = expected {
        verify_file(dest, hash, &file_name(&parsed))?;
    }
    info!(url, dest = %dest.display(), "downloaded");
    Ok(dest.to_path_buf())
}

fn file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut s| s.next_back())
        .filter(|s| !s.is_empty())
        .unwrap_or("artifact")
        .to_string()
}

fn copy_local(url: &Url, dest: &Path) -> Result<()> {
    let source = url
        .to_file_path()
        .map_err(|()| Error::invalid_input(format!("invalid file url '{url}'")))?;
    std::fs::copy(&source, dest).map_err(|e| Error::io(&source, e))?;
    Ok(())
}

async fn fetch_http(url: &str, dest: &Path, token: &CancellationToken) -> Result<()> {
    let timeout = Duration::from_secs(constants::download_timeout_secs());
    let client = reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .map_err(|e| Error::network(e.to_string(), Some(url.to_string())))?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::network(e.to_string(), Some(url.to_string())))?;
    if !response.status().is_success() {
        return Err(Error::network(
            format!("server answered {}", response.status()),
            Some(url.to_string()),
        ));
    }

    let total = response.content_length();
    let mut received: u64 = 0;
    let mut stream = response.bytes_stream();

    let tmp = dest.with_extension("part");
    let mut file = tokio::fs::File::create(&tmp)
        .await
        .map_err(|e| Error::io(&tmp, e))?;

    while let Some(chunk) = stream.next().await {
        if token.is_cancelled() {
            drop(file);
            let _ = std::fs::remove_file(&tmp);
            return Err(Error::UserCancel);
        }
        let chunk = chunk.map_err(|e| Error::network(e.to_string(), Some(url.to_string())))?;
        tokio::io::AsyncWriteExt::write_all(&mut file, &chunk)
            .await
            .map_err(|e| Error::io(&tmp, e))?;
        received += chunk.len() as u64;
        debug!(url, received, total = total.unwrap_or(0), "downloading");
    }
    tokio::io::AsyncWriteExt::flush(&mut file)
        .await
        .map_err(|e| Error::io(&tmp, e))?;
    drop(file);

    std::fs::rename(&tmp, dest).map_err(|e| Error::io(dest, e))?;
    Ok(())
}
