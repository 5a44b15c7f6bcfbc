//! Remote refresh and catalogue aggregation.
//!
//! Fetches every enabled remote whose cache slot went stale, then
//! merges all slots into one catalogue. A failing remote never
//! aborts the whole refresh: its error is collected, its previous
//! slot (if any) keeps serving, and the other remotes continue.

use crate::cache::{CachedPackage, CachedSlot, IndexCache};
use crate::model::{resolve_relative, IndexDocument, Remote};
use leaf_core::manifest::AvailablePackage;
use leaf_core::{constants, Error, Manifest, PackageIdentifier, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The merged view over all enabled remotes.
pub type Catalogue = BTreeMap<PackageIdentifier, AvailablePackage>;

/// Result of a refresh: the merged catalogue plus the remotes that
/// failed, with their errors.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Merged catalogue, first configured remote winning duplicates.
    pub catalogue: Catalogue,
    /// Remotes that could not be refreshed.
    pub failed: Vec<(String, Error)>,
}

/// Fetch all remotes and aggregate their packages.
pub async fn fetch_remotes(
    remotes: &[Remote],
    cache: &IndexCache,
    gpg_home: &Path,
    force: bool,
    token: &CancellationToken,
) -> Result<FetchOutcome> {
    let mut outcome = FetchOutcome::default();
    for remote in remotes {
        if !remote.enabled {
            continue;
        }
        if token.is_cancelled() {
            return Err(Error::UserCancel);
        }
        let slot = if force || cache.is_stale(remote) {
            match refresh_remote(remote, cache, gpg_home, token).await {
                Ok(slot) => Some(slot),
                Err(err) => {
                    warn!(alias = %remote.alias, %err, "remote refresh failed");
                    let fallback = cache.load(&remote.alias).ok();
                    outcome.failed.push((remote.alias.clone(), err));
                    fallback
                }
            }
        } else {
            cache.load(&remote.alias).ok()
        };
        if let Some(slot) = slot {
            merge_slot(&mut outcome.catalogue, &remote.alias, &slot);
        }
    }
    Ok(outcome)
}

/// Download, verify, and normalize one remote's index, then replace
/// its cache slot.
async fn refresh_remote(
    remote: &Remote,
    cache: &IndexCache,
    gpg_home: &Path,
    token: &CancellationToken,
) -> Result<CachedSlot> {
    info!(alias = %remote.alias, url = %remote.url, "refreshing remote");
    std::fs::create_dir_all(cache.dir()).map_err(|e| Error::io(cache.dir(), e))?;
    let staging = tempfile::tempdir_in(cache.dir()).map_err(|e| Error::io(cache.dir(), e))?;

    let document = fetch_document(&remote.url, staging.path(), "index.json", token).await?;

    if let Some(ref key_id) = remote.gpg_key {
        // The key may already be in the homedir; a keyserver hiccup
        // must not block verification.
        if let Err(err) = leaf_downloader::gpg::receive_key(gpg_home, key_id) {
            warn!(alias = %remote.alias, %err, "could not refresh gpg key");
        }
        let index_path = staging.path().join("index.json");
        let sig_path = leaf_downloader::download_file(
            &format!("{}.asc", remote.url),
            &staging.path().join("index.json.asc"),
            None,
            token,
        )
        .await?;
        leaf_downloader::gpg::verify(gpg_home, &index_path, &sig_path)?;
    }

    let mut packages = Vec::new();
    collect_packages(&mut packages, &document, &remote.url)?;

    // Sub-indexes resolve one level deep, relative to their parent.
    for (i, child) in document.composite.iter().enumerate() {
        let child_url = resolve_relative(&remote.url, child)?;
        let child_doc =
            fetch_document(&child_url, staging.path(), &format!("composite-{i}.json"), token)
                .await?;
        collect_packages(&mut packages, &child_doc, &child_url)?;
    }

    let slot = CachedSlot {
        enabled: remote.enabled,
        info: document.info,
        packages,
    };
    cache.store(&remote.alias, &slot)?;
    Ok(slot)
}

async fn fetch_document(
    url: &str,
    staging: &Path,
    name: &str,
    token: &CancellationToken,
) -> Result<IndexDocument> {
    let path = leaf_downloader::download_file(url, &staging.join(name), None, token).await?;
    let value = leaf_core::load_json(&path)?;
    Ok(serde_json::from_value(value)?)
}

fn collect_packages(
    out: &mut Vec<CachedPackage>,
    document: &IndexDocument,
    base_url: &str,
) -> Result<()> {
    for node in &document.packages {
        if node.info.version == constants::LATEST {
            return Err(Error::invalid_input(format!(
                "index entry '{}' uses the reserved version keyword",
                node.info.name
            )));
        }
        out.push(CachedPackage {
            url: resolve_relative(base_url, &node.file)?,
            size: node.size,
            hash: node.hash()?,
            info: node.info.clone(),
        });
    }
    Ok(())
}

/// Merge one slot into the catalogue: first remote wins; a hash
/// divergence on the same identifier is logged, not fatal.
fn merge_slot(catalogue: &mut Catalogue, alias: &str, slot: &CachedSlot) {
    for package in &slot.packages {
        let Ok(id) =
            PackageIdentifier::parse(&format!("{}_{}", package.info.name, package.info.version))
        else {
            warn!(alias, name = %package.info.name, "skipping invalid catalogue entry");
            continue;
        };
        if let Some(existing) = catalogue.get(&id) {
            if existing.hash != package.hash {
                warn!(
                    %id,
                    first = %existing.remote,
                    second = alias,
                    "same identifier with different hashes across remotes"
                );
            }
            continue;
        }
        catalogue.insert(
            id,
            AvailablePackage {
                manifest: Manifest {
                    info: package.info.clone(),
                    ..Manifest::default()
                },
                url: package.url.clone(),
                size: package.size,
                hash: package.hash.clone(),
                remote: alias.to_string(),
            },
        );
    }
}
