//! Remote repository configuration and index document model.

use leaf_core::manifest::PackageInfo;
use leaf_core::{Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// A configured remote repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    /// Unique alias in the user configuration.
    pub alias: String,
    /// Index document URL (`http(s)://` or `file://`).
    pub url: String,
    /// Disabled remotes keep their configuration but are skipped.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// GPG key id; when set, `<url>.asc` is verified on fetch.
    #[serde(rename = "gpgKey", skip_serializing_if = "Option::is_none")]
    pub gpg_key: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Remote {
    /// Create an enabled remote.
    pub fn new(alias: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            url: url.into(),
            enabled: true,
            gpg_key: None,
        }
    }
}

/// The `info` block of an index document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexInfo {
    /// Repository name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Repository description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Generation date.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

/// One artifact entry inside an index document.
///
/// Newer documents carry a prefixed `hash`; legacy ones carry a bare
/// `sha1sum` which loads as `sha1:<hex>`. No other compatibility
/// heuristics exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactNode {
    /// Prefixed artifact hash.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    /// Legacy bare sha1 digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1sum: Option<String>,
    /// Artifact size in bytes.
    pub size: u64,
    /// Manifest info block.
    pub info: PackageInfo,
    /// Archive path, relative to the index document. Absent in
    /// `.info` sidecar files, which describe the artifact itself.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file: String,
}

impl ArtifactNode {
    /// The effective prefixed hash.
    pub fn hash(&self) -> Result<String> {
        if let Some(ref h) = self.hash {
            Ok(h.clone())
        } else if let Some(ref legacy) = self.sha1sum {
            Ok(format!("sha1:{legacy}"))
        } else {
            Err(Error::invalid_input(format!(
                "artifact '{}' carries no hash",
                self.file
            )))
        }
    }
}

/// An index document as served by a remote.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexDocument {
    /// Repository info.
    #[serde(default)]
    pub info: IndexInfo,
    /// Artifact entries.
    #[serde(default)]
    pub packages: Vec<ArtifactNode>,
    /// Relative paths of sub-indexes, resolved one level deep.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub composite: Vec<String>,
}

/// Resolve a path relative to an index document URL (sibling
/// resolution, like a relative href).
pub fn resolve_relative(index_url: &str, relative: &str) -> Result<String> {
    let base = Url::parse(index_url)
        .map_err(|e| Error::invalid_input(format!("invalid url '{index_url}': {e}")))?;
    let resolved = base
        .join(relative)
        .map_err(|e| Error::invalid_input(format!("invalid relative path '{relative}': {e}")))?;
    Ok(resolved.to_string())
}
