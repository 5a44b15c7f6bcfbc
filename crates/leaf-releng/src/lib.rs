//! Release engineering: build artifacts and maintain repositories.
//!
//! Three operations: package a folder into a (reproducible) archive
//! with an external `.info` sidecar, assemble a `manifest.json` from
//! JSON fragments, and generate a repository index over a set of
//! artifacts.

use leaf_core::constants::{files, LATEST};
use leaf_core::json::JsonMap;
use leaf_core::{
    layer_merge, load_json, write_json, Error, LeafArtifact, Manifest, PackageIdentifier, Result,
};
use leaf_downloader::archive::{self, CreateOptions};
use leaf_downloader::Hash;
use leaf_remote::{ArtifactNode, IndexDocument, IndexInfo};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Options for [`create_package`].
#[derive(Debug, Clone)]
pub struct PackageOptions {
    /// Override the extension-derived compression.
    pub compression: Option<archive::Compression>,
    /// Extra tar arguments (validated against the forbidden set).
    pub tar_extra_args: Vec<String>,
    /// Stamp every entry mtime for reproducible output.
    pub force_timestamp: Option<u64>,
    /// Force uid/gid 0 and `root`/`root` names.
    pub force_root_owner: bool,
    /// Write the `<out>.info` sidecar.
    pub store_info: bool,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self {
            compression: None,
            tar_extra_args: Vec::new(),
            force_timestamp: None,
            force_root_owner: false,
            store_info: true,
        }
    }
}

/// The `.info` sidecar path for an artifact.
#[must_use]
pub fn external_info_file(artifact: &Path) -> PathBuf {
    sibling_with_suffix(artifact, files::INFO_EXTENSION)
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(suffix);
    path.with_file_name(name)
}

/// Package a folder containing a `manifest.json` into an archive.
///
/// With `force_timestamp` and `force_root_owner` set, the output
/// hash is stable across runs and across directories given identical
/// folder contents. The sidecar (when requested) stores
/// `{hash, size, info}` for later reuse by [`generate_index`].
pub fn create_package(folder: &Path, out: &Path, opts: &PackageOptions) -> Result<Manifest> {
    let manifest_file = folder.join(files::MANIFEST);
    if !manifest_file.exists() {
        return Err(Error::not_found(
            "manifest",
            manifest_file.to_string_lossy(),
        ));
    }
    let manifest = Manifest::load(&manifest_file)?;
    let id = manifest.identifier()?;
    info!(%id, folder = %folder.display(), "packaging");

    let info_file = external_info_file(out);
    if !opts.store_info && info_file.exists() {
        return Err(Error::conflict(format!(
            "a previous info file exists for this package: {}",
            info_file.display()
        ))
        .with_hints(vec![format!("Remove it with 'rm {}'", info_file.display())]));
    }

    archive::create(
        folder,
        out,
        &CreateOptions {
            compression: opts.compression,
            extra_args: opts.tar_extra_args.clone(),
            force_timestamp: opts.force_timestamp,
            force_root_owner: opts.force_root_owner,
        },
    )?;
    info!(out = %out.display(), "package created");

    if opts.store_info {
        let node = build_artifact_node(out, Some(&manifest))?;
        write_json(&info_file, &serde_json::to_value(&node)?, true)?;
        debug!(info = %info_file.display(), "sidecar written");
    }
    Ok(manifest)
}

/// Describe an artifact: hash, size, and manifest info. Reads the
/// manifest out of the archive when none is supplied.
fn build_artifact_node(artifact: &Path, manifest: Option<&Manifest>) -> Result<ArtifactNode> {
    let hash = Hash::of_file(artifact)?;
    let size = std::fs::metadata(artifact)
        .map_err(|e| Error::io(artifact, e))?
        .len();
    let manifest = match manifest {
        Some(m) => m.clone(),
        None => read_artifact(artifact)?.manifest,
    };
    Ok(ArtifactNode {
        hash: Some(hash.to_string()),
        sha1sum: None,
        size,
        info: manifest.info,
        file: String::new(),
    })
}

/// Open a local archive as an artifact, reading its manifest out of
/// the archive contents.
pub fn read_artifact(artifact: &Path) -> Result<LeafArtifact> {
    let staging = tempfile::tempdir().map_err(|e| Error::io(artifact, e))?;
    archive::extract(artifact, staging.path(), &[])?;
    let manifest = Manifest::load(&staging.path().join(files::MANIFEST))?;
    Ok(LeafArtifact {
        manifest,
        path: artifact.to_path_buf(),
    })
}

/// Assemble a `manifest.json` from fragments and an info overlay.
///
/// Fragments deep-merge in order (lists append unique, scalars
/// overwrite). Only the recognised info keys are overlaid; the list
/// keys validate each entry against its grammar and deduplicate
/// preserving order. With `resolve_env`, every `#{VAR}` in the
/// serialized document is replaced from the process environment; any
/// unresolved variable is fatal.
pub fn generate_manifest(
    out: &Path,
    fragments: &[PathBuf],
    info: &JsonMap,
    resolve_env: bool,
) -> Result<Manifest> {
    let mut model = Value::Object(JsonMap::new());
    for fragment in fragments {
        debug!(fragment = %fragment.display(), "merging fragment");
        layer_merge(&mut model, &load_json(fragment)?);
    }

    overlay_info(&mut model, info)?;

    let mut text = leaf_core::json::to_json_string(&model, true)?;
    if resolve_env {
        text = resolve_env_variables(&text)?;
    }

    let manifest: Manifest = serde_json::from_str(&text)?;
    if manifest.info.version == LATEST {
        return Err(Error::invalid_input(format!(
            "'{LATEST}' is a reserved version keyword"
        )));
    }
    manifest.validate()?;

    let document: Value = serde_json::from_str(&text)?;
    write_json(out, &document, true)?;
    info!(id = %manifest.identifier()?, out = %out.display(), "manifest saved");
    Ok(manifest)
}

/// Info keys recognised by the overlay; anything else in the map is
/// ignored.
const INFO_KEYS: &[&str] = &[
    "name",
    "version",
    "description",
    "date",
    "master",
    "leafMinVersion",
    "requires",
    "depends",
    "tags",
    "upgrade",
];

const LIST_KEYS: &[&str] = &["requires", "depends", "tags"];

fn overlay_info(model: &mut Value, info: &JsonMap) -> Result<()> {
    if info.is_empty() {
        return Ok(());
    }
    if !model.is_object() {
        *model = Value::Object(JsonMap::new());
    }
    let root = model.as_object_mut().unwrap_or_else(|| unreachable!());
    let info_node = root
        .entry("info")
        .or_insert_with(|| Value::Object(JsonMap::new()));
    let Some(info_node) = info_node.as_object_mut() else {
        return Err(Error::invalid_input("'info' is not an object"));
    };

    for key in INFO_KEYS {
        let Some(value) = info.get(*key) else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if LIST_KEYS.contains(key) {
            let target = info_node
                .entry((*key).to_string())
                .or_insert_with(|| Value::Array(Vec::new()));
            let Some(list) = target.as_array_mut() else {
                return Err(Error::invalid_input(format!("'{key}' is not a list")));
            };
            for entry in value.as_array().into_iter().flatten() {
                if list.contains(entry) {
                    continue;
                }
                if let Some(s) = entry.as_str() {
                    match *key {
                        "depends" => {
                            leaf_core::ConditionalPackageIdentifier::parse(s)?;
                        }
                        "requires" => {
                            PackageIdentifier::parse(s)?;
                        }
                        _ => {}
                    }
                }
                list.push(entry.clone());
            }
        } else {
            info_node.insert((*key).to_string(), value.clone());
        }
    }
    Ok(())
}

fn resolve_env_variables(text: &str) -> Result<String> {
    let re = regex::Regex::new(r"#\{([a-zA-Z0-9_]+)\}").unwrap_or_else(|_| unreachable!());
    let mut out = text.to_string();
    let variables: std::collections::BTreeSet<String> = re
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect();
    for var in variables {
        let value = std::env::var(&var).map_err(|_| {
            Error::not_found("environment variable", var.clone()).with_hints(vec![format!(
                "Set the variable with 'export {var}=…'"
            )])
        })?;
        debug!(var, value, "resolving manifest variable");
        out = out.replace(&format!("#{{{var}}}"), &value);
    }
    Ok(out)
}

/// Options for [`generate_index`].
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Repository name for the info node.
    pub name: Option<String>,
    /// Repository description for the info node.
    pub description: Option<String>,
    /// Prefer `.info` sidecars over reading archives.
    pub use_external_info: bool,
    /// Merge `<artifact>.tags` lines into artifact tags.
    pub use_extra_tags: bool,
    /// Pretty-print the output.
    pub pretty: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            name: None,
            description: None,
            use_external_info: true,
            use_extra_tags: true,
            pretty: false,
        }
    }
}

/// Generate an index document referencing the given artifacts.
///
/// Duplicate identifiers with the same hash deduplicate; a hash
/// divergence is fatal. Artifact paths are stored relative to the
/// index location.
pub fn generate_index(out: &Path, artifacts: &[PathBuf], opts: &IndexOptions) -> Result<()> {
    let index_parent = out.parent().unwrap_or_else(|| Path::new("."));
    let mut document = IndexDocument {
        info: IndexInfo {
            name: opts.name.clone(),
            description: opts.description.clone(),
            date: Some(now_date()),
        },
        ..IndexDocument::default()
    };
    let mut seen: Vec<(PackageIdentifier, String)> = Vec::new();

    for artifact in artifacts {
        let mut node = load_artifact_node(artifact, opts.use_external_info)?;
        let id = PackageIdentifier::parse(&format!(
            "{}_{}",
            node.info.name, node.info.version
        ))?;

        if let Some((_, known_hash)) = seen.iter().find(|(known, _)| *known == id) {
            if *known_hash == node.hash()? {
                info!(%id, "artifact already present, skipping");
                continue;
            }
            return Err(Error::conflict(format!(
                "several different artifacts for identifier {id}"
            )));
        }

        if opts.use_extra_tags {
            merge_extra_tags(artifact, &mut node)?;
        }

        node.file = artifact
            .strip_prefix(index_parent)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| {
                artifact
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
        seen.push((id.clone(), node.hash()?));
        info!(%id, "adding package");
        document.packages.push(node);
    }

    write_json(out, &serde_json::to_value(&document)?, opts.pretty)?;
    info!(out = %out.display(), count = document.packages.len(), "index created");
    Ok(())
}

fn load_artifact_node(artifact: &Path, use_external_info: bool) -> Result<ArtifactNode> {
    if use_external_info {
        let info_file = external_info_file(artifact);
        if info_file.exists() {
            debug!(info = %info_file.display(), "reading sidecar");
            let node: ArtifactNode = serde_json::from_value(load_json(&info_file)?)?;
            return Ok(node);
        }
    }
    debug!(artifact = %artifact.display(), "computing artifact info");
    build_artifact_node(artifact, None)
}

fn merge_extra_tags(artifact: &Path, node: &mut ArtifactNode) -> Result<()> {
    let tags_file = sibling_with_suffix(artifact, files::TAGS_EXTENSION);
    if !tags_file.exists() {
        return Ok(());
    }
    let text = std::fs::read_to_string(&tags_file).map_err(|e| Error::io(&tags_file, e))?;
    for tag in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if !node.info.tags.iter().any(|t| t == tag) {
            debug!(tag, "adding extra tag");
            node.info.tags.push(tag.to_string());
        }
    }
    Ok(())
}

fn now_date() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
