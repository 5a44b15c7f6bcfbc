//! The package manifest model and its variants.
//!
//! A [`Manifest`] is immutable after load. The three variants share
//! the manifest core and add a variant-specific payload: a remote
//! artifact (url/size/hash), an installed folder, or a local archive
//! path.

use crate::constants::{self, files};
use crate::env::EnvLayer;
use crate::error::{Error, Result};
use crate::identifier::{compare_versions, ConditionalPackageIdentifier, PackageIdentifier};
use crate::json::{string_pairs, JsonMap};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// The `info` block of a manifest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PackageInfo {
    /// Package name.
    pub name: String,
    /// Package version; `latest` is rejected by validation.
    pub version: String,
    /// Human description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Release date, free-form.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Master packages are top-level entry points.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub master: bool,
    /// Minimum engine version able to handle this package.
    #[serde(
        rename = "leafMinVersion",
        skip_serializing_if = "Option::is_none"
    )]
    pub leaf_min_version: Option<String>,
    /// Unconditional system prerequisites (must already be installed).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,
    /// Conditional dependency edges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    /// Tags (multiset).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Named features contributed by this package.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub features: JsonMap,
    /// Automatic-upgrade opt-in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<bool>,
}

/// One install/sync/uninstall step.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Step {
    /// Label printed before the step runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Command and arguments, `@{…}`-substituted before spawn.
    pub command: Vec<String>,
    /// Extra environment for this step only.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub env: JsonMap,
    /// Inherit stdout instead of piping it to the logger.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub verbose: bool,
    /// Record a failure but keep going.
    #[serde(
        rename = "ignoreFail",
        default,
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub ignore_fail: bool,
}

/// A package manifest, the `manifest.json` document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    /// Identification block.
    pub info: PackageInfo,
    /// Environment exported by this package.
    #[serde(default, skip_serializing_if = "JsonMap::is_empty")]
    pub env: JsonMap,
    /// Steps run after extraction.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install: Vec<Step>,
    /// Steps run on every profile sync.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync: Vec<Step>,
    /// Steps run before removal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uninstall: Vec<Step>,
}

impl Manifest {
    /// Load and validate a `manifest.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        let manifest: Self = serde_json::from_slice(&data)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// The package identifier.
    pub fn identifier(&self) -> Result<PackageIdentifier> {
        PackageIdentifier::parse(&format!("{}_{}", self.info.name, self.info.version))
    }

    /// Parsed conditional dependency edges.
    pub fn depends(&self) -> Result<Vec<ConditionalPackageIdentifier>> {
        self.info
            .depends
            .iter()
            .map(|s| ConditionalPackageIdentifier::parse(s))
            .collect()
    }

    /// Parsed unconditional prerequisites.
    pub fn requires(&self) -> Result<Vec<PackageIdentifier>> {
        self.info
            .requires
            .iter()
            .map(|s| PackageIdentifier::parse(s))
            .collect()
    }

    /// The exported environment as an ordered layer.
    #[must_use]
    pub fn env_layer(&self) -> EnvLayer {
        EnvLayer::from_pairs(
            Some(format!(
                "Exported by package {}_{}",
                self.info.name, self.info.version
            )),
            string_pairs(&self.env),
        )
    }

    /// Features declared by this manifest.
    pub fn features(&self) -> Result<Vec<Feature>> {
        self.info
            .features
            .iter()
            .map(|(name, spec)| Feature::from_json(name, spec))
            .collect()
    }

    /// Validate identifier grammar, dependency grammars, and the
    /// engine version floor.
    pub fn validate(&self) -> Result<()> {
        self.identifier()?;
        self.depends()?;
        self.requires()?;
        self.features()?;
        if let Some(ref min) = self.info.leaf_min_version {
            if compare_versions(min, constants::LEAF_VERSION) == Ordering::Greater {
                return Err(Error::invalid_input(format!(
                    "package {}_{} needs leaf >= {min} (this is {})",
                    self.info.name,
                    self.info.version,
                    constants::LEAF_VERSION
                ))
                .with_hints(vec!["Upgrade leaf to a newer version".to_string()]));
            }
        }
        Ok(())
    }
}

/// A package available from a remote index.
#[derive(Debug, Clone)]
pub struct AvailablePackage {
    /// The manifest core.
    pub manifest: Manifest,
    /// Absolute artifact URL.
    pub url: String,
    /// Artifact size in bytes.
    pub size: u64,
    /// Artifact hash, `<algo>:<hex>` form.
    pub hash: String,
    /// Alias of the remote this entry came from.
    pub remote: String,
}

/// A package present in the store.
#[derive(Debug, Clone)]
pub struct InstalledPackage {
    /// The manifest core.
    pub manifest: Manifest,
    /// Absolute folder in the store.
    pub folder: PathBuf,
}

impl InstalledPackage {
    /// Load an installed package from its store folder.
    pub fn load(folder: &Path) -> Result<Self> {
        let manifest = Manifest::load(&folder.join(files::MANIFEST))?;
        Ok(Self {
            manifest,
            folder: folder.to_path_buf(),
        })
    }
}

/// A local package archive.
#[derive(Debug, Clone)]
pub struct LeafArtifact {
    /// The manifest core.
    pub manifest: Manifest,
    /// Archive path on disk.
    pub path: PathBuf,
}

/// A named toggle stored as `key=value` in some environment scope.
///
/// The same feature may be declared by several manifests; aliases
/// merge. Declaring two different keys for one feature name is fatal
/// at validation; duplicate enum values only surface on lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    /// Feature name.
    pub name: String,
    /// Environment keys declared across aliases (must agree).
    keys: Vec<String>,
    /// `(enum, value)` pairs; `None` value means "unset the key".
    values: Vec<(String, Option<String>)>,
    /// Description from the first alias that carried one.
    pub description: Option<String>,
}

impl Feature {
    /// Parse a feature from its manifest JSON node.
    pub fn from_json(name: &str, spec: &serde_json::Value) -> Result<Self> {
        let obj = spec.as_object().ok_or_else(|| {
            Error::invalid_input(format!("feature '{name}' is not an object"))
        })?;
        let key = obj
            .get("key")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                Error::invalid_input(format!("feature '{name}' has no 'key'"))
            })?;
        let mut values = Vec::new();
        if let Some(map) = obj.get("values").and_then(serde_json::Value::as_object) {
            for (enum_name, v) in map {
                let value = match v {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s.clone()),
                    other => Some(other.to_string()),
                };
                values.push((enum_name.clone(), value));
            }
        }
        Ok(Self {
            name: name.to_string(),
            keys: vec![key.to_string()],
            values,
            description: obj
                .get("description")
                .and_then(serde_json::Value::as_str)
                .map(ToString::to_string),
        })
    }

    /// The environment key this feature toggles.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.keys[0]
    }

    /// Merge another declaration of the same feature.
    pub fn add_alias(&mut self, other: &Feature) -> Result<()> {
        if other.name != self.name {
            return Err(Error::conflict(format!(
                "cannot alias feature '{}' with '{}'",
                self.name, other.name
            )));
        }
        for key in &other.keys {
            if !self.keys.contains(key) {
                self.keys.push(key.clone());
            }
        }
        self.values.extend(other.values.iter().cloned());
        if self.description.is_none() {
            self.description.clone_from(&other.description);
        }
        Ok(())
    }

    /// Fail if aliases declared conflicting keys.
    pub fn validate(&self) -> Result<()> {
        if self.keys.len() > 1 {
            return Err(Error::conflict(format!(
                "feature '{}' is declared with multiple keys: {}",
                self.name,
                self.keys.join(", ")
            )));
        }
        Ok(())
    }

    /// Value for an enum. Ambiguous declarations (same enum, several
    /// distinct values) only fail here.
    pub fn value(&self, enum_name: &str) -> Result<Option<String>> {
        let mut found: Vec<&Option<String>> = self
            .values
            .iter()
            .filter(|(e, _)| e == enum_name)
            .map(|(_, v)| v)
            .collect();
        found.dedup();
        match found.len() {
            0 => Err(Error::not_found("feature value", enum_name)),
            1 => Ok(found[0].clone()),
            _ => Err(Error::conflict(format!(
                "feature '{}' has ambiguous values for '{enum_name}'",
                self.name
            ))),
        }
    }

    /// Enums whose value equals the given one.
    #[must_use]
    pub fn enums_for_value(&self, value: Option<&str>) -> Vec<String> {
        let mut out = Vec::new();
        for (e, v) in &self.values {
            if v.as_deref() == value && !out.contains(e) {
                out.push(e.clone());
            }
        }
        out
    }

    /// All declared enums, deduplicated, in declaration order.
    #[must_use]
    pub fn enums(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (e, _) in &self.values {
            if !out.contains(e) {
                out.push(e.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn manifest_json() -> serde_json::Value {
        json!({
            "info": {
                "name": "container-A",
                "version": "1.0",
                "description": "Container package",
                "master": true,
                "depends": ["container-B_1.0", "container-C_1.0(FOO=BAR)"],
                "requires": ["python3_3.5"],
                "tags": ["container", "test"]
            },
            "env": {"LEAF_ENV_A": "FOO"},
            "install": [
                {"label": "touch marker", "command": ["touch", "marker"]}
            ]
        })
    }

    #[test]
    fn parse_manifest() {
        let manifest: Manifest = serde_json::from_value(manifest_json()).unwrap();
        manifest.validate().unwrap();
        assert_eq!(manifest.identifier().unwrap().to_string(), "container-A_1.0");
        let depends = manifest.depends().unwrap();
        assert_eq!(depends.len(), 2);
        assert_eq!(depends[1].conditions.len(), 1);
        assert_eq!(
            manifest.requires().unwrap()[0].to_string(),
            "python3_3.5"
        );
        assert_eq!(manifest.install[0].command, vec!["touch", "marker"]);
        assert!(!manifest.install[0].ignore_fail);
    }

    #[test]
    fn latest_version_rejected() {
        let mut doc = manifest_json();
        doc["info"]["version"] = json!("latest");
        let manifest: Manifest = serde_json::from_value(doc).unwrap();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn future_min_version_rejected() {
        let mut doc = manifest_json();
        doc["info"]["leafMinVersion"] = json!("999.0");
        let manifest: Manifest = serde_json::from_value(doc).unwrap();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn serialization_skips_empty_sections() {
        let manifest = Manifest {
            info: PackageInfo {
                name: "tiny".to_string(),
                version: "1.0".to_string(),
                ..PackageInfo::default()
            },
            ..Manifest::default()
        };
        let text = serde_json::to_string(&manifest).unwrap();
        assert!(!text.contains("install"));
        assert!(!text.contains("depends"));
        assert!(!text.contains("master"));
    }

    fn feature(values: serde_json::Value) -> Feature {
        Feature::from_json(
            "myfeature",
            &json!({"key": "MY_KEY", "values": values, "description": "a feature"}),
        )
        .unwrap()
    }

    #[test]
    fn feature_lookup() {
        let f = feature(json!({"on": "1", "off": null}));
        assert_eq!(f.value("on").unwrap(), Some("1".to_string()));
        assert_eq!(f.value("off").unwrap(), None);
        assert!(f.value("missing").is_err());
        assert_eq!(f.enums_for_value(Some("1")), vec!["on"]);
    }

    #[test]
    fn feature_alias_merge_and_conflicts() {
        let mut f = feature(json!({"on": "1"}));
        f.add_alias(&feature(json!({"fast": "2"}))).unwrap();
        f.validate().unwrap();
        assert_eq!(f.value("fast").unwrap(), Some("2".to_string()));

        // Same enum, different value: only the lookup fails.
        f.add_alias(&feature(json!({"on": "other"}))).unwrap();
        f.validate().unwrap();
        assert!(f.value("on").is_err());
        assert_eq!(f.value("fast").unwrap(), Some("2".to_string()));

        // Conflicting key is fatal at validation.
        let alt = Feature::from_json("myfeature", &json!({"key": "OTHER_KEY"})).unwrap();
        f.add_alias(&alt).unwrap();
        assert!(f.validate().is_err());

        // Different name cannot alias at all.
        let other = Feature::from_json("other", &json!({"key": "MY_KEY"})).unwrap();
        assert!(f.add_alias(&other).is_err());
    }
}
