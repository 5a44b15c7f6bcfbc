//! Feature collection and toggling.
//!
//! Features are declared by manifests; the manager merges the
//! declarations of all available and installed packages, aliasing
//! same-name features together. Toggling writes the feature key into
//! an environment scope; querying maps the key's current value back
//! to the declaring enums.

use leaf_core::{Environment, Feature, Manifest, Result};
use tracing::debug;

/// Merged view over every feature declared in a set of manifests.
#[derive(Debug, Default)]
pub struct FeatureManager {
    features: Vec<Feature>,
}

impl FeatureManager {
    /// Collect and merge features from manifests (catalogue first,
    /// then installed, the way the engine enumerates them).
    pub fn build<'a>(manifests: impl Iterator<Item = &'a Manifest>) -> Result<Self> {
        let mut manager = Self::default();
        for manifest in manifests {
            for feature in manifest.features()? {
                match manager
                    .features
                    .iter_mut()
                    .find(|f| f.name == feature.name)
                {
                    Some(existing) => existing.add_alias(&feature)?,
                    None => manager.features.push(feature),
                }
            }
        }
        debug!(count = manager.features.len(), "features collected");
        Ok(manager)
    }

    /// All known features.
    #[must_use]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Look up a feature by name and validate its merged aliases.
    pub fn feature(&self, name: &str) -> Result<&Feature> {
        let feature = self
            .features
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| leaf_core::Error::not_found("feature", name))?;
        feature.validate()?;
        Ok(feature)
    }

    /// Resolve a toggle to `(key, value)`; a `None` value means the
    /// key must be unset in the target scope.
    pub fn toggle_value(&self, name: &str, enum_name: &str) -> Result<(String, Option<String>)> {
        let feature = self.feature(name)?;
        let value = feature.value(enum_name)?;
        Ok((feature.key().to_string(), value))
    }

    /// The enums matching the key's current value in the composed
    /// environment, joined by ` | ` when ambiguous. `None` when no
    /// enum matches.
    pub fn query(&self, name: &str, env: &Environment) -> Result<Option<String>> {
        let feature = self.feature(name)?;
        let current = env.find(feature.key());
        let enums = feature.enums_for_value(current.as_deref());
        if enums.is_empty() {
            Ok(None)
        } else {
            Ok(Some(enums.join(" | ")))
        }
    }
}
