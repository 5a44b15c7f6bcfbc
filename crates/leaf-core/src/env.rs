//! Ordered environment layers and variable substitution.
//!
//! An [`Environment`] is a sequence of layers, each an ordered list
//! of `(key, value)` pairs. Later layers override earlier ones on
//! lookup, but every pair is emitted when exporting so sourcing the
//! activation script replays the full composition. The fixed
//! composition order is builtin → user → workspace → profile →
//! per-package.

use crate::constants;
use crate::error::{Error, Result};
use crate::identifier::PackageIdentifier;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

/// One environment layer: an optional comment plus ordered pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvLayer {
    /// Comment written above the layer in activation scripts.
    pub comment: Option<String>,
    /// Ordered `(key, value)` pairs; duplicates allowed.
    pub pairs: Vec<(String, String)>,
}

impl EnvLayer {
    /// Create an empty layer with a comment.
    pub fn new(comment: impl Into<String>) -> Self {
        Self {
            comment: Some(comment.into()),
            pairs: Vec::new(),
        }
    }

    /// Create a layer from pairs.
    pub fn from_pairs(
        comment: Option<String>,
        pairs: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            comment,
            pairs: pairs.into_iter().collect(),
        }
    }

    /// Append a pair.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.pairs.push((key.into(), value.into()));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Ordered composition of environment layers.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    layers: Vec<EnvLayer>,
}

impl Environment {
    /// Create an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compose layers in call order; empty layers are skipped.
    #[must_use]
    pub fn build(layers: impl IntoIterator<Item = EnvLayer>) -> Self {
        Self {
            layers: layers.into_iter().filter(|l| !l.is_empty()).collect(),
        }
    }

    /// Append a layer (later layers win on lookup).
    pub fn push_layer(&mut self, layer: EnvLayer) {
        if !layer.is_empty() {
            self.layers.push(layer);
        }
    }

    /// Append every layer of another environment.
    pub fn extend(&mut self, other: Environment) {
        self.layers.extend(other.layers);
    }

    /// Iterate all pairs in emission order.
    pub fn pairs(&self) -> impl DoubleEndedIterator<Item = &(String, String)> {
        self.layers.iter().flat_map(|l| l.pairs.iter())
    }

    /// Effective value of a key: the last pair wins.
    #[must_use]
    pub fn find(&self, key: &str) -> Option<String> {
        self.pairs()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Fold into a map, last pair winning.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, String> {
        self.pairs().cloned().collect()
    }

    /// Keys in first-seen order, deduplicated.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for (k, _) in self.pairs() {
            if !seen.contains(k) {
                seen.push(k.clone());
            }
        }
        seen
    }

    /// Write the activation script: one `export` per pair, with a
    /// leading comment per layer.
    pub fn emit_activate(&self, writer: &mut impl Write) -> Result<()> {
        for layer in &self.layers {
            if let Some(ref comment) = layer.comment {
                writeln!(writer, "# {comment}").map_err(io_err)?;
            }
            for (k, v) in &layer.pairs {
                writeln!(writer, "{}", export_command(k, v)).map_err(io_err)?;
            }
        }
        Ok(())
    }

    /// Write the deactivation script: for every key, restore the
    /// value found in the current process environment or unset it.
    pub fn emit_deactivate(&self, writer: &mut impl Write) -> Result<()> {
        for key in self.keys() {
            match std::env::var(&key) {
                Ok(previous) => {
                    writeln!(writer, "{}", export_command(&key, &previous)).map_err(io_err)?;
                }
                Err(_) => writeln!(writer, "unset {key};").map_err(io_err)?,
            }
        }
        Ok(())
    }
}

fn io_err(e: std::io::Error) -> Error {
    Error::io("<writer>", e)
}

/// Shell `export` line for one pair. Double quotes in the value are
/// escaped; everything else is left for the shell to expand.
#[must_use]
pub fn export_command(key: &str, value: &str) -> String {
    format!("export {key}=\"{}\";", value.replace('"', "\\\""))
}

/// Builtin layer: engine version, platform coordinates, and the
/// workspace/profile markers when applicable.
#[must_use]
pub fn builtin_layer(workspace: Option<&Path>, profile: Option<&str>) -> EnvLayer {
    let mut layer = EnvLayer::new("Leaf built-in variables");
    layer.set("LEAF_VERSION", constants::LEAF_VERSION);
    layer.set("LEAF_PLATFORM_SYSTEM", std::env::consts::OS);
    layer.set("LEAF_PLATFORM_MACHINE", std::env::consts::ARCH);
    layer.set("LEAF_PLATFORM_RELEASE", platform_release());
    if let Some(ws) = workspace {
        layer.set("LEAF_WORKSPACE", ws.to_string_lossy());
    }
    if let Some(profile) = profile {
        layer.set("LEAF_PROFILE", profile);
    }
    layer
}

fn platform_release() -> String {
    rustix::system::uname()
        .release()
        .to_string_lossy()
        .into_owned()
}

/// Resolves `@{…}` package-coordinate references in step commands
/// and environment values.
///
/// Bound to one current package (`@{NAME}`, `@{VERSION}`, `@{DIR}`)
/// plus any number of other installed packages addressed as
/// `@{KEY:name_version}`. Any `@{` left after substitution is fatal.
#[derive(Debug, Default)]
pub struct VariableResolver {
    table: Vec<(String, String)>,
}

impl VariableResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a package. The current package registers the unsuffixed
    /// keys, every package registers the `:identifier` forms.
    pub fn add_package(&mut self, id: &PackageIdentifier, folder: &Path, current: bool) {
        let mut suffixes = vec![format!(":{id}")];
        if current {
            suffixes.insert(0, String::new());
        }
        for suffix in &suffixes {
            self.add(format!("NAME{suffix}"), id.name.clone());
            self.add(format!("VERSION{suffix}"), id.version.clone());
            self.add(format!("DIR{suffix}"), folder.to_string_lossy().into_owned());
        }
    }

    /// Register a single variable.
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.table
            .push((format!("@{{{}}}", key.into()), value.into()));
    }

    /// Substitute every known variable, then refuse any remaining
    /// `@{` marker.
    pub fn resolve(&self, value: &str) -> Result<String> {
        let mut out = value.to_string();
        for (k, v) in &self.table {
            out = out.replace(k.as_str(), v);
        }
        if out.contains("@{") {
            return Err(Error::invalid_input(format!(
                "unresolved variable in '{out}'"
            ))
            .with_hints(vec![
                "Valid references are @{NAME}, @{VERSION}, @{DIR} and @{KEY:name_version}"
                    .to_string(),
            ]));
        }
        Ok(out)
    }
}
