//! Core types and utilities for the Leaf package manager.
//!
//! This crate provides the foundations used throughout Leaf:
//! - Package identifiers, version ordering, conditional dependencies
//! - The manifest model and its available/installed/artifact variants
//! - Ordered environment layers and `@{…}` variable substitution
//! - Insertion-order-preserving JSON helpers with atomic writes
//! - The error taxonomy

pub mod constants;
pub mod env;
pub mod error;
pub mod identifier;
pub mod json;
pub mod manifest;

pub use env::{builtin_layer, EnvLayer, Environment, VariableResolver};
pub use error::{Error, Result};
pub use identifier::{
    compare_versions, Condition, ConditionalPackageIdentifier, PackageIdentifier,
};
pub use json::{layer_merge, load_json, write_json, JsonMap};
pub use manifest::{
    AvailablePackage, Feature, InstalledPackage, LeafArtifact, Manifest, PackageInfo, Step,
};
