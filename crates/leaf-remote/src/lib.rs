//! Remote repositories for Leaf: configuration model, per-remote
//! index cache with a 24 h TTL, and catalogue aggregation across all
//! enabled remotes.

pub mod cache;
pub mod fetch;
pub mod model;

pub use cache::{CachedPackage, CachedSlot, IndexCache};
pub use fetch::{fetch_remotes, Catalogue, FetchOutcome};
pub use model::{resolve_relative, ArtifactNode, IndexDocument, IndexInfo, Remote};
