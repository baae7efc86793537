//! Manifest discovery for manifest-gate
//!
//! Walks the `base/`, `overlays/` and `apps/` trees below a repository root
//! and yields the YAML manifests found there, tagged with the group they
//! belong to. Discovery is lazy, restartable and ordered by path so two runs
//! over the same tree always see the same sequence.

mod discover;
mod group;
mod patterns;

pub use discover::{overlay_dirs, Discovery, DiscoveryConfig, DiscoveryError, ManifestIter};
pub use group::{ManifestFile, ManifestGroup, ParseGroupError};
pub use patterns::{PatternError, PatternSet, DEFAULT_EXCLUDES, DEFAULT_INCLUDES};
