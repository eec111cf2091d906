//! The data side of the mapforge render pipeline.
//!
//! # Fingerprints
//!
//! Every artifact is tagged with a content hash derived from the [`DependencyGraph`]. A hash that matches the one stored in
//! the backend means the artifact is unchanged and can be linked instead of rendered.
//!
//! # Visual Equivalence
//!
//! When hashes differ, a [`ChunkRenderMeta`] recorded for another build can still prove that the change is invisible from a
//! given camera. The differing floor groups and loc instances are projected onto an [`ImageDiffGrid`]; zero coverage means
//! the old artifact can be aliased.
//!
//! # Storage
//!
//! Artifacts live behind the [`BackendStore`] trait. [`SledBackend`] keeps every build version in one database, while
//! [`DirectoryBackend`] writes a single version to the filesystem.

pub mod backend;
pub mod database;
pub mod dependency;
pub mod diff_grid;
pub mod entity;
pub mod mip_image;
pub mod render_meta;
pub mod usage;
pub mod working_set;

pub use backend::*;
pub use dependency::*;
pub use diff_grid::*;
pub use entity::*;
pub use mip_image::*;
pub use render_meta::*;
pub use usage::*;
pub use working_set::*;
