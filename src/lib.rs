//! Incremental map tile rendering.
//!
//! A render pass walks the chunks of a versioned world and makes sure every configured layer has its artifacts stored in
//! a [`BackendStore`](mapforge_map::BackendStore) for the current build. Artifacts whose content fingerprint is already
//! known are linked instead of rendered, and tiles that look the same as a recent build's tile alias that build's copy.
//! Lower zoom levels are assembled from their four children by the [`MipScheduler`].
//!
//! ```no_run
//! # use mapforge::*;
//! # async fn example<L: mapforge_map::ChunkLoader>(
//! #     graph: std::sync::Arc<mapforge_map::DependencyGraph>,
//! #     backend: &dyn mapforge_map::BackendStore,
//! #     loader: &L,
//! #     renderer: &dyn LayerRenderer<L::Chunk>,
//! # ) -> anyhow::Result<()> {
//! let config = ValidatedConfig::read_file("map.ron")?;
//! backend.begin_version(graph.max_version()).await?;
//! let summary = run_render_pass(config.area(), &config, graph, backend, loader, renderer).await;
//! println!("{} errors", summary.error_count);
//! # Ok(())
//! # }
//! ```

mod config;
mod engine;
mod error;
mod mip;
mod progress;
mod renderer;
mod run;
mod task;

#[cfg(test)]
mod testing;

pub use config::*;
pub use engine::{ChunkReport, ExecutionEngine, LocalFile};
pub use error::ChunkError;
pub use mip::*;
pub use progress::*;
pub use renderer::LayerRenderer;
pub use run::*;
pub use task::*;

// Re-exports.
pub use mapforge_core;
pub use mapforge_map;
