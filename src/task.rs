//! # Render Task Generator
//!
//! Expands one chunk coordinate into every artifact the configured layers need for it.

use crate::config::{LayerConfig, LayerMode, ValidatedConfig};

use mapforge_core::glam::{Mat4, Vec2};
use mapforge_core::{ChunkCoord, Rect, TileCoord, CHUNK_SQUARES};
use mapforge_map::{oblique_projection, BackendStore, DependencyGraph, EntityKey, UniqueMapFile};
use smallvec::SmallVec;

/// Chunks around a task's own chunk whose contents may bleed into its output.
pub const DATA_HALO: i32 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TaskKind {
    /// Bytes come from the [`LayerRenderer`](crate::LayerRenderer).
    Render,
    /// Bytes are the encoded [`ChunkRenderMeta`](mapforge_map::ChunkRenderMeta) of the task's chunk.
    RenderMeta,
}

/// The part of the world drawn into one image tile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileView {
    pub tile: TileCoord,
    /// Lower corner of the tile, in squares.
    pub origin: Vec2,
    /// Edge length of the tile, in squares.
    pub span: f32,
}

impl TileView {
    /// World units to normalized device coordinates, for layers drawn with an oblique camera.
    pub fn projection(&self, layer: &LayerConfig) -> Option<Mat4> {
        let view = layer.mode.oblique()?;
        Some(oblique_projection(self.origin, self.span, view.dxdy, view.dzdy))
    }
}

/// An artifact this task may alias instead of storing new bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DedupeCandidate {
    pub name: String,
    /// Index of the layer that produced the candidate.
    pub layer_index: usize,
}

#[derive(Clone, Debug)]
pub struct RenderTask<'a> {
    pub layer: &'a LayerConfig,
    pub layer_index: usize,
    pub kind: TaskKind,
    pub chunk: ChunkCoord,
    pub name: String,
    /// Folded fingerprints of every mapsquare in `data_rect`.
    pub hash: u32,
    pub data_rect: Rect,
    /// `None` for per-chunk data files.
    pub view: Option<TileView>,
    pub dedupe_candidates: SmallVec<[DedupeCandidate; 2]>,
    /// Tiles at the chunk zoom of mipped layers are the leaves of the mip pyramid.
    pub feeds_mip: bool,
}

impl<'a> RenderTask<'a> {
    pub fn unique_file(&self) -> UniqueMapFile {
        UniqueMapFile::new(self.name.clone(), self.hash)
    }

    pub fn projection(&self) -> Option<Mat4> {
        self.view.and_then(|view| view.projection(self.layer))
    }
}

/// The content hash shared by every task of the chunk at `coord`.
pub fn chunk_hash(coord: ChunkCoord, graph: &DependencyGraph) -> u32 {
    let data_rect = Rect::single(coord).padded(DATA_HALO);
    graph.fingerprint_all(
        data_rect.iter().map(|c| EntityKey::mapsquare(c.x, c.z)),
        0,
    )
}

/// Tile `(x, y)` at `zoom` for sub-tile `(sx, sz)` of chunk `coord`, where the chunk is split into `n` tiles per axis.
pub fn tile_coord(config: &ValidatedConfig, zoom: i32, coord: ChunkCoord, n: i32, sx: i32, sz: i32) -> TileCoord {
    let x = coord.x * n + sx;
    let row = coord.z * n + sz;
    let y = if config.no_y_flip {
        row
    } else {
        config.map_size_z * n - 1 - row
    };
    TileCoord::new(zoom, x, y)
}

/// Every task for the chunk at `coord`, grouped by layer in configuration order.
pub fn generate_tasks<'a>(
    coord: ChunkCoord,
    config: &'a ValidatedConfig,
    graph: &DependencyGraph,
    backend: &dyn BackendStore,
) -> Vec<RenderTask<'a>> {
    let hash = chunk_hash(coord, graph);
    let data_rect = Rect::single(coord).padded(DATA_HALO);
    let chunk_zoom = config.chunk_zoom();

    let mut tasks = Vec::new();
    for (layer_index, layer) in config.layers.iter().enumerate() {
        let ext = layer.mode.extension();
        let base = RenderTask {
            layer,
            layer_index,
            kind: TaskKind::Render,
            chunk: coord,
            name: String::new(),
            hash,
            data_rect,
            view: None,
            dedupe_candidates: SmallVec::new(),
            feeds_mip: false,
        };

        let zooms = match layer.mode {
            LayerMode::ThreeD(_) | LayerMode::Minimap(_) | LayerMode::Interactions(_) => {
                chunk_zoom..=layer.native_zoom()
            }
            LayerMode::Map(_) => layer.native_zoom()..=layer.native_zoom(),
            LayerMode::RenderMeta => {
                tasks.push(RenderTask {
                    kind: TaskKind::RenderMeta,
                    name: backend.make_file_name(&layer.name, 0, coord.x, coord.z, ext),
                    ..base
                });
                continue;
            }
            LayerMode::Height | LayerMode::Collision | LayerMode::Locs | LayerMode::MapLabels => {
                tasks.push(RenderTask {
                    name: backend.make_file_name(&layer.name, 0, coord.x, coord.z, ext),
                    ..base
                });
                continue;
            }
        };

        for zoom in zooms.rev() {
            let n = 1 << (zoom - chunk_zoom);
            let span = (CHUNK_SQUARES / n) as f32;
            for sz in 0..n {
                for sx in 0..n {
                    let tile = tile_coord(config, zoom, coord, n, sx, sz);
                    let origin = Vec2::new(
                        (coord.x * CHUNK_SQUARES) as f32 + sx as f32 * span,
                        (coord.z * CHUNK_SQUARES) as f32 + sz as f32 * span,
                    );
                    let name = backend.make_file_name(&layer.name, zoom, tile.x, tile.y, ext);

                    let mut dedupe_candidates = SmallVec::new();
                    if layer.mode.oblique().is_some() {
                        dedupe_candidates.push(DedupeCandidate {
                            name: name.clone(),
                            layer_index,
                        });
                        for other in layer.subtract_layers.iter() {
                            if let Some(other_index) = config.layer_index(other) {
                                dedupe_candidates.push(DedupeCandidate {
                                    name: backend.make_file_name(other, zoom, tile.x, tile.y, ext),
                                    layer_index: other_index,
                                });
                            }
                        }
                    }

                    tasks.push(RenderTask {
                        name,
                        view: Some(TileView { tile, origin, span }),
                        dedupe_candidates,
                        feeds_mip: zoom == chunk_zoom,
                        ..base.clone()
                    });
                }
            }
        }
    }
    tasks
}

/// The name of the render meta artifact of chunk `coord`, if a render meta layer is configured.
pub fn render_meta_name(config: &ValidatedConfig, backend: &dyn BackendStore, coord: ChunkCoord) -> Option<String> {
    let layer = config.render_meta_layer()?;
    Some(backend.make_file_name(&layer.name, 0, coord.x, coord.z, layer.mode.extension()))
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
