mod area;

pub use area::parse_area;

use crate::run::RunConfig;

use mapforge_map::{MipMode, WorkingSetConfig};
use mapforge_core::{Rect, CHUNK_SQUARES, CHUNK_SQUARES_LOG2};
use serde::{Deserialize, Serialize};
use std::io;
use std::ops::Deref;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Parse(#[from] ron::error::SpannedError),
    #[error("tile image size {0} must be a power of two of at least 64")]
    TileImageSize(u32),
    #[error("map size must be positive, got {x}x{z}")]
    MapSize { x: i32, z: i32 },
    #[error("no layers configured")]
    NoLayers,
    #[error("duplicate layer name {0:?}")]
    DuplicateLayer(String),
    #[error("layer {layer:?}: {px_per_square} px per square is not a power of two")]
    PxPerSquare { layer: String, px_per_square: u32 },
    #[error("layer {layer:?}: a chunk at {px_per_square} px per square is smaller than one {tile_image_size}px tile")]
    TileLargerThanChunk {
        layer: String,
        px_per_square: u32,
        tile_image_size: u32,
    },
    #[error("layer {layer:?} subtracts {other:?}, which is not a 3d-style layer")]
    SubtractLayer { layer: String, other: String },
    #[error("more than one render meta layer")]
    MultipleRenderMeta,
    #[error("layer {layer:?}: level {level} is above 3")]
    Level { layer: String, level: u8 },
    #[error("invalid area {area:?}: {reason}")]
    Area { area: String, reason: String },
    #[error("min zoom {min_zoom} is above the chunk zoom {chunk_zoom}")]
    MinZoom { min_zoom: i32, chunk_zoom: i32 },
}

pub const MAX_LEVEL: u8 = 3;

/// Camera settings of the 3D-style layers.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ObliqueView {
    /// Squares of horizontal shift per square of height.
    pub dxdy: f32,
    /// Squares of vertical shift per square of height.
    pub dzdy: f32,
    pub hide_locs: bool,
    pub overlay_walls: bool,
    pub overlay_icons: bool,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct MapStyle {
    pub walls_only: bool,
    pub map_icons: bool,
    pub thick_lines: bool,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub enum LayerMode {
    ThreeD(ObliqueView),
    Minimap(ObliqueView),
    Interactions(ObliqueView),
    Map(MapStyle),
    Height,
    Collision,
    Locs,
    MapLabels,
    RenderMeta,
}

impl LayerMode {
    pub fn oblique(&self) -> Option<&ObliqueView> {
        match self {
            LayerMode::ThreeD(view) | LayerMode::Minimap(view) | LayerMode::Interactions(view) => {
                Some(view)
            }
            _ => None,
        }
    }

    /// Tiled layers are cut into image tiles and get a mip pyramid. The rest produce one file per chunk.
    pub fn is_tiled(&self) -> bool {
        self.oblique().is_some() || matches!(self, LayerMode::Map(_))
    }

    pub fn extension(&self) -> &'static str {
        match self {
            LayerMode::Height | LayerMode::RenderMeta => "bin",
            LayerMode::Locs | LayerMode::MapLabels => "json",
            _ => "png",
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LayerConfig {
    pub name: String,
    pub mode: LayerMode,
    #[serde(default = "default_px_per_square")]
    pub px_per_square: u32,
    /// The highest floor level drawn.
    #[serde(default)]
    pub level: u8,
    /// Layers whose tiles this layer may alias when they look the same.
    #[serde(default)]
    pub subtract_layers: Vec<String>,
    #[serde(default)]
    pub mip_mode: MipMode,
}

fn default_px_per_square() -> u32 {
    1
}

impl LayerConfig {
    /// The zoom level at which one pixel covers one `px_per_square`th of a square.
    pub fn native_zoom(&self) -> i32 {
        self.px_per_square.trailing_zeros() as i32
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MapConfig {
    /// Edge length of every image tile, in pixels.
    pub tile_image_size: u32,
    /// Size of the world, in chunks.
    pub map_size_x: i32,
    pub map_size_z: i32,
    #[serde(default = "default_area")]
    pub area: String,
    #[serde(default)]
    pub no_y_flip: bool,
    /// Lowest zoom level of the mip pyramid.
    #[serde(default)]
    pub min_zoom: Option<i32>,
    pub layers: Vec<LayerConfig>,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub working_set: WorkingSetConfig,
}

fn default_area() -> String {
    "full".into()
}

impl MapConfig {
    pub fn from_ron_str(s: &str) -> Result<Self, ConfigError> {
        Ok(ron::from_str(s)?)
    }

    pub fn validate(self) -> Result<ValidatedConfig, ConfigError> {
        let tile_image_size = self.tile_image_size;
        if !tile_image_size.is_power_of_two() || tile_image_size < CHUNK_SQUARES as u32 {
            return Err(ConfigError::TileImageSize(tile_image_size));
        }
        if self.map_size_x <= 0 || self.map_size_z <= 0 {
            return Err(ConfigError::MapSize {
                x: self.map_size_x,
                z: self.map_size_z,
            });
        }
        if self.layers.is_empty() {
            return Err(ConfigError::NoLayers);
        }

        let chunk_zoom = tile_image_size.trailing_zeros() as i32 - CHUNK_SQUARES_LOG2 as i32;
        let mut render_meta_layers = 0;
        for (i, layer) in self.layers.iter().enumerate() {
            if self.layers[..i].iter().any(|l| l.name == layer.name) {
                return Err(ConfigError::DuplicateLayer(layer.name.clone()));
            }
            if !layer.px_per_square.is_power_of_two() {
                return Err(ConfigError::PxPerSquare {
                    layer: layer.name.clone(),
                    px_per_square: layer.px_per_square,
                });
            }
            if layer.mode.is_tiled() && layer.native_zoom() < chunk_zoom {
                return Err(ConfigError::TileLargerThanChunk {
                    layer: layer.name.clone(),
                    px_per_square: layer.px_per_square,
                    tile_image_size,
                });
            }
            if layer.level > MAX_LEVEL {
                return Err(ConfigError::Level {
                    layer: layer.name.clone(),
                    level: layer.level,
                });
            }
            for other in layer.subtract_layers.iter() {
                let valid = self
                    .layers
                    .iter()
                    .any(|l| &l.name == other && l.mode.oblique().is_some());
                if !valid {
                    return Err(ConfigError::SubtractLayer {
                        layer: layer.name.clone(),
                        other: other.clone(),
                    });
                }
            }
            if layer.mode == LayerMode::RenderMeta {
                render_meta_layers += 1;
            }
        }
        if render_meta_layers > 1 {
            return Err(ConfigError::MultipleRenderMeta);
        }

        let min_zoom = match self.min_zoom {
            Some(min_zoom) => min_zoom,
            None => {
                let largest = self.map_size_x.max(self.map_size_z) as f64 * CHUNK_SQUARES as f64;
                (f64::from(tile_image_size) / largest).log2().floor() as i32
            }
        };
        if min_zoom > chunk_zoom {
            return Err(ConfigError::MinZoom {
                min_zoom,
                chunk_zoom,
            });
        }

        let area = parse_area(&self.area, self.map_size_x, self.map_size_z).map_err(|reason| {
            ConfigError::Area {
                area: self.area.clone(),
                reason,
            }
        })?;

        Ok(ValidatedConfig {
            config: self,
            chunk_zoom,
            min_zoom,
            area,
        })
    }
}

/// A [`MapConfig`] that passed validation. Render passes only accept this type, so a configuration error can never
/// surface in the middle of a run.
#[derive(Clone, Debug)]
pub struct ValidatedConfig {
    config: MapConfig,
    chunk_zoom: i32,
    min_zoom: i32,
    area: Vec<Rect>,
}

impl ValidatedConfig {
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let reader = std::fs::File::open(path)?;
        let config: MapConfig = ron::de::from_reader(reader)?;
        config.validate()
    }

    /// The zoom level at which one tile covers exactly one chunk.
    pub fn chunk_zoom(&self) -> i32 {
        self.chunk_zoom
    }

    pub fn min_zoom(&self) -> i32 {
        self.min_zoom
    }

    /// The regions named by [`MapConfig::area`].
    pub fn area(&self) -> &[Rect] {
        &self.area
    }

    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.config.layers.iter().position(|l| l.name == name)
    }

    pub fn render_meta_layer(&self) -> Option<&LayerConfig> {
        self.config
            .layers
            .iter()
            .find(|l| l.mode == LayerMode::RenderMeta)
    }

    pub fn into_inner(self) -> MapConfig {
        self.config
    }
}

impl Deref for ValidatedConfig {
    type Target = MapConfig;

    fn deref(&self) -> &MapConfig {
        &self.config
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
