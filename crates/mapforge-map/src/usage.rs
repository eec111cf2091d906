use mapforge_core::{crc32_add_i32, SQUARE_WORLD_UNITS};

use rkyv::{Archive, Deserialize, Serialize};

/// Axis-aligned box in world units.
#[derive(Archive, Clone, Copy, Debug, Default, Deserialize, PartialEq, Serialize)]
#[archive(check_bytes)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl BoundingBox {
    pub fn new(min: [f32; 3], max: [f32; 3]) -> Self {
        Self { min, max }
    }

    /// The box spanning `size` squares from square `(x, z)` and `0..max_y` world units high.
    pub fn from_squares(x: i32, z: i32, size: i32, max_y: i32) -> Self {
        let unit = SQUARE_WORLD_UNITS as f32;
        let (x0, z0) = (x as f32 * unit, z as f32 * unit);
        let extent = size as f32 * unit;
        Self::new([x0, 0.0, z0], [x0 + extent, max_y as f32, z0 + extent])
    }

    pub fn corners(&self) -> [[f32; 3]; 8] {
        let [x0, y0, z0] = self.min;
        let [x1, y1, z1] = self.max;
        [
            [x0, y0, z0],
            [x0, y0, z1],
            [x0, y1, z0],
            [x0, y1, z1],
            [x1, y0, z0],
            [x1, y0, z1],
            [x1, y1, z0],
            [x1, y1, z1],
        ]
    }
}

/// Everything a chunk loader drew for one chunk, as reported alongside its geometry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DependencyUsage {
    pub floor: Vec<FloorTileGroup>,
    pub locs: Vec<PlacedLoc>,
}

/// A square group of floor tiles (usually 2x2). Coordinates are absolute, in squares.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FloorTileGroup {
    pub x: i32,
    pub z: i32,
    pub size: i32,
    /// Highest floor vertex in world units.
    pub max_y: i32,
    /// Hash of the tile settings at each level, lowest level first.
    pub tile_hashes: Vec<u32>,
    pub overlays: Vec<i32>,
    pub underlays: Vec<i32>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlacedLoc {
    pub id: i32,
    pub plane: u8,
    pub x: i32,
    pub z: i32,
    pub rotation: u8,
    pub kind: u8,
    /// The level filter below which this instance is visible.
    pub visual_level: u8,
    pub placement_hash: u32,
    pub bounds: BoundingBox,
}

/// Hash of where and how a loc is placed, excluding what the loc looks like.
///
/// `extra` carries any placement overrides (scale, translation, rotation) the world data attaches to the instance.
pub fn placement_hash(x: i32, z: i32, plane: u8, rotation: u8, kind: u8, extra: &[i32]) -> u32 {
    let mut hash = 0;
    for value in [x, z, i32::from(plane), i32::from(rotation), i32::from(kind)]
        .into_iter()
        .chain(extra.iter().copied())
    {
        hash = crc32_add_i32(value, hash);
    }
    hash
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
