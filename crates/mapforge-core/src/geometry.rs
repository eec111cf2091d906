use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer coordinates of a chunk on the chunk grid.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize)]
pub struct ChunkCoord {
    pub x: i32,
    pub z: i32,
}

impl ChunkCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.x, self.z)
    }
}

/// A rectangle of chunks. Both sizes are always positive.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Rect {
    pub x: i32,
    pub z: i32,
    pub xsize: i32,
    pub zsize: i32,
}

impl Rect {
    /// Returns `None` if either size is not positive.
    pub fn new(x: i32, z: i32, xsize: i32, zsize: i32) -> Option<Self> {
        (xsize > 0 && zsize > 0).then(|| Self { x, z, xsize, zsize })
    }

    pub fn single(coord: ChunkCoord) -> Self {
        Self {
            x: coord.x,
            z: coord.z,
            xsize: 1,
            zsize: 1,
        }
    }

    /// The smallest rectangle containing both (inclusive) corners.
    pub fn from_corners(a: ChunkCoord, b: ChunkCoord) -> Self {
        let (x0, x1) = (a.x.min(b.x), a.x.max(b.x));
        let (z0, z1) = (a.z.min(b.z), a.z.max(b.z));
        Self {
            x: x0,
            z: z0,
            xsize: x1 - x0 + 1,
            zsize: z1 - z0 + 1,
        }
    }

    /// Grows the rectangle by `halo` chunks on every side.
    pub fn padded(&self, halo: i32) -> Self {
        Self {
            x: self.x - halo,
            z: self.z - halo,
            xsize: self.xsize + 2 * halo,
            zsize: self.zsize + 2 * halo,
        }
    }

    pub fn area(&self) -> usize {
        self.xsize as usize * self.zsize as usize
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        coord.x >= self.x
            && coord.x < self.x + self.xsize
            && coord.z >= self.z
            && coord.z < self.z + self.zsize
    }

    /// Iterates rows of constant `z`, each from low to high `x`.
    pub fn iter(&self) -> impl Iterator<Item = ChunkCoord> {
        let Rect { x, z, xsize, zsize } = *self;
        (z..z + zsize).flat_map(move |cz| (x..x + xsize).map(move |cx| ChunkCoord::new(cx, cz)))
    }
}

/// Address of one output tile in the pyramid.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct TileCoord {
    pub zoom: i32,
    pub x: i32,
    pub y: i32,
}

impl TileCoord {
    pub const fn new(zoom: i32, x: i32, y: i32) -> Self {
        Self { zoom, x, y }
    }

    /// The tile one zoom level down that contains this one.
    pub fn parent(&self) -> Self {
        Self::new(self.zoom - 1, self.x.div_euclid(2), self.y.div_euclid(2))
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
