use crate::usage::BoundingBox;

use mapforge_core::glam::{Mat4, Vec2, Vec3, Vec4};
use mapforge_core::SQUARE_WORLD_UNITS;

pub const DIFF_GRID_SIZE: usize = 64;

/// Coarse coverage mask of an output image in normalized device coordinates.
///
/// Each box is projected and its screen-space bounding rectangle is rasterized onto a `64x64` grid. This overestimates the
/// covered area, which is the safe direction for deciding whether two renders might differ.
pub struct ImageDiffGrid {
    cells: Vec<bool>,
}

impl Default for ImageDiffGrid {
    fn default() -> Self {
        Self {
            cells: vec![false; DIFF_GRID_SIZE * DIFF_GRID_SIZE],
        }
    }
}

impl ImageDiffGrid {
    pub fn add_boxes(&mut self, projection: &Mat4, boxes: &[BoundingBox]) {
        let size = DIFF_GRID_SIZE as f32;
        for b in boxes {
            let (min, max) = project_bounds(projection, b);
            let x1 = ((min.x + 1.0) / 2.0 * size).floor().max(0.0) as usize;
            let y1 = ((min.y + 1.0) / 2.0 * size).floor().max(0.0) as usize;
            let x2 = ((max.x + 1.0) / 2.0 * size).ceil().clamp(0.0, size) as usize;
            let y2 = ((max.y + 1.0) / 2.0 * size).ceil().clamp(0.0, size) as usize;
            for y in y1..y2 {
                for x in x1..x2 {
                    self.cells[x + y * DIFF_GRID_SIZE] = true;
                }
            }
        }
    }

    /// Fraction of the image covered, in `[0, 1]`.
    pub fn coverage(&self) -> f32 {
        let count = self.cells.iter().filter(|c| **c).count();
        count as f32 / self.cells.len() as f32
    }

    pub fn is_empty(&self) -> bool {
        !self.cells.iter().any(|c| *c)
    }

    /// True if any of `boxes` lands on screen, without rasterizing.
    pub fn any_inside(projection: &Mat4, boxes: &[BoundingBox]) -> bool {
        boxes.iter().any(|b| {
            let (min, max) = project_bounds(projection, b);
            min.x < 1.0 && max.x > -1.0 && min.y < 1.0 && max.y > -1.0
        })
    }
}

fn project_bounds(projection: &Mat4, b: &BoundingBox) -> (Vec3, Vec3) {
    let mut min = Vec3::splat(f32::INFINITY);
    let mut max = Vec3::splat(f32::NEG_INFINITY);
    for corner in b.corners() {
        let p = projection.project_point3(Vec3::from(corner));
        min = min.min(p);
        max = max.max(p);
    }
    (min, max)
}

/// Maps world units onto the NDC square of a tile whose lower corner is `origin` and whose edge is `span`, both in squares.
///
/// Height shears the image by `dxdy` squares along x and `dzdy` squares along z per square of height, which is how 3D-style
/// layers lay out their oblique camera.
pub fn oblique_projection(origin: Vec2, span: f32, dxdy: f32, dzdy: f32) -> Mat4 {
    let k = 2.0 / (span * SQUARE_WORLD_UNITS as f32);
    Mat4::from_cols(
        Vec4::new(k, 0.0, 0.0, 0.0),
        Vec4::new(k * dxdy, k * dzdy, 0.0, 0.0),
        Vec4::new(0.0, k, 0.0, 0.0),
        Vec4::new(
            -2.0 * origin.x / span - 1.0,
            -2.0 * origin.y / span - 1.0,
            0.0,
            1.0,
        ),
    )
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod tests {
    use super::*;

    use approx::assert_relative_eq;

    fn chunk_view(x: i32, z: i32) -> Mat4 {
        oblique_projection(Vec2::new(x as f32 * 64.0, z as f32 * 64.0), 64.0, 0.0, 0.0)
    }

    #[test]
    fn tile_corners_map_to_ndc_corners() {
        let projection = chunk_view(5, 5);
        let low = projection.project_point3(Vec3::new(320.0 * 512.0, 0.0, 320.0 * 512.0));
        let high = projection.project_point3(Vec3::new(384.0 * 512.0, 0.0, 384.0 * 512.0));
        assert_relative_eq!(low.x, -1.0);
        assert_relative_eq!(low.y, -1.0);
        assert_relative_eq!(high.x, 1.0);
        assert_relative_eq!(high.y, 1.0);
    }

    #[test]
    fn box_outside_view_has_zero_coverage() {
        let mut grid = ImageDiffGrid::default();
        let projection = chunk_view(5, 5);
        let far_away = BoundingBox::from_squares(500, 500, 2, 300);
        grid.add_boxes(&projection, &[far_away]);
        assert!(grid.is_empty());
        assert!(!ImageDiffGrid::any_inside(&projection, &[far_away]));
    }

    #[test]
    fn box_inside_view_covers_its_cells() {
        let mut grid = ImageDiffGrid::default();
        let projection = chunk_view(0, 0);
        // A quarter of the chunk.
        grid.add_boxes(&projection, &[BoundingBox::from_squares(0, 0, 32, 0)]);
        assert_relative_eq!(grid.coverage(), 0.25);
    }

    #[test]
    fn height_shears_into_view() {
        let projection = oblique_projection(Vec2::ZERO, 64.0, 0.0, 1.0);
        // Below the tile on the ground, but tall enough to be drawn into it.
        let tall = BoundingBox::new([512.0, 0.0, -10.0 * 512.0], [1024.0, 20.0 * 512.0, -9.0 * 512.0]);
        assert!(ImageDiffGrid::any_inside(&projection, &[tall]));
    }
}
