use static_assertions::const_assert;

/// Edge length of a chunk, in squares.
pub const CHUNK_SQUARES: i32 = 64;
/// Log2 of [`CHUNK_SQUARES`].
pub const CHUNK_SQUARES_LOG2: u32 = 6;
const_assert!(1 << CHUNK_SQUARES_LOG2 == CHUNK_SQUARES);

/// Edge length of one square in world units. Render metadata bounds are in world units.
pub const SQUARE_WORLD_UNITS: i32 = 512;

/// Stride between rows of mapsquare entity ids: `id = x + z * MAPSQUARE_ID_STRIDE`.
pub const MAPSQUARE_ID_STRIDE: i32 = 128;

/// The entity id of the mapsquare that holds chunk `(x, z)`.
pub const fn mapsquare_id(x: i32, z: i32) -> i32 {
    x + z * MAPSQUARE_ID_STRIDE
}
