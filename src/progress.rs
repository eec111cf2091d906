use mapforge_core::ChunkCoord;

/// Lifecycle of a chunk during a render pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TileStatus {
    Queued,
    Loading,
    Rendering,
    Saving,
    Done,
    /// Retries were used up.
    Skipped,
}

/// Receives per-chunk status updates. Closures implement this trait.
pub trait ProgressSink {
    fn update(&mut self, coord: ChunkCoord, status: TileStatus);
}

impl<F> ProgressSink for F
where
    F: FnMut(ChunkCoord, TileStatus),
{
    fn update(&mut self, coord: ChunkCoord, status: TileStatus) {
        self(coord, status)
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _coord: ChunkCoord, _status: TileStatus) {}
}
