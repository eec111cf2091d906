//! # Chunk Working-Set Cache
//!
//! Holds the chunks needed by the tasks in flight, plus a bounded tail of recently loaded chunks that neighboring tasks are
//! likely to ask for again. Recency is the creation order of an entry, not the time of its last access, because the run
//! controller walks the map in a spatially local order.
//!
//! A chunk that fails to load reads as absent until it is discarded. Once a coordinate has failed as many loads as the
//! set allows, it is never loaded again.

use crate::dependency::DependencyGraph;
use crate::render_meta::ChunkRenderMeta;
use crate::usage::DependencyUsage;

use async_trait::async_trait;
use futures::future::join_all;
use mapforge_core::{ChunkCoord, Rect, SmallKeyHashMap};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Decodes world data into drawable chunks.
#[async_trait(?Send)]
pub trait ChunkLoader {
    /// Whatever geometry the layer renderer needs.
    type Chunk;

    /// Returns `None` for coordinates with no world data.
    async fn load(&self, coord: ChunkCoord) -> anyhow::Result<Option<LoadedChunk<Self::Chunk>>>;

    /// Called when an entry leaves the working set so renderer-side resources can be freed.
    fn release(&self, _coord: ChunkCoord, _chunk: LoadedChunk<Self::Chunk>) {}
}

pub struct LoadedChunk<C> {
    pub data: C,
    pub usage: DependencyUsage,
}

#[derive(Debug, Error)]
#[error("failed to load chunk {coord}: {cause:#}")]
pub struct LoadError {
    pub coord: ChunkCoord,
    pub cause: anyhow::Error,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkingSetConfig {
    /// The number of unused entries kept after an eviction.
    pub min_unused: usize,
    /// The number of unused entries that triggers an eviction.
    pub max_unused: usize,
}

impl Default for WorkingSetConfig {
    fn default() -> Self {
        Self {
            min_unused: 5,
            max_unused: 10,
        }
    }
}

pub struct LoadedEntry<C> {
    pub chunk: LoadedChunk<C>,
    pub render_meta: ChunkRenderMeta,
}

enum EntryState<C> {
    Pending,
    /// `None` if the loader found nothing at this coordinate.
    Loaded(Option<LoadedEntry<C>>),
    /// The cause is taken by the first [`ChunkWorkingSet::take_load_error`].
    Failed(Option<anyhow::Error>),
}

pub struct WorkingSetEntry<C> {
    pub coord: ChunkCoord,
    /// Strictly increasing in creation order.
    pub id: u64,
    state: EntryState<C>,
}

impl<C> WorkingSetEntry<C> {
    pub fn is_pending(&self) -> bool {
        matches!(self.state, EntryState::Pending)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.state, EntryState::Failed(_))
    }

    pub fn loaded(&self) -> Option<&LoadedEntry<C>> {
        match &self.state {
            EntryState::Loaded(loaded) => loaded.as_ref(),
            EntryState::Pending | EntryState::Failed(_) => None,
        }
    }
}

pub struct ChunkWorkingSet<'a, L: ChunkLoader> {
    loader: &'a L,
    graph: Arc<DependencyGraph>,
    build_version: u32,
    config: WorkingSetConfig,
    entries: SmallKeyHashMap<ChunkCoord, WorkingSetEntry<L::Chunk>>,
    next_id: u64,
    failed_loads: SmallKeyHashMap<ChunkCoord, u32>,
    max_load_attempts: u32,
}

impl<'a, L: ChunkLoader> ChunkWorkingSet<'a, L> {
    pub fn new(
        loader: &'a L,
        graph: Arc<DependencyGraph>,
        build_version: u32,
        config: WorkingSetConfig,
    ) -> Self {
        Self {
            loader,
            graph,
            build_version,
            config,
            entries: Default::default(),
            next_id: 0,
            failed_loads: Default::default(),
            max_load_attempts: u32::MAX,
        }
    }

    /// Stops loading a coordinate after it has failed `attempts` loads.
    pub fn with_max_load_attempts(mut self, attempts: u32) -> Self {
        self.max_load_attempts = attempts.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        self.entries.contains_key(&coord)
    }

    /// Returns the entry at `coord`, creating a pending one if it doesn't exist yet. Pending entries are loaded by the next
    /// [`Self::set_area`] that covers them.
    pub fn get(&mut self, coord: ChunkCoord) -> &WorkingSetEntry<L::Chunk> {
        self.entry_mut(coord)
    }

    /// How many loads of `coord` have failed so far. Discarding the entry does not reset this.
    pub fn failed_loads(&self, coord: ChunkCoord) -> u32 {
        self.failed_loads.get(&coord).copied().unwrap_or(0)
    }

    pub fn is_exhausted(&self, coord: ChunkCoord) -> bool {
        self.failed_loads(coord) >= self.max_load_attempts
    }

    /// The error that made `coord` fail, if its entry is failed.
    pub fn take_load_error(&mut self, coord: ChunkCoord) -> Option<LoadError> {
        let failed_loads = self.failed_loads(coord);
        match &mut self.entries.get_mut(&coord)?.state {
            EntryState::Failed(cause) => Some(LoadError {
                coord,
                cause: cause
                    .take()
                    .unwrap_or_else(|| anyhow::anyhow!("gave up after {} failed loads", failed_loads)),
            }),
            EntryState::Pending | EntryState::Loaded(_) => None,
        }
    }

    fn entry_mut(&mut self, coord: ChunkCoord) -> &mut WorkingSetEntry<L::Chunk> {
        let next_id = &mut self.next_id;
        self.entries.entry(coord).or_insert_with(|| {
            let id = *next_id;
            *next_id += 1;
            WorkingSetEntry {
                coord,
                id,
                state: EntryState::Pending,
            }
        })
    }

    /// Loads every chunk in `rect`, then evicts unused entries if there are too many.
    ///
    /// Chunks that fail to load are marked failed and read as absent in the returned area. Use
    /// [`Self::take_load_error`] to find out whether a chunk that must be present failed.
    pub async fn set_area(&mut self, rect: Rect) -> LoadedArea<'_, L::Chunk> {
        let mut pending = Vec::new();
        for coord in rect.iter() {
            let exhausted = self.is_exhausted(coord);
            let entry = self.entry_mut(coord);
            if entry.is_pending() {
                if exhausted {
                    entry.state = EntryState::Failed(None);
                } else {
                    pending.push(coord);
                }
            }
        }

        let loader = self.loader;
        let results = join_all(
            pending
                .into_iter()
                .map(|coord| async move { (coord, loader.load(coord).await) }),
        )
        .await;

        for (coord, result) in results {
            match result {
                Ok(chunk) => {
                    let loaded = chunk.map(|chunk| {
                        let render_meta = ChunkRenderMeta::from_usage(
                            coord,
                            self.build_version,
                            &chunk.usage,
                            &self.graph,
                        );
                        LoadedEntry { chunk, render_meta }
                    });
                    if let Some(entry) = self.entries.get_mut(&coord) {
                        entry.state = EntryState::Loaded(loaded);
                    }
                }
                Err(cause) => {
                    let failures = self.failed_loads.entry(coord).or_default();
                    *failures += 1;
                    log::debug!("failed to load chunk {} ({} failures): {:#}", coord, failures, cause);
                    if let Some(entry) = self.entries.get_mut(&coord) {
                        entry.state = EntryState::Failed(Some(cause));
                    }
                }
            }
        }

        self.evict_unused(rect);

        self.area(rect)
    }

    /// A view of the loaded entries in `rect`. Coordinates that are absent or still pending have no chunk.
    pub fn area(&self, rect: Rect) -> LoadedArea<'_, L::Chunk> {
        LoadedArea {
            rect,
            entries: rect
                .iter()
                .map(|coord| (coord, self.entries.get(&coord).and_then(|e| e.loaded())))
                .collect(),
        }
    }

    /// Forgets every entry in `rect` so it will be loaded again from scratch.
    pub fn discard(&mut self, rect: Rect) {
        for coord in rect.iter() {
            self.remove_entry(coord);
        }
    }

    fn evict_unused(&mut self, in_use: Rect) {
        let mut unused: Vec<_> = self
            .entries
            .values()
            .filter(|e| !in_use.contains(e.coord))
            .map(|e| (e.id, e.coord))
            .collect();
        if unused.len() < self.config.max_unused {
            return;
        }

        unused.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        let evicted = unused.len().saturating_sub(self.config.min_unused);
        log::debug!("evicting {} unused chunks", evicted);
        for (_, coord) in unused.into_iter().skip(self.config.min_unused) {
            self.remove_entry(coord);
        }
    }

    fn remove_entry(&mut self, coord: ChunkCoord) {
        if let Some(entry) = self.entries.remove(&coord) {
            if let EntryState::Loaded(Some(loaded)) = entry.state {
                self.loader.release(coord, loaded.chunk);
            }
        }
    }
}

pub struct LoadedArea<'a, C> {
    rect: Rect,
    entries: Vec<(ChunkCoord, Option<&'a LoadedEntry<C>>)>,
}

impl<'a, C> LoadedArea<'a, C> {
    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn entry(&self, coord: ChunkCoord) -> Option<&'a LoadedEntry<C>> {
        self.entries
            .iter()
            .find(|(c, _)| *c == coord)
            .and_then(|(_, e)| *e)
    }

    pub fn chunk(&self, coord: ChunkCoord) -> Option<&'a LoadedChunk<C>> {
        self.entry(coord).map(|e| &e.chunk)
    }

    pub fn render_meta(&self, coord: ChunkCoord) -> Option<&'a ChunkRenderMeta> {
        self.entry(coord).map(|e| &e.render_meta)
    }

    /// Every coordinate of the area in row-major order, with its chunk if one was loaded.
    pub fn chunks(&self) -> impl Iterator<Item = (ChunkCoord, Option<&'a LoadedChunk<C>>)> + '_ {
        self.entries
            .iter()
            .map(|(coord, entry)| (*coord, entry.map(|e| &e.chunk)))
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
