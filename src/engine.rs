//! # Dedup/Execution Engine
//!
//! Resolves the tasks of one chunk into backend writes. Each task ends up in one of three states:
//!
//! - **aliased** because the backend already holds the same name with the same hash,
//! - **aliased** because a candidate from this run or a recent build is visually identical from the task's camera,
//! - **stored** with freshly rendered bytes.
//!
//! A task that fails to render or save is dropped without affecting its siblings.

use crate::config::ValidatedConfig;
use crate::error::ChunkError;
use crate::mip::{MipChild, MipScheduler};
use crate::progress::{ProgressSink, TileStatus};
use crate::renderer::LayerRenderer;
use crate::task::{render_meta_name, DedupeCandidate, RenderTask, TaskKind, DATA_HALO};

use futures::stream::{self, StreamExt};
use mapforge_core::glam::Mat4;
use mapforge_core::{ChunkCoord, Rect, SmallKeyHashMap};
use mapforge_map::{
    compare_floor_deps, compare_loc_deps, BackendStore, BuildVersion, ChunkRenderMeta, ImageDiffGrid, KnownMapFile,
    LoadedArea, SymlinkCommand,
};
use std::cell::RefCell;
use std::rc::Rc;

/// An artifact written earlier in this run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LocalFile {
    pub hash: u32,
    pub fs_hash: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ChunkReport {
    pub written: usize,
    pub aliased: usize,
    pub failed: usize,
}

enum TaskOutput {
    Alias { command: SymlinkCommand, fs_hash: u32 },
    Bytes(Vec<u8>),
    Failed,
}

type MetaCache = SmallKeyHashMap<(BuildVersion, ChunkCoord), Option<Rc<ChunkRenderMeta>>>;

pub struct ExecutionEngine<'a, C> {
    config: &'a ValidatedConfig,
    backend: &'a dyn BackendStore,
    renderer: &'a dyn LayerRenderer<C>,
    /// Older builds searched for visually identical artifacts, nearest first.
    history: Vec<BuildVersion>,
    local_files: SmallKeyHashMap<String, LocalFile>,
    history_metas: RefCell<MetaCache>,
}

impl<'a, C> ExecutionEngine<'a, C> {
    pub fn new(
        config: &'a ValidatedConfig,
        backend: &'a dyn BackendStore,
        renderer: &'a dyn LayerRenderer<C>,
        history: Vec<BuildVersion>,
    ) -> Self {
        Self {
            config,
            backend,
            renderer,
            history,
            local_files: Default::default(),
            history_metas: Default::default(),
        }
    }

    pub fn history(&self) -> &[BuildVersion] {
        &self.history
    }

    pub fn local_file(&self, name: &str) -> Option<LocalFile> {
        self.local_files.get(name).copied()
    }

    /// Resolves every task of the chunk at `coord`, one layer at a time in configuration order. Tiles that feed the
    /// mip pyramid are handed to `mips` once the whole chunk is done.
    ///
    /// Only a failed metadata lookup fails the chunk. Failures of single tasks are counted in the report.
    pub async fn process_chunk(
        &mut self,
        coord: ChunkCoord,
        tasks: &[RenderTask<'_>],
        area: &LoadedArea<'_, C>,
        mips: &mut MipScheduler<'_>,
        progress: &mut dyn ProgressSink,
    ) -> Result<ChunkReport, ChunkError> {
        let mut report = ChunkReport::default();
        if tasks.is_empty() {
            return Ok(report);
        }
        self.forget_distant_metas(coord);

        let files: Vec<_> = tasks.iter().map(RenderTask::unique_file).collect();
        let known: SmallKeyHashMap<String, KnownMapFile> = self
            .backend
            .get_metas(&files)
            .await?
            .into_iter()
            .map(|k| (k.name.clone(), k))
            .collect();

        progress.update(coord, TileStatus::Rendering);
        let mut mip_children = Vec::new();
        for group in tasks.chunk_by(|a, b| a.layer_index == b.layer_index) {
            let outputs = self.resolve_group(group, area, &known).await;

            progress.update(coord, TileStatus::Saving);
            for (task, fs_hash) in self.persist_group(group, outputs, &mut report).await {
                self.local_files.insert(
                    task.name.clone(),
                    LocalFile {
                        hash: task.hash,
                        fs_hash,
                    },
                );
                match task.view {
                    Some(view) if task.feeds_mip => {
                        mip_children.push((task.layer_index, view.tile, task.name.clone(), task.hash, fs_hash));
                    }
                    _ => {}
                }
            }
        }

        for (layer_index, tile, name, hash, fs_hash) in mip_children {
            mips.add_child(layer_index, tile, MipChild { name, hash, fs_hash });
        }
        Ok(report)
    }

    async fn resolve_group(
        &self,
        group: &[RenderTask<'_>],
        area: &LoadedArea<'_, C>,
        known: &SmallKeyHashMap<String, KnownMapFile>,
    ) -> Vec<TaskOutput> {
        let mut outputs: Vec<_> = stream::iter(group.iter().enumerate())
            .map(|(i, task)| async move { (i, self.resolve(task, area, known).await) })
            .buffer_unordered(self.config.run.max_concurrent_requests.max(1))
            .collect()
            .await;
        outputs.sort_unstable_by_key(|(i, _)| *i);
        outputs.into_iter().map(|(_, output)| output).collect()
    }

    async fn resolve(
        &self,
        task: &RenderTask<'_>,
        area: &LoadedArea<'_, C>,
        known: &SmallKeyHashMap<String, KnownMapFile>,
    ) -> TaskOutput {
        if let Some(old) = known.get(&task.name).filter(|k| k.hash == task.hash) {
            return TaskOutput::Alias {
                command: SymlinkCommand::to_known(task.name.clone(), task.hash, old),
                fs_hash: old.fs_hash,
            };
        }

        match task.kind {
            TaskKind::RenderMeta => match area.render_meta(task.chunk).map(ChunkRenderMeta::encode) {
                Some(Ok(bytes)) => TaskOutput::Bytes(bytes),
                Some(Err(e)) => {
                    log::warn!("failed to encode {}: {}", task.name, e);
                    TaskOutput::Failed
                }
                None => TaskOutput::Failed,
            },
            TaskKind::Render => {
                if let Some(target) = self.find_equivalent(task, area).await {
                    log::debug!(
                        "{} looks the same as {} at version {}",
                        task.name,
                        target.stored_path,
                        target.build_version
                    );
                    return TaskOutput::Alias {
                        command: SymlinkCommand::to_known(task.name.clone(), task.hash, &target),
                        fs_hash: target.fs_hash,
                    };
                }
                match self.renderer.render(task, area).await {
                    Ok(bytes) => TaskOutput::Bytes(bytes),
                    Err(e) => {
                        log::warn!("failed to render {}: {:#}", task.name, e);
                        TaskOutput::Failed
                    }
                }
            }
        }
    }

    /// Writes one layer's outputs: every alias in a single batch, then the new files concurrently. Returns the tasks that
    /// made it into the backend, with the hash of their stored bytes.
    async fn persist_group<'t, 'l>(
        &self,
        group: &'t [RenderTask<'l>],
        outputs: Vec<TaskOutput>,
        report: &mut ChunkReport,
    ) -> Vec<(&'t RenderTask<'l>, u32)> {
        let mut done = Vec::new();
        let mut aliases = Vec::new();
        let mut writes = Vec::new();
        for (task, output) in group.iter().zip(outputs) {
            match output {
                TaskOutput::Alias { command, fs_hash } => aliases.push((task, command, fs_hash)),
                TaskOutput::Bytes(bytes) => writes.push((task, bytes)),
                TaskOutput::Failed => report.failed += 1,
            }
        }

        if !aliases.is_empty() {
            let commands: Vec<_> = aliases.iter().map(|(_, c, _)| c.clone()).collect();
            match self.backend.symlink_batch(&commands).await {
                Ok(()) => {
                    report.aliased += aliases.len();
                    done.extend(aliases.into_iter().map(|(task, _, fs_hash)| (task, fs_hash)));
                }
                Err(e) => {
                    log::warn!("failed to alias {} files: {}", commands.len(), e);
                    report.failed += commands.len();
                }
            }
        }

        let backend = self.backend;
        let saved: Vec<_> = stream::iter(writes)
            .map(|(task, bytes)| async move { (task, backend.save_file(&task.name, task.hash, &bytes).await) })
            .buffer_unordered(self.config.run.max_concurrent_requests.max(1))
            .collect()
            .await;
        for (task, result) in saved {
            match result {
                Ok(()) => {
                    report.written += 1;
                    done.push((task, task.hash));
                }
                Err(e) => {
                    log::warn!("failed to save {}: {}", task.name, e);
                    report.failed += 1;
                }
            }
        }
        done
    }

    /// Searches this run's files, then the history, for a candidate that renders the same as `task`.
    async fn find_equivalent(&self, task: &RenderTask<'_>, area: &LoadedArea<'_, C>) -> Option<KnownMapFile> {
        let projection = task.projection()?;
        let version = self.backend.version();

        for candidate in task.dedupe_candidates.iter() {
            let local = match self.local_files.get(&candidate.name) {
                Some(local) => *local,
                None => continue,
            };
            let level = self.level_of(candidate);
            let same = diff_is_empty(&projection, task.data_rect, |coord| {
                let meta = area.render_meta(coord);
                (meta, meta, usize::from(task.layer.level), level)
            });
            if same {
                return Some(KnownMapFile {
                    name: candidate.name.clone(),
                    hash: local.hash,
                    fs_hash: local.fs_hash,
                    stored_path: candidate.name.clone(),
                    build_version: version,
                    first_build_version: version,
                });
            }
        }

        if self.history.is_empty() || task.dedupe_candidates.is_empty() {
            return None;
        }
        let names: Vec<_> = task.dedupe_candidates.iter().map(|c| c.name.clone()).collect();
        let mut related = match self.backend.get_related_files(&names, &self.history).await {
            Ok(related) => related,
            Err(e) => {
                log::warn!("dedupe lookup for {} failed: {}", task.name, e);
                return None;
            }
        };
        related.sort_by_key(|r| std::cmp::Reverse(r.build_version));

        for old in related {
            let candidate = match task.dedupe_candidates.iter().find(|c| c.name == old.name) {
                Some(candidate) => candidate,
                None => continue,
            };
            if candidate.layer_index == task.layer_index && old.hash == task.hash {
                return Some(old);
            }
            if self.same_as_history(task, area, &projection, candidate, old.build_version).await {
                return Some(old);
            }
        }
        None
    }

    async fn same_as_history(
        &self,
        task: &RenderTask<'_>,
        area: &LoadedArea<'_, C>,
        projection: &Mat4,
        candidate: &DedupeCandidate,
        version: BuildVersion,
    ) -> bool {
        let mut old_metas = Vec::with_capacity(task.data_rect.area());
        for coord in task.data_rect.iter() {
            match self.history_meta(coord, version).await {
                Ok(meta) => old_metas.push((coord, meta)),
                Err(e) => {
                    log::debug!("no render meta for {} at version {}: {:#}", coord, version, e);
                    return false;
                }
            }
        }

        let level = self.level_of(candidate);
        diff_is_empty(projection, task.data_rect, |coord| {
            let old = old_metas
                .iter()
                .find(|(c, _)| *c == coord)
                .and_then(|(_, meta)| meta.as_deref());
            (area.render_meta(coord), old, usize::from(task.layer.level), level)
        })
    }

    fn level_of(&self, candidate: &DedupeCandidate) -> usize {
        self.config.layers[candidate.layer_index].level.into()
    }

    /// The render meta of `coord` as stored for `version`. `None` means the chunk had no meta in that build.
    async fn history_meta(&self, coord: ChunkCoord, version: BuildVersion) -> anyhow::Result<Option<Rc<ChunkRenderMeta>>> {
        if let Some(cached) = self.history_metas.borrow().get(&(version, coord)) {
            return Ok(cached.clone());
        }
        let name = render_meta_name(self.config, self.backend, coord)
            .ok_or_else(|| anyhow::anyhow!("no render meta layer configured"))?;
        let meta = match self.backend.get_file(&name, version).await? {
            Some(bytes) => Some(Rc::new(ChunkRenderMeta::decode(&bytes)?)),
            None => None,
        };
        self.history_metas
            .borrow_mut()
            .insert((version, coord), meta.clone());
        Ok(meta)
    }

    fn forget_distant_metas(&self, coord: ChunkCoord) {
        let keep = Rect::single(coord).padded(DATA_HALO + self.config.run.zigzag_band);
        self.history_metas
            .borrow_mut()
            .retain(|(_, c), _| keep.contains(*c));
    }
}

/// True if no difference between the metas of any chunk in `rect` lands on screen. `metas` returns both sides of a
/// chunk with the level each side is drawn up to. A chunk that exists on only one side always differs.
fn diff_is_empty<'m>(
    projection: &Mat4,
    rect: Rect,
    metas: impl Fn(ChunkCoord) -> (Option<&'m ChunkRenderMeta>, Option<&'m ChunkRenderMeta>, usize, usize),
) -> bool {
    let mut grid = ImageDiffGrid::default();
    for coord in rect.iter() {
        match metas(coord) {
            (None, None, _, _) => {}
            (Some(a), Some(b), level_a, level_b) => {
                let mut boxes = compare_floor_deps(&a.floor, &b.floor, level_a, level_b);
                boxes.extend(compare_loc_deps(&a.locs, &b.locs, level_a, level_b));
                if !ImageDiffGrid::any_inside(projection, &boxes) {
                    continue;
                }
                grid.add_boxes(projection, &boxes);
                if !grid.is_empty() {
                    log::trace!("chunk {} changes {:.1}% of the tile", coord, grid.coverage() * 100.0);
                    return false;
                }
            }
            _ => return false,
        }
    }
    true
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
