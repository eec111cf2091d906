//! # Run Controller
//!
//! Drives a render pass over a set of regions: chunk order, retries, periodic mip flushes, cancellation and the run
//! metadata artifact.

use crate::config::ValidatedConfig;
use crate::engine::{ChunkReport, ExecutionEngine};
use crate::error::ChunkError;
use crate::mip::{MipReport, MipScheduler};
use crate::progress::{NoProgress, ProgressSink, TileStatus};
use crate::renderer::LayerRenderer;
use crate::task::{generate_tasks, DATA_HALO};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use mapforge_core::{crc32, ChunkCoord, Rect};
use mapforge_map::{BackendStore, BuildVersion, ChunkLoader, ChunkWorkingSet, DependencyGraph};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    /// Extra attempts for a chunk after its first failure.
    pub max_retries: u32,
    /// Complete mip commands are built after every this many chunks.
    pub mip_flush_interval: usize,
    pub max_concurrent_requests: usize,
    pub mip_batch_size: usize,
    /// Height in chunks of the bands chunks are visited in.
    pub zigzag_band: i32,
    /// How many older builds are searched for visually identical tiles.
    pub dedupe_history_depth: usize,
    pub run_meta_name: String,
    /// A running run meta older than this is assumed to belong to a dead worker.
    pub stale_run_secs: i64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            mip_flush_interval: 20,
            max_concurrent_requests: 20,
            mip_batch_size: 200,
            zigzag_band: 4,
            dedupe_history_depth: 3,
            run_meta_name: "runmeta.ron".into(),
            stale_run_secs: 3600,
        }
    }
}

/// Asks a run to stop after the chunk it is working on.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn stop(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub worker_id: String,
    /// Run even if another worker seems to be rendering the same version.
    pub force: bool,
    pub stop: StopSignal,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            worker_id: "default".into(),
            force: false,
            stop: StopSignal::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// Chunks given up on after all retries, plus failed run meta writes.
    pub error_count: usize,
    pub artifacts_written: usize,
    pub artifacts_aliased: usize,
    pub tasks_failed: usize,
    pub chunks_processed: usize,
    pub stopped: bool,
    pub skipped_concurrent_run: bool,
}

impl RunSummary {
    fn add_chunk(&mut self, report: ChunkReport) {
        self.chunks_processed += 1;
        self.artifacts_written += report.written;
        self.artifacts_aliased += report.aliased;
        self.tasks_failed += report.failed;
    }

    fn add_mips(&mut self, report: MipReport) {
        self.artifacts_written += report.written;
        self.artifacts_aliased += report.aliased;
        self.tasks_failed += report.failed;
    }
}

/// Stored under [`RunConfig::run_meta_name`] at the start and end of every run.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RunMeta {
    pub running: bool,
    pub build_version: BuildVersion,
    pub worker_id: String,
    pub start_timestamp: DateTime<Utc>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub region: Vec<Rect>,
    pub error_count: usize,
}

impl RunMeta {
    /// True if this meta belongs to another worker that is still rendering `version`.
    pub fn blocks(&self, version: BuildVersion, worker_id: &str, now: DateTime<Utc>, stale_secs: i64) -> bool {
        self.running
            && self.build_version == version
            && self.worker_id != worker_id
            && (now - self.start_timestamp).num_seconds() < stale_secs
    }
}

/// Every chunk of `regions` once, in bands of `band` rows, each band column by column.
pub fn zigzag_order(regions: &[Rect], band: i32) -> Vec<ChunkCoord> {
    let band = band.max(1);
    regions
        .iter()
        .flat_map(Rect::iter)
        .sorted_by_key(|c| (c.z.div_euclid(band), c.x, c.z))
        .dedup()
        .collect()
}

pub struct RunController<'a, L: ChunkLoader> {
    config: &'a ValidatedConfig,
    graph: Arc<DependencyGraph>,
    backend: &'a dyn BackendStore,
    loader: &'a L,
    renderer: &'a dyn LayerRenderer<L::Chunk>,
    options: RunOptions,
}

impl<'a, L: ChunkLoader> RunController<'a, L> {
    pub fn new(
        config: &'a ValidatedConfig,
        graph: Arc<DependencyGraph>,
        backend: &'a dyn BackendStore,
        loader: &'a L,
        renderer: &'a dyn LayerRenderer<L::Chunk>,
    ) -> Self {
        Self {
            config,
            graph,
            backend,
            loader,
            renderer,
            options: RunOptions::default(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn run(&self, regions: &[Rect]) -> RunSummary {
        self.run_with_progress(regions, &mut NoProgress).await
    }

    /// Renders every chunk of `regions` into the backend's current version.
    pub async fn run_with_progress(&self, regions: &[Rect], progress: &mut dyn ProgressSink) -> RunSummary {
        let version = self.backend.version();
        let run_config = &self.config.run;
        let mut summary = RunSummary::default();

        let start = Utc::now();
        if !self.options.force {
            if let Some(other) = self.read_run_meta(version).await {
                if other.blocks(version, &self.options.worker_id, start, run_config.stale_run_secs) {
                    log::warn!(
                        "worker {} has been rendering version {} since {}, skipping",
                        other.worker_id,
                        version,
                        other.start_timestamp
                    );
                    summary.skipped_concurrent_run = true;
                    return summary;
                }
            }
        }

        let mut meta = RunMeta {
            running: true,
            build_version: version,
            worker_id: self.options.worker_id.clone(),
            start_timestamp: start,
            end_timestamp: None,
            region: regions.to_vec(),
            error_count: 0,
        };
        self.write_run_meta(&meta, &mut summary).await;

        let coords = zigzag_order(regions, run_config.zigzag_band);
        let history = self.history(version).await;
        log::info!(
            "rendering {} chunks at version {}, deduplicating against {:?}",
            coords.len(),
            version,
            history
        );

        let mut working_set = ChunkWorkingSet::new(self.loader, self.graph.clone(), version, self.config.working_set)
            .with_max_load_attempts(run_config.max_retries + 1);
        let mut engine = ExecutionEngine::new(self.config, self.backend, self.renderer, history);
        let mut mips = MipScheduler::new(self.config, self.backend);

        for &coord in coords.iter() {
            progress.update(coord, TileStatus::Queued);
        }
        let flush_interval = run_config.mip_flush_interval.max(1);
        for (i, &coord) in coords.iter().enumerate() {
            if self.options.stop.is_stopped() {
                log::info!("stopping after {} of {} chunks", i, coords.len());
                summary.stopped = true;
                break;
            }

            self.process_with_retries(coord, &mut working_set, &mut engine, &mut mips, progress, &mut summary)
                .await;

            if (i + 1) % flush_interval == 0 {
                summary.add_mips(mips.run(false).await);
            }
        }
        summary.add_mips(mips.run(true).await);

        meta.running = false;
        meta.end_timestamp = Some(Utc::now());
        meta.error_count = summary.error_count;
        self.write_run_meta(&meta, &mut summary).await;

        log::info!(
            "finished version {}: {} chunks, {} written, {} aliased, {} failed tasks, {} errors",
            version,
            summary.chunks_processed,
            summary.artifacts_written,
            summary.artifacts_aliased,
            summary.tasks_failed,
            summary.error_count
        );
        summary
    }

    async fn process_with_retries(
        &self,
        coord: ChunkCoord,
        working_set: &mut ChunkWorkingSet<'a, L>,
        engine: &mut ExecutionEngine<'a, L::Chunk>,
        mips: &mut MipScheduler<'a>,
        progress: &mut dyn ProgressSink,
        summary: &mut RunSummary,
    ) {
        // Loads that failed while this chunk was only a neighbor count as attempts too.
        let attempts = self.config.run.max_retries + 1;
        let mut backend_failures = 0;
        loop {
            let attempt = working_set.failed_loads(coord) + backend_failures + 1;
            if attempt > attempts {
                break;
            }
            if working_set.get(coord).is_failed() {
                working_set.discard(Rect::single(coord));
            }

            progress.update(coord, TileStatus::Loading);
            match self.process_chunk(coord, working_set, engine, mips, progress).await {
                Ok(report) => {
                    summary.add_chunk(report);
                    progress.update(coord, TileStatus::Done);
                    return;
                }
                Err(e) => {
                    log::warn!("chunk {} failed (attempt {}/{}): {}", coord, attempt, attempts, e);
                    if let ChunkError::Backend(_) = e {
                        backend_failures += 1;
                    }
                    working_set.discard(Rect::single(coord));
                    futures_lite::future::yield_now().await;
                }
            }
        }
        log::error!("giving up on chunk {} after {} attempts", coord, attempts);
        summary.error_count += 1;
        progress.update(coord, TileStatus::Skipped);
    }

    async fn process_chunk(
        &self,
        coord: ChunkCoord,
        working_set: &mut ChunkWorkingSet<'a, L>,
        engine: &mut ExecutionEngine<'a, L::Chunk>,
        mips: &mut MipScheduler<'a>,
        progress: &mut dyn ProgressSink,
    ) -> Result<ChunkReport, ChunkError> {
        // Neighbors that fail to load are left out of the area.
        let rect = Rect::single(coord).padded(DATA_HALO);
        working_set.set_area(rect).await;
        if let Some(error) = working_set.take_load_error(coord) {
            return Err(error.into());
        }
        let area = working_set.area(rect);
        if area.entry(coord).is_none() {
            return Ok(ChunkReport::default());
        }
        let tasks = generate_tasks(coord, self.config, &self.graph, self.backend);
        engine.process_chunk(coord, &tasks, &area, mips, progress).await
    }

    /// The known versions nearest to `version`, older ones first on ties.
    async fn history(&self, version: BuildVersion) -> Vec<BuildVersion> {
        let mut versions = match self.backend.known_versions().await {
            Ok(versions) => versions,
            Err(e) => {
                log::warn!("failed to list versions, not deduplicating against history: {}", e);
                return Vec::new();
            }
        };
        versions.retain(|v| *v != version);
        versions.sort_by_key(|v| (v.abs_diff(version), Reverse(*v < version)));
        versions.truncate(self.config.run.dedupe_history_depth);
        versions
    }

    async fn read_run_meta(&self, version: BuildVersion) -> Option<RunMeta> {
        let name = &self.config.run.run_meta_name;
        let bytes = match self.backend.get_file(name, version).await {
            Ok(bytes) => bytes?,
            Err(e) => {
                log::warn!("failed to read {}: {}", name, e);
                return None;
            }
        };
        match ron::de::from_bytes(&bytes) {
            Ok(meta) => Some(meta),
            Err(e) => {
                log::warn!("ignoring unreadable {}: {}", name, e);
                None
            }
        }
    }

    async fn write_run_meta(&self, meta: &RunMeta, summary: &mut RunSummary) {
        let name = &self.config.run.run_meta_name;
        let text = match ron::ser::to_string_pretty(meta, ron::ser::PrettyConfig::default()) {
            Ok(text) => text,
            Err(e) => {
                log::error!("failed to encode {}: {}", name, e);
                summary.error_count += 1;
                return;
            }
        };
        if let Err(e) = self.backend.save_file(name, crc32(text.as_bytes()), text.as_bytes()).await {
            log::error!("failed to write {}: {}", name, e);
            summary.error_count += 1;
        }
    }
}

/// Renders `regions` into the backend's current version. Call [`BackendStore::begin_version`] first to pick it.
///
/// Never fails: chunk and backend errors are logged and counted in the summary.
pub async fn run_render_pass<L: ChunkLoader>(
    regions: &[Rect],
    config: &ValidatedConfig,
    graph: Arc<DependencyGraph>,
    backend: &dyn BackendStore,
    loader: &L,
    renderer: &dyn LayerRenderer<L::Chunk>,
) -> RunSummary {
    RunController::new(config, graph, backend, loader, renderer)
        .run(regions)
        .await
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
    use crate::config::MapConfig;
    use crate::testing::{stamped_graph, CountingBackend, ScriptedLoader, SolidRenderer};

    use chrono::Duration;
    use futures_lite::future::block_on;
    use mapforge_map::SledBackend;

    const TWO_BY_TWO: &str = r#"(
        tile_image_size: 128,
        map_size_x: 2,
        map_size_z: 2,
        layers: [(name: "3d", mode: ThreeD(()), px_per_square: 2)],
    )"#;

    fn config(ron: &str) -> ValidatedConfig {
        MapConfig::from_ron_str(ron).unwrap().validate().unwrap()
    }

    fn sled_backend(version: BuildVersion) -> CountingBackend<SledBackend> {
        let db = sled::Config::default().temporary(true).open().unwrap();
        let backend = SledBackend::open(&db, "map").unwrap();
        block_on(backend.begin_version(version)).unwrap();
        CountingBackend::new(backend)
    }

    fn saved_pngs(backend: &CountingBackend<SledBackend>) -> Vec<String> {
        let mut saved: Vec<_> = backend.saved().into_iter().filter(|n| n.ends_with(".png")).collect();
        saved.sort();
        saved
    }

    fn read_meta(backend: &CountingBackend<SledBackend>) -> RunMeta {
        let bytes = block_on(backend.get_file("runmeta.ron", backend.version()))
            .unwrap()
            .unwrap();
        ron::de::from_bytes(&bytes).unwrap()
    }

    #[test]
    fn zigzag_visits_each_chunk_once_in_bands() {
        let regions = [
            Rect::new(0, 0, 2, 3).unwrap(),
            Rect::single(ChunkCoord::new(1, 1)),
        ];
        let order = zigzag_order(&regions, 2);
        let expected: Vec<_> = [(0, 0), (0, 1), (1, 0), (1, 1), (0, 2), (1, 2)]
            .into_iter()
            .map(|(x, z)| ChunkCoord::new(x, z))
            .collect();
        assert_eq!(order, expected);
    }

    #[test]
    fn history_prefers_nearest_versions() {
        let config = config(TWO_BY_TWO);
        let backend = sled_backend(1);
        block_on(async {
            for version in [2, 3, 5, 4] {
                backend.begin_version(version).await.unwrap();
            }
        });
        let loader = ScriptedLoader::new(Rect::new(0, 0, 2, 2).unwrap());
        let renderer = SolidRenderer::new(128);
        let graph = Arc::new(stamped_graph(Rect::new(0, 0, 2, 2).unwrap(), |_| {}));
        let controller = RunController::new(&config, graph, &backend, &loader, &renderer);

        assert_eq!(block_on(controller.history(4)), vec![3, 5, 2]);
    }

    #[test]
    fn second_pass_over_unchanged_region_only_aliases() {
        let config = config(TWO_BY_TWO);
        let map = Rect::new(0, 0, 2, 2).unwrap();
        let backend = sled_backend(1);
        let loader = ScriptedLoader::new(map);
        let renderer = SolidRenderer::new(128);
        let graph = Arc::new(stamped_graph(map, |_| {}));

        let first = block_on(run_render_pass(&[map], &config, graph.clone(), &backend, &loader, &renderer));
        assert_eq!(first.error_count, 0);
        assert_eq!(first.chunks_processed, 4);
        assert_eq!((first.artifacts_written, first.artifacts_aliased), (5, 0));
        assert_eq!(
            saved_pngs(&backend),
            vec!["3d/0/0-0.png", "3d/1/0-0.png", "3d/1/0-1.png", "3d/1/1-0.png", "3d/1/1-1.png"]
        );
        assert_eq!(renderer.calls().len(), 4);

        backend.clear();
        renderer.clear();
        let second = block_on(run_render_pass(&[map], &config, graph, &backend, &loader, &renderer));
        assert_eq!((second.artifacts_written, second.artifacts_aliased), (0, 5));
        assert!(saved_pngs(&backend).is_empty());
        assert!(renderer.calls().is_empty());

        let mut aliased: Vec<_> = backend.symlinks().into_iter().map(|c| c.name).collect();
        aliased.sort();
        assert_eq!(
            aliased,
            vec!["3d/0/0-0.png", "3d/1/0-0.png", "3d/1/0-1.png", "3d/1/1-0.png", "3d/1/1-1.png"]
        );
        assert!(backend
            .symlinks()
            .iter()
            .all(|c| c.name == c.target && c.target_version == 1));
    }

    #[test]
    fn failing_chunk_is_retried_then_counted_once() {
        let config = config(TWO_BY_TWO);
        let map = Rect::new(0, 0, 2, 2).unwrap();
        let broken = ChunkCoord::new(0, 0);
        let backend = sled_backend(1);
        let loader = ScriptedLoader::new(map).failing_at(broken);
        let renderer = SolidRenderer::new(128);
        let graph = Arc::new(stamped_graph(map, |_| {}));

        let summary = block_on(run_render_pass(
            &[Rect::single(broken)],
            &config,
            graph,
            &backend,
            &loader,
            &renderer,
        ));
        assert_eq!(loader.loads_of(broken), config.run.max_retries as usize + 1);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.chunks_processed, 0);
        assert!(renderer.calls().is_empty());

        let meta = read_meta(&backend);
        assert!(!meta.running);
        assert_eq!(meta.error_count, 1);
        assert!(meta.end_timestamp.is_some());
    }

    #[test]
    fn failing_chunk_does_not_take_its_neighbors_down() {
        let config = config(
            r#"(
                tile_image_size: 128,
                map_size_x: 3,
                map_size_z: 3,
                layers: [(name: "3d", mode: ThreeD(()), px_per_square: 2)],
            )"#,
        );
        let map = Rect::new(0, 0, 3, 3).unwrap();
        let broken = ChunkCoord::new(1, 1);
        let backend = sled_backend(1);
        let loader = ScriptedLoader::new(map).failing_at(broken);
        let renderer = SolidRenderer::new(128);
        let graph = Arc::new(stamped_graph(map, |_| {}));

        let summary = block_on(run_render_pass(&[map], &config, graph, &backend, &loader, &renderer));
        assert_eq!(loader.loads_of(broken), config.run.max_retries as usize + 1);
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.chunks_processed, 8);

        let calls = renderer.calls();
        assert_eq!(calls.len(), 8);
        assert!(!calls.contains(&"3d/1/1-1.png".to_owned()));
        assert!(calls.contains(&"3d/1/0-0.png".to_owned()));
        assert!(calls.contains(&"3d/1/2-2.png".to_owned()));
        assert_eq!(read_meta(&backend).error_count, 1);
    }

    #[test]
    fn chunks_outside_the_map_produce_nothing() {
        let config = config(TWO_BY_TWO);
        let map = Rect::new(0, 0, 2, 2).unwrap();
        let backend = sled_backend(1);
        let loader = ScriptedLoader::new(map);
        let renderer = SolidRenderer::new(128);
        let graph = Arc::new(stamped_graph(map, |_| {}));

        let summary = block_on(run_render_pass(
            &[Rect::single(ChunkCoord::new(5, 5))],
            &config,
            graph,
            &backend,
            &loader,
            &renderer,
        ));
        assert_eq!(summary.chunks_processed, 1);
        assert_eq!(summary.artifacts_written, 0);
        assert!(saved_pngs(&backend).is_empty());
    }

    #[test]
    fn running_meta_of_another_worker_blocks_the_run() {
        let config = config(TWO_BY_TWO);
        let map = Rect::new(0, 0, 2, 2).unwrap();
        let backend = sled_backend(1);
        let loader = ScriptedLoader::new(map);
        let renderer = SolidRenderer::new(128);
        let graph = Arc::new(stamped_graph(map, |_| {}));

        let save_meta = |started: DateTime<Utc>| {
            let meta = RunMeta {
                running: true,
                build_version: 1,
                worker_id: "other".into(),
                start_timestamp: started,
                end_timestamp: None,
                region: vec![map],
                error_count: 0,
            };
            let text = ron::to_string(&meta).unwrap();
            block_on(backend.save_file("runmeta.ron", 0, text.as_bytes())).unwrap();
        };
        let controller = RunController::new(&config, graph, &backend, &loader, &renderer);

        save_meta(Utc::now());
        let skipped = block_on(controller.run(&[map]));
        assert!(skipped.skipped_concurrent_run);
        assert_eq!(skipped.chunks_processed, 0);
        assert!(read_meta(&backend).running);

        save_meta(Utc::now() - Duration::hours(2));
        let stale = block_on(controller.run(&[map]));
        assert!(!stale.skipped_concurrent_run);
        assert_eq!(stale.chunks_processed, 4);

        save_meta(Utc::now());
        let forced = block_on(
            controller
                .with_options(RunOptions {
                    force: true,
                    ..Default::default()
                })
                .run(&[map]),
        );
        assert_eq!(forced.chunks_processed, 4);
        assert_eq!(read_meta(&backend).worker_id, "default");
    }

    #[test]
    fn stopped_run_still_flushes_and_finishes_meta() {
        let config = config(TWO_BY_TWO);
        let map = Rect::new(0, 0, 2, 2).unwrap();
        let backend = sled_backend(1);
        let loader = ScriptedLoader::new(map);
        let renderer = SolidRenderer::new(128);
        let graph = Arc::new(stamped_graph(map, |_| {}));

        let options = RunOptions::default();
        options.stop.stop();
        let summary = block_on(
            RunController::new(&config, graph, &backend, &loader, &renderer)
                .with_options(options)
                .run(&[map]),
        );
        assert!(summary.stopped);
        assert_eq!(summary.chunks_processed, 0);
        assert!(!read_meta(&backend).running);
    }

    #[test]
    fn progress_follows_each_chunk() {
        let config = config(TWO_BY_TWO);
        let map = Rect::new(0, 0, 2, 2).unwrap();
        let backend = sled_backend(1);
        let loader = ScriptedLoader::new(map);
        let renderer = SolidRenderer::new(128);
        let graph = Arc::new(stamped_graph(map, |_| {}));
        let controller = RunController::new(&config, graph, &backend, &loader, &renderer);

        let coord = ChunkCoord::new(1, 0);
        let mut statuses = Vec::new();
        let mut sink = |c: ChunkCoord, status: TileStatus| statuses.push((c, status));
        block_on(controller.run_with_progress(&[Rect::single(coord)], &mut sink));

        let expected: Vec<_> = [
            TileStatus::Queued,
            TileStatus::Loading,
            TileStatus::Rendering,
            TileStatus::Saving,
            TileStatus::Done,
        ]
        .into_iter()
        .map(|status| (coord, status))
        .collect();
        assert_eq!(statuses, expected);
    }
}
