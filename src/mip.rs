//! # Mip Scheduler
//!
//! Collects finished tiles four at a time and builds each parent tile once its quadrants are known. A parent whose
//! combined child hash matches what the backend already has is aliased instead of rebuilt.

use crate::config::ValidatedConfig;

use futures::stream::{self, StreamExt};
use mapforge_core::{crc32_fold, SmallKeyHashMap, TileCoord};
use mapforge_map::{
    compose_mip, BackendStore, KnownMapFile, MipError, RgbaImage, SymlinkCommand, UniqueMapFile,
};
use std::collections::BTreeMap;
use std::ops::AddAssign;

/// A finished tile, as seen by its parent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MipChild {
    pub name: String,
    pub hash: u32,
    /// Hash of the stored bytes, which differs from `hash` when the tile aliases another layer or version.
    pub fs_hash: u32,
}

#[derive(Clone, Debug)]
pub struct MipCommand {
    pub layer_index: usize,
    pub tile: TileCoord,
    /// Indexed by [`quadrant`].
    pub children: [Option<MipChild>; 4],
}

impl MipCommand {
    fn new(layer_index: usize, tile: TileCoord) -> Self {
        Self {
            layer_index,
            tile,
            children: Default::default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.children.iter().all(Option::is_some)
    }

    /// Child hashes folded in quadrant order. Missing children count as 0.
    pub fn combined_hash(&self) -> u32 {
        crc32_fold(self.children.iter().map(|c| c.as_ref().map_or(0, |c| c.hash)), 0)
    }

    pub fn combined_fs_hash(&self) -> u32 {
        crc32_fold(self.children.iter().map(|c| c.as_ref().map_or(0, |c| c.fs_hash)), 0)
    }

    fn can_alias(&self, old: &KnownMapFile) -> bool {
        let combined = self.combined_hash();
        combined != 0 && (old.hash == combined || old.fs_hash == self.combined_fs_hash())
    }
}

/// Slot of `tile` inside its parent: `(right ? 1 : 0) + (bottom ? 2 : 0)`.
///
/// Tile rows count downward unless `no_y_flip` is set.
pub fn quadrant(tile: TileCoord, no_y_flip: bool) -> usize {
    let right = tile.x.rem_euclid(2) == 1;
    let bottom = (tile.y.rem_euclid(2) == 1) != no_y_flip;
    usize::from(right) + 2 * usize::from(bottom)
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MipReport {
    pub written: usize,
    pub aliased: usize,
    pub failed: usize,
}

impl AddAssign for MipReport {
    fn add_assign(&mut self, other: Self) {
        self.written += other.written;
        self.aliased += other.aliased;
        self.failed += other.failed;
    }
}

pub struct MipScheduler<'a> {
    config: &'a ValidatedConfig,
    backend: &'a dyn BackendStore,
    incompletes: BTreeMap<(usize, TileCoord), MipCommand>,
}

impl<'a> MipScheduler<'a> {
    pub fn new(config: &'a ValidatedConfig, backend: &'a dyn BackendStore) -> Self {
        Self {
            config,
            backend,
            incompletes: BTreeMap::new(),
        }
    }

    pub fn num_pending(&self) -> usize {
        self.incompletes.len()
    }

    pub fn pending(&self, layer_index: usize, tile: TileCoord) -> Option<&MipCommand> {
        self.incompletes.get(&(layer_index, tile))
    }

    /// Registers `child` as the tile at `tile` of layer `layer_index`. Nothing is scheduled below the minimum zoom.
    pub fn add_child(&mut self, layer_index: usize, tile: TileCoord, child: MipChild) {
        let parent = tile.parent();
        if parent.zoom < self.config.min_zoom() {
            return;
        }
        let slot = quadrant(tile, self.config.no_y_flip);
        self.incompletes
            .entry((layer_index, parent))
            .or_insert_with(|| MipCommand::new(layer_index, parent))
            .children[slot] = Some(child);
    }

    /// Builds every complete parent, repeating while that completes more parents.
    ///
    /// With `flush`, incomplete parents are built as well, highest zoom first, until nothing is pending.
    pub async fn run(&mut self, flush: bool) -> MipReport {
        let mut report = MipReport::default();
        loop {
            let commands = if flush {
                match self.incompletes.keys().map(|(_, tile)| tile.zoom).max() {
                    Some(zoom) => self.take(|c| c.tile.zoom == zoom),
                    None => break,
                }
            } else {
                self.take(MipCommand::is_complete)
            };
            if commands.is_empty() {
                break;
            }
            report += self.process(commands).await;
        }
        log::debug!(
            "mip run (flush = {}): {} written, {} aliased, {} failed",
            flush,
            report.written,
            report.aliased,
            report.failed
        );
        report
    }

    fn take(&mut self, predicate: impl Fn(&MipCommand) -> bool) -> Vec<MipCommand> {
        let (taken, kept): (BTreeMap<_, _>, BTreeMap<_, _>) = std::mem::take(&mut self.incompletes)
            .into_iter()
            .partition(|(_, command)| predicate(command));
        self.incompletes = kept;
        taken.into_values().collect()
    }

    fn file_name(&self, command: &MipCommand) -> String {
        let layer = &self.config.layers[command.layer_index];
        let tile = command.tile;
        self.backend
            .make_file_name(&layer.name, tile.zoom, tile.x, tile.y, layer.mode.extension())
    }

    async fn process(&mut self, commands: Vec<MipCommand>) -> MipReport {
        let mut report = MipReport::default();
        let batch_size = self.config.run.mip_batch_size.max(1);
        for batch in commands.chunks(batch_size) {
            let files: Vec<_> = batch
                .iter()
                .map(|c| UniqueMapFile::new(self.file_name(c), c.combined_hash()))
                .collect();
            let known: SmallKeyHashMap<String, KnownMapFile> = match self.backend.get_metas(&files).await {
                Ok(metas) => metas.into_iter().map(|m| (m.name.clone(), m)).collect(),
                Err(e) => {
                    log::warn!("failed to look up {} mip tiles: {}", files.len(), e);
                    report.failed += files.len();
                    continue;
                }
            };

            let mut aliases = Vec::new();
            let mut builds = Vec::new();
            for (command, file) in batch.iter().zip(files) {
                match known.get(&file.name) {
                    Some(old) if command.can_alias(old) => {
                        let symlink = SymlinkCommand::to_known(file.name.clone(), file.hash, old);
                        aliases.push((command, symlink, old.fs_hash));
                    }
                    _ => builds.push((command, file)),
                }
            }

            let mut finished = Vec::new();
            if !aliases.is_empty() {
                let symlinks: Vec<_> = aliases.iter().map(|(_, s, _)| s.clone()).collect();
                match self.backend.symlink_batch(&symlinks).await {
                    Ok(()) => {
                        report.aliased += aliases.len();
                        for (command, symlink, fs_hash) in aliases {
                            finished.push((command, symlink.name, symlink.hash, fs_hash));
                        }
                    }
                    Err(e) => {
                        log::warn!("failed to alias {} mip tiles: {}", aliases.len(), e);
                        report.failed += aliases.len();
                    }
                }
            }

            let this = &*self;
            let built: Vec<_> = stream::iter(builds)
                .map(|(command, file)| async move {
                    let result = this.build(command, &file).await;
                    (command, file, result)
                })
                .buffer_unordered(self.config.run.max_concurrent_requests.max(1))
                .collect()
                .await;
            for (command, file, result) in built {
                match result {
                    Ok(()) => {
                        report.written += 1;
                        finished.push((command, file.name, file.hash, file.hash));
                    }
                    Err(e) => {
                        log::warn!("failed to build mip tile {}: {}", file.name, e);
                        report.failed += 1;
                    }
                }
            }

            for (command, name, hash, fs_hash) in finished {
                self.add_child(command.layer_index, command.tile, MipChild { name, hash, fs_hash });
            }
        }
        report
    }

    async fn build(&self, command: &MipCommand, file: &UniqueMapFile) -> Result<(), MipError> {
        let version = self.backend.version();
        let mut children: [Option<RgbaImage>; 4] = Default::default();
        for (image, child) in children.iter_mut().zip(command.children.iter()) {
            if let Some(child) = child {
                if let Some(bytes) = self.backend.get_file(&child.name, version).await? {
                    *image = Some(RgbaImage::decode_png(&bytes)?);
                }
            }
        }
        let layer = &self.config.layers[command.layer_index];
        let parent = compose_mip(&children, self.config.tile_image_size, layer.mip_mode)?;
        let bytes = parent.encode_png()?;
        self.backend.save_file(&file.name, file.hash, &bytes).await?;
        Ok(())
    }
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
    use crate::testing::{solid_png, CountingBackend};

    use futures_lite::future::block_on;
    use mapforge_map::SledBackend;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn config() -> ValidatedConfig {
        MapConfig::from_ron_str(
            r#"(tile_image_size: 64, map_size_x: 4, map_size_z: 4, layers: [
                (name: "3d", mode: ThreeD(())),
            ])"#,
        )
        .unwrap()
        .validate()
        .unwrap()
    }

    fn backend() -> CountingBackend<SledBackend> {
        let db = sled::Config::default().temporary(true).open().unwrap();
        let backend = SledBackend::open(&db, "map").unwrap();
        block_on(backend.begin_version(1)).unwrap();
        CountingBackend::new(backend)
    }

    fn child(name: &str, hash: u32) -> MipChild {
        MipChild {
            name: name.into(),
            hash,
            fs_hash: hash,
        }
    }

    #[test]
    fn quadrant_order_is_fixed() {
        assert_eq!(quadrant(TileCoord::new(1, 4, 6), false), 0);
        assert_eq!(quadrant(TileCoord::new(1, 5, 6), false), 1);
        assert_eq!(quadrant(TileCoord::new(1, 4, 7), false), 2);
        assert_eq!(quadrant(TileCoord::new(1, -1, -1), false), 3);
        assert_eq!(quadrant(TileCoord::new(1, 4, 7), true), 0);
        assert_eq!(quadrant(TileCoord::new(1, 4, 6), true), 2);
    }

    #[test]
    fn combined_hash_ignores_insertion_order() {
        let config = config();
        let backend = backend();
        let tiles = [
            TileCoord::new(0, 2, 2),
            TileCoord::new(0, 3, 2),
            TileCoord::new(0, 2, 3),
            TileCoord::new(0, 3, 3),
        ];
        let parent = TileCoord::new(-1, 1, 1);

        let mut forward = MipScheduler::new(&config, &backend);
        for (i, tile) in tiles.iter().enumerate() {
            forward.add_child(0, *tile, child("c", 10 + i as u32));
        }
        let mut backward = MipScheduler::new(&config, &backend);
        for (i, tile) in tiles.iter().enumerate().rev() {
            backward.add_child(0, *tile, child("c", 10 + i as u32));
        }

        let a = forward.pending(0, parent).unwrap();
        let b = backward.pending(0, parent).unwrap();
        assert!(a.is_complete());
        assert_eq!(a.combined_hash(), b.combined_hash());
        assert_eq!(a.combined_hash(), crc32_fold([10, 11, 12, 13], 0));
    }

    #[test]
    fn children_below_min_zoom_are_ignored() {
        let config = config();
        let backend = backend();
        let mut mips = MipScheduler::new(&config, &backend);
        // log2(64 / (4 * 64)) = -2
        assert_eq!(config.min_zoom(), -2);
        mips.add_child(0, TileCoord::new(-2, 0, 0), child("c", 1));
        assert_eq!(mips.num_pending(), 0);
    }

    #[test]
    fn flush_builds_the_whole_pyramid() {
        let config = config();
        let backend = backend();
        block_on(async {
            backend.save_file("3d/0/0-3.png", 5, &solid_png(64, RED)).await.unwrap();
            backend.save_file("3d/0/1-2.png", 6, &solid_png(64, BLUE)).await.unwrap();
        });

        let mut mips = MipScheduler::new(&config, &backend);
        mips.add_child(0, TileCoord::new(0, 0, 3), child("3d/0/0-3.png", 5));
        mips.add_child(0, TileCoord::new(0, 1, 2), child("3d/0/1-2.png", 6));

        // Incomplete commands wait for a flush.
        assert_eq!(block_on(mips.run(false)), MipReport::default());

        let report = block_on(mips.run(true));
        // Zoom -1 and zoom -2.
        assert_eq!(report.written, 2);
        assert_eq!(mips.num_pending(), 0);

        let bytes = block_on(backend.get_file("3d/-1/0-1.png", 1)).unwrap().unwrap();
        let parent = RgbaImage::decode_png(&bytes).unwrap();
        // (0, 3) is the bottom left child, (1, 2) the top right one.
        assert_eq!(parent.pixel(0, 63), RED);
        assert_eq!(parent.pixel(63, 0), BLUE);
        assert_eq!(parent.pixel(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn unchanged_parent_is_aliased() {
        let config = config();
        let backend = backend();
        let tiles = [
            TileCoord::new(-1, 0, 0),
            TileCoord::new(-1, 1, 0),
            TileCoord::new(-1, 0, 1),
            TileCoord::new(-1, 1, 1),
        ];
        block_on(async {
            for tile in tiles {
                let name = format!("3d/-1/{}-{}.png", tile.x, tile.y);
                backend.save_file(&name, 7, &solid_png(64, RED)).await.unwrap();
            }
        });
        fn add_all(mips: &mut MipScheduler<'_>, tiles: &[TileCoord]) {
            for tile in tiles {
                let name = format!("3d/-1/{}-{}.png", tile.x, tile.y);
                mips.add_child(0, *tile, child(&name, 7));
            }
        }

        let mut mips = MipScheduler::new(&config, &backend);
        add_all(&mut mips, &tiles);
        let first = block_on(mips.run(false));
        assert_eq!((first.written, first.aliased), (1, 0));

        let mut mips = MipScheduler::new(&config, &backend);
        add_all(&mut mips, &tiles);
        let second = block_on(mips.run(false));
        assert_eq!((second.written, second.aliased), (0, 1));
        assert_eq!(backend.saved().len(), 5);
        assert_eq!(backend.symlinks().len(), 1);
    }
}
