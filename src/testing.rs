//! Fakes shared by the tests of this crate.

use crate::renderer::LayerRenderer;
use crate::task::RenderTask;

use async_trait::async_trait;
use mapforge_core::{ChunkCoord, Rect};
use mapforge_map::{
    BackendError, BackendStore, BuildVersion, ChunkLoader, DependencyGraph, DependencyGraphBuilder, DependencyUsage,
    EntityKey, KnownMapFile, LoadedArea, LoadedChunk, RgbaImage, SymlinkCommand, UniqueMapFile,
};
use parking_lot::Mutex;

pub fn solid_png(size: u32, color: [u8; 4]) -> Vec<u8> {
    RgbaImage::filled(size, size, color).encode_png().unwrap()
}

/// A graph where every mapsquare of `map` is stamped, plus whatever `extra` adds.
pub fn stamped_graph(map: Rect, extra: impl FnOnce(&mut DependencyGraphBuilder)) -> DependencyGraph {
    let mut builder = DependencyGraphBuilder::default();
    for coord in map.iter() {
        builder.add_stamp(EntityKey::mapsquare(coord.x, coord.z), 1, 1);
    }
    extra(&mut builder);
    builder.build()
}

/// Records the writes that reach `inner`.
pub struct CountingBackend<B> {
    inner: B,
    saved: Mutex<Vec<String>>,
    symlinks: Mutex<Vec<SymlinkCommand>>,
    fail_saves_of: Mutex<Option<String>>,
}

impl<B> CountingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            saved: Default::default(),
            symlinks: Default::default(),
            fail_saves_of: Default::default(),
        }
    }

    pub fn saved(&self) -> Vec<String> {
        self.saved.lock().clone()
    }

    pub fn symlinks(&self) -> Vec<SymlinkCommand> {
        self.symlinks.lock().clone()
    }

    pub fn clear(&self) {
        self.saved.lock().clear();
        self.symlinks.lock().clear();
    }

    /// Makes every save of `name` fail.
    pub fn fail_saves_of(&self, name: &str) {
        *self.fail_saves_of.lock() = Some(name.to_owned());
    }
}

#[async_trait(?Send)]
impl<B: BackendStore> BackendStore for CountingBackend<B> {
    fn version(&self) -> BuildVersion {
        self.inner.version()
    }

    async fn begin_version(&self, version: BuildVersion) -> Result<(), BackendError> {
        self.inner.begin_version(version).await
    }

    async fn save_file(&self, name: &str, hash: u32, data: &[u8]) -> Result<(), BackendError> {
        if self.fail_saves_of.lock().as_deref() == Some(name) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full").into());
        }
        self.saved.lock().push(name.to_owned());
        self.inner.save_file(name, hash, data).await
    }

    async fn symlink(&self, command: &SymlinkCommand) -> Result<(), BackendError> {
        self.symlinks.lock().push(command.clone());
        self.inner.symlink(command).await
    }

    async fn symlink_batch(&self, commands: &[SymlinkCommand]) -> Result<(), BackendError> {
        self.symlinks.lock().extend_from_slice(commands);
        self.inner.symlink_batch(commands).await
    }

    async fn get_metas(&self, files: &[UniqueMapFile]) -> Result<Vec<KnownMapFile>, BackendError> {
        self.inner.get_metas(files).await
    }

    async fn get_related_files(
        &self,
        names: &[String],
        versions: &[BuildVersion],
    ) -> Result<Vec<KnownMapFile>, BackendError> {
        self.inner.get_related_files(names, versions).await
    }

    async fn get_file(&self, name: &str, version: BuildVersion) -> Result<Option<Vec<u8>>, BackendError> {
        self.inner.get_file(name, version).await
    }

    async fn known_versions(&self) -> Result<Vec<BuildVersion>, BackendError> {
        self.inner.known_versions().await
    }
}

type UsageFn = Box<dyn Fn(ChunkCoord) -> DependencyUsage>;

/// Loads every chunk inside `map`, with usage reported by a closure.
pub struct ScriptedLoader {
    map: Rect,
    usage: UsageFn,
    failing: Option<ChunkCoord>,
    loads: Mutex<Vec<ChunkCoord>>,
}

impl ScriptedLoader {
    pub fn new(map: Rect) -> Self {
        Self {
            map,
            usage: Box::new(|_| DependencyUsage::default()),
            failing: None,
            loads: Default::default(),
        }
    }

    pub fn with_usage(mut self, usage: impl Fn(ChunkCoord) -> DependencyUsage + 'static) -> Self {
        self.usage = Box::new(usage);
        self
    }

    pub fn failing_at(mut self, coord: ChunkCoord) -> Self {
        self.failing = Some(coord);
        self
    }

    pub fn loads_of(&self, coord: ChunkCoord) -> usize {
        self.loads.lock().iter().filter(|c| **c == coord).count()
    }
}

#[async_trait(?Send)]
impl ChunkLoader for ScriptedLoader {
    type Chunk = ChunkCoord;

    async fn load(&self, coord: ChunkCoord) -> anyhow::Result<Option<LoadedChunk<ChunkCoord>>> {
        self.loads.lock().push(coord);
        if self.failing == Some(coord) {
            anyhow::bail!("corrupt archive");
        }
        if !self.map.contains(coord) {
            return Ok(None);
        }
        Ok(Some(LoadedChunk {
            data: coord,
            usage: (self.usage)(coord),
        }))
    }
}

/// Draws every tile in one color derived from its hash.
pub struct SolidRenderer {
    size: u32,
    calls: Mutex<Vec<String>>,
    failing: Option<String>,
}

impl SolidRenderer {
    pub fn new(size: u32) -> Self {
        Self {
            size,
            calls: Default::default(),
            failing: None,
        }
    }

    pub fn failing_on(mut self, name: &str) -> Self {
        self.failing = Some(name.to_owned());
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait(?Send)]
impl<C> LayerRenderer<C> for SolidRenderer {
    async fn render(&self, task: &RenderTask<'_>, area: &LoadedArea<'_, C>) -> anyhow::Result<Vec<u8>> {
        assert_eq!(area.rect(), task.data_rect);
        self.calls.lock().push(task.name.clone());
        if self.failing.as_deref() == Some(task.name.as_str()) {
            anyhow::bail!("shader compilation failed");
        }
        let [r, g, b, _] = task.hash.to_le_bytes();
        Ok(solid_png(self.size, [r, g, b, 255]))
    }
}
