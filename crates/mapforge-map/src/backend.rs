//! # Backend Store
//!
//! Persistence contract for rendered artifacts. An artifact is identified by its name (see
//! [`BackendStore::make_file_name`]) and carries the content hash it was rendered from. Names can be aliased to artifacts
//! saved under another name or in another build version, so unchanged tiles never need to be stored twice.

mod directory;
mod sled_backend;

pub use directory::DirectoryBackend;
pub use sled_backend::SledBackend;

use async_trait::async_trait;
use futures::future::join_all;
use std::io;
use thiserror::Error;

pub type BuildVersion = u32;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Sled(#[from] sled::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("corrupt record for {name}: {reason}")]
    CorruptRecord { name: String, reason: String },
    #[error("alias target {name} does not exist at version {version}")]
    MissingTarget { name: String, version: BuildVersion },
    #[error("backend holds version {current}, not {requested}")]
    VersionUnsupported {
        current: BuildVersion,
        requested: BuildVersion,
    },
}

/// A candidate artifact: the name it should exist under and the hash it should have.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct UniqueMapFile {
    pub name: String,
    pub hash: u32,
}

impl UniqueMapFile {
    pub fn new(name: impl Into<String>, hash: u32) -> Self {
        Self {
            name: name.into(),
            hash,
        }
    }
}

/// An artifact the backend already has.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct KnownMapFile {
    pub name: String,
    /// The content hash the artifact was produced from.
    pub hash: u32,
    /// The hash of the bytes that are physically stored.
    pub fs_hash: u32,
    /// The name to alias when linking to this artifact. Resolved as of [`Self::build_version`].
    pub stored_path: String,
    pub build_version: BuildVersion,
    /// The oldest version since which the artifact is unchanged.
    pub first_build_version: BuildVersion,
}

/// Makes `name` an alias of `target` as of `target_version`, recorded with `hash` in the backend's current version.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SymlinkCommand {
    pub name: String,
    pub hash: u32,
    pub target: String,
    pub target_version: BuildVersion,
    pub target_first_version: BuildVersion,
}

impl SymlinkCommand {
    pub fn to_known(name: impl Into<String>, hash: u32, known: &KnownMapFile) -> Self {
        Self {
            name: name.into(),
            hash,
            target: known.stored_path.clone(),
            target_version: known.build_version,
            target_first_version: known.first_build_version,
        }
    }

    /// True if the target already covers `version` under the same name.
    pub fn is_noop_at(&self, version: BuildVersion) -> bool {
        self.name == self.target
            && version >= self.target_first_version
            && version <= self.target_version
    }
}

#[async_trait(?Send)]
pub trait BackendStore {
    /// The build version that writes go to.
    fn version(&self) -> BuildVersion;

    /// Starts writing `version`. Previous versions stay readable where the backend keeps history.
    async fn begin_version(&self, version: BuildVersion) -> Result<(), BackendError>;

    fn make_file_name(&self, layer: &str, zoom: i32, x: i32, y: i32, ext: &str) -> String {
        format!("{}/{}/{}-{}.{}", layer, zoom, x, y, ext)
    }

    async fn save_file(&self, name: &str, hash: u32, data: &[u8]) -> Result<(), BackendError>;

    async fn symlink(&self, command: &SymlinkCommand) -> Result<(), BackendError>;

    async fn symlink_batch(&self, commands: &[SymlinkCommand]) -> Result<(), BackendError> {
        for result in join_all(commands.iter().map(|c| self.symlink(c))).await {
            result?;
        }
        Ok(())
    }

    /// The newest record at or before the current version for each of `files`, regardless of hash.
    async fn get_metas(&self, _files: &[UniqueMapFile]) -> Result<Vec<KnownMapFile>, BackendError> {
        Ok(Vec::new())
    }

    /// Records of `names` as they were in each of `versions`.
    async fn get_related_files(
        &self,
        _names: &[String],
        _versions: &[BuildVersion],
    ) -> Result<Vec<KnownMapFile>, BackendError> {
        Ok(Vec::new())
    }

    /// The bytes of `name` as of `version`, or `None` if it didn't exist.
    async fn get_file(&self, name: &str, version: BuildVersion)
        -> Result<Option<Vec<u8>>, BackendError>;

    /// Every version that has been started on this backend.
    async fn known_versions(&self) -> Result<Vec<BuildVersion>, BackendError> {
        Ok(vec![self.version()])
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

    #[test]
    fn symlink_within_unchanged_range_is_noop() {
        let known = KnownMapFile {
            name: "3d/4/1-2.png".into(),
            hash: 9,
            fs_hash: 9,
            stored_path: "3d/4/1-2.png".into(),
            build_version: 10,
            first_build_version: 4,
        };
        let command = SymlinkCommand::to_known("3d/4/1-2.png", 9, &known);
        assert!(command.is_noop_at(4));
        assert!(command.is_noop_at(10));
        assert!(!command.is_noop_at(11));
        assert!(!command.is_noop_at(3));

        let renamed = SymlinkCommand::to_known("3d/4/1-3.png", 9, &known);
        assert!(!renamed.is_noop_at(10));
    }
}
