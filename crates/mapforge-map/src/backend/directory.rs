use super::{BackendError, BackendStore, BuildVersion, SymlinkCommand};

use async_trait::async_trait;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A [`BackendStore`] that writes one version of the map into a directory tree.
///
/// There is no history, so nothing is ever reported as already known and every run renders from scratch. Aliases are
/// materialized as copies.
pub struct DirectoryBackend {
    root: PathBuf,
    version: BuildVersion,
}

impl DirectoryBackend {
    pub fn new(root: impl Into<PathBuf>, version: BuildVersion) -> Self {
        Self {
            root: root.into(),
            version,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn check_version(&self, requested: BuildVersion) -> Result<(), BackendError> {
        if requested == self.version {
            Ok(())
        } else {
            Err(BackendError::VersionUnsupported {
                current: self.version,
                requested,
            })
        }
    }
}

#[async_trait(?Send)]
impl BackendStore for DirectoryBackend {
    fn version(&self) -> BuildVersion {
        self.version
    }

    async fn begin_version(&self, version: BuildVersion) -> Result<(), BackendError> {
        self.check_version(version)?;
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    async fn save_file(&self, name: &str, _hash: u32, data: &[u8]) -> Result<(), BackendError> {
        let path = self.path_of(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }

    async fn symlink(&self, command: &SymlinkCommand) -> Result<(), BackendError> {
        self.check_version(command.target_version)?;
        if command.name == command.target {
            return Ok(());
        }
        let target = self.path_of(&command.target);
        if !target.exists() {
            return Err(BackendError::MissingTarget {
                name: command.target.clone(),
                version: command.target_version,
            });
        }
        let path = self.path_of(&command.name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(target, path)?;
        Ok(())
    }

    async fn get_file(
        &self,
        name: &str,
        version: BuildVersion,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        self.check_version(version)?;
        match fs::read(self.path_of(name)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
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
    use crate::backend::UniqueMapFile;

    use futures_lite::future::block_on;

    #[test]
    fn save_alias_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path(), 7);
        let name = backend.make_file_name("map", 2, 10, 11, "png");
        assert_eq!(name, "map/2/10-11.png");

        block_on(async {
            backend.begin_version(7).await.unwrap();
            backend.save_file(&name, 5, b"tile").await.unwrap();
            let command = SymlinkCommand {
                name: "copy/0/0-0.png".into(),
                hash: 5,
                target: name.clone(),
                target_version: 7,
                target_first_version: 7,
            };
            backend.symlink_batch(&[command]).await.unwrap();
        });

        assert_eq!(
            block_on(backend.get_file("copy/0/0-0.png", 7)).unwrap(),
            Some(b"tile".to_vec())
        );
        assert_eq!(block_on(backend.get_file("nothing.png", 7)).unwrap(), None);
        assert!(block_on(backend.get_metas(&[UniqueMapFile::new(name, 5)]))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn other_versions_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DirectoryBackend::new(dir.path(), 7);
        assert!(matches!(
            block_on(backend.begin_version(8)),
            Err(BackendError::VersionUnsupported { current: 7, requested: 8 })
        ));
        assert!(block_on(backend.get_file("a.png", 6)).is_err());
    }
}
