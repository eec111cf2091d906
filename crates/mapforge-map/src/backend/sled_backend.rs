use super::{BackendError, BackendStore, BuildVersion, KnownMapFile, SymlinkCommand, UniqueMapFile};
use crate::database::{ArtifactDb, FileRecord};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

/// A [`BackendStore`] that keeps every version in an [`ArtifactDb`].
///
/// This may block on IO inside of `async` methods.
pub struct SledBackend {
    db: Mutex<ArtifactDb>,
    version: AtomicU32,
}

impl SledBackend {
    pub fn open(db: &sled::Db, map_name: &str) -> Result<Self, BackendError> {
        let db = ArtifactDb::open(db, map_name)?;
        let version = db.meta().cached_meta().versions.last().copied().unwrap_or(0);
        Ok(Self {
            db: Mutex::new(db),
            version: AtomicU32::new(version),
        })
    }

    fn known(&self, name: &str, version: BuildVersion) -> Result<Option<KnownMapFile>, BackendError> {
        let found = self.db.lock().record_as_of(name, version)?;
        Ok(found.map(|(record_version, record)| KnownMapFile {
            name: name.to_owned(),
            hash: record.hash,
            fs_hash: record.fs_hash,
            stored_path: name.to_owned(),
            build_version: record_version,
            first_build_version: record.first_version,
        }))
    }
}

#[async_trait(?Send)]
impl BackendStore for SledBackend {
    fn version(&self) -> BuildVersion {
        self.version.load(Ordering::Relaxed)
    }

    async fn begin_version(&self, version: BuildVersion) -> Result<(), BackendError> {
        if self.db.lock().add_version(version)? {
            log::info!("started version {}", version);
        }
        self.version.store(version, Ordering::Relaxed);
        Ok(())
    }

    async fn save_file(&self, name: &str, hash: u32, data: &[u8]) -> Result<(), BackendError> {
        let version = self.version();
        let db = self.db.lock();
        let first_version = match db.record_as_of(name, version)? {
            Some((_, previous)) if previous.hash == hash => previous.first_version,
            _ => version,
        };
        let record = FileRecord {
            hash,
            fs_hash: hash,
            blob_name: name.to_owned(),
            blob_version: version,
            first_version,
        };
        db.write(name, version, &record, Some(data))
    }

    async fn symlink(&self, command: &SymlinkCommand) -> Result<(), BackendError> {
        let version = self.version();
        if command.is_noop_at(version) {
            return Ok(());
        }

        let db = self.db.lock();
        let (_, target) = db
            .record_as_of(&command.target, command.target_version)?
            .ok_or_else(|| BackendError::MissingTarget {
                name: command.target.clone(),
                version: command.target_version,
            })?;
        let first_version = if command.name == command.target && target.hash == command.hash {
            target.first_version
        } else {
            version
        };
        let record = FileRecord {
            hash: command.hash,
            first_version,
            ..target
        };
        db.write(&command.name, version, &record, None)
    }

    async fn symlink_batch(&self, commands: &[SymlinkCommand]) -> Result<(), BackendError> {
        let version = self.version();
        let mut skipped = 0;
        for command in commands {
            if command.is_noop_at(version) {
                skipped += 1;
                continue;
            }
            self.symlink(command).await?;
        }
        log::debug!(
            "symlinked {} files, {} already current",
            commands.len() - skipped,
            skipped
        );
        Ok(())
    }

    async fn get_metas(&self, files: &[UniqueMapFile]) -> Result<Vec<KnownMapFile>, BackendError> {
        let version = self.version();
        let mut known = Vec::with_capacity(files.len());
        for file in files {
            if let Some(found) = self.known(&file.name, version)? {
                known.push(found);
            }
        }
        Ok(known)
    }

    async fn get_related_files(
        &self,
        names: &[String],
        versions: &[BuildVersion],
    ) -> Result<Vec<KnownMapFile>, BackendError> {
        let mut related: Vec<KnownMapFile> = Vec::new();
        for name in names {
            for &version in versions {
                if let Some(found) = self.known(name, version)? {
                    let duplicate = related
                        .iter()
                        .any(|r| r.name == found.name && r.build_version == found.build_version);
                    if !duplicate {
                        related.push(found);
                    }
                }
            }
        }
        Ok(related)
    }

    async fn get_file(
        &self,
        name: &str,
        version: BuildVersion,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        let db = self.db.lock();
        match db.record_as_of(name, version)? {
            Some((_, record)) => Ok(db.read_blob(&record)?.map(|bytes| bytes.to_vec())),
            None => Ok(None),
        }
    }

    async fn known_versions(&self) -> Result<Vec<BuildVersion>, BackendError> {
        Ok(self.db.lock().meta().cached_meta().versions.clone())
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
