mod file_key;
mod meta_tree;

pub use file_key::FileKey;
pub use meta_tree::{MapDbMetadata, MetaTree};

use crate::backend::{BackendError, BuildVersion};

use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{IVec, Transactional, Tree};

/// What a name resolves to in one version.
#[derive(Archive, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[archive(check_bytes)]
pub struct FileRecord {
    pub hash: u32,
    pub fs_hash: u32,
    /// Where the bytes live in the blob tree.
    pub blob_name: String,
    pub blob_version: BuildVersion,
    /// The oldest version since which this name has had `hash`.
    pub first_version: BuildVersion,
}

impl FileRecord {
    pub fn blob_key(&self) -> FileKey {
        FileKey::new(self.blob_name.clone(), self.blob_version)
    }

    fn encode(&self, name: &str) -> Result<AlignedVec, BackendError> {
        rkyv::to_bytes::<_, 256>(self).map_err(|e| BackendError::CorruptRecord {
            name: name.into(),
            reason: format!("{:?}", e),
        })
    }

    fn decode(name: &str, bytes: &[u8]) -> Result<Self, BackendError> {
        // sled doesn't guarantee alignment of values.
        let mut aligned = AlignedVec::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self>(&aligned).map_err(|e| BackendError::CorruptRecord {
            name: name.into(),
            reason: format!("{:?}", e),
        })
    }
}

impl From<TransactionError<BackendError>> for BackendError {
    fn from(e: TransactionError<BackendError>) -> Self {
        match e {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => BackendError::Sled(e),
        }
    }
}

/// # Artifact Database
///
/// Versioned storage of named artifacts, kept in three [`sled::Tree`]s.
///
/// ### Files Tree
///
/// Maps a [`FileKey`] (name and version) to a [`FileRecord`]. A name only gets a new record in the versions where it was
/// written or aliased, so the record that applies to a name in version `v` is the newest one at or before `v`.
///
/// ### Blobs Tree
///
/// The bytes of every saved artifact, keyed by the [`FileKey`] they were saved under. Aliases share their target's blob.
///
/// ### Meta Tree
///
/// [`MapDbMetadata`], notably the set of versions that were ever started.
pub struct ArtifactDb {
    files_tree: Tree,
    blobs_tree: Tree,
    meta_tree: MetaTree,
}

impl ArtifactDb {
    pub fn open(db: &sled::Db, map_name: &str) -> Result<Self, BackendError> {
        Ok(Self {
            files_tree: db.open_tree(format!("{}-files", map_name))?,
            blobs_tree: db.open_tree(format!("{}-blobs", map_name))?,
            meta_tree: MetaTree::open(map_name, db)?,
        })
    }

    pub fn meta(&self) -> &MetaTree {
        &self.meta_tree
    }

    pub fn add_version(&mut self, version: BuildVersion) -> Result<bool, BackendError> {
        self.meta_tree.add_version(version)
    }

    /// The record that applies to `name` in `version`, along with the version it was written in.
    pub fn record_as_of(
        &self,
        name: &str,
        version: BuildVersion,
    ) -> Result<Option<(BuildVersion, FileRecord)>, BackendError> {
        let newest = self
            .files_tree
            .range(FileKey::as_of_range(name, version))
            .next_back()
            .transpose()?;
        let (key, value) = match newest {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let key = FileKey::from_sled_key(&key).ok_or_else(|| BackendError::CorruptRecord {
            name: name.into(),
            reason: "bad key".into(),
        })?;
        Ok(Some((key.version, FileRecord::decode(name, &value)?)))
    }

    /// Writes the record for `name` in `version` and, if given, the blob it owns, in one transaction.
    pub fn write(
        &self,
        name: &str,
        version: BuildVersion,
        record: &FileRecord,
        blob: Option<&[u8]>,
    ) -> Result<(), BackendError> {
        let key = IVec::from(FileKey::new(name, version).into_sled_key());
        let value = IVec::from(record.encode(name)?.as_slice());
        let blob_key = IVec::from(record.blob_key().into_sled_key());
        (&self.files_tree, &self.blobs_tree).transaction(|(files_txn, blobs_txn)| {
            files_txn.insert(key.clone(), value.clone())?;
            if let Some(blob) = blob {
                blobs_txn.insert(blob_key.clone(), blob)?;
            }
            Ok::<_, ConflictableTransactionError<BackendError>>(())
        })?;
        Ok(())
    }

    pub fn read_blob(&self, record: &FileRecord) -> Result<Option<IVec>, BackendError> {
        Ok(self.blobs_tree.get(record.blob_key().into_sled_key())?)
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

    fn saved(name: &str, hash: u32, version: BuildVersion) -> FileRecord {
        FileRecord {
            hash,
            fs_hash: hash,
            blob_name: name.into(),
            blob_version: version,
            first_version: version,
        }
    }

    #[test]
    fn write_and_read_record_as_of_version() {
        let db = sled::Config::default().temporary(true).open().unwrap();
        let map = ArtifactDb::open(&db, "mymap").unwrap();

        map.write("a.png", 2, &saved("a.png", 11, 2), Some(b"two")).unwrap();
        map.write("a.png", 5, &saved("a.png", 55, 5), Some(b"five")).unwrap();
        // Neighboring names must not leak into the range.
        map.write("a.pngx", 3, &saved("a.pngx", 99, 3), Some(b"x")).unwrap();

        assert!(map.record_as_of("a.png", 1).unwrap().is_none());
        assert_eq!(map.record_as_of("a.png", 4).unwrap().unwrap().0, 2);
        let (version, record) = map.record_as_of("a.png", 9).unwrap().unwrap();
        assert_eq!(version, 5);
        assert_eq!(record.hash, 55);
        assert_eq!(map.read_blob(&record).unwrap().unwrap().to_vec(), b"five".to_vec());
    }

    #[test]
    fn alias_shares_blob() {
        let db = sled::Config::default().temporary(true).open().unwrap();
        let map = ArtifactDb::open(&db, "mymap").unwrap();

        let target = saved("a.png", 11, 2);
        map.write("a.png", 2, &target, Some(b"bytes")).unwrap();
        map.write("b.png", 3, &target, None).unwrap();

        let (_, alias) = map.record_as_of("b.png", 3).unwrap().unwrap();
        assert_eq!(map.read_blob(&alias).unwrap().unwrap().to_vec(), b"bytes".to_vec());
    }
}
