use crate::backend::{BackendError, BuildVersion};

use rkyv::{AlignedVec, Archive, Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Tree;

const META_KEY: &str = "META";

#[derive(Archive, Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[archive(check_bytes)]
pub struct MapDbMetadata {
    /// Every version that was ever started, ascending.
    pub versions: Vec<BuildVersion>,
}

/// Mapping from `&str` to structured metadata, like [`MapDbMetadata`].
pub struct MetaTree {
    tree: Tree,
    // Small enough that we just keep a copy.
    cached_meta: MapDbMetadata,
}

impl MetaTree {
    pub fn open(map_name: &str, db: &sled::Db) -> Result<Self, BackendError> {
        let tree = db.open_tree(format!("{}-meta", map_name))?;
        let cached_meta = match tree.get(META_KEY)? {
            Some(bytes) => decode_meta(&bytes)?,
            None => {
                // First time opening this tree.
                let default_meta = MapDbMetadata::default();
                tree.insert(META_KEY, encode_meta(&default_meta)?.as_slice())?;
                default_meta
            }
        };
        Ok(Self { tree, cached_meta })
    }

    pub fn cached_meta(&self) -> &MapDbMetadata {
        &self.cached_meta
    }

    /// Adds `version` to the known versions. Returns `false` if it was already known.
    pub fn add_version(&mut self, version: BuildVersion) -> Result<bool, BackendError> {
        let mut new_meta = self.cached_meta.clone();
        match new_meta.versions.binary_search(&version) {
            Ok(_) => return Ok(false),
            Err(i) => new_meta.versions.insert(i, version),
        }
        let bytes = encode_meta(&new_meta)?;
        self.tree
            .transaction(|txn| write_meta(txn, &bytes))?;
        self.cached_meta = new_meta;
        Ok(true)
    }
}

fn write_meta(
    txn: &TransactionalTree,
    bytes: &[u8],
) -> Result<(), ConflictableTransactionError<BackendError>> {
    txn.insert(META_KEY, bytes)?;
    Ok(())
}

fn encode_meta(meta: &MapDbMetadata) -> Result<AlignedVec, BackendError> {
    rkyv::to_bytes::<_, 64>(meta).map_err(|e| BackendError::CorruptRecord {
        name: META_KEY.into(),
        reason: format!("{:?}", e),
    })
}

fn decode_meta(bytes: &[u8]) -> Result<MapDbMetadata, BackendError> {
    let mut aligned = AlignedVec::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);
    rkyv::from_bytes::<MapDbMetadata>(&aligned).map_err(|e| BackendError::CorruptRecord {
        name: META_KEY.into(),
        reason: format!("{:?}", e),
    })
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
