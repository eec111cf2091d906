use crate::backend::BuildVersion;

use std::ops::RangeInclusive;

/// Key of one version of one artifact name.
#[derive(Clone, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct FileKey {
    pub name: String,
    pub version: BuildVersion,
}

impl FileKey {
    pub fn new(name: impl Into<String>, version: BuildVersion) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// We implement this manually so we have control over the [`Ord`] as interpreted by [`sled`].
    ///
    /// The name bytes are followed by a NUL separator and the big-endian version, so all versions of one name are contiguous
    /// and sorted oldest first. Names must not contain NUL.
    pub fn into_sled_key(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.name.len() + 5);
        bytes.extend_from_slice(self.name.as_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&self.version.to_be_bytes());
        bytes
    }

    pub fn from_sled_key(bytes: &[u8]) -> Option<Self> {
        let split = bytes.len().checked_sub(5)?;
        let (name, rest) = bytes.split_at(split);
        if rest[0] != 0 {
            return None;
        }
        let mut version = [0; 4];
        version.copy_from_slice(&rest[1..]);
        Some(Self {
            name: String::from_utf8(name.to_vec()).ok()?,
            version: BuildVersion::from_be_bytes(version),
        })
    }

    /// Every version of `name` up to and including `version`.
    pub fn as_of_range(name: &str, version: BuildVersion) -> RangeInclusive<Vec<u8>> {
        Self::new(name, 0).into_sled_key()..=Self::new(name, version).into_sled_key()
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
    fn sled_key_orders_by_name_then_version() {
        let keys = [
            FileKey::new("a/0/1-1.png", 300),
            FileKey::new("a/0/1-1.png", 2),
            FileKey::new("a/0/1-10.png", 1),
        ];
        let mut sorted: Vec<_> = keys.iter().map(FileKey::into_sled_key).collect();
        sorted.sort();
        let decoded: Vec<_> = sorted
            .iter()
            .map(|k| FileKey::from_sled_key(k).unwrap())
            .collect();
        assert_eq!(decoded, vec![keys[1].clone(), keys[0].clone(), keys[2].clone()]);
    }
}
