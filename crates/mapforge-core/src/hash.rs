//! CRC32 folding helpers.
//!
//! Every hash in the render pipeline (entity fingerprints, task content hashes, mip hashes) is built by folding 32-bit
//! integers into a running CRC32. An integer is folded as its 4 big-endian bytes, continuing from the previous checksum, so
//! `crc32_add_int(b, crc32_add_int(a, 0))` is the CRC32 of the 8 bytes `a ++ b`.

use crc32fast::Hasher;

/// Continues the checksum `crc` over the big-endian bytes of `value`.
pub fn crc32_add_int(value: u32, crc: u32) -> u32 {
    let mut hasher = Hasher::new_with_initial(crc);
    hasher.update(&value.to_be_bytes());
    hasher.finalize()
}

/// Same as [`crc32_add_int`] for signed values (two's complement bits).
pub fn crc32_add_i32(value: i32, crc: u32) -> u32 {
    crc32_add_int(value as u32, crc)
}

/// Folds `values` in order, starting from `crc`.
pub fn crc32_fold(values: impl IntoIterator<Item = u32>, crc: u32) -> u32 {
    values
        .into_iter()
        .fold(crc, |crc, value| crc32_add_int(value, crc))
}

pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
