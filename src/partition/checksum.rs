//! CRC32 trailer of partition images
//!
//! The last four bytes of every image hold the CRC32 (IEEE) of everything
//! before them. Nodes verify it before accepting a tile.

use crc32fast::Hasher;

/// CRC32 over `data`
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Writes the checksum of `image[..len - 4]` into the last four bytes.
pub fn seal(image: &mut [u8]) {
    if image.len() < 4 {
        return;
    }
    let split = image.len() - 4;
    let crc = compute_checksum(&image[..split]);
    image[split..].copy_from_slice(&crc.to_le_bytes());
}

/// Whether the trailer matches the body
pub fn verify_sealed(image: &[u8]) -> bool {
    if image.len() < 4 {
        return false;
    }
    let split = image.len() - 4;
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&image[split..]);
    compute_checksum(&image[..split]) == u32::from_le_bytes(stored)
}
