use lz4_flex::{compress_prepend_size, decompress_size_prepended};

/// Frame bodies above this size are sent LZ4-compressed.
pub const COMPRESS_THRESHOLD: usize = 1024;

/// Compress a frame body using LZ4.
pub fn compress(data: &[u8]) -> Vec<u8> {
    compress_prepend_size(data)
}

/// Decompress an LZ4-compressed frame body, refusing anything that would expand past `limit`.
pub fn decompress(data: &[u8], limit: usize) -> Result<Vec<u8>, lz4_flex::block::DecompressError> {
    if let Some(prefix) = data.get(..4) {
        let declared = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        if declared > limit {
            return Err(lz4_flex::block::DecompressError::OutputTooSmall {
                expected: declared,
                actual: limit,
            });
        }
    }
    decompress_size_prepended(data)
}
