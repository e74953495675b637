//! Log images on disk.
//!
//! An image is saved either raw or LZ4-compressed with its size prepended.
//! Loading tells the two apart by the header signature, so both forms are
//! accepted everywhere.

use std::fs;
use std::path::Path;

use crate::error::ReplayError;
use crate::frame_store::{self, HEADER_SIGNATURE};

/// How an image is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageEncoding {
    Raw,
    #[default]
    Lz4,
}

/// Whether `bytes` start like an uncompressed image.
pub fn is_raw_image(bytes: &[u8]) -> bool {
    bytes.len() >= 8 && bytes[..8] == HEADER_SIGNATURE.to_le_bytes()
}

/// Encodes an image for storage.
pub fn encode_image(image: &[u8], encoding: ImageEncoding) -> Vec<u8> {
    match encoding {
        ImageEncoding::Raw => image.to_vec(),
        ImageEncoding::Lz4 => lz4_flex::compress_prepend_size(image),
    }
}

/// Inverse of [`encode_image`] for either encoding.
pub fn decode_image(bytes: &[u8]) -> Result<Vec<u8>, ReplayError> {
    if is_raw_image(bytes) {
        return Ok(bytes.to_vec());
    }
    lz4_flex::decompress_size_prepended(bytes).map_err(|err| ReplayError::Decompress(err.to_string()))
}

/// Writes `image` to `path`.
pub fn save_image(path: &Path, image: &[u8], encoding: ImageEncoding) -> std::io::Result<()> {
    let encoded = encode_image(image, encoding);
    fs::write(path, &encoded)?;
    tracing::info!(
        path = %path.display(),
        raw_bytes = image.len(),
        stored_bytes = encoded.len(),
        "saved log image"
    );
    Ok(())
}

/// Reads an image written by [`save_image`].
pub fn load_image(path: &Path) -> Result<Vec<u8>, ReplayError> {
    let bytes = fs::read(path)?;
    decode_image(&bytes)
}

/// Captures the global store and saves it.
pub fn save_global_image(path: &Path, encoding: ImageEncoding) -> std::io::Result<()> {
    save_image(path, &frame_store::capture_image(), encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_store::header_bytes;

    #[test]
    fn test_raw_detection() {
        assert!(is_raw_image(&header_bytes()));
        assert!(!is_raw_image(&[1, 2, 3]));
        let compressed = encode_image(&header_bytes(), ImageEncoding::Lz4);
        assert!(!is_raw_image(&compressed));
        assert_eq!(decode_image(&compressed).expect("decode"), header_bytes().to_vec());
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(matches!(
            decode_image(&[8, 0, 0, 0, 0xff]),
            Err(ReplayError::Decompress(_))
        ));
    }
}
