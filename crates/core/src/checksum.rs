//! CRC32 integrity checksums (IEEE 802.3 polynomial)

use std::io::Read;
use std::path::Path;

/// Checksum a buffer in one pass.
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Incremental CRC32 state.
///
/// Feeding data in pieces produces the same digest as a single
/// [`crc32`] call over the concatenation.
#[derive(Clone)]
pub struct Crc32 {
    inner: crc32fast::Hasher,
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc32 {
    /// Start a fresh computation.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: crc32fast::Hasher::new(),
        }
    }

    /// Extend the checksum with more data.
    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    /// Finish and return the digest.
    #[must_use]
    pub fn finalize(self) -> u32 {
        self.inner.finalize()
    }
}

/// Checksum a file by streaming it in 64KB reads.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn crc32_file(path: &Path) -> std::io::Result<u32> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Crc32::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_known_vector() {
        // Standard CRC32 check value
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let a = b"hello ";
        let b = b"world";

        let mut hasher = Crc32::new();
        hasher.update(a);
        hasher.update(b);

        assert_eq!(hasher.finalize(), crc32(b"hello world"));
    }

    #[test]
    fn test_incremental_empty_feeds() {
        let mut hasher = Crc32::new();
        hasher.update(b"");
        hasher.update(b"data");
        hasher.update(b"");

        assert_eq!(hasher.finalize(), crc32(b"data"));
    }

    #[test]
    fn test_file_matches_buffer() {
        let mut file = NamedTempFile::new().unwrap();
        // Larger than one read buffer so the streaming path loops
        let data = vec![0xA5u8; 200 * 1024];
        file.write_all(&data).unwrap();

        assert_eq!(crc32_file(file.path()).unwrap(), crc32(&data));
    }

    #[test]
    fn test_file_not_found() {
        assert!(crc32_file(Path::new("/nonexistent/file")).is_err());
    }
}
