//! Writing patched class files back to disk.

use std::io::Write;
use std::path::Path;
use xxhash_rust::xxh3::xxh3_64;

/// Replace `path` with `content` atomically (tempfile + fsync + rename).
///
/// Readers see either the old file or the new one, never a torn write.
pub fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    // Tempfile must live on the same filesystem for the rename
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        Some(_) => Path::new("."),
        None => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Path has no parent directory",
            ))
        }
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// xxh3 digest in the `0x`-prefixed form rewrite plans use.
pub fn digest(bytes: &[u8]) -> String {
    format!("0x{:016x}", xxh3_64(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Hello.class");
        fs::write(&path, b"old").unwrap();

        write_atomic(&path, b"new contents").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new contents");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_atomic_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Fresh.class");
        write_atomic(&path, &[0xCA, 0xFE]).unwrap();
        assert_eq!(fs::read(&path).unwrap(), vec![0xCA, 0xFE]);
    }

    #[test]
    fn test_digest_format() {
        let d = digest(b"hello world");
        assert!(d.starts_with("0x"));
        assert_eq!(d.len(), 18);
        assert_eq!(d, digest(b"hello world"));
        assert_ne!(d, digest(b"hello world!"));
    }
}
