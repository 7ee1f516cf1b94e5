//! Upload spooling.
//!
//! Accepted payloads are written under the spool directory with a random
//! name so a batch can own (and later unlink) exactly the files it created.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

/// File extensions accepted for upload. Every entry has a matching decoder
/// container; an extension without one would only ever produce 400s.
pub const ALLOWED_EXTENSIONS: &[&str] = &["wav", "mp3", "flac", "ogg", "m4a", "aac"];

/// Case-insensitive extension allow-list check.
pub fn is_allowed_extension(ext: &str) -> bool {
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    ALLOWED_EXTENSIONS.contains(&ext.as_str())
}

/// Write `bytes` to a fresh spool file named `<uuid>.<ext>`.
pub fn spool_payload(dir: &Path, ext: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create spool dir {:?}", dir))?;
    let ext = ext.trim().trim_start_matches('.').to_ascii_lowercase();
    let path = dir.join(format!("{}.{}", Uuid::new_v4(), ext));
    std::fs::write(&path, bytes).with_context(|| format!("write spool file {:?}", path))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_is_case_insensitive() {
        assert!(is_allowed_extension("wav"));
        assert!(is_allowed_extension("WAV"));
        assert!(is_allowed_extension(".Mp3"));
        assert!(!is_allowed_extension("exe"));
        assert!(!is_allowed_extension(""));
    }

    #[test]
    fn allow_list_tracks_decoder_containers() {
        // MP4 audio decodes (isomp4 reader); WMA never will, so accepting it
        // would guarantee a decode failure for every upload.
        assert!(is_allowed_extension("m4a"));
        assert!(!is_allowed_extension("wma"));
    }

    #[test]
    fn spool_writes_payload_with_extension() {
        let dir = std::env::temp_dir().join(format!("fanout-spool-test-{}", Uuid::new_v4()));
        let path = spool_payload(&dir, "WAV", b"abc").unwrap();
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("wav"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
        std::fs::remove_file(path).unwrap();
    }
}
