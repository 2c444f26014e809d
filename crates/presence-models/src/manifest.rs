//! Inference artifact manifest.
//!
//! Pins the file name, role, precision variant, and SHA-256 digest of
//! every model the serving pipeline may load. The manifest is embedded at
//! compile time from `contrib/models/manifest.toml`.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::OnceLock;

/// Compile-time embedded artifact manifest.
const MANIFEST_TOML: &str = include_str!("../../../contrib/models/manifest.toml");

static MANIFEST: OnceLock<Manifest> = OnceLock::new();

#[derive(Debug, Clone, Deserialize)]
pub struct Manifest {
    #[serde(rename = "artifact")]
    pub artifacts: Vec<Artifact>,
}

/// One pinned model file.
#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    pub file: String,
    pub role: String,
    /// Precision variant: "float32" or "float16".
    pub variant: String,
    pub sha256: String,
    pub input_size: Option<usize>,
    pub embedding_dim: Option<usize>,
}

/// The embedded manifest. Panics only on a malformed embedded file, which
/// is a build defect, not a runtime condition.
pub fn manifest() -> &'static Manifest {
    MANIFEST.get_or_init(|| {
        toml::from_str::<Manifest>(MANIFEST_TOML).expect("embedded manifest is malformed")
    })
}

/// Look up an artifact by file name.
pub fn lookup(file_name: &str) -> Option<&'static Artifact> {
    manifest().artifacts.iter().find(|a| a.file == file_name)
}

/// Hex SHA-256 digest of a file.
pub fn file_digest(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_manifest_parses() {
        let m = manifest();
        assert_eq!(m.artifacts.len(), 3);
    }

    #[test]
    fn test_manifest_covers_both_recognizer_variants() {
        let variants: Vec<&str> = manifest()
            .artifacts
            .iter()
            .filter(|a| a.role == "recognizer")
            .map(|a| a.variant.as_str())
            .collect();
        assert!(variants.contains(&"float32"));
        assert!(variants.contains(&"float16"));
    }

    #[test]
    fn test_lookup_by_file_name() {
        let a = lookup("retinaface.onnx").unwrap();
        assert_eq!(a.role, "detector");
        assert_eq!(a.input_size, Some(640));
        assert!(lookup("nonexistent.onnx").is_none());
    }

    #[test]
    fn test_digests_are_hex_sha256() {
        for a in &manifest().artifacts {
            assert_eq!(a.sha256.len(), 64, "{}", a.file);
            assert!(a.sha256.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn test_file_digest_known_value() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("abc.bin");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_digest(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
