//! presence-core — Face detection, recognition, and matching engine.
//!
//! Uses RetinaFace for face detection and ArcFace for face recognition,
//! both running via ONNX Runtime for CPU inference.

pub mod detector;
pub mod frame;
pub mod recognizer;
pub mod types;

mod alignment;

pub use detector::FaceDetector;
pub use frame::RgbFrame;
pub use recognizer::FaceRecognizer;
pub use types::{CosineMatcher, Embedding, FaceBox, IdentityRecord, MatchResult, Matcher};

use std::path::PathBuf;

/// Default directory for ONNX model files.
///
/// Resolves to `$XDG_DATA_HOME/presence/models`, falling back to
/// `~/.local/share/presence/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("presence/models")
}
