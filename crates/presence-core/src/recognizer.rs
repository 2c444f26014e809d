//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional face embeddings from aligned face crops, using
//! the w600k_r50 ArcFace model (float32 or float16 variant).

use crate::alignment;
use crate::frame::RgbFrame;
use crate::types::{Embedding, FaceBox};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants (different from RetinaFace!) ---
const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, NOT 128.0
const ARCFACE_EMBEDDING_DIM: usize = 512;
/// Version tag stored with every produced embedding. The float16 variant
/// of the same weights produces comparable vectors and shares the tag.
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} — install with presence-models")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks — detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("degenerate zero-norm embedding — input crop carries no signal")]
    DegenerateEmbedding,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face recognizer.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Version tag of embeddings produced by this recognizer.
    pub fn model_version(&self) -> &'static str {
        ARCFACE_MODEL_VERSION
    }

    /// Extract a face embedding from a detected face in an RGB frame.
    ///
    /// The face must carry landmarks (from the RetinaFace detector). The
    /// face is aligned to a canonical 112×112 crop before extraction, and
    /// the returned embedding is L2-normalized.
    pub fn extract(
        &mut self,
        frame: &RgbFrame,
        face: &FaceBox,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;

        let aligned = alignment::align_face(frame, landmarks);
        let input = Self::preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let raw: Vec<f32> = raw_data.to_vec();

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        // L2-normalize. A zero-norm vector would make every downstream
        // similarity undefined, so it is rejected here.
        let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= 0.0 {
            return Err(RecognizerError::DegenerateEmbedding);
        }

        Ok(Embedding {
            values: raw.iter().map(|x| x / norm).collect(),
            model_version: ARCFACE_MODEL_VERSION.to_string(),
        })
    }

    /// Preprocess a 112×112 aligned RGB crop into a NCHW float tensor.
    fn preprocess(aligned_face: &[u8]) -> Array4<f32> {
        let size = ARCFACE_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));

        for y in 0..size {
            for x in 0..size {
                for c in 0..3 {
                    let pixel = aligned_face
                        .get((y * size + x) * 3 + c)
                        .copied()
                        .unwrap_or(0) as f32;

                    tensor[[0, c, y, x]] = (pixel - ARCFACE_MEAN) / ARCFACE_STD;
                }
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let aligned = vec![128u8; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE * 3];
        let tensor = FaceRecognizer::preprocess(&aligned);
        assert_eq!(tensor.shape(), &[1, 3, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE]);
    }

    #[test]
    fn test_preprocess_normalization() {
        let aligned = vec![128u8; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE * 3];
        let tensor = FaceRecognizer::preprocess(&aligned);
        // (128 - 127.5) / 127.5 ≈ 0.00392
        let expected = (128.0 - ARCFACE_MEAN) / ARCFACE_STD;
        assert!((tensor[[0, 0, 0, 0]] - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_channel_separation() {
        // Distinct R/G/B values must land in distinct tensor channels.
        let mut aligned = vec![0u8; ARCFACE_INPUT_SIZE * ARCFACE_INPUT_SIZE * 3];
        aligned[0] = 255; // R of pixel (0,0)
        aligned[1] = 128; // G
        aligned[2] = 0; // B

        let tensor = FaceRecognizer::preprocess(&aligned);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 0, 0]].abs() < 0.01);
        assert!((tensor[[0, 2, 0, 0]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_extract_requires_landmarks() {
        // Extraction is gated on landmarks before any session work.
        let face = FaceBox {
            x: 0.0,
            y: 0.0,
            width: 100.0,
            height: 100.0,
            confidence: 0.9,
            landmarks: None,
        };
        assert!(face.landmarks.is_none());
    }
}
