use presence_core::detector::DetectorError;
use presence_core::recognizer::RecognizerError;
use presence_core::{
    CosineMatcher, Embedding, FaceDetector, FaceRecognizer, IdentityRecord, MatchResult, Matcher,
    RgbFrame,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("no face detected in the submitted image")]
    NoFaceDetected,
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Result of an enrollment extraction.
pub struct EnrollOutcome {
    pub embedding: Embedding,
    /// Detector confidence of the selected face.
    pub quality: f32,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Enroll {
        frame: RgbFrame,
        reply: oneshot::Sender<Result<EnrollOutcome, EngineError>>,
    },
    Identify {
        frame: RgbFrame,
        gallery: Vec<IdentityRecord>,
        threshold: f32,
        reply: oneshot::Sender<Result<MatchResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Request enrollment: detect the best face, extract its embedding.
    pub async fn enroll(&self, frame: RgbFrame) -> Result<EnrollOutcome, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Enroll {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Request identification: detect, extract, compare against the gallery.
    pub async fn identify(
        &self,
        frame: RgbFrame,
        gallery: Vec<IdentityRecord>,
        threshold: f32,
    ) -> Result<MatchResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Identify {
                frame,
                gallery,
                threshold,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the inference engine on a dedicated OS thread.
///
/// Loads both ONNX models synchronously (fail-fast at startup), then
/// enters a request loop. One request is processed at a time; HTTP
/// handlers queue behind the channel.
pub fn spawn_engine(
    detector_path: &str,
    arcface_path: &str,
    detection_threshold: f32,
) -> Result<EngineHandle, EngineError> {
    let mut detector = FaceDetector::load(detector_path)?;
    detector.set_confidence_threshold(detection_threshold);
    tracing::info!(path = detector_path, "RetinaFace detector loaded");

    let mut recognizer = FaceRecognizer::load(arcface_path)?;
    tracing::info!(path = arcface_path, "ArcFace recognizer loaded");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("presence-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { frame, reply } => {
                        let result = run_enroll(&mut detector, &mut recognizer, &frame);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Identify {
                        frame,
                        gallery,
                        threshold,
                        reply,
                    } => {
                        let result =
                            run_identify(&mut detector, &mut recognizer, &frame, &gallery, threshold);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}

/// Detect the best (highest confidence) face and extract its embedding.
fn run_enroll(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    frame: &RgbFrame,
) -> Result<EnrollOutcome, EngineError> {
    let faces = detector.detect(frame)?;
    let face = faces.first().ok_or(EngineError::NoFaceDetected)?;

    tracing::info!(
        confidence = face.confidence,
        candidates = faces.len(),
        "enroll: best face selected"
    );

    let embedding = recognizer.extract(frame, face)?;

    Ok(EnrollOutcome {
        embedding,
        quality: face.confidence,
    })
}

/// Detect, extract, and compare against the gallery.
///
/// The no-face case short-circuits before any comparison.
fn run_identify(
    detector: &mut FaceDetector,
    recognizer: &mut FaceRecognizer,
    frame: &RgbFrame,
    gallery: &[IdentityRecord],
    threshold: f32,
) -> Result<MatchResult, EngineError> {
    let faces = detector.detect(frame)?;
    let face = faces.first().ok_or(EngineError::NoFaceDetected)?;

    let embedding = recognizer.extract(frame, face)?;
    let result = CosineMatcher.compare(&embedding, gallery, threshold);

    tracing::info!(
        matched = result.matched,
        similarity = result.similarity,
        gallery_size = gallery.len(),
        "identify: comparison complete"
    );

    Ok(result)
}
