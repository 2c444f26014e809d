use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Address to bind the HTTP listener to.
    pub bind_addr: String,
    /// TCP port for the HTTP listener.
    pub port: u16,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the embedding encryption key file.
    pub key_path: PathBuf,
    /// Directory for stored enrollment photos.
    pub upload_dir: PathBuf,
    /// Cosine similarity threshold for a positive match.
    pub similarity_threshold: f32,
    /// Detector confidence threshold.
    pub detection_threshold: f32,
    /// Use the float16 ArcFace variant instead of float32.
    pub arcface_fp16: bool,
}

impl Config {
    /// Load configuration from `PRESENCE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("PRESENCE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| presence_core::default_model_dir());

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presence");

        let db_path = std::env::var("PRESENCE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));
        let key_path = std::env::var("PRESENCE_KEY_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("embedding.key"));
        let upload_dir = std::env::var("PRESENCE_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("uploads"));

        Self {
            bind_addr: std::env::var("PRESENCE_BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_u16("PRESENCE_PORT", 8080),
            model_dir,
            db_path,
            key_path,
            upload_dir,
            similarity_threshold: env_f32("PRESENCE_SIMILARITY_THRESHOLD", 0.40),
            detection_threshold: env_f32("PRESENCE_DETECTION_THRESHOLD", 0.5),
            arcface_fp16: std::env::var("PRESENCE_ARCFACE_FP16")
                .map(|v| v != "0")
                .unwrap_or(false),
        }
    }

    /// Path to the RetinaFace detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join("retinaface.onnx")
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model (fp32 or fp16 variant).
    pub fn arcface_model_path(&self) -> String {
        let file = if self.arcface_fp16 {
            "w600k_r50_fp16.onnx"
        } else {
            "w600k_r50.onnx"
        };
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
