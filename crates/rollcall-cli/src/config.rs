use std::path::PathBuf;

/// Tool configuration, loaded from environment variables.
#[derive(Clone)]
pub struct Config {
    /// Camera index (opens /dev/video{index}).
    pub camera_index: usize,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Directory holding the stores and the face-crop dataset.
    pub data_dir: PathBuf,
    /// Cosine similarity threshold for a positive descriptor match.
    pub match_threshold: f32,
    /// Number of warmup frames to discard after opening the camera.
    pub warmup_frames: usize,
    /// Face crops to collect per `capture` session.
    pub capture_samples: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("ROLLCALL_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                std::env::var("XDG_DATA_HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| {
                        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                        PathBuf::from(home).join(".local/share")
                    })
                    .join("rollcall")
            });

        let model_dir = std::env::var("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("models"));

        Self {
            camera_index: env_usize("ROLLCALL_CAMERA_INDEX", 0),
            model_dir,
            data_dir,
            match_threshold: env_f32("ROLLCALL_MATCH_THRESHOLD", 0.40),
            warmup_frames: env_usize("ROLLCALL_WARMUP_FRAMES", 4),
            capture_samples: env_usize("ROLLCALL_CAPTURE_SAMPLES", 50),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir.join("det_10g.onnx").to_string_lossy().into_owned()
    }

    /// Path to the ArcFace descriptor model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_dir.join("w600k_r50.onnx").to_string_lossy().into_owned()
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.data_dir.join("descriptors.bin")
    }

    pub fn roster_path(&self) -> PathBuf {
        self.data_dir.join("students.csv")
    }

    pub fn attendance_path(&self) -> PathBuf {
        self.data_dir.join("attendance.csv")
    }

    pub fn dataset_dir(&self) -> PathBuf {
        self.data_dir.join("dataset")
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
