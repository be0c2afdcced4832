use anyhow::Context;
use rollcall_core::{EnrollmentConfig, RecognitionConfig, ServiceConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Daemon configuration: defaults, then an optional TOML file named by
/// `ROLLCALL_CONFIG`, then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Root for samples, ledgers and the model artifact.
    pub data_dir: PathBuf,
    pub faces_dir: Option<PathBuf>,
    pub attendance_dir: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    /// SCRFD ONNX model.
    pub detector_model: Option<PathBuf>,
    /// Consecutive same-identity frames before committing attendance.
    pub confirm_frames: u32,
    /// Frame budget for one recognition session.
    pub max_frames: usize,
    pub enroll_quota: usize,
    pub enroll_sample_every: usize,
    pub enroll_max_frames: usize,
    pub knn_neighbors: usize,
}

impl Default for Config {
    fn default() -> Self {
        let recognition = RecognitionConfig::default();
        let enrollment = EnrollmentConfig::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            data_dir: default_data_dir(),
            faces_dir: None,
            attendance_dir: None,
            model_path: None,
            detector_model: None,
            confirm_frames: recognition.confirm_frames,
            max_frames: recognition.max_frames,
            enroll_quota: enrollment.quota,
            enroll_sample_every: enrollment.sample_every,
            enroll_max_frames: enrollment.max_frames,
            knn_neighbors: rollcall_core::trainer::DEFAULT_NEIGHBORS,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Overlay `ROLLCALL_*` variables. Values that fail to parse are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("ROLLCALL_DATA_DIR") {
            self.data_dir = v.into();
        }
        for (key, slot) in [
            ("ROLLCALL_FACES_DIR", &mut self.faces_dir),
            ("ROLLCALL_ATTENDANCE_DIR", &mut self.attendance_dir),
            ("ROLLCALL_MODEL_PATH", &mut self.model_path),
            ("ROLLCALL_DETECTOR_MODEL", &mut self.detector_model),
        ] {
            if let Some(v) = var(key) {
                *slot = Some(v.into());
            }
        }
        self.confirm_frames = env_parse(&var, "ROLLCALL_CONFIRM_FRAMES", self.confirm_frames);
        self.max_frames = env_parse(&var, "ROLLCALL_MAX_FRAMES", self.max_frames);
        self.enroll_quota = env_parse(&var, "ROLLCALL_ENROLL_QUOTA", self.enroll_quota);
        self.enroll_sample_every =
            env_parse(&var, "ROLLCALL_ENROLL_SAMPLE_EVERY", self.enroll_sample_every);
        self.enroll_max_frames =
            env_parse(&var, "ROLLCALL_ENROLL_MAX_FRAMES", self.enroll_max_frames);
        self.knn_neighbors = env_parse(&var, "ROLLCALL_KNN_NEIGHBORS", self.knn_neighbors);
    }

    pub fn faces_dir(&self) -> PathBuf {
        self.faces_dir.clone().unwrap_or_else(|| self.data_dir.join("faces"))
    }

    pub fn attendance_dir(&self) -> PathBuf {
        self.attendance_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("attendance"))
    }

    pub fn model_path(&self) -> PathBuf {
        self.model_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("face_recognition_model.json"))
    }

    pub fn detector_model(&self) -> PathBuf {
        self.detector_model
            .clone()
            .unwrap_or_else(|| self.data_dir.join("models").join("det_10g.onnx"))
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            recognition: RecognitionConfig {
                confirm_frames: self.confirm_frames,
                max_frames: self.max_frames,
            },
            enrollment: EnrollmentConfig {
                quota: self.enroll_quota,
                sample_every: self.enroll_sample_every,
                max_frames: self.enroll_max_frames,
            },
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parse<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, current: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(current)
}
