use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_NAME: &str = "sfmsync.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// How the textual model column of a camera file becomes a model id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTagPolicy {
    /// Store SIMPLE_PINHOLE for every camera regardless of the file.
    #[default]
    Collapse,
    /// Map the tag (e.g. `PINHOLE`, `OPENCV`) to its model id.
    Map,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub colmap_binary: String,
    pub database_path: PathBuf,
    pub image_path: PathBuf,
    pub text_path: PathBuf,
    pub cameras_file: PathBuf,
    pub sparse_path: PathBuf,
    pub triangulated_path: PathBuf,
    pub ref_images_file: PathBuf,
    pub alignment_max_error: f64,
    pub model_tags: ModelTagPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            colmap_binary: "colmap".to_string(),
            database_path: PathBuf::from("database.db"),
            image_path: PathBuf::from("images"),
            text_path: PathBuf::from("text"),
            cameras_file: PathBuf::from("text/cameras.txt"),
            sparse_path: PathBuf::from("sparse"),
            triangulated_path: PathBuf::from("pointTriangulator"),
            ref_images_file: PathBuf::from("text/imageRefPos.txt"),
            alignment_max_error: 3.0,
            model_tags: ModelTagPolicy::Collapse,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// A reconstruction workspace. Every relative path is resolved against
/// `base_dir`; the process working directory is never changed.
#[derive(Debug, Clone)]
pub struct Workspace {
    base_dir: PathBuf,
    pub config: PipelineConfig,
}

impl Workspace {
    pub fn new(base_dir: impl Into<PathBuf>, config: PipelineConfig) -> Self {
        Self {
            base_dir: base_dir.into(),
            config,
        }
    }

    /// Load `sfmsync.json` from the workspace if it exists, else defaults.
    pub fn open(base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let base_dir = base_dir.into();
        let config_path = base_dir.join(CONFIG_FILE_NAME);
        let config = if config_path.is_file() {
            log::info!("Loading config from {}", config_path.display());
            PipelineConfig::load(&config_path)?
        } else {
            PipelineConfig::default()
        };
        Ok(Self { base_dir, config })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Absolute paths pass through unchanged.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.base_dir.join(path)
    }

    pub fn database_path(&self) -> PathBuf {
        self.resolve(&self.config.database_path)
    }

    pub fn image_path(&self) -> PathBuf {
        self.resolve(&self.config.image_path)
    }

    pub fn text_path(&self) -> PathBuf {
        self.resolve(&self.config.text_path)
    }

    pub fn cameras_file(&self) -> PathBuf {
        self.resolve(&self.config.cameras_file)
    }

    pub fn sparse_path(&self) -> PathBuf {
        self.resolve(&self.config.sparse_path)
    }

    /// First reconstructed model written by the mapper.
    pub fn sparse_model_path(&self) -> PathBuf {
        self.sparse_path().join("0")
    }

    pub fn triangulated_path(&self) -> PathBuf {
        self.resolve(&self.config.triangulated_path)
    }

    pub fn ref_images_file(&self) -> PathBuf {
        self.resolve(&self.config.ref_images_file)
    }
}
