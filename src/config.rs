use anyhow::{Context, Result};
use facematch_vision::DetectionOptions;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    std::env::var_os("FACEMATCH_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("facematch.toml"))
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    /// Directory holding the ONNX models, also served under `/models`.
    pub model_dir: PathBuf,
    /// Faces whose nearest labeled distance is not below this are reported as unknown.
    /// SFace descriptors are L2-normalised, so 0.6 is strict (OpenCV suggests 1.128);
    /// raise it if genuine matches come back unknown.
    pub distance_threshold: f32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Request body limit in bytes.
    pub body_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            model_dir: PathBuf::from("models"),
            distance_threshold: 0.6,
            score_threshold: 0.6,
            nms_threshold: 0.3,
            body_limit: 50 * 1024 * 1024,
        }
    }
}

impl Config {
    pub fn detection_options(&self) -> DetectionOptions {
        DetectionOptions {
            score_threshold: self.score_threshold,
            nms_threshold: self.nms_threshold,
        }
    }

    /// Model directory as an absolute path; relative paths hang off the working directory.
    pub fn resolved_model_dir(&self) -> Result<PathBuf> {
        if self.model_dir.is_absolute() {
            return Ok(self.model_dir.clone());
        }
        let cwd = std::env::current_dir().context("resolving working directory")?;
        Ok(cwd.join(&self.model_dir))
    }

    /// Empty or blank values count as unset.
    fn apply_port(&mut self, port: Option<&str>) -> Result<()> {
        if let Some(raw) = port.map(str::trim).filter(|s| !s.is_empty()) {
            self.port = raw
                .parse()
                .with_context(|| format!("invalid PORT value {raw:?}"))?;
        }
        Ok(())
    }
}

/// Read the config file if present (defaults otherwise), then apply `PORT`.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    load_config_with_port(path, std::env::var("PORT").ok().as_deref())
}

fn load_config_with_port(path: Option<&Path>, port: Option<&str>) -> Result<Config> {
    let path = path.unwrap_or_else(|| CONFIG_PATH.as_path());
    let mut cfg = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config at {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
    } else {
        Config::default()
    };
    cfg.apply_port(port)?;
    Ok(cfg)
}
