use anyhow::{Context, Result};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
use std::path::{Path, PathBuf};

pub const DETECTOR_MODEL_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const RECOGNITION_MODEL_FILE: &str = "face_recognition_sface_2021dec.onnx";

/// Locate a model file inside `model_dir`, failing with the full path when it is missing.
pub fn resolve_model_path(model_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let path = model_dir.join(file_name);
    if !path.is_file() {
        anyhow::bail!("model file not found: {}", path.display());
    }
    Ok(path)
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

fn session_from_dir(model_dir: &Path, file_name: &str) -> Result<Session> {
    let path = resolve_model_path(model_dir, file_name)?;
    log::info!("loading model {}", path.display());
    session_builder()?
        .commit_from_file(&path)
        .with_context(|| format!("load model {}", path.display()))
}

pub fn recog_session(model_dir: &Path) -> Result<Session> {
    session_from_dir(model_dir, RECOGNITION_MODEL_FILE)
}

pub fn detector_session(model_dir: &Path) -> Result<Session> {
    session_from_dir(model_dir, DETECTOR_MODEL_FILE)
}
