//! The face-recognition backend the request handler delegates to.

use anyhow::{Context, Result};
use facematch_vision::{DetectionOptions, Pipeline};
use image::DynamicImage;
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::Embedding;

/// Blocking face-recognition operations. Callers run these on the blocking pool.
pub trait FaceEngine: Send + Sync + 'static {
    /// Make sure the models are ready. Cheap once it has succeeded.
    fn ensure_loaded(&self) -> Result<()>;

    /// Descriptor of the most confident face, `None` when the image has no face.
    fn single_descriptor(&self, img: &DynamicImage) -> Result<Option<Embedding>>;

    /// One descriptor per face, in detector order.
    fn all_descriptors(&self, img: &DynamicImage) -> Result<Vec<Embedding>>;
}

/// YuNet + SFace backend. Models load on first use and stay loaded for the
/// life of the process; a failed load is retried on the next call.
pub struct VisionEngine {
    model_dir: PathBuf,
    options: DetectionOptions,
    pipeline: OnceCell<Mutex<Pipeline>>,
}

impl VisionEngine {
    pub fn new(model_dir: PathBuf, options: DetectionOptions) -> Self {
        Self {
            model_dir,
            options,
            pipeline: OnceCell::new(),
        }
    }

    /// Loads the pipeline on first call. Does not take the inference lock.
    fn loaded(&self) -> Result<&Mutex<Pipeline>> {
        self.pipeline.get_or_try_init(|| {
            log::info!("loading face models from {}", self.model_dir.display());
            Pipeline::load(&self.model_dir, self.options).map(Mutex::new)
        })
    }

    fn with_pipeline<T>(&self, f: impl FnOnce(&mut Pipeline) -> Result<T>) -> Result<T> {
        let mut pipeline = self
            .loaded()?
            .lock()
            .map_err(|_| anyhow::anyhow!("face pipeline lock poisoned"))?;
        f(&mut pipeline)
    }
}

impl FaceEngine for VisionEngine {
    fn ensure_loaded(&self) -> Result<()> {
        self.loaded()
            .map(|_| ())
            .context("loading face recognition models")
    }

    fn single_descriptor(&self, img: &DynamicImage) -> Result<Option<Embedding>> {
        self.with_pipeline(|p| Ok(p.detect_single_face(img)?.map(|f| f.embedding)))
    }

    fn all_descriptors(&self, img: &DynamicImage) -> Result<Vec<Embedding>> {
        self.with_pipeline(|p| {
            Ok(p.detect_all_faces(img)?
                .into_iter()
                .map(|f| f.embedding)
                .collect())
        })
    }
}
