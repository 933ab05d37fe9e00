use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;
use std::path::Path;

use crate::face::{self, Detection, Embedding};

/// Detector thresholds applied to every image the pipeline sees.
#[derive(Debug, Clone, Copy)]
pub struct DetectionOptions {
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
        }
    }
}

/// One detected face and its descriptor.
#[derive(Debug, Clone)]
pub struct FaceDescriptor {
    pub detection: Detection,
    pub embedding: Embedding,
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub options: DetectionOptions,
}

impl Pipeline {
    /// Load both models from `model_dir`.
    pub fn load(model_dir: &Path, options: DetectionOptions) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(model_dir)?,
            encoder: crate::model::recog_session(model_dir)?,
            options,
        })
    }

    fn describe(&mut self, img: &DynamicImage, detection: Detection) -> Result<FaceDescriptor> {
        let face_img = face::align_face(img, &detection, 112).context("aligning face")?;
        let embedding = face::encode_face(&mut self.encoder, &face_img).context("encoding face")?;
        Ok(FaceDescriptor {
            detection,
            embedding,
        })
    }

    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        face::detect_faces(
            &mut self.detector,
            img,
            self.options.score_threshold,
            self.options.nms_threshold,
        )
        .context("detecting faces")
    }

    /// Highest-scoring face in the image, or `None` when there is no face.
    pub fn detect_single_face(&mut self, img: &DynamicImage) -> Result<Option<FaceDescriptor>> {
        let best = self
            .detect(img)?
            .into_iter()
            .max_by(|a, b| a.score.total_cmp(&b.score));

        match best {
            Some(detection) => Ok(Some(self.describe(img, detection)?)),
            None => Ok(None),
        }
    }

    /// Every face in the image, in detector order.
    pub fn detect_all_faces(&mut self, img: &DynamicImage) -> Result<Vec<FaceDescriptor>> {
        self.detect(img)?
            .into_iter()
            .map(|detection| self.describe(img, detection))
            .collect()
    }
}
