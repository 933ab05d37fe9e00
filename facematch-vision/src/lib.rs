pub mod face;
pub mod model;
pub mod pipeline;
pub mod yunet;

pub use face::{Detection, Embedding};
pub use pipeline::{DetectionOptions, FaceDescriptor, Pipeline};
