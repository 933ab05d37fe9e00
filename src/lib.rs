pub mod config;
pub mod engine;
pub mod error;
pub mod loader;
pub mod matcher;
pub mod reference;
pub mod server;

// Re-export vision types for convenience
pub use facematch_vision::{face, pipeline, Embedding};
