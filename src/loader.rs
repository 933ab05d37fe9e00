use image::DynamicImage;
use reqwest::{Client, StatusCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to fetch image: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Failed to fetch image: {0}")]
    Status(StatusCode),

    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("image decode task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Fetches and decodes remote images. No retry, no cache, transport-default timeouts.
#[derive(Debug, Clone, Default)]
pub struct ImageLoader {
    client: Client,
}

impl ImageLoader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn load(&self, url: &str) -> Result<DynamicImage, LoadError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LoadError::Status(status));
        }
        let bytes = response.bytes().await?;
        log::debug!("fetched {} bytes from {}", bytes.len(), url);

        let img = tokio::task::spawn_blocking(move || image::load_from_memory(&bytes)).await??;
        Ok(img)
    }
}
