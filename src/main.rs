use std::sync::Arc;

use anyhow::Result;
use facematch::{
    config,
    engine::{FaceEngine, VisionEngine},
    server,
};
use log::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .parse_default_env()
        .init();

    let cfg = config::load_config(None)?;
    let model_dir = cfg.resolved_model_dir()?;

    let engine: Arc<dyn FaceEngine> = Arc::new(VisionEngine::new(
        model_dir.clone(),
        cfg.detection_options(),
    ));

    // Load models up front; requests retry if this fails.
    let warm = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || match warm.ensure_loaded() {
        Ok(()) => info!("face models ready"),
        Err(e) => warn!("face models not loaded yet: {e:#}"),
    });

    server::serve(&cfg, engine, model_dir).await
}
