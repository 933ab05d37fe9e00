use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, DefaultBodyLimit, State},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use std::{
    any::Any,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tower_http::{catch_panic::CatchPanicLayer, services::ServeDir};

use crate::config::Config;
use crate::engine::FaceEngine;
use crate::error::ApiError;
use crate::loader::ImageLoader;
use crate::matcher::{FaceMatch, FaceMatcher};
use crate::reference::{build_labeled_descriptors, is_truthy, value_text};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn FaceEngine>,
    pub loader: ImageLoader,
    pub distance_threshold: f32,
}

impl AppState {
    pub fn new(engine: Arc<dyn FaceEngine>, distance_threshold: f32) -> Self {
        Self {
            engine,
            loader: ImageLoader::default(),
            distance_threshold,
        }
    }
}

/// `POST /` recognition plus `GET /models/*` static model files.
pub fn router(state: AppState, model_dir: &Path, body_limit: usize) -> Router {
    Router::new()
        .route("/", post(recognize))
        .nest_service("/models", ServeDir::new(model_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .with_state(state)
}

pub async fn serve(
    cfg: &Config,
    engine: Arc<dyn FaceEngine>,
    model_dir: PathBuf,
) -> anyhow::Result<()> {
    let state = AppState::new(engine, cfg.distance_threshold);
    let app = router(state, &model_dir, cfg.body_limit);

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    log::info!("listening on {}", listener.local_addr()?);
    log::info!("serving models from {}", model_dir.display());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    log::info!("shutting down");
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "request handler panicked".to_string()
    };
    log::error!("request handler panicked: {message}");
    ApiError::Internal(message).into_response()
}

async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("blocking task failed")?
}

async fn recognize(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let outcome = match body {
        Ok(Json(body)) => match_group(&state, &body).await,
        Err(rejection) => Err(ApiError::MalformedBody {
            status: rejection.status(),
            message: rejection.body_text(),
        }),
    };

    match outcome {
        Ok(matches) => {
            log::info!("recognized {} face(s)", matches.len());
            Ok(Json(json!({ "success": true, "matches": matches })))
        }
        Err(e) => {
            if e.status().is_server_error() {
                log::error!("{}: {}", e, e.body());
            } else {
                log::info!("rejected request: {e}");
            }
            Err(e)
        }
    }
}

async fn match_group(state: &AppState, body: &Value) -> Result<Vec<FaceMatch>, ApiError> {
    let dataset = match body.get("dataset") {
        Some(Value::Array(items)) => items,
        other => return Err(ApiError::InvalidDataset(other.cloned().unwrap_or(Value::Null))),
    };
    let group_img = body
        .get("group_img")
        .filter(|v| is_truthy(v))
        .map(value_text)
        .ok_or(ApiError::MissingGroupImage)?;
    log::info!("matching group image {group_img} against {} dataset entries", dataset.len());

    let engine = Arc::clone(&state.engine);
    blocking(move || engine.ensure_loaded())
        .await
        .map_err(|e| ApiError::ModelLoad(format!("{e:#}")))?;

    let labeled = build_labeled_descriptors(dataset, &state.loader, &state.engine).await;
    let matcher =
        FaceMatcher::new(labeled, state.distance_threshold).ok_or(ApiError::NoDescriptors)?;

    let group = state
        .loader
        .load(&group_img)
        .await
        .map_err(|e| ApiError::GroupImage(e.to_string()))?;

    let engine = Arc::clone(&state.engine);
    let descriptors = blocking(move || engine.all_descriptors(&group))
        .await
        .map_err(|e| ApiError::Internal(format!("{e:#}")))?;
    log::debug!(
        "{} face(s) in group image, threshold {}",
        descriptors.len(),
        matcher.distance_threshold()
    );

    Ok(descriptors
        .iter()
        .map(|d| matcher.find_best_match(d))
        .collect())
}
