use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Every way a recognition request can end other than success.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid JSON body")]
    MalformedBody { status: StatusCode, message: String },

    #[error("Invalid dataset format")]
    InvalidDataset(Value),

    #[error("Missing group_img")]
    MissingGroupImage,

    #[error("No valid face descriptors could be generated from the dataset")]
    NoDescriptors,

    #[error("Failed to load face recognition models")]
    ModelLoad(String),

    #[error("Failed to process group image")]
    GroupImage(String),

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedBody { status, .. } => *status,
            ApiError::InvalidDataset(_)
            | ApiError::MissingGroupImage
            | ApiError::NoDescriptors => StatusCode::BAD_REQUEST,
            ApiError::ModelLoad(_) | ApiError::GroupImage(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> Value {
        let error = self.to_string();
        match self {
            ApiError::InvalidDataset(received) => json!({ "error": error, "received": received }),
            ApiError::MissingGroupImage | ApiError::NoDescriptors => json!({ "error": error }),
            ApiError::MalformedBody { message, .. }
            | ApiError::ModelLoad(message)
            | ApiError::GroupImage(message)
            | ApiError::Internal(message) => json!({ "error": error, "message": message }),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
