use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use log::error;
use thiserror::Error;

use crate::{
    image_pipeline::ConversionError, photo_store::StorageError, song_enrichment::SongLookupError,
};

#[derive(Error, Debug)]
pub enum SnapbookError {
    #[error("Missing caller identity")]
    Unauthenticated,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Validation(String),

    #[error("Request body too large")]
    RequestTooLarge,

    #[error(transparent)]
    SongLookup(#[from] SongLookupError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

#[derive(serde::Serialize)]
struct ErrorBody {
    error: String,
}

impl SnapbookError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SongLookup(SongLookupError::InvalidUrl) => StatusCode::BAD_REQUEST,
            Self::SongLookup(SongLookupError::UpstreamStatus(_)) => StatusCode::BAD_GATEWAY,
            Self::SongLookup(SongLookupError::Fetch(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Conversion(ConversionError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Conversion(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(StorageError::InvalidPath(_)) => StatusCode::BAD_REQUEST,
            Self::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            Self::Storage(StorageError::Io(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Database(_) | Self::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SnapbookError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let message = match &self {
            Self::Database(_) | Self::Task(_) | Self::Storage(StorageError::Io(_)) => {
                "Internal error".to_string()
            }
            _ => self.to_string(),
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
