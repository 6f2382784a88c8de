use axum::response::IntoResponse;
use hyper::StatusCode;
use thiserror::Error;

use crate::processor::ProcessorError;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error(transparent)]
    Http(#[from] hyper::http::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    fn to_status_code(&self) -> StatusCode {
        match self {
            Self::Processor(ProcessorError::DuplicateSubtask) => StatusCode::CONFLICT,
            Self::Processor(_) | Self::Other(_) | Self::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.to_status_code();
        (status_code, self.to_string()).into_response()
    }
}
