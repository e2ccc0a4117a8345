use rocket::http::Status;
use rocket::request::Request;
use rocket::response::{self, Responder};
use rocket::serde::json::{self, Json};

use crate::model_registry::Capability;
use crate::types::ErrorResponse;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Missing, malformed or empty request field.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Building a handle failed; the slot stays empty and the next request retries.
    #[error("failed to load {capability} model: {message}")]
    ModelLoad {
        capability: Capability,
        message: String,
    },

    #[error("inference failed: {0}")]
    Inference(String),
}

impl AppError {
    pub fn inference(err: anyhow::Error) -> Self {
        AppError::Inference(format!("{err:#}"))
    }

    pub fn status(&self) -> Status {
        match self {
            AppError::Validation(_) => Status::BadRequest,
            AppError::ModelLoad { .. } => Status::ServiceUnavailable,
            AppError::Inference(_) => Status::InternalServerError,
        }
    }
}

impl<'a> From<json::Error<'a>> for AppError {
    fn from(err: json::Error<'a>) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.status();
        if status.code >= 500 {
            tracing::error!(uri = %req.uri(), status = status.code, error = %self, "request failed");
        } else {
            tracing::warn!(uri = %req.uri(), status = status.code, error = %self, "request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            status: status.code,
        });
        (status, body).respond_to(req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_server_errors_map_to_statuses() {
        assert_eq!(
            AppError::Validation("empty".into()).status(),
            Status::BadRequest
        );
        assert_eq!(
            AppError::ModelLoad {
                capability: Capability::Generation,
                message: "offline".into(),
            }
            .status(),
            Status::ServiceUnavailable
        );
        assert_eq!(
            AppError::Inference("boom".into()).status(),
            Status::InternalServerError
        );
    }

    #[test]
    fn inference_keeps_the_error_chain() {
        let err = anyhow::anyhow!("shape mismatch").context("classifier forward");
        let msg = AppError::inference(err).to_string();
        assert_eq!(msg, "inference failed: classifier forward: shape mismatch");
    }

    #[test]
    fn model_load_names_the_capability() {
        let err = AppError::ModelLoad {
            capability: Capability::EntityTagging,
            message: "404 from hub".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to load entity-tagging model: 404 from hub"
        );
    }
}
