//! HTTP error responses
//!
//! Every error surfaced to a client is `{"error": "..."}` with the
//! appropriate status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::errors::Error;

#[derive(Debug)]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

impl HttpError {
    pub fn bad_request(message: impl Into<String>) -> HttpError {
        HttpError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> HttpError {
        HttpError {
            status: StatusCode::UNAUTHORIZED,
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> HttpError {
        HttpError {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> HttpError {
        HttpError {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn method_not_allowed(message: impl Into<String>) -> HttpError {
        HttpError {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> HttpError {
        HttpError {
            status: StatusCode::REQUEST_TIMEOUT,
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> HttpError {
        HttpError {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    pub fn too_many_requests(message: impl Into<String>) -> HttpError {
        HttpError {
            status: StatusCode::TOO_MANY_REQUESTS,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> HttpError {
        HttpError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<Error> for HttpError {
    fn from(err: Error) -> HttpError {
        match &err {
            Error::Parse(_) | Error::Validation(_) => HttpError::bad_request(err.to_string()),
            Error::Authentication(_) => HttpError::unauthorized(err.to_string()),
            Error::Authorization(_) => HttpError::forbidden(err.to_string()),
            Error::Topology(_) => HttpError::not_found(err.to_string()),
            Error::ConvergeTimeout(_) => HttpError::timeout(err.to_string()),
            _ => HttpError::internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_mapping() {
        assert_eq!(
            HttpError::from(Error::Validation("x".into())).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            HttpError::from(Error::Authorization("x".into())).status,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            HttpError::from(Error::Queue("x".into())).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            HttpError::from(Error::ConvergeTimeout("x".into())).status,
            StatusCode::REQUEST_TIMEOUT
        );
    }
}
