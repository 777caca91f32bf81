//! RFC 7807 problem details for the HTTP surface.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::error::Error;

const ERROR_BASE_URL: &str = "https://eventgate.dev/errors";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub error_type: String,
    pub title: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Stable machine code, as in import results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ProblemDetails {
    #[must_use]
    pub fn new(error_type: &str, title: &str, status: StatusCode) -> Self {
        Self {
            error_type: format!("{ERROR_BASE_URL}/{error_type}"),
            title: title.to_string(),
            status: status.as_u16(),
            detail: None,
            code: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }
}

/// Errors returned by handlers.
#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    /// Missing or malformed tenant header.
    MissingOrg(String),
    /// Request conflicts with current state, e.g. a job already running.
    Conflict(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Core(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingOrg(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Core(err) => match err {
                Error::Validation(_) | Error::Csv(_) => StatusCode::BAD_REQUEST,
                Error::NotFound(_) => StatusCode::NOT_FOUND,
                Error::DuplicateEvent { .. }
                | Error::InvalidTransition { .. }
                | Error::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                Error::Timeout { .. } => StatusCode::REQUEST_TIMEOUT,
                Error::Delivery(_) | Error::Http(_) => StatusCode::BAD_GATEWAY,
                Error::Config(_)
                | Error::Storage(_)
                | Error::Io(_)
                | Error::Json(_)
                | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn to_problem_details(&self) -> ProblemDetails {
        let status = self.status_code();
        match self {
            ApiError::MissingOrg(msg) => {
                ProblemDetails::new("missing-org", "Missing Organization", status)
                    .with_detail(msg.clone())
            }
            ApiError::Conflict(msg) => {
                ProblemDetails::new("conflict", "Conflict", status).with_detail(msg.clone())
            }
            ApiError::Core(err) => {
                let problem = match err {
                    Error::Validation(msg) => {
                        ProblemDetails::new("validation-error", "Validation Failed", status)
                            .with_detail(msg.clone())
                    }
                    Error::Csv(e) => ProblemDetails::new("invalid-csv", "Invalid CSV", status)
                        .with_detail(e.to_string()),
                    Error::NotFound(what) => {
                        ProblemDetails::new("not-found", "Not Found", status)
                            .with_detail(format!("{what} was not found"))
                    }
                    Error::DuplicateEvent { .. } => {
                        ProblemDetails::new("duplicate-event", "Duplicate Event", status)
                            .with_detail(err.to_string())
                    }
                    Error::InvalidTransition { .. } => {
                        ProblemDetails::new("invalid-transition", "Invalid Transition", status)
                            .with_detail(err.to_string())
                    }
                    Error::Conflict(_) => ProblemDetails::new("conflict", "Conflict", status)
                        .with_detail(err.to_string()),
                    Error::Timeout { .. } => {
                        ProblemDetails::new("timeout", "Request Timeout", status)
                            .with_detail(err.to_string())
                    }
                    Error::Delivery(_) | Error::Http(_) => {
                        ProblemDetails::new("upstream-error", "Upstream Error", status)
                            .with_detail(err.to_string())
                    }
                    _ => {
                        tracing::error!(error = %err, code = err.code(), "internal error");
                        ProblemDetails::new("internal-error", "Internal Server Error", status)
                            .with_detail("An internal error occurred. Please try again later.")
                    }
                };
                problem.with_code(err.code())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let problem = self.to_problem_details();

        let mut response = (status, Json(problem)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status() {
        let cases = [
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::NotFound("job".into()), StatusCode::NOT_FOUND),
            (
                Error::Timeout {
                    operation: "export".into(),
                    timeout_ms: 10,
                },
                StatusCode::REQUEST_TIMEOUT,
            ),
            (Error::Other("boom".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }

    #[test]
    fn internal_errors_hide_detail() {
        let problem = ApiError::from(Error::Other("secret connection string".into()))
            .to_problem_details();
        assert_eq!(problem.status, 500);
        assert!(!problem.detail.unwrap_or_default().contains("secret"));
        assert_eq!(problem.code.as_deref(), Some("INTERNAL_ERROR"));
    }
}
