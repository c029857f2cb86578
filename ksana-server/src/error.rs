use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ksana_core::CoreError;
use serde::Serialize;

/// The `{error, message}` body every failing response carries, per the
/// core's error taxonomy: `error` is the kind, `message` is the rendered
/// detail.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Wraps `CoreError` so it can be returned directly from a handler via `?`
/// and turned into the right status code + JSON body.
#[derive(Debug)]
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            CoreError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            CoreError::Persistence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "persistence"),
            CoreError::Cancelled => (StatusCode::SERVICE_UNAVAILABLE, "cancelled"),
        };
        let body = ErrorBody {
            error: kind.to_owned(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorBody {
            error: "unauthorized".to_owned(),
            message: "missing or invalid API key".to_owned(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let err: ApiError = CoreError::NotFound("job-1".to_owned()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn validation_maps_to_400() {
        let err: ApiError = CoreError::Validation("name required".to_owned()).into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
