//! 错误到 HTTP 响应的映射

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use qflow_core::FlowError;
use serde_json::json;
use tracing::error;

/// API 错误
#[derive(Debug)]
pub struct ApiError(pub FlowError);

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            FlowError::NotFound(_) => StatusCode::NOT_FOUND,
            FlowError::InvalidInput { .. } | FlowError::InvalidDestination(_) => {
                StatusCode::BAD_REQUEST
            }
            FlowError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            FlowError::NoActiveTicket(_)
            | FlowError::StationMismatch { .. }
            | FlowError::AlreadyDone(_)
            | FlowError::DuplicateActiveTicket(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<FlowError> for ApiError {
    fn from(err: FlowError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self.0);
        }

        let mut body = json!({
            "error": true,
            "kind": self.0.kind(),
            "message": self.0.to_string(),
            "status": status.as_u16()
        });
        if let FlowError::InvalidInput { field, .. } = &self.0 {
            body["field"] = json!(field);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qflow_core::Station;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (FlowError::NotFound("ticket 1".into()), StatusCode::NOT_FOUND),
            (FlowError::invalid("age", "too old"), StatusCode::BAD_REQUEST),
            (FlowError::InvalidDestination("TRIAGE".into()), StatusCode::BAD_REQUEST),
            (FlowError::Unauthorized("no pass".into()), StatusCode::UNAUTHORIZED),
            (FlowError::AlreadyDone("T00001".into()), StatusCode::CONFLICT),
            (
                FlowError::StationMismatch {
                    ticket: "T00001".into(),
                    expected: Station::Lab,
                    actual: Station::Payment,
                },
                StatusCode::CONFLICT,
            ),
            (FlowError::Database("locked".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
