use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use shipdesk_fulfillment::{FulfillmentError, ValidationError};

#[derive(Debug)]
pub enum AppError {
    ValidationError(String, serde_json::Value),
    NotFoundError(String),
    ConflictError(String),
    ProviderError { provider: String, operation: String, message: String },
    InternalServerError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::ValidationError(msg, details) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": msg, "details": details }),
            ),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, json!({ "error": msg })),
            AppError::ProviderError { provider, operation, message } => {
                tracing::warn!("Provider {} failed {}: {}", provider, operation, message);
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": message, "provider": provider, "operation": operation }),
                )
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": "Internal Server Error" }))
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<FulfillmentError> for AppError {
    fn from(err: FulfillmentError) -> Self {
        match err {
            FulfillmentError::Validation(ValidationError::SubmissionInFlight) => {
                AppError::ConflictError(ValidationError::SubmissionInFlight.to_string())
            }
            FulfillmentError::Validation(ValidationError::QuantityExceeded(shortfalls)) => AppError::ValidationError(
                ValidationError::QuantityExceeded(Vec::new()).to_string(),
                json!({ "shortfalls": shortfalls }),
            ),
            FulfillmentError::Validation(validation) => {
                AppError::ValidationError(validation.to_string(), serde_json::Value::Null)
            }
            FulfillmentError::Provider(failure) => AppError::ProviderError {
                provider: failure.provider,
                operation: failure.operation.as_str().to_string(),
                message: failure.error.to_string(),
            },
            err @ FulfillmentError::AlreadyCanceled { .. } => AppError::ConflictError(err.to_string()),
            FulfillmentError::NotFound(what) => AppError::NotFoundError(format!("Not found: {}", what)),
            FulfillmentError::Persistence(msg) => AppError::InternalServerError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        let cases = vec![
            (FulfillmentError::Validation(ValidationError::NothingToShip), StatusCode::BAD_REQUEST),
            (FulfillmentError::Validation(ValidationError::SubmissionInFlight), StatusCode::CONFLICT),
            (
                FulfillmentError::AlreadyCanceled { id: Uuid::new_v4(), canceled_at: Utc::now() },
                StatusCode::CONFLICT,
            ),
            (FulfillmentError::NotFound("order".to_string()), StatusCode::NOT_FOUND),
            (FulfillmentError::Persistence("disk full".to_string()), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, status) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }
}
