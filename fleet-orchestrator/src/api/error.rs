use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fleet::{FleetError, RemoteErrorKind};
use log::{error, warn};

/// A [`FleetError`] on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub FleetError);

impl From<FleetError> for ApiError {
    fn from(e: FleetError) -> Self {
        Self(e)
    }
}

pub fn status_for(error: &FleetError) -> StatusCode {
    match error {
        FleetError::NotFound { .. } => StatusCode::NOT_FOUND,
        FleetError::Validation(_) => StatusCode::CONFLICT,
        FleetError::Remote(e) => match e.kind() {
            RemoteErrorKind::Permanent => StatusCode::BAD_GATEWAY,
            RemoteErrorKind::Transient => StatusCode::SERVICE_UNAVAILABLE,
        },
        FleetError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!("API: {} {}", status.as_u16(), self.0);
        } else {
            warn!("API: {} {}", status.as_u16(), self.0);
        }
        let body = Json(serde_json::json!({"status": "ERROR", "msg": self.0.to_string()}));
        (status, body).into_response()
    }
}
