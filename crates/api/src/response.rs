//! Status code + JSON body returned by every handler.

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::error;

/// Body sent when a bind request lacks the `app_guid` the broker requires.
pub const REQUIRES_APP_ERROR: &str = "RequiresApp";
pub const REQUIRES_APP_DESCRIPTION: &str =
    "This service supports generation of credentials through binding an application only.";

#[derive(Debug, Clone, PartialEq)]
pub struct BrokerResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl BrokerResponse {
    /// An empty JSON object body.
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            body: json!({}),
        }
    }

    pub fn json(status: StatusCode, body: &impl Serialize) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { status, body },
            Err(err) => {
                error!(error = %err, "failed to serialize response body");
                Self::empty(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    /// `{"description": ...}`, or `{}` when there is nothing to describe.
    pub fn error(status: StatusCode, description: impl Into<String>) -> Self {
        let description = description.into();
        if description.is_empty() {
            return Self::empty(status);
        }
        Self {
            status,
            body: json!({ "description": description }),
        }
    }

    pub fn requires_app() -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            body: json!({
                "error": REQUIRES_APP_ERROR,
                "description": REQUIRES_APP_DESCRIPTION,
            }),
        }
    }

    pub fn description(&self) -> Option<&str> {
        self.body.get("description").and_then(Value::as_str)
    }
}

impl IntoResponse for BrokerResponse {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}
