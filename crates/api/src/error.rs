//! Failures that end a request without a protocol outcome.

use axum::http::StatusCode;
use thiserror::Error;
use tracing::error;

use svcbroker_core::DomainError;
use svcbroker_infra::jobs::CallError;
use svcbroker_infra::{PersistError, QueueError};

use crate::options::OptionsError;
use crate::response::BrokerResponse;

#[derive(Debug, Error)]
pub enum BrokerError {
    /// Bad request input, such as a blank identifier.
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A bind or unbind call failed, timed out or panicked.
    #[error(transparent)]
    Provisioner(#[from] CallError),

    #[error("job dispatcher failed to stop: {0}")]
    Shutdown(String),
}

/// Map an error to the response the platform sees.
///
/// Provisioner messages are meant for the platform and are passed on; store
/// and queue failures are logged and answered with an empty 500.
pub fn broker_error_to_response(err: BrokerError) -> BrokerResponse {
    match err {
        BrokerError::Domain(e) => BrokerResponse::error(StatusCode::BAD_REQUEST, e.to_string()),
        BrokerError::Queue(e) if e.is_job_exists() => {
            BrokerResponse::error(StatusCode::TOO_MANY_REQUESTS, e.to_string())
        }
        BrokerError::Provisioner(CallError::Panicked(report)) => {
            error!(panic = %report.message, backtrace = %report.backtrace, "provisioner panicked");
            BrokerResponse::error(
                StatusCode::INTERNAL_SERVER_ERROR,
                CallError::Panicked(report).to_string(),
            )
        }
        BrokerError::Provisioner(e) => {
            error!(error = %e, "provisioner call failed");
            BrokerResponse::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        other => {
            error!(error = %other, "request failed");
            BrokerResponse::empty(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

impl From<BrokerError> for BrokerResponse {
    fn from(err: BrokerError) -> Self {
        broker_error_to_response(err)
    }
}
