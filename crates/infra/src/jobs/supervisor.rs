//! Deadline and panic containment around provisioner calls.
//!
//! A supervised call runs on its own task. If the deadline passes first the
//! caller gets [`CallError::TimedOut`] and the task is left running detached;
//! whatever it eventually returns is discarded. If the call panics, the panic
//! is caught at the task boundary and handed back as
//! [`CallError::Panicked`] so a single recovery point further up can log it
//! and fail the job without leaking the panic text to the platform.

use std::any::Any;
use std::backtrace::Backtrace;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;

use svcbroker_core::job::{MSG_PANIC, MSG_TIMED_OUT};

use crate::provisioner::ProvisionerError;

/// What is known about a panic: its message and where it was recovered.
#[derive(Debug)]
pub struct PanicReport {
    pub message: String,
    pub backtrace: Backtrace,
}

impl PanicReport {
    pub fn from_payload(payload: Box<dyn Any + Send + 'static>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self {
            message,
            backtrace: Backtrace::force_capture(),
        }
    }

    pub fn from_join_error(err: JoinError) -> Self {
        if err.is_panic() {
            return Self::from_payload(err.into_panic());
        }
        Self {
            message: err.to_string(),
            backtrace: Backtrace::force_capture(),
        }
    }
}

impl fmt::Display for PanicReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\n{}", self.message, self.backtrace)
    }
}

/// Failure of a supervised call.
///
/// The `Display` text of `TimedOut` and `Panicked` is what the platform sees.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("{}", MSG_TIMED_OUT)]
    TimedOut,

    #[error("{}", MSG_PANIC)]
    Panicked(PanicReport),

    #[error(transparent)]
    Failed(#[from] ProvisionerError),
}

/// Run `call` on its own task, waiting at most `deadline` for it.
pub async fn supervised<T, F>(deadline: Duration, call: F) -> Result<T, CallError>
where
    F: Future<Output = Result<T, ProvisionerError>> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::spawn(call);
    match tokio::time::timeout(deadline, task).await {
        Err(_elapsed) => Err(CallError::TimedOut),
        Ok(Ok(result)) => result.map_err(CallError::Failed),
        Ok(Err(join_err)) => Err(CallError::Panicked(PanicReport::from_join_error(join_err))),
    }
}
