//! The pluggable backend that does the real provisioning work.

use async_trait::async_trait;
use thiserror::Error;

use svcbroker_core::{
    BindingId, BindingRequest, BindingResponse, InstanceId, ProvisionRequest, ProvisionResponse,
    UpdateProvisionRequest,
};

/// Failure reported by a [`Provisioner`].
///
/// The message is shown to the platform as-is, so drivers should keep
/// internal detail out of it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProvisionerError {
    message: String,
}

impl ProvisionerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ProvisionerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ProvisionerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// A service type managed by the broker.
///
/// Provision, deprovision and update run under deadlines inside the job
/// engine and may be abandoned mid-flight when a deadline passes; the call is
/// not cancelled, its result is discarded. Bind and unbind are called on behalf
/// of request handlers under the sync deadline.
#[async_trait]
pub trait Provisioner: Send + Sync + 'static {
    async fn provision(
        &self,
        instance_id: &InstanceId,
        req: &ProvisionRequest,
    ) -> Result<ProvisionResponse, ProvisionerError>;

    async fn deprovision(
        &self,
        instance_id: &InstanceId,
        service_id: &str,
        plan_id: &str,
    ) -> Result<(), ProvisionerError>;

    async fn update(
        &self,
        instance_id: &InstanceId,
        req: &UpdateProvisionRequest,
    ) -> Result<(), ProvisionerError>;

    async fn bind(
        &self,
        instance_id: &InstanceId,
        binding_id: &BindingId,
        req: &BindingRequest,
    ) -> Result<BindingResponse, ProvisionerError>;

    async fn unbind(
        &self,
        instance_id: &InstanceId,
        binding_id: &BindingId,
        service_id: &str,
        plan_id: &str,
    ) -> Result<(), ProvisionerError>;
}
