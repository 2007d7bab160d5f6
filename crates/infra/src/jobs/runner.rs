//! Provision, deprovision and update, in sync and async flavours.
//!
//! Both flavours do the same work. They differ in the deadline on the
//! provisioner call (`sync_timeout` for a caller blocked on the answer,
//! `job_timeout` for a queued job) and in the message reported on timeout.
//!
//! Every provisioner call goes through [`supervised`]. A contained panic
//! propagates with `?` as a [`PanicReport`] up to [`OperationRunner::recover`],
//! the one place that logs it and turns it into a failed result.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use svcbroker_core::{
    BrokerJob, Instance, InstanceId, JobKind, JobResult, ProvisionRequest, UpdateProvisionRequest,
};

use super::supervisor::{CallError, PanicReport, supervised};
use crate::config::JobsConfig;
use crate::persistence::BrokerStore;
use crate::provisioner::Provisioner;

/// How the caller waits for an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// A request handler is blocked on the result.
    Sync,
    /// The operation runs as a queued job.
    Async,
}

type RunResult = Result<JobResult, PanicReport>;

/// Runs operations against the provisioner and the broker's records.
#[derive(Clone)]
pub struct OperationRunner {
    store: BrokerStore,
    provisioner: Arc<dyn Provisioner>,
    config: JobsConfig,
}

impl OperationRunner {
    pub fn new(store: BrokerStore, provisioner: Arc<dyn Provisioner>, config: JobsConfig) -> Self {
        Self {
            store,
            provisioner,
            config,
        }
    }

    pub fn store(&self) -> &BrokerStore {
        &self.store
    }

    pub fn provisioner(&self) -> &Arc<dyn Provisioner> {
        &self.provisioner
    }

    pub fn config(&self) -> &JobsConfig {
        &self.config
    }

    pub async fn provision_sync(&self, instance_id: &InstanceId, req: &ProvisionRequest) -> JobResult {
        let run = self.provision(instance_id, req, Mode::Sync).await;
        self.recover(instance_id, JobKind::Provision, run)
    }

    pub async fn deprovision_sync(
        &self,
        instance_id: &InstanceId,
        service_id: &str,
        plan_id: &str,
    ) -> JobResult {
        let run = self
            .deprovision(instance_id, service_id, plan_id, Mode::Sync)
            .await;
        self.recover(instance_id, JobKind::Deprovision, run)
    }

    pub async fn update_sync(&self, instance_id: &InstanceId, req: &UpdateProvisionRequest) -> JobResult {
        let run = self.update(instance_id, req, Mode::Sync).await;
        self.recover(instance_id, JobKind::Update, run)
    }

    /// Run a queued job to completion.
    pub async fn run_job(&self, job: &BrokerJob) -> JobResult {
        let id = &job.instance_id;
        info!(
            instance_id = %id,
            job_kind = %job.job_kind,
            service_id = %job.service_id,
            plan_id = %job.plan_id,
            "dispatching job"
        );

        let run = match job.job_kind {
            JobKind::Provision => {
                self.provision(id, &job.provision_request(), Mode::Async)
                    .await
            }
            JobKind::Deprovision => {
                self.deprovision(id, &job.service_id, &job.plan_id, Mode::Async)
                    .await
            }
            JobKind::Update => self.update(id, &job.update_request(), Mode::Async).await,
        };
        self.recover(id, job.job_kind, run)
    }

    /// Log a contained panic and fail the operation with a generic message.
    fn recover(&self, instance_id: &InstanceId, kind: JobKind, run: RunResult) -> JobResult {
        run.unwrap_or_else(|report| {
            error!(
                instance_id = %instance_id,
                job_kind = %kind,
                panic = %report.message,
                backtrace = %report.backtrace,
                "job panicked"
            );
            JobResult::panicked(instance_id.clone())
        })
    }

    fn deadline(&self, mode: Mode) -> Duration {
        match mode {
            Mode::Sync => self.config.sync_timeout,
            Mode::Async => self.config.job_timeout,
        }
    }

    /// Turn a failed call into a failed result, or propagate a panic.
    fn call_failed(instance_id: &InstanceId, kind: JobKind, mode: Mode, err: CallError) -> RunResult {
        let message = match (err, mode) {
            (CallError::Panicked(report), _) => return Err(report),
            (CallError::TimedOut, Mode::Sync) => sync_timeout_message(kind).to_string(),
            (err, _) => err.to_string(),
        };
        Ok(JobResult::failed(instance_id.clone(), message))
    }

    async fn provision(&self, instance_id: &InstanceId, req: &ProvisionRequest, mode: Mode) -> RunResult {
        match self.store.get_instance(instance_id).await {
            Ok(existing) if existing.provision_request == *req => {
                return Ok(JobResult::no_diff(instance_id.clone()));
            }
            Ok(_) => return Ok(JobResult::conflict(instance_id.clone())),
            Err(e) if e.is_key_not_found() => {}
            Err(e) => return Ok(JobResult::failed(instance_id.clone(), e.to_string())),
        }

        let provisioner = self.provisioner.clone();
        let call_id = instance_id.clone();
        let call_req = req.clone();
        let call = supervised(self.deadline(mode), async move {
            provisioner.provision(&call_id, &call_req).await
        })
        .await;
        let response = match call {
            Ok(response) => response,
            Err(err) => return Self::call_failed(instance_id, JobKind::Provision, mode, err),
        };

        let instance = Instance::new(req.clone(), response);
        if let Err(e) = self.store.put_instance(instance_id, instance).await {
            let message = format!(
                "storing provisioned instance failed (there may be an orphaned service) for id: {instance_id}, err: {e}"
            );
            error!(instance_id = %instance_id, error = %e, "{message}");
            return Ok(JobResult::failed(instance_id.clone(), message));
        }

        Ok(JobResult::succeeded(instance_id.clone()))
    }

    async fn deprovision(
        &self,
        instance_id: &InstanceId,
        service_id: &str,
        plan_id: &str,
        mode: Mode,
    ) -> RunResult {
        match self.store.del_instance(instance_id).await {
            Ok(()) => {}
            Err(e) if e.is_key_not_found() => return Ok(JobResult::gone(instance_id.clone())),
            Err(e) => return Ok(JobResult::failed(instance_id.clone(), e.to_string())),
        }

        let provisioner = self.provisioner.clone();
        let call_id = instance_id.clone();
        let (service_id, plan_id) = (service_id.to_string(), plan_id.to_string());
        let call = supervised(self.deadline(mode), async move {
            provisioner.deprovision(&call_id, &service_id, &plan_id).await
        })
        .await;

        match call {
            Ok(()) => Ok(JobResult::succeeded(instance_id.clone())),
            Err(CallError::Failed(e)) => {
                let message = format!(
                    "failed to deprovision instance, this may require manual deprovisioning id: {instance_id}, err: {e}"
                );
                warn!(instance_id = %instance_id, error = %e, "{message}");
                Ok(JobResult::failed(instance_id.clone(), message))
            }
            Err(err) => Self::call_failed(instance_id, JobKind::Deprovision, mode, err),
        }
    }

    async fn update(
        &self,
        instance_id: &InstanceId,
        req: &UpdateProvisionRequest,
        mode: Mode,
    ) -> RunResult {
        let mut instance = match self.store.get_instance(instance_id).await {
            Ok(instance) => instance,
            Err(e) => return Ok(JobResult::failed(instance_id.clone(), e.to_string())),
        };
        if instance.provision_request.plan_id == req.plan_id {
            return Ok(JobResult::no_diff(instance_id.clone()));
        }

        let provisioner = self.provisioner.clone();
        let call_id = instance_id.clone();
        let call_req = req.clone();
        let call = supervised(self.deadline(mode), async move {
            provisioner.update(&call_id, &call_req).await
        })
        .await;
        if let Err(err) = call {
            return Self::call_failed(instance_id, JobKind::Update, mode, err);
        }

        instance.provision_request.plan_id = req.plan_id.clone();
        if let Err(e) = self.store.put_instance(instance_id, instance).await {
            let message = format!(
                "failed to update instance, inconsistency may exist between actual instance and what the broker knows for id: {instance_id}, err: {e}"
            );
            error!(instance_id = %instance_id, error = %e, "{message}");
            return Ok(JobResult::failed(instance_id.clone(), message));
        }

        Ok(JobResult::succeeded(instance_id.clone()))
    }
}

impl std::fmt::Debug for OperationRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationRunner")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Message reported when a blocked caller stops waiting on the provisioner.
pub(crate) fn sync_timeout_message(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Provision => "Timed out provisioning service",
        JobKind::Deprovision => "Timed out deprovisioning service instance",
        JobKind::Update => "Timed out updating service instance",
    }
}
