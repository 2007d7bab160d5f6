//! The broker facade: one method per platform request.

use std::sync::Arc;

use axum::http::StatusCode;
use serde::Serialize;
use tracing::{info, warn};

use svcbroker_core::job::{MSG_CONFLICT, MSG_NO_JOB_EXISTS};
use svcbroker_core::{
    BindingId, BindingRequest, BrokerJob, InstanceId, JobOutcome, JobResult, JobStatus,
    ProvisionRequest, UpdateProvisionRequest,
};
use svcbroker_infra::jobs::supervised;
use svcbroker_infra::{
    BrokerStore, DispatcherHandle, JobDispatcher, JobQueue, OperationRunner, Provisioner, Storer,
};

use crate::error::BrokerError;
use crate::options::BrokerOptions;
use crate::response::BrokerResponse;

type HandlerResult = Result<BrokerResponse, BrokerError>;

/// Body of a `last_operation` answer.
#[derive(Debug, Serialize)]
struct LastOperation<'a> {
    state: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
}

/// Request handlers over a running job engine.
///
/// Must be built inside a tokio runtime; [`Broker::new`] spawns the job
/// dispatcher.
pub struct Broker {
    options: BrokerOptions,
    runner: OperationRunner,
    queue: JobQueue,
    dispatcher: DispatcherHandle,
}

impl Broker {
    pub fn new(
        options: BrokerOptions,
        storer: Arc<dyn Storer>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Result<Self, BrokerError> {
        options.validate()?;
        let store = BrokerStore::new(storer, options.encryptor()?);
        Ok(Self::with_store(options, store, provisioner))
    }

    /// Build over an existing store. `options` are taken as already valid.
    pub fn with_store(
        options: BrokerOptions,
        store: BrokerStore,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        let runner = OperationRunner::new(store, provisioner, options.jobs);
        let dispatcher = JobDispatcher::with_runner(runner.clone()).spawn();
        let queue = dispatcher.queue();
        info!(
            require_app_guid = options.require_app_guid,
            job_timeout_secs = options.jobs.job_timeout.as_secs(),
            sync_timeout_secs = options.jobs.sync_timeout.as_secs(),
            "broker started"
        );
        Self {
            options,
            runner,
            queue,
            dispatcher,
        }
    }

    pub fn options(&self) -> &BrokerOptions {
        &self.options
    }

    pub fn store(&self) -> &BrokerStore {
        self.runner.store()
    }

    /// Stop the job dispatcher and close the store.
    ///
    /// Jobs still running are abandoned; their records stay `in progress`.
    pub async fn shutdown(self) -> Result<(), BrokerError> {
        let Self {
            runner,
            queue,
            dispatcher,
            ..
        } = self;
        drop(queue);
        dispatcher
            .shutdown()
            .await
            .map_err(|e| BrokerError::Shutdown(e.to_string()))?;
        runner.store().close().await?;
        Ok(())
    }

    /// Create a service instance.
    pub async fn provision(
        &self,
        instance_id: &str,
        req: ProvisionRequest,
        accepts_incomplete: bool,
    ) -> BrokerResponse {
        self.try_provision(instance_id, req, accepts_incomplete)
            .await
            .unwrap_or_else(BrokerResponse::from)
    }

    async fn try_provision(
        &self,
        instance_id: &str,
        req: ProvisionRequest,
        accepts_incomplete: bool,
    ) -> HandlerResult {
        let instance_id = InstanceId::parse(instance_id)?;

        if accepts_incomplete {
            return self.enqueue(BrokerJob::for_provision(instance_id, &req)).await;
        }

        let result = self.runner.provision_sync(&instance_id, &req).await;
        Ok(match result.outcome() {
            JobOutcome::Created => BrokerResponse::empty(StatusCode::CREATED),
            JobOutcome::NoDiff => BrokerResponse::empty(StatusCode::OK),
            JobOutcome::Conflict => BrokerResponse::error(StatusCode::CONFLICT, MSG_CONFLICT),
            _ => failed(&result),
        })
    }

    /// Delete a service instance.
    pub async fn deprovision(
        &self,
        instance_id: &str,
        service_id: &str,
        plan_id: &str,
        accepts_incomplete: bool,
    ) -> BrokerResponse {
        self.try_deprovision(instance_id, service_id, plan_id, accepts_incomplete)
            .await
            .unwrap_or_else(BrokerResponse::from)
    }

    async fn try_deprovision(
        &self,
        instance_id: &str,
        service_id: &str,
        plan_id: &str,
        accepts_incomplete: bool,
    ) -> HandlerResult {
        let instance_id = InstanceId::parse(instance_id)?;

        if accepts_incomplete {
            let job = BrokerJob::for_deprovision(instance_id, service_id, plan_id);
            return self.enqueue(job).await;
        }

        let result = self
            .runner
            .deprovision_sync(&instance_id, service_id, plan_id)
            .await;
        Ok(match result.outcome() {
            JobOutcome::Created => BrokerResponse::empty(StatusCode::OK),
            JobOutcome::Gone => BrokerResponse::empty(StatusCode::GONE),
            _ => failed(&result),
        })
    }

    /// Move a service instance to another plan.
    pub async fn update(
        &self,
        instance_id: &str,
        req: UpdateProvisionRequest,
        accepts_incomplete: bool,
    ) -> BrokerResponse {
        self.try_update(instance_id, req, accepts_incomplete)
            .await
            .unwrap_or_else(BrokerResponse::from)
    }

    async fn try_update(
        &self,
        instance_id: &str,
        req: UpdateProvisionRequest,
        accepts_incomplete: bool,
    ) -> HandlerResult {
        let instance_id = InstanceId::parse(instance_id)?;

        if accepts_incomplete {
            return self.enqueue(BrokerJob::for_update(instance_id, &req)).await;
        }

        let result = self.runner.update_sync(&instance_id, &req).await;
        Ok(match result.outcome() {
            JobOutcome::Created | JobOutcome::NoDiff => BrokerResponse::empty(StatusCode::OK),
            _ => failed(&result),
        })
    }

    /// Create credentials for an application.
    pub async fn bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        req: BindingRequest,
    ) -> BrokerResponse {
        self.try_bind(instance_id, binding_id, req)
            .await
            .unwrap_or_else(BrokerResponse::from)
    }

    async fn try_bind(
        &self,
        instance_id: &str,
        binding_id: &str,
        req: BindingRequest,
    ) -> HandlerResult {
        let instance_id = InstanceId::parse(instance_id)?;
        let binding_id = BindingId::parse(binding_id)?;

        if self.options.require_app_guid && req.app_guid.is_empty() {
            return Ok(BrokerResponse::requires_app());
        }

        match self.store().get_binding(&instance_id, &binding_id).await {
            Ok((stored_req, stored_resp)) if stored_req == req => {
                return Ok(BrokerResponse::json(StatusCode::OK, &stored_resp));
            }
            Ok(_) => {
                return Ok(BrokerResponse::error(
                    StatusCode::CONFLICT,
                    "a different binding exists for this binding_id",
                ));
            }
            Err(e) if e.is_key_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let provisioner = self.runner.provisioner().clone();
        let call = {
            let (instance_id, binding_id, req) =
                (instance_id.clone(), binding_id.clone(), req.clone());
            async move { provisioner.bind(&instance_id, &binding_id, &req).await }
        };
        let resp = supervised(self.options.jobs.sync_timeout, call).await?;

        self.store()
            .put_binding(&instance_id, &binding_id, &req, &resp)
            .await?;
        info!(instance_id = %instance_id, binding_id = %binding_id, "bound instance");
        Ok(BrokerResponse::json(StatusCode::CREATED, &resp))
    }

    /// Remove an application's credentials.
    pub async fn unbind(
        &self,
        instance_id: &str,
        binding_id: &str,
        service_id: &str,
        plan_id: &str,
    ) -> BrokerResponse {
        self.try_unbind(instance_id, binding_id, service_id, plan_id)
            .await
            .unwrap_or_else(BrokerResponse::from)
    }

    async fn try_unbind(
        &self,
        instance_id: &str,
        binding_id: &str,
        service_id: &str,
        plan_id: &str,
    ) -> HandlerResult {
        let instance_id = InstanceId::parse(instance_id)?;
        let binding_id = BindingId::parse(binding_id)?;

        match self.store().del_binding(&instance_id, &binding_id).await {
            Ok(()) => {}
            Err(e) if e.is_key_not_found() => return Ok(BrokerResponse::empty(StatusCode::GONE)),
            Err(e) => return Err(e.into()),
        }

        let provisioner = self.runner.provisioner().clone();
        let call = {
            let (instance_id, binding_id) = (instance_id.clone(), binding_id.clone());
            let (service_id, plan_id) = (service_id.to_string(), plan_id.to_string());
            async move {
                provisioner
                    .unbind(&instance_id, &binding_id, &service_id, &plan_id)
                    .await
            }
        };
        supervised(self.options.jobs.sync_timeout, call).await?;

        info!(instance_id = %instance_id, binding_id = %binding_id, "unbound instance");
        Ok(BrokerResponse::empty(StatusCode::OK))
    }

    /// Report the state of the instance's latest job.
    pub async fn last_operation(&self, instance_id: &str) -> BrokerResponse {
        self.try_last_operation(instance_id)
            .await
            .unwrap_or_else(BrokerResponse::from)
    }

    async fn try_last_operation(&self, instance_id: &str) -> HandlerResult {
        let instance_id = InstanceId::parse(instance_id)?;
        let result = self.queue.job_result(&instance_id).await?;

        if result.outcome() == JobOutcome::NoJob {
            return Ok(BrokerResponse::error(StatusCode::NOT_FOUND, MSG_NO_JOB_EXISTS));
        }
        Ok(BrokerResponse::json(
            StatusCode::OK,
            &LastOperation {
                state: result.status,
                description: result.description(),
            },
        ))
    }

    async fn enqueue(&self, job: BrokerJob) -> HandlerResult {
        let (instance_id, kind) = (job.instance_id.clone(), job.job_kind);
        self.queue.queue_job(job).await?;
        info!(instance_id = %instance_id, job_kind = %kind, "queued job");
        Ok(BrokerResponse::empty(StatusCode::ACCEPTED))
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

fn failed(result: &JobResult) -> BrokerResponse {
    warn!(
        instance_id = %result.instance_id,
        error = %result.error_msg,
        "operation failed"
    );
    BrokerResponse::error(StatusCode::INTERNAL_SERVER_ERROR, result.error_msg.clone())
}
