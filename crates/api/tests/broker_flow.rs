//! Black-box tests driving the broker facade end to end over an in-memory store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::json;
use serde_json::value::RawValue;
use tokio::sync::Notify;

use svcbroker_api::{Broker, BrokerOptions, BrokerResponse};
use svcbroker_core::{
    BindingId, BindingRequest, BindingResponse, InstanceId, ProvisionRequest, ProvisionResponse,
    UpdateProvisionRequest,
};
use svcbroker_infra::{InMemoryStorer, JobsConfig, Provisioner, ProvisionerError, Storer};

const KEY: &str = "0123456789abcdef";

/// Records every call; can be told to fail, panic, or hold provisions open.
#[derive(Default)]
struct RecordingProvisioner {
    calls: Mutex<Vec<String>>,
    fail_with: Mutex<Option<String>>,
    panic_on_bind: AtomicBool,
    hold: AtomicBool,
    release: Notify,
}

impl RecordingProvisioner {
    fn record(&self, call: String) -> Result<(), ProvisionerError> {
        self.calls.lock().unwrap().push(call);
        match self.fail_with.lock().unwrap().clone() {
            Some(message) => Err(ProvisionerError::new(message)),
            None => Ok(()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    async fn wait_if_held(&self) {
        if self.hold.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
    }
}

#[async_trait]
impl Provisioner for RecordingProvisioner {
    async fn provision(
        &self,
        instance_id: &InstanceId,
        req: &ProvisionRequest,
    ) -> Result<ProvisionResponse, ProvisionerError> {
        self.wait_if_held().await;
        self.record(format!("provision {instance_id} {}", req.plan_id))?;
        Ok(ProvisionResponse {
            dashboard_url: format!("https://dashboard/{instance_id}"),
        })
    }

    async fn deprovision(
        &self,
        instance_id: &InstanceId,
        _service_id: &str,
        plan_id: &str,
    ) -> Result<(), ProvisionerError> {
        self.record(format!("deprovision {instance_id} {plan_id}"))
    }

    async fn update(
        &self,
        instance_id: &InstanceId,
        req: &UpdateProvisionRequest,
    ) -> Result<(), ProvisionerError> {
        self.record(format!("update {instance_id} {}", req.plan_id))
    }

    async fn bind(
        &self,
        instance_id: &InstanceId,
        binding_id: &BindingId,
        _req: &BindingRequest,
    ) -> Result<BindingResponse, ProvisionerError> {
        if self.panic_on_bind.load(Ordering::SeqCst) {
            panic!("driver exploded");
        }
        self.record(format!("bind {instance_id} {binding_id}"))?;
        Ok(BindingResponse {
            credentials: Some(
                RawValue::from_string(format!(r#"{{"user":"{binding_id}","password":"s3cret"}}"#))
                    .unwrap(),
            ),
            syslog_drain_url: String::new(),
        })
    }

    async fn unbind(
        &self,
        instance_id: &InstanceId,
        binding_id: &BindingId,
        _service_id: &str,
        _plan_id: &str,
    ) -> Result<(), ProvisionerError> {
        self.record(format!("unbind {instance_id} {binding_id}"))
    }
}

struct TestBroker {
    broker: Broker,
    provisioner: Arc<RecordingProvisioner>,
    storer: Arc<InMemoryStorer>,
}

impl TestBroker {
    fn spawn(options: BrokerOptions) -> Self {
        svcbroker_observability::init();
        let provisioner = Arc::new(RecordingProvisioner::default());
        let storer = Arc::new(InMemoryStorer::new());
        let broker = Broker::new(
            options,
            storer.clone() as Arc<dyn Storer>,
            provisioner.clone() as Arc<dyn Provisioner>,
        )
        .expect("valid options");
        Self {
            broker,
            provisioner,
            storer,
        }
    }

    fn started() -> Self {
        Self::spawn(BrokerOptions::new(KEY))
    }

    async fn state_eventually(&self, instance_id: &str, state: &str) -> BrokerResponse {
        for _ in 0..400 {
            let resp = self.broker.last_operation(instance_id).await;
            if resp.body["state"] == state {
                return resp;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{instance_id} never reached state {state:?}");
    }
}

fn provision_request(plan_id: &str) -> ProvisionRequest {
    ProvisionRequest {
        service_id: "mysql".into(),
        plan_id: plan_id.into(),
        organization_guid: "org".into(),
        space_guid: "space".into(),
        parameters: Some(RawValue::from_string(r#"{"size":"10GB"}"#.into()).unwrap()),
    }
}

fn update_request(plan_id: &str) -> UpdateProvisionRequest {
    UpdateProvisionRequest {
        service_id: "mysql".into(),
        plan_id: plan_id.into(),
        previous_values: None,
        parameters: None,
    }
}

fn binding_request(app_guid: &str) -> BindingRequest {
    BindingRequest {
        service_id: "mysql".into(),
        plan_id: "small".into(),
        app_guid: app_guid.into(),
        parameters: None,
    }
}

#[tokio::test]
async fn sync_provision_distinguishes_created_no_diff_and_conflict() {
    let t = TestBroker::started();

    let created = t.broker.provision("db-1", provision_request("small"), false).await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body, json!({}));

    let again = t.broker.provision("db-1", provision_request("small"), false).await;
    assert_eq!(again.status, StatusCode::OK);

    let conflict = t.broker.provision("db-1", provision_request("large"), false).await;
    assert_eq!(conflict.status, StatusCode::CONFLICT);
    assert!(conflict.description().is_some());

    assert_eq!(t.provisioner.calls(), vec!["provision db-1 small"]);
}

#[tokio::test]
async fn sync_provision_failure_is_a_server_error_with_description() {
    let t = TestBroker::started();
    t.provisioner.fail_with("out of capacity");

    let resp = t.broker.provision("db-1", provision_request("small"), false).await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.description(), Some("out of capacity"));
    assert!(t.storer.is_empty());
}

#[tokio::test]
async fn blank_identifiers_are_rejected() {
    let t = TestBroker::started();

    let resp = t.broker.provision("", provision_request("small"), true).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.description(), Some("must provide parameter: instance_id"));

    let resp = t.broker.bind("db-1", " ", binding_request("app")).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.description(), Some("must provide parameter: binding_id"));

    assert!(t.provisioner.calls().is_empty());
}

#[tokio::test]
async fn async_provision_reports_progress_and_rejects_a_second_job() {
    let t = TestBroker::started();
    t.provisioner.hold.store(true, Ordering::SeqCst);

    let accepted = t.broker.provision("db-1", provision_request("small"), true).await;
    assert_eq!(accepted.status, StatusCode::ACCEPTED);

    let busy = t.broker.deprovision("db-1", "mysql", "small", true).await;
    assert_eq!(busy.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        busy.description(),
        Some("job for this instance id is already in progress")
    );

    let running = t.broker.last_operation("db-1").await;
    assert_eq!(running.status, StatusCode::OK);
    assert_eq!(running.body, json!({ "state": "in progress" }));

    t.provisioner.release.notify_one();
    let done = t.state_eventually("db-1", "succeeded").await;
    assert_eq!(done.body, json!({ "state": "succeeded" }));

    let instance = t
        .broker
        .store()
        .get_instance(&InstanceId::parse("db-1").unwrap())
        .await
        .unwrap();
    assert_eq!(instance.provision_request, provision_request("small"));
}

#[tokio::test]
async fn last_operation_without_a_job_is_not_found() {
    let t = TestBroker::started();

    let resp = t.broker.last_operation("nothing-here").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(
        resp.body,
        json!({ "description": "no job exists for this instance id" })
    );
}

#[tokio::test]
async fn async_deprovision_of_unknown_instance_fails_as_gone() {
    let t = TestBroker::started();

    let resp = t.broker.deprovision("ghost", "mysql", "small", true).await;
    assert_eq!(resp.status, StatusCode::ACCEPTED);

    let done = t.state_eventually("ghost", "failed").await;
    assert!(done.description().is_some());
    assert!(t.provisioner.calls().is_empty());
}

#[tokio::test]
async fn sync_deprovision_maps_gone_and_failure() {
    let t = TestBroker::started();

    let gone = t.broker.deprovision("db-1", "mysql", "small", false).await;
    assert_eq!(gone.status, StatusCode::GONE);

    t.broker.provision("db-1", provision_request("small"), false).await;
    let ok = t.broker.deprovision("db-1", "mysql", "small", false).await;
    assert_eq!(ok.status, StatusCode::OK);

    t.broker.provision("db-2", provision_request("small"), false).await;
    t.provisioner.fail_with("driver unavailable");
    let failed = t.broker.deprovision("db-2", "mysql", "small", false).await;
    assert_eq!(failed.status, StatusCode::INTERNAL_SERVER_ERROR);
    let description = failed.description().unwrap();
    assert!(description.contains("manual deprovisioning"), "{description}");
    assert!(description.contains("driver unavailable"), "{description}");
}

#[tokio::test]
async fn update_moves_plans_sync_and_async() {
    let t = TestBroker::started();
    t.broker.provision("db-1", provision_request("small"), false).await;

    let same = t.broker.update("db-1", update_request("small"), false).await;
    assert_eq!(same.status, StatusCode::OK);

    let moved = t.broker.update("db-1", update_request("medium"), false).await;
    assert_eq!(moved.status, StatusCode::OK);

    let queued = t.broker.update("db-1", update_request("large"), true).await;
    assert_eq!(queued.status, StatusCode::ACCEPTED);
    t.state_eventually("db-1", "succeeded").await;

    assert_eq!(
        t.provisioner.calls(),
        vec![
            "provision db-1 small",
            "update db-1 medium",
            "update db-1 large"
        ]
    );
    let instance = t
        .broker
        .store()
        .get_instance(&InstanceId::parse("db-1").unwrap())
        .await
        .unwrap();
    assert_eq!(instance.provision_request.plan_id, "large");
}

#[tokio::test]
async fn bind_is_idempotent_and_stores_credentials_encrypted() {
    let t = TestBroker::started();
    t.broker.provision("db-1", provision_request("small"), false).await;

    let created = t.broker.bind("db-1", "b-1", binding_request("app-1")).await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.body["credentials"]["user"], "b-1");

    let again = t.broker.bind("db-1", "b-1", binding_request("app-1")).await;
    assert_eq!(again.status, StatusCode::OK);
    assert_eq!(again.body, created.body);

    let different = t.broker.bind("db-1", "b-1", binding_request("app-2")).await;
    assert_eq!(different.status, StatusCode::CONFLICT);
    assert_eq!(
        different.description(),
        Some("a different binding exists for this binding_id")
    );

    assert_eq!(
        t.provisioner.calls(),
        vec!["provision db-1 small", "bind db-1 b-1"]
    );

    let (raw, _) = t.storer.get("db-1").await.unwrap();
    assert!(raw.contains("\"binding_id\":\"b-1\""));
    assert!(!raw.contains("s3cret"));
}

#[tokio::test]
async fn bind_requires_an_app_guid_when_configured() {
    let t = TestBroker::spawn(BrokerOptions::new(KEY).with_require_app_guid(true));
    t.broker.provision("db-1", provision_request("small"), false).await;

    let resp = t.broker.bind("db-1", "b-1", binding_request("")).await;
    assert_eq!(resp.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(resp.body["error"], "RequiresApp");

    let resp = t.broker.bind("db-1", "b-1", binding_request("app-1")).await;
    assert_eq!(resp.status, StatusCode::CREATED);
}

#[tokio::test]
async fn bind_panic_is_contained() {
    let t = TestBroker::started();
    t.broker.provision("db-1", provision_request("small"), false).await;
    t.provisioner.panic_on_bind.store(true, Ordering::SeqCst);

    let resp = t.broker.bind("db-1", "b-1", binding_request("app-1")).await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.description(), Some("the job failed unexpectedly"));

    let instance = t
        .broker
        .store()
        .get_instance(&InstanceId::parse("db-1").unwrap())
        .await
        .unwrap();
    assert!(instance.bindings.is_empty());
}

#[tokio::test]
async fn unbind_removes_the_binding_and_reports_missing_instances_as_gone() {
    let t = TestBroker::started();
    t.broker.provision("db-1", provision_request("small"), false).await;
    t.broker.bind("db-1", "b-1", binding_request("app-1")).await;

    let ok = t.broker.unbind("db-1", "b-1", "mysql", "small").await;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(ok.body, json!({}));

    let instance = t
        .broker
        .store()
        .get_instance(&InstanceId::parse("db-1").unwrap())
        .await
        .unwrap();
    assert!(instance.bindings.is_empty());

    let gone = t.broker.unbind("ghost", "b-1", "mysql", "small").await;
    assert_eq!(gone.status, StatusCode::GONE);
    assert_eq!(t.provisioner.calls().last().unwrap(), "unbind db-1 b-1");
}

#[tokio::test]
async fn invalid_options_are_rejected_at_construction() {
    let provisioner: Arc<dyn Provisioner> = Arc::new(RecordingProvisioner::default());
    let storer: Arc<dyn Storer> = Arc::new(InMemoryStorer::new());

    let err = Broker::new(BrokerOptions::new("too-short"), storer.clone(), provisioner.clone());
    assert!(err.is_err());

    let zero = BrokerOptions::new(KEY).with_jobs(JobsConfig::default().with_job_timeout(Duration::ZERO));
    assert!(Broker::new(zero, storer, provisioner).is_err());
}

#[tokio::test]
async fn shutdown_stops_the_dispatcher() {
    let t = TestBroker::started();
    let queued = t.broker.provision("db-1", provision_request("small"), true).await;
    assert_eq!(queued.status, StatusCode::ACCEPTED);
    t.state_eventually("db-1", "succeeded").await;

    t.broker.shutdown().await.unwrap();
}
