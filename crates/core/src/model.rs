//! Records exchanged with the platform and persisted per service instance.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::schema::{SCHEMA_VERSION, Versioned};

/// Opaque, driver-specific JSON carried verbatim.
///
/// Kept as raw JSON so it round-trips byte for byte and compares as raw bytes.
pub type Parameters = Option<Box<RawValue>>;

/// Compare two opaque JSON payloads as raw bytes.
pub fn raw_json_eq(a: &Parameters, b: &Parameters) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.get().as_bytes() == b.get().as_bytes(),
        _ => false,
    }
}

/// Stored for every provisioned service instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instance {
    pub provision_request: ProvisionRequest,
    pub provision_response: ProvisionResponse,
    #[serde(default)]
    pub bindings: Vec<Binding>,
    /// Schema version of the stored record.
    #[serde(default)]
    pub version: i64,
}

impl Instance {
    pub fn new(provision_request: ProvisionRequest, provision_response: ProvisionResponse) -> Self {
        Self {
            provision_request,
            provision_response,
            bindings: Vec::new(),
            version: SCHEMA_VERSION,
        }
    }

    pub fn binding(&self, binding_id: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.binding_id == binding_id)
    }
}

impl Versioned for Instance {
    fn schema_version(&self) -> i64 {
        self.version
    }

    fn stamp_schema_version(&mut self) {
        self.version = SCHEMA_VERSION;
    }
}

/// A binding stored inside its [`Instance`].
///
/// `binding_response` holds the encrypted, base64-encoded JSON of the
/// [`BindingResponse`]; it is never stored in plaintext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Binding {
    pub binding_id: String,
    pub binding_request: BindingRequest,
    pub binding_response: String,
}

/// Request to provision a service instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub service_id: String,
    pub plan_id: String,
    pub organization_guid: String,
    pub space_guid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Parameters,
}

impl PartialEq for ProvisionRequest {
    fn eq(&self, other: &Self) -> bool {
        self.service_id == other.service_id
            && self.plan_id == other.plan_id
            && self.organization_guid == other.organization_guid
            && self.space_guid == other.space_guid
            && raw_json_eq(&self.parameters, &other.parameters)
    }
}

/// Returned by a provisioner for a new instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionResponse {
    #[serde(default)]
    pub dashboard_url: String,
}

/// Request to move an instance to a new plan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateProvisionRequest {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_values: Option<PreviousValues>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Parameters,
}

/// Values the instance had before an update, as reported by the platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousValues {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub space_id: String,
}

/// Request to bind an application to an instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingRequest {
    pub service_id: String,
    pub plan_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub app_guid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Parameters,
}

impl PartialEq for BindingRequest {
    fn eq(&self, other: &Self) -> bool {
        self.service_id == other.service_id
            && self.plan_id == other.plan_id
            && self.app_guid == other.app_guid
            && raw_json_eq(&self.parameters, &other.parameters)
    }
}

/// Credentials handed back for a binding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BindingResponse {
    #[serde(default)]
    pub credentials: Parameters,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub syslog_drain_url: String,
}

impl PartialEq for BindingResponse {
    fn eq(&self, other: &Self) -> bool {
        self.syslog_drain_url == other.syslog_drain_url
            && raw_json_eq(&self.credentials, &other.credentials)
    }
}
