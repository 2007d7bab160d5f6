//! Broker options, loaded from a JSON file.

use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use svcbroker_infra::crypto::{CryptoError, validate_key};
use svcbroker_infra::{ConfigError, Encryptor, JobsConfig};

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("failed to read options: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse options: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("db_encryption_key must be set")]
    MissingEncryptionKey,

    #[error("db_encryption_key: {0}")]
    EncryptionKey(#[from] CryptoError),

    #[error(transparent)]
    Jobs(#[from] ConfigError),
}

/// Settings shared by every request handler.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct BrokerOptions {
    /// AES key for binding responses at rest: 16, 24 or 32 bytes.
    #[serde(rename = "db_encryption_key")]
    pub encryption_key: String,

    /// Reject bind requests that carry no `app_guid`.
    #[serde(rename = "require_app_guid_in_bind_requests", default)]
    pub require_app_guid: bool,

    #[serde(default)]
    pub jobs: JobsConfig,
}

impl std::fmt::Debug for BrokerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerOptions")
            .field("encryption_key", &"<redacted>")
            .field("require_app_guid", &self.require_app_guid)
            .field("jobs", &self.jobs)
            .finish()
    }
}

impl BrokerOptions {
    pub fn new(encryption_key: impl Into<String>) -> Self {
        Self {
            encryption_key: encryption_key.into(),
            ..Self::default()
        }
    }

    pub fn with_require_app_guid(mut self, require: bool) -> Self {
        self.require_app_guid = require;
        self
    }

    pub fn with_jobs(mut self, jobs: JobsConfig) -> Self {
        self.jobs = jobs;
        self
    }

    /// Parse and validate options from JSON.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, OptionsError> {
        let options: Self = serde_json::from_reader(reader)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OptionsError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        if self.encryption_key.is_empty() {
            return Err(OptionsError::MissingEncryptionKey);
        }
        validate_key(self.encryption_key.as_bytes())?;
        self.jobs.validate()?;
        Ok(())
    }

    pub fn encryptor(&self) -> Result<Encryptor, OptionsError> {
        Ok(Encryptor::new(self.encryption_key.as_bytes().to_vec())?)
    }
}
