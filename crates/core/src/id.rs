//! Strongly-typed identifiers used across the broker.
//!
//! Identifiers are opaque strings chosen by the platform calling the broker
//! (usually GUIDs, but nothing here relies on that). The only rule enforced is
//! that they are not blank.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identifier of a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

/// Identifier of a binding, unique within its instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BindingId(String);

macro_rules! impl_string_newtype {
    ($t:ty, $param:literal) => {
        impl $t {
            /// Parse an identifier, rejecting blank values.
            pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(DomainError::MissingParameter($param));
                }
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }
    };
}

impl_string_newtype!(InstanceId, "instance_id");
impl_string_newtype!(BindingId, "binding_id");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_identifiers_are_rejected() {
        assert_eq!(
            InstanceId::parse("  "),
            Err(DomainError::MissingParameter("instance_id"))
        );
        assert_eq!(
            "".parse::<BindingId>(),
            Err(DomainError::MissingParameter("binding_id"))
        );
    }

    #[test]
    fn identifiers_serialize_as_plain_strings() {
        let id = InstanceId::parse("instance-1").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"instance-1\"");
        assert_eq!(id.to_string(), "instance-1");
    }
}
