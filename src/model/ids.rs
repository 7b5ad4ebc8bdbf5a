// Strongly typed identifiers used across the broker

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Caller-assigned service instance identifier
    InstanceId
);
string_id!(
    /// Identifier of a single provision/deprovision attempt, also used as the OSB operation key
    OperationId
);
string_id!(
    /// OSB service (class) identifier
    ServiceId
);
string_id!(
    /// OSB service plan identifier
    ServicePlanId
);
string_id!(
    /// Identifier of a service exposed by an application
    ApplicationServiceId
);
string_id!(ApplicationName);
string_id!(Namespace);
