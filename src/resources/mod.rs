// Side-effect resources created by the provisioning workflows
//
// EventActivation is the provenance object of an event-producing service in a
// namespace. Event providers are also wired to the namespace's Knative broker
// through a Subscription. API package credentials are issued per instance. All
// of them live outside the broker storage and are reached through client traits.

pub mod credentials;
pub mod event_activation;
pub mod eventing;

use thiserror::Error;

pub use credentials::{ApiPackageCredentials, Credentials, InMemoryCredentialStore};
pub use event_activation::{EventActivation, EventActivationClient, InMemoryEventActivationClient};
pub use eventing::{
    Channel, EventingClient, InMemoryEventingClient, Labels, NamespaceResource, Subscription,
};

#[cfg(any(test, feature = "testing"))]
pub use credentials::MockApiPackageCredentials;
#[cfg(any(test, feature = "testing"))]
pub use event_activation::MockEventActivationClient;
#[cfg(any(test, feature = "testing"))]
pub use eventing::MockEventingClient;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{kind} {name:?} already exists in namespace {namespace:?}")]
    AlreadyExists {
        kind: &'static str,
        name: String,
        namespace: String,
    },

    #[error("{kind} {name:?} not found in namespace {namespace:?}")]
    NotFound {
        kind: &'static str,
        name: String,
        namespace: String,
    },

    /// Not found, for objects that do not live in a namespace
    #[error("{kind} {name:?} not found")]
    ClusterScopedNotFound { kind: &'static str, name: String },

    #[error("{0}")]
    Backend(String),
}

impl ResourceError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, ResourceError::AlreadyExists { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ResourceError::NotFound { .. } | ResourceError::ClusterScopedNotFound { .. }
        )
    }
}
