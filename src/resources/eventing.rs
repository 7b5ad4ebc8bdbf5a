// Knative eventing objects touched by the workflows
//
// An application publishes into a Channel in the integration namespace. For
// every namespace it is provisioned into, a Subscription forwards that channel
// to the namespace's default broker, and the namespace carries the injection
// label that makes Knative run the default broker.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

use super::ResourceError;
use crate::model::{ApplicationName, Namespace};

/// Namespace holding application channels and their subscriptions
pub const INTEGRATION_NAMESPACE: &str = "kyma-integration";
pub const APPLICATION_NAME_LABEL: &str = "application-name";
pub const BROKER_NAMESPACE_LABEL: &str = "broker-namespace";
pub const EVENTING_INJECTION_LABEL: &str = "knative-eventing-injection";
pub const EVENTING_INJECTION_ENABLED: &str = "enabled";
pub const SUBSCRIPTION_NAME_PREFIX: &str = "brokersub";

const CHANNEL_KIND: &str = "Channel";
const SUBSCRIPTION_KIND: &str = "Subscription";
const NAMESPACE_KIND: &str = "Namespace";

pub type Labels = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub namespace: Namespace,
    pub labels: Labels,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub name: String,
    pub namespace: Namespace,
    pub labels: Labels,
    /// Name of the channel the subscription reads from
    pub channel: String,
    pub subscriber_uri: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceResource {
    pub name: Namespace,
    pub labels: Labels,
}

impl NamespaceResource {
    pub fn default_broker_enabled(&self) -> bool {
        self.labels.get(EVENTING_INJECTION_LABEL).map(String::as_str)
            == Some(EVENTING_INJECTION_ENABLED)
    }
}

/// Selects the channel of an application
pub fn channel_labels(application: &ApplicationName) -> Labels {
    Labels::from([(APPLICATION_NAME_LABEL.to_string(), application.to_string())])
}

/// Selects the subscription of an application for one namespace
pub fn subscription_labels(application: &ApplicationName, namespace: &Namespace) -> Labels {
    Labels::from([
        (APPLICATION_NAME_LABEL.to_string(), application.to_string()),
        (BROKER_NAMESPACE_LABEL.to_string(), namespace.to_string()),
    ])
}

pub fn default_broker_uri(namespace: &Namespace) -> String {
    format!("http://default-broker.{namespace}")
}

/// `brokersub-` followed by a random suffix, like a Kubernetes generated name
pub fn generated_subscription_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{SUBSCRIPTION_NAME_PREFIX}-{}", &suffix[..5])
}

fn channel_for(application: &ApplicationName) -> Channel {
    Channel {
        name: format!("{application}-channel"),
        namespace: Namespace::from(INTEGRATION_NAMESPACE),
        labels: channel_labels(application),
    }
}

fn bare_namespace(name: Namespace) -> NamespaceResource {
    NamespaceResource {
        name,
        labels: Labels::new(),
    }
}

fn selected_by(labels: &Labels, selector: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait EventingClient: Send + Sync {
    async fn get_channel_by_labels(
        &self,
        namespace: &Namespace,
        selector: &Labels,
    ) -> Result<Channel, ResourceError>;

    async fn get_subscription_by_labels(
        &self,
        namespace: &Namespace,
        selector: &Labels,
    ) -> Result<Subscription, ResourceError>;

    async fn create_subscription(&self, subscription: &Subscription) -> Result<Subscription, ResourceError>;

    async fn update_subscription(&self, subscription: &Subscription) -> Result<Subscription, ResourceError>;

    async fn delete_subscription(&self, namespace: &Namespace, name: &str) -> Result<(), ResourceError>;

    async fn get_namespace(&self, name: &Namespace) -> Result<NamespaceResource, ResourceError>;

    async fn update_namespace(&self, namespace: &NamespaceResource) -> Result<NamespaceResource, ResourceError>;
}

#[derive(Debug, Default)]
pub struct InMemoryEventingClient {
    channels: RwLock<Vec<Channel>>,
    subscriptions: RwLock<HashMap<(Namespace, String), Subscription>>,
    namespaces: RwLock<HashMap<Namespace, NamespaceResource>>,
}

impl InMemoryEventingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels for the given applications and unlabelled namespaces
    pub fn seeded(
        applications: impl IntoIterator<Item = ApplicationName>,
        namespaces: impl IntoIterator<Item = Namespace>,
    ) -> Self {
        let mut channels: Vec<Channel> = Vec::new();
        for application in applications {
            if !channels.iter().any(|c| c.labels == channel_labels(&application)) {
                channels.push(channel_for(&application));
            }
        }
        let namespaces = namespaces
            .into_iter()
            .map(|name| (name.clone(), bare_namespace(name)))
            .collect();
        Self {
            channels: RwLock::new(channels),
            subscriptions: RwLock::default(),
            namespaces: RwLock::new(namespaces),
        }
    }

    /// Channel an application publishes into, as created by its registration
    pub async fn register_channel(&self, application: &ApplicationName) {
        let mut channels = self.channels.write().await;
        let labels = channel_labels(application);
        if channels.iter().any(|c| selected_by(&c.labels, &labels)) {
            return;
        }
        channels.push(channel_for(application));
    }

    /// Make a namespace known, without labels
    pub async fn register_namespace(&self, name: &Namespace) {
        self.namespaces
            .write()
            .await
            .entry(name.clone())
            .or_insert_with(|| bare_namespace(name.clone()));
    }

    pub async fn subscriptions(&self) -> Vec<Subscription> {
        let mut found: Vec<Subscription> = self.subscriptions.read().await.values().cloned().collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }
}

#[async_trait]
impl EventingClient for InMemoryEventingClient {
    async fn get_channel_by_labels(
        &self,
        namespace: &Namespace,
        selector: &Labels,
    ) -> Result<Channel, ResourceError> {
        self.channels
            .read()
            .await
            .iter()
            .find(|c| &c.namespace == namespace && selected_by(&c.labels, selector))
            .cloned()
            .ok_or_else(|| ResourceError::NotFound {
                kind: CHANNEL_KIND,
                name: format!("{selector:?}"),
                namespace: namespace.to_string(),
            })
    }

    async fn get_subscription_by_labels(
        &self,
        namespace: &Namespace,
        selector: &Labels,
    ) -> Result<Subscription, ResourceError> {
        let subscriptions = self.subscriptions.read().await;
        let mut matching: Vec<&Subscription> = subscriptions
            .values()
            .filter(|s| &s.namespace == namespace && selected_by(&s.labels, selector))
            .collect();
        matching.sort_by(|a, b| a.name.cmp(&b.name));
        matching
            .first()
            .map(|s| (*s).clone())
            .ok_or_else(|| ResourceError::NotFound {
                kind: SUBSCRIPTION_KIND,
                name: format!("{selector:?}"),
                namespace: namespace.to_string(),
            })
    }

    async fn create_subscription(&self, subscription: &Subscription) -> Result<Subscription, ResourceError> {
        let key = (subscription.namespace.clone(), subscription.name.clone());
        let mut subscriptions = self.subscriptions.write().await;
        if subscriptions.contains_key(&key) {
            return Err(ResourceError::AlreadyExists {
                kind: SUBSCRIPTION_KIND,
                name: subscription.name.clone(),
                namespace: subscription.namespace.to_string(),
            });
        }
        debug!(name = %subscription.name, channel = %subscription.channel, "Created Subscription");
        subscriptions.insert(key, subscription.clone());
        Ok(subscription.clone())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<Subscription, ResourceError> {
        let mut subscriptions = self.subscriptions.write().await;
        let stored = subscriptions
            .get_mut(&(subscription.namespace.clone(), subscription.name.clone()))
            .ok_or_else(|| ResourceError::NotFound {
                kind: SUBSCRIPTION_KIND,
                name: subscription.name.clone(),
                namespace: subscription.namespace.to_string(),
            })?;
        *stored = subscription.clone();
        Ok(subscription.clone())
    }

    async fn delete_subscription(&self, namespace: &Namespace, name: &str) -> Result<(), ResourceError> {
        self.subscriptions
            .write()
            .await
            .remove(&(namespace.clone(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| ResourceError::NotFound {
                kind: SUBSCRIPTION_KIND,
                name: name.to_string(),
                namespace: namespace.to_string(),
            })
    }

    async fn get_namespace(&self, name: &Namespace) -> Result<NamespaceResource, ResourceError> {
        self.namespaces
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| ResourceError::ClusterScopedNotFound {
                kind: NAMESPACE_KIND,
                name: name.to_string(),
            })
    }

    async fn update_namespace(&self, namespace: &NamespaceResource) -> Result<NamespaceResource, ResourceError> {
        let mut namespaces = self.namespaces.write().await;
        let stored = namespaces
            .get_mut(&namespace.name)
            .ok_or_else(|| ResourceError::ClusterScopedNotFound {
                kind: NAMESPACE_KIND,
                name: namespace.name.to_string(),
            })?;
        *stored = namespace.clone();
        Ok(namespace.clone())
    }
}
