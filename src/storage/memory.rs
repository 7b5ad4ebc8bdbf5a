// In-memory storage backends

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{apply_operation_update, InstanceQuery, InstanceStorage, OperationStorage, StorageError};
use crate::model::{Instance, InstanceId, InstanceOperation, InstanceState, OperationId, OperationState};

#[derive(Debug, Default)]
pub struct InMemoryInstanceStorage {
    instances: RwLock<HashMap<InstanceId, Instance>>,
}

impl InMemoryInstanceStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }
}

#[async_trait]
impl InstanceStorage for InMemoryInstanceStorage {
    async fn insert(&self, instance: &Instance) -> Result<(), StorageError> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(StorageError::InstanceAlreadyExists {
                instance_id: instance.id.clone(),
            });
        }
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn get(&self, id: &InstanceId) -> Result<Instance, StorageError> {
        self.instances
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::InstanceNotFound {
                instance_id: id.clone(),
            })
    }

    async fn remove(&self, id: &InstanceId) -> Result<(), StorageError> {
        self.instances
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StorageError::InstanceNotFound {
                instance_id: id.clone(),
            })
    }

    async fn find_one(&self, query: &InstanceQuery) -> Result<Option<Instance>, StorageError> {
        let instances = self.instances.read().await;
        let mut matching: Vec<&Instance> = instances.values().filter(|i| query.matches(i)).collect();
        // HashMap order is unstable, pick deterministically
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching.first().map(|i| (*i).clone()))
    }

    async fn find_all(&self, query: &InstanceQuery) -> Result<Vec<Instance>, StorageError> {
        let instances = self.instances.read().await;
        let mut matching: Vec<Instance> = instances
            .values()
            .filter(|i| query.matches(i))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matching)
    }

    async fn update_state(&self, id: &InstanceId, state: InstanceState) -> Result<(), StorageError> {
        let mut instances = self.instances.write().await;
        let instance = instances
            .get_mut(id)
            .ok_or_else(|| StorageError::InstanceNotFound {
                instance_id: id.clone(),
            })?;
        instance.state = state;
        Ok(())
    }
}

/// Operation log kept as one insertion-ordered `Vec` per instance
#[derive(Debug, Default)]
pub struct InMemoryOperationStorage {
    operations: RwLock<HashMap<InstanceId, Vec<InstanceOperation>>>,
}

impl InMemoryOperationStorage {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
        description: Option<Option<String>>,
    ) -> Result<(), StorageError> {
        let mut operations = self.operations.write().await;
        let operation = operations
            .get_mut(instance_id)
            .and_then(|ops| ops.iter_mut().find(|op| &op.operation_id == operation_id))
            .ok_or_else(|| StorageError::OperationNotFound {
                instance_id: instance_id.clone(),
                operation_id: operation_id.clone(),
            })?;
        apply_operation_update(operation, state, description)
    }
}

#[async_trait]
impl OperationStorage for InMemoryOperationStorage {
    async fn insert(&self, operation: &InstanceOperation) -> Result<(), StorageError> {
        let mut operations = self.operations.write().await;
        let log = operations.entry(operation.instance_id.clone()).or_default();
        if log.iter().any(|op| op.operation_id == operation.operation_id) {
            return Err(StorageError::OperationAlreadyExists {
                instance_id: operation.instance_id.clone(),
                operation_id: operation.operation_id.clone(),
            });
        }
        log.push(operation.clone());
        Ok(())
    }

    async fn get(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
    ) -> Result<InstanceOperation, StorageError> {
        self.operations
            .read()
            .await
            .get(instance_id)
            .and_then(|ops| ops.iter().find(|op| &op.operation_id == operation_id))
            .cloned()
            .ok_or_else(|| StorageError::OperationNotFound {
                instance_id: instance_id.clone(),
                operation_id: operation_id.clone(),
            })
    }

    async fn get_all(&self, instance_id: &InstanceId) -> Result<Vec<InstanceOperation>, StorageError> {
        match self.operations.read().await.get(instance_id) {
            Some(ops) if !ops.is_empty() => Ok(ops.clone()),
            _ => Err(StorageError::OperationsNotFound {
                instance_id: instance_id.clone(),
            }),
        }
    }

    async fn update_state(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
    ) -> Result<(), StorageError> {
        self.update(instance_id, operation_id, state, None).await
    }

    async fn update_state_desc(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
        description: Option<String>,
    ) -> Result<(), StorageError> {
        self.update(instance_id, operation_id, state, Some(description))
            .await
    }
}
