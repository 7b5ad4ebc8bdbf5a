// JSON file storage backend
//
// The whole store is one JSON document. Every mutation is applied to a copy,
// written to a temporary file and renamed over the original, so a crash leaves
// either the old or the new document on disk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{apply_operation_update, InstanceQuery, InstanceStorage, OperationStorage, StorageError};
use crate::model::{Instance, InstanceId, InstanceOperation, InstanceState, OperationId, OperationState};

const DOCUMENT_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StorageDocument {
    version: String,
    instances: BTreeMap<InstanceId, Instance>,
    operations: BTreeMap<InstanceId, Vec<InstanceOperation>>,
}

impl Default for StorageDocument {
    fn default() -> Self {
        Self {
            version: DOCUMENT_VERSION.to_string(),
            instances: BTreeMap::new(),
            operations: BTreeMap::new(),
        }
    }
}

/// File-backed implementation of both [`InstanceStorage`] and [`OperationStorage`]
#[derive(Debug)]
pub struct FileSystemStorage {
    path: PathBuf,
    document: Mutex<StorageDocument>,
}

impl FileSystemStorage {
    /// Open the store at `path`, starting empty when the file does not exist yet
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let document = match fs::read_to_string(&path).await {
            Ok(content) => {
                let document: StorageDocument = serde_json::from_str(&content)?;
                if document.version != DOCUMENT_VERSION {
                    return Err(StorageError::Backend(format!(
                        "unsupported storage document version {} in {}",
                        document.version,
                        path.display()
                    )));
                }
                info!(
                    path = %path.display(),
                    instances = document.instances.len(),
                    "Loaded broker storage"
                );
                document
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StorageDocument::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, document: &StorageDocument) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let serialized = serde_json::to_string_pretty(document)?;

        // Write to temporary file first, then rename (atomic operation)
        let temp_file = format!("{}.tmp", self.path.display());
        fs::write(&temp_file, serialized).await?;
        fs::rename(&temp_file, &self.path).await?;
        debug!(path = %self.path.display(), "Persisted broker storage");
        Ok(())
    }

    async fn read<T>(&self, f: impl FnOnce(&StorageDocument) -> T) -> T {
        let document = self.document.lock().await;
        f(&document)
    }

    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut StorageDocument) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let mut document = self.document.lock().await;
        let mut next = document.clone();
        let result = f(&mut next)?;
        self.persist(&next).await?;
        *document = next;
        Ok(result)
    }
}

fn update_operation(
    document: &mut StorageDocument,
    instance_id: &InstanceId,
    operation_id: &OperationId,
    state: OperationState,
    description: Option<Option<String>>,
) -> Result<(), StorageError> {
    let operation = document
        .operations
        .get_mut(instance_id)
        .and_then(|ops| ops.iter_mut().find(|op| &op.operation_id == operation_id))
        .ok_or_else(|| StorageError::OperationNotFound {
            instance_id: instance_id.clone(),
            operation_id: operation_id.clone(),
        })?;
    apply_operation_update(operation, state, description)
}

#[async_trait]
impl InstanceStorage for FileSystemStorage {
    async fn insert(&self, instance: &Instance) -> Result<(), StorageError> {
        self.mutate(|doc| {
            if doc.instances.contains_key(&instance.id) {
                return Err(StorageError::InstanceAlreadyExists {
                    instance_id: instance.id.clone(),
                });
            }
            doc.instances.insert(instance.id.clone(), instance.clone());
            Ok(())
        })
        .await
    }

    async fn get(&self, id: &InstanceId) -> Result<Instance, StorageError> {
        self.read(|doc| doc.instances.get(id).cloned())
            .await
            .ok_or_else(|| StorageError::InstanceNotFound {
                instance_id: id.clone(),
            })
    }

    async fn remove(&self, id: &InstanceId) -> Result<(), StorageError> {
        self.mutate(|doc| {
            doc.instances
                .remove(id)
                .map(|_| ())
                .ok_or_else(|| StorageError::InstanceNotFound {
                    instance_id: id.clone(),
                })
        })
        .await
    }

    async fn find_one(&self, query: &InstanceQuery) -> Result<Option<Instance>, StorageError> {
        Ok(self
            .read(|doc| doc.instances.values().find(|i| query.matches(i)).cloned())
            .await)
    }

    async fn find_all(&self, query: &InstanceQuery) -> Result<Vec<Instance>, StorageError> {
        Ok(self
            .read(|doc| {
                doc.instances
                    .values()
                    .filter(|i| query.matches(i))
                    .cloned()
                    .collect()
            })
            .await)
    }

    async fn update_state(&self, id: &InstanceId, state: InstanceState) -> Result<(), StorageError> {
        self.mutate(|doc| {
            let instance = doc
                .instances
                .get_mut(id)
                .ok_or_else(|| StorageError::InstanceNotFound {
                    instance_id: id.clone(),
                })?;
            instance.state = state;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl OperationStorage for FileSystemStorage {
    async fn insert(&self, operation: &InstanceOperation) -> Result<(), StorageError> {
        self.mutate(|doc| {
            let log = doc.operations.entry(operation.instance_id.clone()).or_default();
            if log.iter().any(|op| op.operation_id == operation.operation_id) {
                return Err(StorageError::OperationAlreadyExists {
                    instance_id: operation.instance_id.clone(),
                    operation_id: operation.operation_id.clone(),
                });
            }
            log.push(operation.clone());
            Ok(())
        })
        .await
    }

    async fn get(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
    ) -> Result<InstanceOperation, StorageError> {
        self.read(|doc| {
            doc.operations
                .get(instance_id)
                .and_then(|ops| ops.iter().find(|op| &op.operation_id == operation_id))
                .cloned()
        })
        .await
        .ok_or_else(|| StorageError::OperationNotFound {
            instance_id: instance_id.clone(),
            operation_id: operation_id.clone(),
        })
    }

    async fn get_all(&self, instance_id: &InstanceId) -> Result<Vec<InstanceOperation>, StorageError> {
        self.read(|doc| doc.operations.get(instance_id).cloned())
            .await
            .filter(|ops| !ops.is_empty())
            .ok_or_else(|| StorageError::OperationsNotFound {
                instance_id: instance_id.clone(),
            })
    }

    async fn update_state(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
    ) -> Result<(), StorageError> {
        self.mutate(|doc| update_operation(doc, instance_id, operation_id, state, None))
            .await
    }

    async fn update_state_desc(
        &self,
        instance_id: &InstanceId,
        operation_id: &OperationId,
        state: OperationState,
        description: Option<String>,
    ) -> Result<(), StorageError> {
        self.mutate(|doc| update_operation(doc, instance_id, operation_id, state, Some(description)))
            .await
    }
}
