//! Durable key-value storage consumed by the controller
//!
//! The storage engine is an external collaborator. The controller only relies
//! on the async CRUD contract of [`DataManager`] and its error taxonomy, which
//! is translated into response codes at the protocol boundary.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared::ResponseCode;
use std::collections::HashSet;
use thiserror::Error;

pub const TABLE_PROFILES: &str = "profiles";
pub const TABLE_RELATIONSHIPS: &str = "relationships";
pub const TABLE_FRIEND_IDS: &str = "friend_ids";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DataError {
    #[error("permission denied for {0}")]
    PermissionFailed(String),
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    #[error("illegal state: {0}")]
    IllegalState(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for DataError {
    fn from(e: bincode::Error) -> Self {
        DataError::Serialization(e.to_string())
    }
}

impl From<DataError> for ResponseCode {
    fn from(e: DataError) -> Self {
        match e {
            DataError::PermissionFailed(_) => ResponseCode::InsufficientRights,
            DataError::IllegalArgument(_) => ResponseCode::IllegalArgument,
            DataError::IllegalState(_) => ResponseCode::IllegalState,
            DataError::Serialization(_) => ResponseCode::Unknown,
        }
    }
}

/// Address of one stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataKey {
    pub table: String,
    pub id: String,
}

impl DataKey {
    pub fn new(table: &str, id: impl ToString) -> Self {
        Self {
            table: table.to_string(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
pub trait DataManager: Send + Sync {
    async fn read(&self, key: &DataKey) -> Result<Option<Vec<u8>>, DataError>;

    async fn write(&self, key: &DataKey, value: Vec<u8>) -> Result<(), DataError>;

    /// Returns whether something was removed.
    async fn remove(&self, key: &DataKey) -> Result<bool, DataError>;

    async fn list_ids(&self, table: &str) -> Result<Vec<String>, DataError>;

    async fn copy(&self, from: &DataKey, to: &DataKey) -> Result<(), DataError>;
}

pub async fn read_object<T: DeserializeOwned>(
    data: &dyn DataManager,
    key: &DataKey,
) -> Result<Option<T>, DataError> {
    match data.read(key).await? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => Ok(None),
    }
}

pub async fn write_object<T: Serialize + Sync>(
    data: &dyn DataManager,
    key: &DataKey,
    value: &T,
) -> Result<(), DataError> {
    let bytes = bincode::serialize(value)?;
    data.write(key, bytes).await
}

/// In-process storage backing the binary and the tests
#[derive(Default)]
pub struct MemoryDataManager {
    objects: DashMap<DataKey, Vec<u8>>,
    read_only: DashMap<String, ()>,
    failing_writes: DashMap<DataKey, ()>,
}

impl MemoryDataManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects writes and removals in `table` with `PermissionFailed`.
    pub fn set_read_only(&self, table: &str, read_only: bool) {
        if read_only {
            self.read_only.insert(table.to_string(), ());
        } else {
            self.read_only.remove(table);
        }
    }

    /// Makes writes to a single key fail with `IllegalState`.
    pub fn fail_writes_to(&self, key: DataKey) {
        self.failing_writes.insert(key, ());
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn check_writable(&self, key: &DataKey) -> Result<(), DataError> {
        if self.read_only.contains_key(&key.table) {
            return Err(DataError::PermissionFailed(format!("{}/{}", key.table, key.id)));
        }
        if self.failing_writes.contains_key(key) {
            return Err(DataError::IllegalState(format!(
                "write to {}/{} failed",
                key.table, key.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DataManager for MemoryDataManager {
    async fn read(&self, key: &DataKey) -> Result<Option<Vec<u8>>, DataError> {
        Ok(self.objects.get(key).map(|value| value.value().clone()))
    }

    async fn write(&self, key: &DataKey, value: Vec<u8>) -> Result<(), DataError> {
        self.check_writable(key)?;
        self.objects.insert(key.clone(), value);
        Ok(())
    }

    async fn remove(&self, key: &DataKey) -> Result<bool, DataError> {
        self.check_writable(key)?;
        Ok(self.objects.remove(key).is_some())
    }

    async fn list_ids(&self, table: &str) -> Result<Vec<String>, DataError> {
        let ids: HashSet<String> = self
            .objects
            .iter()
            .filter(|entry| entry.key().table == table)
            .map(|entry| entry.key().id.clone())
            .collect();
        Ok(ids.into_iter().collect())
    }

    async fn copy(&self, from: &DataKey, to: &DataKey) -> Result<(), DataError> {
        if from == to {
            return Err(DataError::IllegalArgument(
                "source and target are the same object".to_string(),
            ));
        }
        let value = self
            .objects
            .get(from)
            .map(|value| value.value().clone())
            .ok_or_else(|| {
                DataError::IllegalArgument(format!("{}/{} does not exist", from.table, from.id))
            })?;
        self.write(to, value).await
    }
}
