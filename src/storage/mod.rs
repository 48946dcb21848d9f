use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dyn_clone::DynClone;

use crate::config::BackupConfig;

pub mod s3;

pub type Store = Box<dyn ObjectStore + Send + Sync>;
pub type StoreConnector = Arc<dyn StoreFactory + Send + Sync>;

/// Destination of uploaded files.
#[async_trait]
pub trait ObjectStore: DynClone {
    /// Returns false when the endpoint cannot be reached with the configured credentials.
    async fn test_connection(&self) -> bool;

    /// Every key currently stored in the bucket.
    async fn list_existing_keys(&self) -> Result<HashSet<String>>;

    /// Uploads one local file. `Ok(false)` means the attempt failed and may be retried.
    async fn put(
        &self,
        local_path: &Path,
        key: &str,
        storage_class: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<bool>;

    async fn exists(&self, key: &str) -> bool;

    /// Drops the cached connection. The next call reconnects.
    fn reset_connection(&self);
}

dyn_clone::clone_trait_object!(ObjectStore);

/// Opens an `ObjectStore` for a user's configuration.
#[async_trait]
pub trait StoreFactory {
    async fn connect(&self, user_id: &str, config: &BackupConfig) -> Result<Store>;
}
