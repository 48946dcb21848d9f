#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use anyhow::Result;
use async_trait::async_trait;
use filetime::{FileTime, set_file_mtime};

use s3backup::config::{BackupConfig, StaticConfigProvider};
use s3backup::scheduler::SchedulerService;
use s3backup::scheduler::history::InMemoryHistory;
use s3backup::scheduler::store::InMemoryScheduleStore;
use s3backup::storage::{ObjectStore, Store, StoreFactory};
use s3backup::types::AccessKeys;

pub const TEST_USER: &str = "alice";
pub const DAY_SECS: u64 = 24 * 60 * 60;

/// A backup tree under a temporary directory.
pub struct BackupTree {
    dir: tempfile::TempDir,
}

impl BackupTree {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn add_file(&self, relative: &str, size: usize) -> PathBuf {
        let path = self.root().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, vec![b'x'; size]).unwrap();
        path
    }

    pub fn add_file_days_old(&self, relative: &str, size: usize, days: u64) -> PathBuf {
        let path = self.add_file(relative, size);
        let mtime = SystemTime::now() - Duration::from_secs(days * DAY_SECS);
        set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
        path
    }
}

pub fn backup_config(root: &Path) -> BackupConfig {
    BackupConfig {
        nfs_path: root.to_path_buf(),
        s3_endpoint: "http://minio.local:9000".to_string(),
        s3_bucket: "backups".to_string(),
        access_keys: AccessKeys {
            access_key: "access_key".to_string(),
            secret_access_key: "secret_key".to_string(),
        },
        retry_delay_seconds: 0,
        ..Default::default()
    }
}

/// In-memory bucket.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub objects: Arc<Mutex<HashMap<String, (u64, String)>>>,
    /// Keys whose uploads always fail.
    pub rejected_keys: Arc<Mutex<HashSet<String>>>,
    pub put_delay: Option<Duration>,
    pub put_calls: Arc<AtomicUsize>,
    pub reset_calls: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn with_objects(keys: &[&str]) -> Self {
        let store = Self::default();
        for key in keys {
            store
                .objects
                .lock()
                .unwrap()
                .insert(key.to_string(), (0, "STANDARD".to_string()));
        }
        store
    }

    pub fn reject(&self, key: &str) {
        self.rejected_keys.lock().unwrap().insert(key.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn put_calls(&self) -> usize {
        self.put_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn test_connection(&self) -> bool {
        true
    }

    async fn list_existing_keys(&self) -> Result<HashSet<String>> {
        Ok(self.objects.lock().unwrap().keys().cloned().collect())
    }

    async fn put(
        &self,
        local_path: &Path,
        key: &str,
        storage_class: &str,
        _metadata: Option<HashMap<String, String>>,
    ) -> Result<bool> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.put_delay {
            tokio::time::sleep(delay).await;
        }
        if self.rejected_keys.lock().unwrap().contains(key) {
            return Ok(false);
        }

        let size = std::fs::metadata(local_path)?.len();
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), (size, storage_class.to_string()));
        Ok(true)
    }

    async fn exists(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    fn reset_connection(&self) {
        self.reset_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    pub store: MemoryStore,
    pub connect_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl StoreFactory for MemoryConnector {
    async fn connect(&self, _user_id: &str, _config: &BackupConfig) -> Result<Store> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.store.clone()))
    }
}

pub fn build_service(config: BackupConfig, connector: MemoryConnector) -> SchedulerService {
    SchedulerService::new(
        Arc::new(StaticConfigProvider::new().with_config(TEST_USER, config)),
        Arc::new(connector),
        Arc::new(InMemoryHistory::new()),
        Arc::new(InMemoryScheduleStore::new()),
    )
}

pub fn init_dummy_tracing_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("dummy=trace")
        .try_init();
}
