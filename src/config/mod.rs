use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::types::StorageClass;

use crate::types::error::BackupError;
use crate::types::{AccessKeys, DEFAULT_STORAGE_CLASS, Schedule, ScheduleType};

pub mod args;

pub const DEFAULT_NFS_PATH: &str = "/mnt/backups";
pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_MAX_THREADS: u16 = 5;
pub const DEFAULT_BACKUP_DAYS: i64 = 7;
pub const DEFAULT_UPLOAD_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECONDS: u64 = 5;
pub const DEFAULT_PROBE_BATCH_SIZE: usize = 5;
pub const DEFAULT_AWS_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_INITIAL_BACKOFF_MILLISECONDS: u64 = 100;
pub const DEFAULT_FILE_CATEGORIES: [&str; 4] = ["full", "incremental", "metadata", "logs"];
pub const DEFAULT_EXTENSION_MAP: [(&str, &str); 4] = [
    (".vbk", "full"),
    (".vib", "incremental"),
    (".vbm", "metadata"),
    (".log", "logs"),
];

/// Top level configuration of the `s3backup` binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub user_id: String,
    pub backup_config: BackupConfig,
    pub schedule: Option<ScheduleConfig>,
    pub tracing_config: Option<TracingConfig>,
    pub dry_run: bool,
    pub show_progress: bool,
    pub auto_complete_shell: Option<clap_complete::shells::Shell>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleConfig {
    pub schedule_type: ScheduleType,
    pub interval: String,
}

#[derive(Debug, Clone, Copy)]
pub struct TracingConfig {
    pub tracing_level: log::Level,
    pub json_tracing: bool,
    pub aws_sdk_tracing: bool,
    pub span_events_tracing: bool,
    pub disable_color_tracing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub aws_max_attempts: u32,
    pub initial_backoff_milliseconds: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CLITimeoutConfig {
    pub operation_timeout_milliseconds: Option<u64>,
    pub connect_timeout_milliseconds: Option<u64>,
    pub read_timeout_milliseconds: Option<u64>,
}

/// Connection settings of one S3-compatible endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub endpoint_url: String,
    pub region: String,
    pub force_path_style: bool,
    pub access_keys: AccessKeys,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
}

impl ClientConfig {
    /// Key under which a built client is cached.
    pub fn identity(&self, user_id: &str) -> String {
        format!(
            "{user_id}|{}|{}",
            self.endpoint_url, self.access_keys.access_key
        )
    }

    pub fn is_secure(&self) -> bool {
        is_secure_endpoint(&self.endpoint_url)
    }
}

pub fn is_secure_endpoint(endpoint: &str) -> bool {
    endpoint.starts_with("https") || endpoint.contains(":443")
}

/// Per-user settings of the backup pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupConfig {
    pub nfs_path: PathBuf,
    pub s3_endpoint: String,
    pub s3_bucket: String,
    pub access_keys: AccessKeys,
    pub region: String,
    pub force_path_style: bool,
    pub max_threads: u16,
    pub backup_days: i64,
    pub storage_class: String,
    pub upload_retries: u32,
    pub retry_delay_seconds: u64,
    pub file_categories: Vec<String>,
    pub extension_map: HashMap<String, String>,
    pub extensions: Option<Vec<String>>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub skip_time_filter: bool,
    pub probe_batch_size: usize,
    pub put_last_modified_metadata: bool,
    pub retry_config: RetryConfig,
    pub cli_timeout_config: CLITimeoutConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            nfs_path: PathBuf::from(DEFAULT_NFS_PATH),
            s3_endpoint: String::new(),
            s3_bucket: String::new(),
            access_keys: AccessKeys {
                access_key: String::new(),
                secret_access_key: String::new(),
            },
            region: DEFAULT_REGION.to_string(),
            force_path_style: true,
            max_threads: DEFAULT_MAX_THREADS,
            backup_days: DEFAULT_BACKUP_DAYS,
            storage_class: DEFAULT_STORAGE_CLASS.to_string(),
            upload_retries: DEFAULT_UPLOAD_RETRIES,
            retry_delay_seconds: DEFAULT_RETRY_DELAY_SECONDS,
            file_categories: DEFAULT_FILE_CATEGORIES
                .iter()
                .map(|category| category.to_string())
                .collect(),
            extension_map: default_extension_map(),
            extensions: None,
            min_size: None,
            max_size: None,
            skip_time_filter: false,
            probe_batch_size: DEFAULT_PROBE_BATCH_SIZE,
            put_last_modified_metadata: false,
            retry_config: RetryConfig {
                aws_max_attempts: DEFAULT_AWS_MAX_ATTEMPTS,
                initial_backoff_milliseconds: DEFAULT_INITIAL_BACKOFF_MILLISECONDS,
            },
            cli_timeout_config: CLITimeoutConfig::default(),
        }
    }
}

pub fn default_extension_map() -> HashMap<String, String> {
    DEFAULT_EXTENSION_MAP
        .iter()
        .map(|(extension, category)| (extension.to_string(), category.to_string()))
        .collect()
}

impl BackupConfig {
    /// Checks every required setting before any network call is made.
    pub fn validate(&self) -> Result<(), BackupError> {
        let required = [
            ("S3_ENDPOINT", self.s3_endpoint.as_str()),
            ("S3_BUCKET", self.s3_bucket.as_str()),
            ("S3_ACCESS_KEY", self.access_keys.access_key.as_str()),
            ("S3_SECRET_KEY", self.access_keys.secret_access_key.as_str()),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if self.nfs_path.as_os_str().is_empty() {
            return Err(BackupError::Configuration(
                "NFS_PATH is required".to_string(),
            ));
        }
        if !missing.is_empty() {
            return Err(BackupError::Configuration(format!(
                "missing required settings: {}",
                missing.join(", ")
            )));
        }

        args::value_parser::url::check_scheme(&self.s3_endpoint)
            .map_err(|e| BackupError::Configuration(format!("S3_ENDPOINT: {e}")))?;

        if self.max_threads == 0 {
            return Err(BackupError::Configuration(
                "MAX_THREADS must be greater than 0".to_string(),
            ));
        }

        if matches!(
            StorageClass::from(self.storage_class.as_str()),
            StorageClass::Unknown(_)
        ) {
            return Err(BackupError::Configuration(format!(
                "invalid storage class: {}",
                self.storage_class
            )));
        }

        if let (Some(min_size), Some(max_size)) = (self.min_size, self.max_size) {
            if max_size < min_size {
                return Err(BackupError::Configuration(
                    "max size must be greater than or equal to min size".to_string(),
                ));
            }
        }

        if !self.nfs_path.is_dir() {
            return Err(BackupError::SourceNotFound(self.nfs_path.clone()));
        }

        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            endpoint_url: self.s3_endpoint.trim().to_string(),
            region: self.region.clone(),
            force_path_style: self.force_path_style,
            access_keys: self.access_keys.clone(),
            retry_config: self.retry_config.clone(),
            cli_timeout_config: self.cli_timeout_config.clone(),
        }
    }

    /// Scanner filters, with the schedule's own filters taking precedence.
    pub fn scan_filters(&self, schedule: Option<&Schedule>) -> ScanFilters {
        let categories = schedule
            .and_then(|schedule| schedule.categories.clone())
            .filter(|categories| !categories.is_empty())
            .or_else(|| Some(self.file_categories.clone()))
            .filter(|categories| !categories.is_empty());
        let extensions = schedule
            .and_then(|schedule| schedule.extensions.clone())
            .filter(|extensions| !extensions.is_empty())
            .or_else(|| self.extensions.clone())
            .map(|extensions| {
                extensions
                    .iter()
                    .map(|extension| normalize_extension(extension))
                    .collect()
            });

        ScanFilters {
            extensions,
            categories,
            category_map: self
                .extension_map
                .iter()
                .map(|(extension, category)| (normalize_extension(extension), category.clone()))
                .collect(),
            min_size: self.min_size,
            max_size: self.max_size,
            skip_time_filter: self.skip_time_filter,
            backup_days: self.backup_days,
            subdirectory: schedule.and_then(|schedule| schedule.subdirectory.clone()),
        }
    }
}

/// Lowercase with a leading dot.
pub fn normalize_extension(extension: &str) -> String {
    let extension = extension.trim().to_ascii_lowercase();
    if extension.starts_with('.') {
        extension
    } else {
        format!(".{extension}")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanFilters {
    /// Overrides the category mapping when set.
    pub extensions: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
    pub category_map: HashMap<String, String>,
    pub min_size: Option<u64>,
    pub max_size: Option<u64>,
    pub skip_time_filter: bool,
    pub backup_days: i64,
    pub subdirectory: Option<String>,
}

#[async_trait]
pub trait ConfigProvider {
    async fn get_config(&self, user_id: &str, config_id: Option<&str>) -> Result<BackupConfig>;
}

pub type ConfigSource = Arc<dyn ConfigProvider + Send + Sync>;

/// Serves a fixed set of configurations, keyed by user id and optional config id.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    configs: HashMap<String, BackupConfig>,
}

impl StaticConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, user_id: &str, config: BackupConfig) -> Self {
        self.configs.insert(user_id.to_string(), config);
        self
    }

    pub fn with_named_config(
        mut self,
        user_id: &str,
        config_id: &str,
        config: BackupConfig,
    ) -> Self {
        self.configs.insert(format!("{user_id}/{config_id}"), config);
        self
    }
}

#[async_trait]
impl ConfigProvider for StaticConfigProvider {
    async fn get_config(&self, user_id: &str, config_id: Option<&str>) -> Result<BackupConfig> {
        let named = config_id
            .and_then(|config_id| self.configs.get(&format!("{user_id}/{config_id}")));

        named
            .or_else(|| self.configs.get(user_id))
            .cloned()
            .ok_or_else(|| {
                anyhow!(BackupError::Configuration(format!(
                    "no configuration for user {user_id}"
                )))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config(nfs_path: PathBuf) -> BackupConfig {
        BackupConfig {
            nfs_path,
            s3_endpoint: "http://localhost:9000".to_string(),
            s3_bucket: "backups".to_string(),
            access_keys: AccessKeys {
                access_key: "access".to_string(),
                secret_access_key: "secret".to_string(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn default_values() {
        init_dummy_tracing_subscriber();

        let config = BackupConfig::default();
        assert_eq!(config.nfs_path, PathBuf::from("/mnt/backups"));
        assert_eq!(config.max_threads, 5);
        assert_eq!(config.backup_days, 7);
        assert_eq!(config.storage_class, "STANDARD");
        assert_eq!(config.upload_retries, 3);
        assert_eq!(config.retry_delay_seconds, 5);
        assert_eq!(
            config.file_categories,
            vec!["full", "incremental", "metadata", "logs"]
        );
        assert_eq!(config.extension_map.get(".vbk").unwrap(), "full");
        assert_eq!(config.extension_map.get(".log").unwrap(), "logs");
    }

    #[test]
    fn validate_valid_config() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        valid_config(dir.path().to_path_buf()).validate().unwrap();
    }

    #[test]
    fn validate_missing_secret_key() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path().to_path_buf());
        config.access_keys.secret_access_key = String::new();

        assert_eq!(
            config.validate(),
            Err(BackupError::Configuration(
                "missing required settings: S3_SECRET_KEY".to_string()
            ))
        );
    }

    #[test]
    fn validate_missing_multiple_settings() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        let config = BackupConfig {
            nfs_path: dir.path().to_path_buf(),
            ..Default::default()
        };

        assert_eq!(
            config.validate(),
            Err(BackupError::Configuration(
                "missing required settings: S3_ENDPOINT, S3_BUCKET, S3_ACCESS_KEY, S3_SECRET_KEY"
                    .to_string()
            ))
        );
    }

    #[test]
    fn validate_invalid_values() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();

        let mut config = valid_config(dir.path().to_path_buf());
        config.s3_endpoint = "ftp://localhost".to_string();
        assert!(matches!(config.validate(), Err(BackupError::Configuration(_))));

        let mut config = valid_config(dir.path().to_path_buf());
        config.max_threads = 0;
        assert!(matches!(config.validate(), Err(BackupError::Configuration(_))));

        let mut config = valid_config(dir.path().to_path_buf());
        config.storage_class = "FAST".to_string();
        assert!(matches!(config.validate(), Err(BackupError::Configuration(_))));

        let mut config = valid_config(dir.path().to_path_buf());
        config.min_size = Some(10);
        config.max_size = Some(5);
        assert!(matches!(config.validate(), Err(BackupError::Configuration(_))));
    }

    #[test]
    fn validate_missing_nfs_path() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let config = valid_config(missing.clone());

        assert_eq!(config.validate(), Err(BackupError::SourceNotFound(missing)));
    }

    #[test]
    fn secure_endpoint_detection() {
        init_dummy_tracing_subscriber();

        assert!(is_secure_endpoint("https://s3.local"));
        assert!(is_secure_endpoint("http://s3.local:443"));
        assert!(!is_secure_endpoint("http://s3.local:9000"));
    }

    #[test]
    fn scan_filters_prefer_schedule_filters() {
        init_dummy_tracing_subscriber();

        let config = BackupConfig {
            extensions: Some(vec!["VBK".to_string()]),
            ..Default::default()
        };

        let filters = config.scan_filters(None);
        assert_eq!(filters.extensions, Some(vec![".vbk".to_string()]));
        assert_eq!(
            filters.categories,
            Some(
                DEFAULT_FILE_CATEGORIES
                    .iter()
                    .map(|category| category.to_string())
                    .collect()
            )
        );
        assert!(filters.subdirectory.is_none());

        let mut schedule = Schedule::new("nightly", ScheduleType::Interval, "15", "alice");
        schedule.categories = Some(vec!["full".to_string()]);
        schedule.extensions = Some(vec![".vib".to_string()]);
        schedule.subdirectory = Some("job1".to_string());

        let filters = config.scan_filters(Some(&schedule));
        assert_eq!(filters.categories, Some(vec!["full".to_string()]));
        assert_eq!(filters.extensions, Some(vec![".vib".to_string()]));
        assert_eq!(filters.subdirectory, Some("job1".to_string()));
        assert_eq!(filters.backup_days, 7);
    }

    #[test]
    fn normalize_extensions() {
        init_dummy_tracing_subscriber();

        assert_eq!(normalize_extension("VBK"), ".vbk");
        assert_eq!(normalize_extension(" .Vib "), ".vib");
    }

    #[tokio::test]
    async fn static_config_provider() {
        init_dummy_tracing_subscriber();

        let named = BackupConfig {
            s3_bucket: "named".to_string(),
            ..Default::default()
        };
        let provider = StaticConfigProvider::new()
            .with_config("alice", BackupConfig::default())
            .with_named_config("alice", "archive", named);

        assert_eq!(
            provider.get_config("alice", None).await.unwrap().s3_bucket,
            ""
        );
        assert_eq!(
            provider
                .get_config("alice", Some("archive"))
                .await
                .unwrap()
                .s3_bucket,
            "named"
        );
        assert_eq!(
            provider
                .get_config("alice", Some("unknown"))
                .await
                .unwrap()
                .s3_bucket,
            ""
        );
        assert!(provider.get_config("bob", None).await.is_err());
    }

    #[test]
    fn client_config_identity() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        let client_config = valid_config(dir.path().to_path_buf()).client_config();

        assert_eq!(
            client_config.identity("alice"),
            "alice|http://localhost:9000|access"
        );
        assert!(!client_config.is_secure());
        assert!(client_config.force_path_style);
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
