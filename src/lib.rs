/*!
# Overview
s3backup replicates backup files from an NFS mounted directory to S3-compatible object storage.

## Features
- Categorized keys
  Files are classified by extension (`.vbk` full, `.vib` incremental, `.vbm` metadata, `.log` logs)
  and uploaded under `<category>/<relative path>`.

- Incremental
  Only files modified within the configured number of days, and not yet present in the bucket, are uploaded.

- Parallel and cancellable
  Uploads run on a fixed number of workers with per-file retries.
  A graceful stop lets dispatched uploads finish. A force stop cancels in-flight requests.

- Scheduled
  Interval and 5-field cron schedules, with run history and per-schedule statistics.

## As a library
The `s3backup` CLI is a thin wrapper of this library.

Example usage
=============

```no_run
use std::sync::Arc;

use s3backup::config::{BackupConfig, StaticConfigProvider};
use s3backup::scheduler::SchedulerService;
use s3backup::scheduler::history::InMemoryHistory;
use s3backup::scheduler::store::InMemoryScheduleStore;
use s3backup::storage::s3::S3StoreFactory;
use s3backup::types::{RunStatus, UploadMode};

#[tokio::main]
async fn main() {
    let config = BackupConfig {
        s3_endpoint: "http://minio.local:9000".to_string(),
        s3_bucket: "backups".to_string(),
        ..Default::default()
    };

    let service = SchedulerService::new(
        Arc::new(StaticConfigProvider::new().with_config("alice", config)),
        Arc::new(S3StoreFactory::default()),
        Arc::new(InMemoryHistory::new()),
        Arc::new(InMemoryScheduleStore::new()),
    );

    let handle = service
        .start_upload("alice", None, UploadMode::Auto, None)
        .await
        .unwrap();

    let entry = handle.wait().await.unwrap();
    assert_eq!(entry.status, RunStatus::Completed);
}
```
*/

pub use config::Config;
pub use config::args::CLIArgs;

pub mod config;
pub mod pipeline;
pub mod scanner;
pub mod scheduler;
pub mod storage;
pub mod types;
