use std::fmt;
use std::fmt::{Debug, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use zeroize_derive::{Zeroize, ZeroizeOnDrop};

use crate::scanner::key::normalize_s3_key;

pub mod error;
pub mod history;
pub mod schedule;
pub mod statistics;
pub mod token;

pub use history::{HistoryPeriod, RunStatus, RunUpdate, ScheduleStats, SyncHistoryEntry};
pub use schedule::{Schedule, SchedulePatch, ScheduleType};
pub use statistics::{StatisticsSnapshot, UploadStatistics};

pub const S3BACKUP_LAST_MODIFIED_METADATA_KEY: &str = "s3backup-last-modified";
pub const DEFAULT_STORAGE_CLASS: &str = "STANDARD";
pub const OTHER_CATEGORY: &str = "other";
pub const MANUAL_SCHEDULE_ID: &str = "manual";
pub const MANUAL_SCHEDULE_NAME: &str = "Manual upload";

/// A file selected by the scanner for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct FileCandidate {
    pub path: PathBuf,
    /// Relative to the scan root, always `/` separated.
    pub relative_path: String,
    pub category: String,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

impl FileCandidate {
    pub fn destination_key(&self) -> String {
        normalize_s3_key(&self.category, &self.relative_path)
    }
}

pub fn total_bytes(candidates: &[FileCandidate]) -> u64 {
    candidates.iter().map(|candidate| candidate.size).sum()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    /// Scan the source tree for candidates.
    Auto,
    /// Upload a caller supplied list.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    Graceful,
    Force,
}

impl StopMode {
    pub fn finish_current(&self) -> bool {
        matches!(self, StopMode::Graceful)
    }
}

#[derive(Clone, Zeroize, ZeroizeOnDrop, PartialEq, Eq)]
pub struct AccessKeys {
    pub access_key: String,
    pub secret_access_key: String,
}

impl Debug for AccessKeys {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut keys = f.debug_struct("AccessKeys");
        keys.field("access_key", &self.access_key)
            .field("secret_access_key", &"** redacted **");
        keys.finish()
    }
}

impl AccessKeys {
    pub fn is_empty(&self) -> bool {
        self.access_key.trim().is_empty() || self.secret_access_key.trim().is_empty()
    }
}
