use std::collections::HashSet;
use std::path::{Component, Path};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, trace, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::ScanFilters;
use crate::pipeline::control::UploadControl;
use crate::types::{FileCandidate, OTHER_CATEGORY, UploadStatistics, total_bytes};

pub mod key;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SkipCounters {
    existing: u64,
    time: u64,
    size: u64,
}

/// Walks a backup tree and selects the files that still need to be uploaded.
#[derive(Clone)]
pub struct FileScanner {
    stats: Arc<UploadStatistics>,
    control: Arc<UploadControl>,
}

impl FileScanner {
    pub fn new(stats: Arc<UploadStatistics>, control: Arc<UploadControl>) -> Self {
        Self { stats, control }
    }

    /// Runs [`FileScanner::scan`] on the blocking thread pool.
    pub async fn scan_async(
        &self,
        source_root: &Path,
        existing_keys: Arc<HashSet<String>>,
        filters: ScanFilters,
    ) -> Result<Vec<FileCandidate>> {
        let scanner = self.clone();
        let source_root = source_root.to_path_buf();

        tokio::task::spawn_blocking(move || scanner.scan(&source_root, &existing_keys, &filters))
            .await
            .context("tokio::task::spawn_blocking() failed.")
    }

    /// Returns the candidates found so far when a stop is requested during the walk.
    pub fn scan(
        &self,
        source_root: &Path,
        existing_keys: &HashSet<String>,
        filters: &ScanFilters,
    ) -> Vec<FileCandidate> {
        let walk_root = match &filters.subdirectory {
            Some(subdirectory) => source_root.join(subdirectory),
            None => source_root.to_path_buf(),
        };

        if !walk_root.is_dir() {
            warn!(
                path = walk_root.display().to_string(),
                "scan root does not exist."
            );
            self.publish(&[], SkipCounters::default());
            return vec![];
        }

        let cutoff = time_filter_cutoff(filters, Utc::now());
        let mut candidates = vec![];
        let mut skipped = SkipCounters::default();

        let walker = WalkDir::new(&walk_root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry));

        for entry in walker {
            if self.control.stop_requested() {
                info!(
                    found = candidates.len(),
                    "scan has been interrupted by a stop request."
                );
                break;
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(|path| path.display().to_string());
                    warn!(path = path, error = e.to_string(), "failed to read directory entry.");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            match self.examine_entry(
                &entry,
                source_root,
                existing_keys,
                filters,
                cutoff,
                &mut skipped,
            ) {
                Ok(Some(candidate)) => {
                    trace!(key = candidate.relative_path, "candidate found.");
                    candidates.push(candidate);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        path = entry.path().display().to_string(),
                        error = format!("{e:#}"),
                        "failed to examine file, skipped."
                    );
                }
            }
        }

        debug!(
            candidates = candidates.len(),
            skipped_existing = skipped.existing,
            skipped_time = skipped.time,
            skipped_size = skipped.size,
            "scan has been completed."
        );

        self.publish(&candidates, skipped);
        candidates
    }

    fn examine_entry(
        &self,
        entry: &DirEntry,
        source_root: &Path,
        existing_keys: &HashSet<String>,
        filters: &ScanFilters,
        cutoff: Option<DateTime<Utc>>,
        skipped: &mut SkipCounters,
    ) -> Result<Option<FileCandidate>> {
        let Some(category) = resolve_category(entry.path(), filters) else {
            return Ok(None);
        };

        let metadata = entry.metadata().context("failed to read metadata.")?;
        let modified: DateTime<Utc> = metadata
            .modified()
            .context("failed to read modification time.")?
            .into();

        if let Some(cutoff) = cutoff {
            if modified < cutoff {
                skipped.time += 1;
                return Ok(None);
            }
        }

        let relative_path = relative_key_path(entry.path(), source_root)?;
        let destination_key = key::normalize_s3_key(&category, &relative_path);
        if existing_keys.contains(&destination_key) || existing_keys.contains(&relative_path) {
            skipped.existing += 1;
            return Ok(None);
        }

        let size = metadata.len();
        if filters.min_size.is_some_and(|min_size| size < min_size)
            || filters.max_size.is_some_and(|max_size| size > max_size)
        {
            skipped.size += 1;
            return Ok(None);
        }

        Ok(Some(FileCandidate {
            path: entry.path().to_path_buf(),
            relative_path,
            category,
            size,
            modified,
        }))
    }

    fn publish(&self, candidates: &[FileCandidate], skipped: SkipCounters) {
        self.stats
            .set_totals(candidates.len() as u64, total_bytes(candidates));
        self.stats
            .set_skipped(skipped.existing, skipped.time, skipped.size);
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// `None` disables the time filter.
pub fn time_filter_cutoff(filters: &ScanFilters, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if filters.skip_time_filter || filters.backup_days <= 0 {
        return None;
    }
    Some(now - chrono::Duration::days(filters.backup_days))
}

/// Category tag of a file, or `None` when the file is not selected by the filters.
pub fn resolve_category(path: &Path, filters: &ScanFilters) -> Option<String> {
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| format!(".{}", extension.to_ascii_lowercase()))?;

    if let Some(extensions) = &filters.extensions {
        if !extensions.contains(&extension) {
            return None;
        }
        return Some(
            filters
                .category_map
                .get(&extension)
                .cloned()
                .unwrap_or_else(|| OTHER_CATEGORY.to_string()),
        );
    }

    let category = filters.category_map.get(&extension)?;
    if let Some(categories) = &filters.categories {
        if !categories.contains(category) {
            return None;
        }
    }

    Some(category.clone())
}

fn relative_key_path(path: &Path, source_root: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(source_root)
        .context("file is outside of the source root.")?;

    Ok(relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => Some(name.to_string_lossy().to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::time::{Duration, SystemTime};

    use filetime::FileTime;

    use super::*;

    const DAY_SECS: u64 = 24 * 60 * 60;

    fn write_file(root: &Path, relative: &str, size: usize, age_days: u64) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![b'x'; size]).unwrap();

        let mtime = SystemTime::now() - Duration::from_secs(age_days * DAY_SECS);
        filetime::set_file_mtime(&path, FileTime::from_system_time(mtime)).unwrap();
    }

    fn filters(backup_days: i64) -> ScanFilters {
        ScanFilters {
            category_map: HashMap::from([
                (".vbk".to_string(), "full".to_string()),
                (".vib".to_string(), "incremental".to_string()),
            ]),
            backup_days,
            ..Default::default()
        }
    }

    fn scanner() -> (FileScanner, Arc<UploadStatistics>, Arc<UploadControl>) {
        let stats = Arc::new(UploadStatistics::new());
        stats.reset("alice", None);
        let control = Arc::new(UploadControl::new());
        (
            FileScanner::new(stats.clone(), control.clone()),
            stats,
            control,
        )
    }

    #[test]
    fn scan_applies_time_filter() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.vbk", 10, 2);
        write_file(dir.path(), "b.vib", 20, 10);

        let (scanner, stats, _) = scanner();
        let candidates = scanner.scan(dir.path(), &HashSet::new(), &filters(7));

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].relative_path, "a.vbk");
        assert_eq!(candidates[0].category, "full");
        assert_eq!(candidates[0].size, 10);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.skipped_time, 1);
        assert_eq!(snapshot.skipped_existing, 0);
        assert_eq!(snapshot.total_files, 1);
        assert_eq!(snapshot.total_bytes, 10);
    }

    #[test]
    fn scan_skips_existing_keys() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.vbk", 10, 2);
        write_file(dir.path(), "b.vib", 20, 10);

        let (scanner, stats, _) = scanner();
        let existing = HashSet::from(["full/a.vbk".to_string()]);
        let candidates = scanner.scan(dir.path(), &existing, &filters(7));

        assert!(candidates.is_empty());
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.skipped_existing, 1);
        assert_eq!(snapshot.skipped_time, 1);
    }

    #[test]
    fn rescan_with_all_keys_present_is_empty() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "job 1/a.vbk", 10, 0);
        write_file(dir.path(), "job 1/b.vib", 10, 0);
        write_file(dir.path(), "c.vbk", 10, 0);

        let (scanner, _, _) = scanner();
        let first = scanner.scan(dir.path(), &HashSet::new(), &filters(7));
        assert_eq!(first.len(), 3);

        let existing: HashSet<String> = first
            .iter()
            .map(|candidate| candidate.destination_key())
            .collect();
        assert!(scanner.scan(dir.path(), &existing, &filters(7)).is_empty());

        let raw: HashSet<String> = first
            .iter()
            .map(|candidate| candidate.relative_path.clone())
            .collect();
        assert!(scanner.scan(dir.path(), &raw, &filters(7)).is_empty());
    }

    #[test]
    fn scan_without_time_window_includes_old_files() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.vbk", 10, 400);
        write_file(dir.path(), "b.vib", 10, 4000);

        let (scanner, stats, _) = scanner();
        assert_eq!(scanner.scan(dir.path(), &HashSet::new(), &filters(0)).len(), 2);
        assert_eq!(scanner.scan(dir.path(), &HashSet::new(), &filters(-1)).len(), 2);
        assert_eq!(stats.snapshot().skipped_time, 0);

        let mut skip_time_filter = filters(7);
        skip_time_filter.skip_time_filter = true;
        assert_eq!(
            scanner
                .scan(dir.path(), &HashSet::new(), &skip_time_filter)
                .len(),
            2
        );
    }

    #[test]
    fn scan_skips_hidden_and_unmapped_files() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), ".hidden.vbk", 10, 0);
        write_file(dir.path(), ".snapshot/a.vbk", 10, 0);
        write_file(dir.path(), "notes.txt", 10, 0);
        write_file(dir.path(), "README", 10, 0);
        write_file(dir.path(), "job/A.VBK", 10, 0);

        let (scanner, _, _) = scanner();
        let candidates = scanner.scan(dir.path(), &HashSet::new(), &filters(7));

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].relative_path, "job/A.VBK");
        assert_eq!(candidates[0].category, "full");
    }

    #[test]
    fn scan_filters_by_category_and_extension() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.vbk", 10, 0);
        write_file(dir.path(), "b.vib", 10, 0);
        write_file(dir.path(), "c.bak", 10, 0);

        let (scanner, _, _) = scanner();

        let mut by_category = filters(7);
        by_category.categories = Some(vec!["incremental".to_string()]);
        let candidates = scanner.scan(dir.path(), &HashSet::new(), &by_category);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].relative_path, "b.vib");

        let mut by_extension = filters(7);
        by_extension.categories = Some(vec!["incremental".to_string()]);
        by_extension.extensions = Some(vec![".bak".to_string(), ".vbk".to_string()]);
        let candidates = scanner.scan(dir.path(), &HashSet::new(), &by_extension);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].relative_path, "a.vbk");
        assert_eq!(candidates[0].category, "full");
        assert_eq!(candidates[1].relative_path, "c.bak");
        assert_eq!(candidates[1].category, "other");
    }

    #[test]
    fn scan_filters_by_size() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "small.vbk", 5, 0);
        write_file(dir.path(), "medium.vbk", 50, 0);
        write_file(dir.path(), "large.vbk", 500, 0);

        let (scanner, stats, _) = scanner();
        let mut by_size = filters(7);
        by_size.min_size = Some(10);
        by_size.max_size = Some(100);

        let candidates = scanner.scan(dir.path(), &HashSet::new(), &by_size);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].relative_path, "medium.vbk");
        assert_eq!(stats.snapshot().skipped_size, 2);
    }

    #[test]
    fn scan_subdirectory_keeps_root_relative_paths() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "job1/a.vbk", 10, 0);
        write_file(dir.path(), "job2/b.vbk", 10, 0);

        let (scanner, _, _) = scanner();
        let mut scoped = filters(7);
        scoped.subdirectory = Some("job2".to_string());

        let candidates = scanner.scan(dir.path(), &HashSet::new(), &scoped);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].relative_path, "job2/b.vbk");
        assert_eq!(candidates[0].destination_key(), "full/job2/b.vbk");
    }

    #[test]
    fn scan_missing_root_returns_empty() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        let (scanner, stats, _) = scanner();

        assert!(
            scanner
                .scan(&dir.path().join("missing"), &HashSet::new(), &filters(7))
                .is_empty()
        );

        let mut scoped = filters(7);
        scoped.subdirectory = Some("missing".to_string());
        assert!(scanner.scan(dir.path(), &HashSet::new(), &scoped).is_empty());
        assert_eq!(stats.snapshot().total_files, 0);
    }

    #[test]
    fn scan_stops_on_stop_request() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.vbk", 10, 0);
        write_file(dir.path(), "b.vbk", 10, 0);

        let (scanner, _, control) = scanner();
        control.request_stop(true);

        assert!(scanner.scan(dir.path(), &HashSet::new(), &filters(7)).is_empty());
    }

    #[tokio::test]
    async fn scan_async_runs_blocking_walk() {
        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "a.vbk", 10, 0);

        let (scanner, _, _) = scanner();
        let candidates = scanner
            .scan_async(dir.path(), Arc::new(HashSet::new()), filters(7))
            .await
            .unwrap();

        assert_eq!(candidates.len(), 1);
    }

    #[test]
    fn time_filter_cutoff_values() {
        init_dummy_tracing_subscriber();

        let now = Utc::now();
        assert_eq!(
            time_filter_cutoff(&filters(7), now),
            Some(now - chrono::Duration::days(7))
        );
        assert!(time_filter_cutoff(&filters(0), now).is_none());
    }

    #[cfg(target_family = "unix")]
    #[test]
    fn scan_skips_unreadable_directories() {
        use std::os::unix::fs::PermissionsExt;

        init_dummy_tracing_subscriber();

        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "ok/a.vbk", 10, 0);
        write_file(dir.path(), "locked/b.vbk", 10, 0);

        let locked = dir.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let (scanner, _, _) = scanner();
        let candidates = scanner.scan(dir.path(), &HashSet::new(), &filters(7));

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(
            candidates
                .iter()
                .any(|candidate| candidate.relative_path == "ok/a.vbk")
        );
    }

    fn init_dummy_tracing_subscriber() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("dummy=trace")
            .try_init();
    }
}
