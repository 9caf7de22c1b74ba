//! Ephemeral Blob Store
//!
//! Keeps uploaded blobs as plain files under one directory and tracks each
//! blob's last access time in memory. Entries idle for longer than the
//! configured lifetime are removed by [`BlobStore::sweep`].
//!
//! Operations on the same name are assumed not to overlap (a fetch racing the
//! upload of that very name is caller misuse). Only the index is locked; file
//! I/O runs outside the critical section.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::errors::StoreError;

/// Default maximum payload size: 100 MB
pub const DEFAULT_MAX_ENTRY_SIZE: usize = 100 * 1024 * 1024;

/// Default interval between eviction sweeps: 1 hour
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Default inactivity window before a blob is evicted: 24 hours
pub const DEFAULT_ENTRY_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Prefix for in-progress uploads; never a valid blob name
const TEMP_PREFIX: &str = ".partial-";

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding one file per blob
    pub base_dir: PathBuf,
    /// Maximum accepted payload in bytes
    pub max_entry_size: usize,
    /// How often the eviction sweep runs
    pub sweep_interval: Duration,
    /// Maximum inactivity before eviction
    pub entry_lifetime: Duration,
}

impl StoreConfig {
    /// Configuration with default limits for the given directory
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            max_entry_size: DEFAULT_MAX_ENTRY_SIZE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            entry_lifetime: DEFAULT_ENTRY_LIFETIME,
        }
    }

    pub fn with_max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_entry_lifetime(mut self, lifetime: Duration) -> Self {
        self.entry_lifetime = lifetime;
        self
    }
}

/// Outcome of a sweep or clear pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries whose index record and file were both removed
    pub evicted: usize,
    /// Entries whose file could not be removed
    pub failed: usize,
    /// Failed entries put back in the index for the next pass
    pub retained: usize,
}

impl SweepReport {
    /// Number of entries the pass attempted to remove
    pub fn total(&self) -> usize {
        self.evicted + self.failed
    }
}

/// Snapshot of store state for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub entries: usize,
    pub max_entry_size: usize,
    pub entry_lifetime_secs: u64,
    pub sweep_interval_secs: u64,
}

/// Name → last access, plus names with a file operation in flight
#[derive(Debug, Default)]
struct Index {
    entries: HashMap<String, SystemTime>,
    /// Reserved by an in-flight create or removal; blocks new creates
    busy: HashSet<String>,
}

/// On-disk blob store with an in-memory access index
pub struct BlobStore {
    /// Root directory for stored blobs
    base_dir: PathBuf,
    /// Maximum accepted payload size in bytes
    max_entry_size: usize,
    /// Interval the eviction scheduler should tick at
    sweep_interval: Duration,
    /// Maximum allowed inactivity
    entry_lifetime: Duration,
    /// Guarded name index
    index: Mutex<Index>,
}

impl BlobStore {
    /// Open a store, creating its directory if needed
    ///
    /// Fails if the directory cannot be created or is not writable.
    pub fn with_config(config: StoreConfig) -> Result<Self, StoreError> {
        let StoreConfig {
            base_dir,
            max_entry_size,
            sweep_interval,
            entry_lifetime,
        } = config;

        let init_err = |source| StoreError::Initialization {
            path: base_dir.display().to_string(),
            source,
        };

        fs::create_dir_all(&base_dir).map_err(init_err)?;

        // Probe writability; the probe file is removed on drop
        tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&base_dir)
            .map_err(init_err)?;

        let store = Self {
            base_dir,
            max_entry_size,
            sweep_interval,
            entry_lifetime,
            index: Mutex::new(Index::default()),
        };

        store.remove_leftovers();

        info!(
            base_dir = %store.base_dir.display(),
            max_entry_size = store.max_entry_size,
            sweep_interval_secs = store.sweep_interval.as_secs(),
            entry_lifetime_secs = store.entry_lifetime.as_secs(),
            "Blob store initialized"
        );

        Ok(store)
    }

    /// Store a new blob under `name`
    ///
    /// Exactly one of several concurrent creates for the same name succeeds.
    /// The index only gains the entry once the payload is fully on disk.
    pub fn create(&self, name: &str, payload: &[u8]) -> Result<(), StoreError> {
        validate_name(name)?;

        {
            let mut index = self.lock();
            if index.entries.contains_key(name) || index.busy.contains(name) {
                return Err(StoreError::AlreadyExists(name.to_string()));
            }
            if payload.len() > self.max_entry_size {
                return Err(StoreError::PayloadTooLarge {
                    size: payload.len(),
                    limit: self.max_entry_size,
                });
            }
            index.busy.insert(name.to_string());
        }

        let written = self.write_payload(name, payload);

        let mut index = self.lock();
        index.busy.remove(name);
        written?;
        index.entries.insert(name.to_string(), SystemTime::now());

        debug!(name = name, size = payload.len(), "Stored blob");
        Ok(())
    }

    /// Write a payload via a temp file so a failed write leaves nothing behind
    fn write_payload(&self, name: &str, payload: &[u8]) -> Result<(), StoreError> {
        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.base_dir)
            .map_err(|e| StoreError::io(name, e))?;

        tmp.write_all(payload)
            .and_then(|_| tmp.flush())
            .map_err(|e| StoreError::io(name, e))?;

        tmp.persist(self.path_for(name))
            .map_err(|e| StoreError::io(name, e.error))?;

        Ok(())
    }

    /// Refresh the last access time of an entry
    pub fn touch(&self, name: &str) -> Result<(), StoreError> {
        let mut index = self.lock();
        match index.entries.get_mut(name) {
            Some(last_access) => {
                let now = SystemTime::now();
                // Wall clock may step backwards; never move last access back
                if now > *last_access {
                    *last_access = now;
                }
                Ok(())
            }
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }

    /// Read a blob's payload, refreshing its last access time
    ///
    /// Only a successful read counts as access, so an entry whose file has
    /// gone missing still ages out.
    pub fn fetch(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        if !self.lock().entries.contains_key(name) {
            return Err(StoreError::NotFound(name.to_string()));
        }

        let data = match fs::read(self.path_for(name)) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                // Removed by a concurrent delete or sweep
                if !self.lock().entries.contains_key(name) {
                    return Err(StoreError::NotFound(name.to_string()));
                }
                error!(name = name, "Indexed blob has no backing file");
                return Err(StoreError::io(name, e));
            }
            Err(e) => return Err(StoreError::io(name, e)),
        };

        self.touch(name)?;
        Ok(data)
    }

    /// Remove a blob
    ///
    /// The index entry is dropped before the file. If removing the file
    /// fails the error is returned and the entry stays gone.
    pub fn delete(&self, name: &str) -> Result<(), StoreError> {
        {
            let mut index = self.lock();
            if index.entries.remove(name).is_none() {
                return Err(StoreError::NotFound(name.to_string()));
            }
            index.busy.insert(name.to_string());
        }

        let removed = fs::remove_file(self.path_for(name));
        self.lock().busy.remove(name);

        removed.map_err(|e| StoreError::io(name, e))?;
        debug!(name = name, "Deleted blob");
        Ok(())
    }

    /// Evict every entry idle for longer than the entry lifetime as of `now`
    ///
    /// Individual failures are logged and do not stop the pass.
    pub fn sweep(&self, now: SystemTime) -> SweepReport {
        let lifetime = self.entry_lifetime;
        let stale = self.take_entries(|last_access| {
            // Entries touched "after" now (clock skew) are not stale
            now.duration_since(last_access)
                .map(|idle| idle > lifetime)
                .unwrap_or(false)
        });

        if stale.is_empty() {
            return SweepReport::default();
        }

        let report = self.remove_files(stale);
        info!(
            evicted = report.evicted,
            failed = report.failed,
            retained = report.retained,
            "Evicted expired blobs"
        );
        report
    }

    /// Remove every entry unconditionally
    ///
    /// Entries whose file could not be removed stay indexed so a second call
    /// can retry them.
    pub fn clear(&self) -> SweepReport {
        let all = self.take_entries(|_| true);
        let report = self.remove_files(all);
        info!(
            removed = report.evicted,
            failed = report.failed,
            retained = report.retained,
            "Cleared blob store"
        );
        report
    }

    /// Pull matching entries out of the index and mark them busy
    fn take_entries<F>(&self, mut predicate: F) -> Vec<(String, SystemTime)>
    where
        F: FnMut(SystemTime) -> bool,
    {
        let mut index = self.lock();
        let taken: Vec<(String, SystemTime)> = index
            .entries
            .iter()
            .filter(|(_, last_access)| predicate(**last_access))
            .map(|(name, last_access)| (name.clone(), *last_access))
            .collect();

        for (name, _) in &taken {
            index.entries.remove(name);
            index.busy.insert(name.clone());
        }
        taken
    }

    /// Delete backing files for entries already taken out of the index
    ///
    /// An entry whose file is still on disk after a failed removal goes back
    /// into the index with its old timestamp so a later pass retries it. An
    /// entry whose file is already gone stays dropped.
    fn remove_files(&self, taken: Vec<(String, SystemTime)>) -> SweepReport {
        let mut report = SweepReport::default();
        let mut retry = Vec::new();

        for (name, last_access) in &taken {
            match fs::remove_file(self.path_for(name)) {
                Ok(()) => {
                    debug!(name = %name, "Removed blob file");
                    report.evicted += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!(name = %name, "Blob file already missing, dropping entry");
                    report.failed += 1;
                }
                Err(e) => {
                    warn!(name = %name, error = %e, "Failed to remove blob file, will retry");
                    report.failed += 1;
                    retry.push((name.clone(), *last_access));
                }
            }
        }

        let mut index = self.lock();
        for (name, _) in &taken {
            index.busy.remove(name);
        }
        report.retained = retry.len();
        index.entries.extend(retry);

        report
    }

    /// Remove files left in the directory by a previous run
    ///
    /// Nothing survives a restart, so any regular file that is a partial
    /// upload or carries a blob name is an orphan. Other entries are left
    /// alone.
    fn remove_leftovers(&self) {
        let Ok(read_dir) = fs::read_dir(&self.base_dir) else {
            return;
        };

        for entry in read_dir.flatten() {
            let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
            let is_ours = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(TEMP_PREFIX) || validate_name(n).is_ok());
            if !(is_file && is_ours) {
                continue;
            }

            let path = entry.path();
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed leftover file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove leftover file"),
            }
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            entries: self.lock().entries.len(),
            max_entry_size: self.max_entry_size,
            entry_lifetime_secs: self.entry_lifetime.as_secs(),
            sweep_interval_secs: self.sweep_interval.as_secs(),
        }
    }

    /// Resolve a blob name to its file path
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Get the store directory path
    pub fn directory(&self) -> &Path {
        &self.base_dir
    }

    pub fn max_entry_size(&self) -> usize {
        self.max_entry_size
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// The index holds plain data, so a panic mid-update cannot break it
    fn lock(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
impl BlobStore {
    pub fn last_access(&self, name: &str) -> Option<SystemTime> {
        self.lock().entries.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry_lifetime(&self) -> Duration {
        self.entry_lifetime
    }

    /// Sorted names currently in the index
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().entries.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Reject names that are not a single, ordinary path component
fn validate_name(name: &str) -> Result<(), StoreError> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
        || name.starts_with(TEMP_PREFIX);

    if invalid {
        return Err(StoreError::InvalidName(name.to_string()));
    }
    Ok(())
}
