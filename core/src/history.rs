//! Append-only transaction log
//!
//! Finalised transactions are handed to a [`TransactionLog`] and never
//! modified afterwards. `restore` reads it back to find the address an
//! interface had before its last committed change.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SpoofError, SpoofResult};
use crate::transaction::{OperationKind, Transaction, TransactionStatus, TransactionStep};

/// Minimum length of an id prefix accepted by [`TransactionLog::get`]
const MIN_ID_PREFIX: usize = 8;

/// History query, newest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryFilter {
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub status: Option<TransactionStatus>,
    #[serde(default)]
    pub kind: Option<OperationKind>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn for_interface(interface: impl Into<String>) -> Self {
        Self {
            interface: Some(interface.into()),
            ..Default::default()
        }
    }

    fn matches(&self, tx: &Transaction) -> bool {
        self.interface.as_deref().map_or(true, |i| tx.touches(i))
            && self.status.map_or(true, |s| tx.status == s)
            && self.kind.map_or(true, |k| tx.kind == k)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub interfaces: Vec<String>,
    pub first_at: Option<DateTime<Utc>>,
    pub last_at: Option<DateTime<Utc>>,
}

/// A step that changed `interface` inside a committed transaction
fn committed_change<'a>(tx: &'a Transaction, interface: &str) -> Option<&'a TransactionStep> {
    if !tx.is_committed() {
        return None;
    }
    tx.steps
        .iter()
        .rev()
        .find(|s| s.interface_id == interface && s.changed)
}

pub trait TransactionLog: Send + Sync {
    fn append(&self, tx: &Transaction) -> SpoofResult<()>;

    /// Every retained transaction, oldest first
    fn entries(&self) -> SpoofResult<Vec<Transaction>>;

    /// Remove entries touching `interface`, or everything. Returns the count removed.
    fn clear(&self, interface: Option<&str>) -> SpoofResult<usize>;

    fn list(&self, filter: &HistoryFilter) -> SpoofResult<Vec<Transaction>> {
        let mut matched: Vec<Transaction> = self
            .entries()?
            .into_iter()
            .rev()
            .filter(|tx| filter.matches(tx))
            .collect();
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    /// Look up by full id or an unambiguous prefix of at least 8 characters
    fn get(&self, id: &str) -> SpoofResult<Option<Transaction>> {
        let entries = self.entries()?;
        if let Some(tx) = entries.iter().find(|tx| tx.id == id) {
            return Ok(Some(tx.clone()));
        }
        if id.len() < MIN_ID_PREFIX {
            return Ok(None);
        }
        let mut candidates = entries.into_iter().filter(|tx| tx.id.starts_with(id));
        match (candidates.next(), candidates.next()) {
            (Some(tx), None) => Ok(Some(tx)),
            (Some(_), Some(_)) => Err(SpoofError::InvalidInput(format!(
                "transaction id prefix '{}' is ambiguous",
                id
            ))),
            _ => Ok(None),
        }
    }

    fn most_recent_committed(&self, interface: &str) -> SpoofResult<Option<TransactionStep>> {
        Ok(self
            .entries()?
            .iter()
            .rev()
            .find_map(|tx| committed_change(tx, interface).cloned()))
    }

    /// The step that first moved `interface` away from its original address
    fn earliest_committed(&self, interface: &str) -> SpoofResult<Option<TransactionStep>> {
        Ok(self.entries()?.iter().find_map(|tx| {
            if !tx.is_committed() {
                return None;
            }
            tx.steps
                .iter()
                .find(|s| s.interface_id == interface && s.changed)
                .cloned()
        }))
    }

    fn stats(&self) -> SpoofResult<HistoryStats> {
        let entries = self.entries()?;
        let mut stats = HistoryStats {
            total: entries.len(),
            first_at: entries.first().map(|tx| tx.started_at),
            last_at: entries.last().map(|tx| tx.started_at),
            ..Default::default()
        };
        let mut interfaces = BTreeSet::new();
        for tx in &entries {
            *stats.by_status.entry(tx.status.to_string()).or_insert(0) += 1;
            for step in &tx.steps {
                interfaces.insert(step.interface_id.clone());
            }
        }
        stats.interfaces = interfaces.into_iter().collect();
        Ok(stats)
    }

    /// Write every retained transaction to `path` as a JSON array
    fn export(&self, path: &Path) -> SpoofResult<usize> {
        let entries = self.entries()?;
        write_json_atomic(path, &entries)?;
        debug!(path = %path.display(), count = entries.len(), "history exported");
        Ok(entries.len())
    }

    /// Append transactions from an exported file, oldest first, skipping ids
    /// already present. Returns the count added.
    fn import(&self, path: &Path) -> SpoofResult<usize> {
        let text = std::fs::read_to_string(path)?;
        let mut incoming: Vec<Transaction> = serde_json::from_str(&text)?;
        incoming.sort_by_key(|tx| tx.started_at);
        let known: BTreeSet<String> = self.entries()?.into_iter().map(|tx| tx.id).collect();
        let mut added = 0;
        for tx in incoming.iter().filter(|tx| !known.contains(&tx.id)) {
            self.append(tx)?;
            added += 1;
        }
        debug!(path = %path.display(), added, "history imported");
        Ok(added)
    }
}

/// In-process log, oldest entries evicted past `limit`
#[derive(Debug)]
pub struct MemoryLog {
    entries: Mutex<VecDeque<Transaction>>,
    limit: usize,
}

impl MemoryLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl TransactionLog for MemoryLog {
    fn append(&self, tx: &Transaction) -> SpoofResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push_back(tx.clone());
        while entries.len() > self.limit {
            entries.pop_front();
        }
        Ok(())
    }

    fn entries(&self) -> SpoofResult<Vec<Transaction>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.iter().cloned().collect())
    }

    fn clear(&self, interface: Option<&str>) -> SpoofResult<usize> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        match interface {
            Some(name) => entries.retain(|tx| !tx.touches(name)),
            None => entries.clear(),
        }
        Ok(before - entries.len())
    }
}

/// JSON array on disk, rewritten through a temp file and rename
#[derive(Debug)]
pub struct JsonFileLog {
    path: PathBuf,
    limit: usize,
    write_lock: Mutex<()>,
}

impl JsonFileLog {
    pub fn new(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit: limit.max(1),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> SpoofResult<Vec<Transaction>> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) if text.trim().is_empty() => Ok(Vec::new()),
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, entries: &[Transaction]) -> SpoofResult<()> {
        write_json_atomic(&self.path, entries)
    }
}

impl TransactionLog for JsonFileLog {
    fn append(&self, tx: &Transaction) -> SpoofResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        entries.push(tx.clone());
        if entries.len() > self.limit {
            let excess = entries.len() - self.limit;
            entries.drain(..excess);
            debug!(evicted = excess, "history limit reached");
        }
        self.store(&entries)
    }

    fn entries(&self) -> SpoofResult<Vec<Transaction>> {
        self.load()
    }

    fn clear(&self, interface: Option<&str>) -> SpoofResult<usize> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.load()?;
        let before = entries.len();
        match interface {
            Some(name) => entries.retain(|tx| !tx.touches(name)),
            None => entries.clear(),
        }
        self.store(&entries)?;
        Ok(before - entries.len())
    }
}

/// Serialise `value` next to `path` and rename it into place
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> SpoofResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, json)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        warn!(path = %path.display(), error = %e, "rename failed, removing temp file");
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::StepStatus;

    fn record(kind: OperationKind, status: TransactionStatus, steps: &[(&str, &str, &str, bool)]) -> Transaction {
        let mut tx = Transaction::new(kind, "fake");
        tx.status = status;
        for (iface, prev, new, changed) in steps {
            let mut step = TransactionStep::pending(*iface, new.parse().unwrap());
            step.capture(prev.parse().unwrap());
            step.changed = *changed;
            step.status = StepStatus::Verified;
            tx.steps.push(step);
        }
        tx
    }

    fn exercise(log: &dyn TransactionLog) {
        let first = record(
            OperationKind::Spoof,
            TransactionStatus::Committed,
            &[("eth0", "00:11:22:33:44:55", "02:00:00:00:00:01", true)],
        );
        let failed = record(
            OperationKind::Spoof,
            TransactionStatus::RolledBack,
            &[("eth0", "02:00:00:00:00:01", "02:00:00:00:00:02", true)],
        );
        let second = record(
            OperationKind::Batch,
            TransactionStatus::Committed,
            &[
                ("eth0", "02:00:00:00:00:01", "02:00:00:00:00:03", true),
                ("wlan0", "3c:97:0e:00:00:01", "3c:97:0e:00:00:01", false),
            ],
        );
        log.append(&first).unwrap();
        log.append(&failed).unwrap();
        log.append(&second).unwrap();

        let recent = log.most_recent_committed("eth0").unwrap().unwrap();
        assert_eq!(recent.previous_mac.unwrap().to_string(), "02:00:00:00:00:01");

        let earliest = log.earliest_committed("eth0").unwrap().unwrap();
        assert_eq!(earliest.previous_mac.unwrap().to_string(), "00:11:22:33:44:55");

        // unchanged steps do not count
        assert!(log.most_recent_committed("wlan0").unwrap().is_none());

        let listed = log.list(&HistoryFilter::for_interface("eth0")).unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, second.id);

        let committed = log
            .list(&HistoryFilter {
                status: Some(TransactionStatus::Committed),
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(committed.len(), 1);

        assert_eq!(log.get(&first.id).unwrap().unwrap().id, first.id);
        assert_eq!(log.get(&first.id[..13]).unwrap().unwrap().id, first.id);
        assert!(log.get("abc").unwrap().is_none());

        let stats = log.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status.get("committed"), Some(&2));
        assert_eq!(stats.interfaces, vec!["eth0", "wlan0"]);

        assert_eq!(log.clear(Some("wlan0")).unwrap(), 1);
        assert_eq!(log.clear(None).unwrap(), 2);
        assert!(log.entries().unwrap().is_empty());
    }

    #[test]
    fn test_memory_log() {
        exercise(&MemoryLog::new(100));
    }

    #[test]
    fn test_json_file_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = JsonFileLog::new(dir.path().join("state").join("history.json"), 100);
        exercise(&log);
        assert!(log.path().exists());
    }

    #[test]
    fn test_export_then_import_skips_known_ids() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("export.json");
        let source = MemoryLog::new(10);
        let first = record(
            OperationKind::Spoof,
            TransactionStatus::Committed,
            &[("eth0", "00:11:22:33:44:55", "02:00:00:00:00:01", true)],
        );
        let second = record(
            OperationKind::Restore,
            TransactionStatus::Committed,
            &[("eth0", "02:00:00:00:00:01", "00:11:22:33:44:55", true)],
        );
        source.append(&first).unwrap();
        source.append(&second).unwrap();
        assert_eq!(source.export(&file).unwrap(), 2);

        let target = JsonFileLog::new(dir.path().join("history.json"), 10);
        target.append(&first).unwrap();
        assert_eq!(target.import(&file).unwrap(), 1);
        assert_eq!(target.entries().unwrap(), vec![first, second]);
        assert_eq!(target.import(&file).unwrap(), 0);
    }

    #[test]
    fn test_import_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("export.json");
        std::fs::write(&file, "{ not json").unwrap();
        let log = MemoryLog::new(10);
        assert!(log.import(&file).is_err());
        assert!(log.import(&dir.path().join("missing.json")).is_err());
        assert!(log.entries().unwrap().is_empty());
    }

    #[test]
    fn test_json_file_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let tx = record(
            OperationKind::Spoof,
            TransactionStatus::Committed,
            &[("eth0", "00:11:22:33:44:55", "02:00:00:00:00:01", true)],
        );
        JsonFileLog::new(&path, 10).append(&tx).unwrap();

        let reopened = JsonFileLog::new(&path, 10);
        assert_eq!(reopened.entries().unwrap(), vec![tx]);
    }

    #[test]
    fn test_limits_evict_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let file_log = JsonFileLog::new(dir.path().join("history.json"), 2);
        let memory_log = MemoryLog::new(2);
        let txs: Vec<Transaction> = (0..3)
            .map(|_| record(OperationKind::Spoof, TransactionStatus::Committed, &[]))
            .collect();
        for tx in &txs {
            file_log.append(tx).unwrap();
            memory_log.append(tx).unwrap();
        }
        for log in [&file_log as &dyn TransactionLog, &memory_log] {
            let ids: Vec<String> = log.entries().unwrap().into_iter().map(|t| t.id).collect();
            assert_eq!(ids, vec![txs[1].id.clone(), txs[2].id.clone()]);
        }
    }
}
