//! Decision audit log
//!
//! Append-only record of every gate decision, used to answer "why was
//! automation blocked on date X". Each scope has its own log guarded by its
//! own lock, so writers on different scopes never contend while writes
//! within a scope are serialized in `evaluated_at` order.
//!
//! An optional JSON-lines file mirrors the log and is replayed on startup.

use crate::models::Decision;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("decision for {scope_id} at {attempted} precedes last recorded decision at {last}")]
    OutOfOrder {
        scope_id: String,
        last: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },
    #[error("audit log persistence failed: {0}")]
    Persistence(#[from] std::io::Error),
    #[error("audit log serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Half-open time range `[from, to)`; open ends are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }
}

type ScopeLog = Arc<RwLock<Vec<Decision>>>;

/// Append-only decision history per scope
#[derive(Debug, Default)]
pub struct AuditLog {
    scopes: DashMap<String, ScopeLog>,
    journal: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a log mirrored to a JSON-lines file, replaying existing entries
    pub fn with_persistence(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut log = Self::new();
        if path.exists() {
            let replayed = log.replay(&path)?;
            info!(path = %path.display(), decisions = replayed, "Replayed audit log");
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        log.journal = Some(Mutex::new(file));
        log.path = Some(path);
        Ok(log)
    }

    /// Replay the journal into memory.
    ///
    /// A final line that fails to parse is a write torn by a crash; it is
    /// truncated away so later appends start on a clean line. Anything
    /// unreadable before the final line is corruption and fails the open.
    fn replay(&mut self, path: &Path) -> Result<usize, AuditError> {
        let contents = std::fs::read_to_string(path)?;
        let mut count = 0;
        let mut consumed = 0;
        let mut lines = contents.split_inclusive('\n').peekable();

        while let Some(line) = lines.next() {
            let is_last = lines.peek().is_none();
            if line.trim().is_empty() {
                consumed += line.len();
                continue;
            }
            match serde_json::from_str::<Decision>(line) {
                Ok(decision) => {
                    self.append(decision)?;
                    consumed += line.len();
                    count += 1;
                }
                Err(e) if is_last => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        discarded_bytes = line.len(),
                        "Discarding torn final audit log entry"
                    );
                    OpenOptions::new()
                        .write(true)
                        .open(path)?
                        .set_len(consumed as u64)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(count)
    }

    pub fn persistence_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a decision; returns its offset within the scope's log
    pub fn record(&self, decision: Decision) -> Result<usize, AuditError> {
        let offset = self.append(decision)?;
        debug!(offset = offset, "Recorded decision");
        Ok(offset)
    }

    fn append(&self, decision: Decision) -> Result<usize, AuditError> {
        let log = self.scope_log(&decision.scope_id);
        let mut entries = log.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(last) = entries.last() {
            if decision.evaluated_at < last.evaluated_at {
                return Err(AuditError::OutOfOrder {
                    scope_id: decision.scope_id,
                    last: last.evaluated_at,
                    attempted: decision.evaluated_at,
                });
            }
        }

        if let Some(journal) = &self.journal {
            let mut line = serde_json::to_vec(&decision)?;
            line.push(b'\n');
            let mut file = journal.lock().unwrap_or_else(PoisonError::into_inner);
            file.write_all(&line)?;
            file.flush()?;
        }

        entries.push(decision);
        Ok(entries.len() - 1)
    }

    fn scope_log(&self, scope_id: &str) -> ScopeLog {
        if let Some(log) = self.scopes.get(scope_id) {
            return log.clone();
        }
        self.scopes
            .entry(scope_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Vec::new())))
            .clone()
    }

    /// Decisions for a scope within `range`, ascending by `evaluated_at`
    pub fn history(&self, scope_id: &str, range: TimeRange) -> DecisionHistory {
        self.history_from(scope_id, range, 0)
    }

    /// Like [`history`](Self::history), resuming at a previously returned offset
    pub fn history_from(&self, scope_id: &str, range: TimeRange, offset: usize) -> DecisionHistory {
        let Some(log) = self.scopes.get(scope_id).map(|l| l.clone()) else {
            return DecisionHistory::empty();
        };

        let (start, end) = {
            let entries = log.read().unwrap_or_else(PoisonError::into_inner);
            let start = range
                .from
                .map(|from| entries.partition_point(|d| d.evaluated_at < from))
                .unwrap_or(0);
            let end = range
                .to
                .map(|to| entries.partition_point(|d| d.evaluated_at < to))
                .unwrap_or(entries.len());
            (start, end)
        };

        DecisionHistory {
            log: Some(log),
            position: start.max(offset),
            end,
        }
    }

    /// Most recent decision for a scope
    pub fn latest(&self, scope_id: &str) -> Option<Decision> {
        let log = self.scopes.get(scope_id)?;
        let entries = log.read().unwrap_or_else(PoisonError::into_inner);
        entries.last().cloned()
    }

    pub fn scope_len(&self, scope_id: &str) -> usize {
        self.scopes
            .get(scope_id)
            .map(|log| log.read().unwrap_or_else(PoisonError::into_inner).len())
            .unwrap_or(0)
    }

    /// Total decisions across all scopes
    pub fn len(&self) -> usize {
        self.scopes
            .iter()
            .map(|log| log.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lazy, finite walk over a scope's decisions
///
/// The end is fixed when the query is made, so decisions appended later
/// are not yielded. `offset()` is the cursor to resume from.
pub struct DecisionHistory {
    log: Option<ScopeLog>,
    position: usize,
    end: usize,
}

impl DecisionHistory {
    fn empty() -> Self {
        Self {
            log: None,
            position: 0,
            end: 0,
        }
    }

    /// Offset of the next decision this history would yield
    pub fn offset(&self) -> usize {
        self.position
    }

    /// Whether more decisions remain
    pub fn has_more(&self) -> bool {
        self.log.is_some() && self.position < self.end
    }
}

impl Iterator for DecisionHistory {
    type Item = Decision;

    fn next(&mut self) -> Option<Decision> {
        if self.position >= self.end {
            return None;
        }
        let log = self.log.as_ref()?;
        let entries = log.read().unwrap_or_else(PoisonError::into_inner);
        let decision = entries.get(self.position).cloned();
        if decision.is_some() {
            self.position += 1;
        }
        decision
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.position);
        (0, Some(remaining))
    }
}
