//! Contradiction Ledger (C4).
//!
//! An append-only log of pairwise conflicts with lifecycle states and
//! resolution events. Maintains a reverse index `memory_id -> {contradiction_id}`
//! incrementally so `has_open_for` stays a hash lookup plus a short scan of
//! that memory's (typically tiny) contradiction set, rather than a linear
//! scan of the whole ledger.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json;
use tracing::instrument;

use crate::models::{Actor, Contradiction, ContradictionId, ContradictionKind, ContradictionStatus, MemoryId, Resolution, Severity};
use crate::{Error, Result};

/// Trait implemented by every contradiction ledger backend.
pub trait ContradictionLedger: Send + Sync {
    /// Appends a freshly opened contradiction and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn record(
        &self,
        thread_id: &str,
        kind: ContradictionKind,
        involved_memory_ids: Vec<MemoryId>,
        slot: &str,
        domains: std::collections::BTreeSet<String>,
        severity: Severity,
        created_at: i64,
    ) -> Result<ContradictionId>;

    /// Lists every `open` contradiction touching memories in `thread_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn list_open(&self, thread_id: &str) -> Result<Vec<Contradiction>>;

    /// Lists every contradiction involving `memory_id`, open or not.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn list_by_memory(&self, memory_id: &MemoryId) -> Result<Vec<Contradiction>>;

    /// Fetches a single contradiction by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no contradiction with that id exists.
    fn get(&self, contradiction_id: &ContradictionId) -> Result<Contradiction>;

    /// Appends a resolution event, transitioning `status` away from `open`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `contradiction_id` does not exist, or
    /// [`Error::Conflict`] if the contradiction is already in a terminal
    /// state (`resolved`/`dismissed` forbid further resolution events).
    fn append_resolution(
        &self,
        contradiction_id: &ContradictionId,
        action: Resolution,
        actor: Actor,
        at: i64,
        note: Option<String>,
    ) -> Result<()>;

    /// `true` iff at least one `open` contradiction involves `memory_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn has_open_for(&self, memory_id: &MemoryId) -> Result<bool>;

    /// Finds the most recent contradiction of `kind` on `slot`, if any,
    /// regardless of thread (used by the RETRACT_DENIAL rule, which looks
    /// only at "the most recent contradiction on this slot").
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn most_recent_of_kind(&self, thread_id: &str, slot: &str, kind: ContradictionKind) -> Result<Option<Contradiction>>;
}

/// In-memory ledger backend, `Mutex`-guarded, with the reverse index kept
/// alongside the primary append-only vector.
#[derive(Default)]
pub struct InMemoryContradictionLedger {
    contradictions: Mutex<HashMap<ContradictionId, Contradiction>>,
    order: Mutex<Vec<ContradictionId>>,
    by_memory: Mutex<HashMap<MemoryId, HashSet<ContradictionId>>>,
    by_thread: Mutex<HashMap<ContradictionId, String>>,
}

impl InMemoryContradictionLedger {
    /// Builds an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a contradiction, tagging it with the owning thread for
    /// `list_open`. Kept as an inherent method (in addition to the trait's
    /// `record`) so existing call sites naming it explicitly keep compiling.
    pub fn record_for_thread(
        &self,
        thread_id: &str,
        kind: ContradictionKind,
        involved_memory_ids: Vec<MemoryId>,
        slot: &str,
        domains: std::collections::BTreeSet<String>,
        severity: Severity,
        created_at: i64,
    ) -> Result<ContradictionId> {
        let contradiction = Contradiction::new(kind, involved_memory_ids.clone(), slot, domains, severity, created_at);
        let id = contradiction.contradiction_id.clone();
        let mut contradictions = self.contradictions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        contradictions.insert(id.clone(), contradiction);
        self.order.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(id.clone());
        self.by_thread
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(id.clone(), thread_id.to_string());
        let mut by_memory = self.by_memory.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for memory_id in involved_memory_ids {
            by_memory.entry(memory_id).or_default().insert(id.clone());
        }
        Ok(id)
    }
}

impl ContradictionLedger for InMemoryContradictionLedger {
    #[instrument(skip(self, involved_memory_ids, domains))]
    fn record(
        &self,
        thread_id: &str,
        kind: ContradictionKind,
        involved_memory_ids: Vec<MemoryId>,
        slot: &str,
        domains: std::collections::BTreeSet<String>,
        severity: Severity,
        created_at: i64,
    ) -> Result<ContradictionId> {
        self.record_for_thread(thread_id, kind, involved_memory_ids, slot, domains, severity, created_at)
    }

    fn list_open(&self, thread_id: &str) -> Result<Vec<Contradiction>> {
        let contradictions = self.contradictions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let by_thread = self.by_thread.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut results: Vec<Contradiction> = contradictions
            .values()
            .filter(|c| c.status == ContradictionStatus::Open)
            .filter(|c| by_thread.get(&c.contradiction_id).map(String::as_str) == Some(thread_id) || thread_id.is_empty())
            .cloned()
            .collect();
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(results)
    }

    fn list_by_memory(&self, memory_id: &MemoryId) -> Result<Vec<Contradiction>> {
        let by_memory = self.by_memory.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(ids) = by_memory.get(memory_id) else {
            return Ok(Vec::new());
        };
        let contradictions = self.contradictions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut results: Vec<Contradiction> = ids.iter().filter_map(|id| contradictions.get(id).cloned()).collect();
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(results)
    }

    fn get(&self, contradiction_id: &ContradictionId) -> Result<Contradiction> {
        let contradictions = self.contradictions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        contradictions.get(contradiction_id).cloned().ok_or_else(|| Error::NotFound {
            what: format!("contradiction_id={contradiction_id}"),
        })
    }

    fn append_resolution(
        &self,
        contradiction_id: &ContradictionId,
        action: Resolution,
        actor: Actor,
        at: i64,
        note: Option<String>,
    ) -> Result<()> {
        let mut contradictions = self.contradictions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let contradiction = contradictions.get_mut(contradiction_id).ok_or_else(|| Error::NotFound {
            what: format!("contradiction_id={contradiction_id}"),
        })?;
        if contradiction.status.is_terminal() {
            return Err(Error::Conflict {
                reason: format!("contradiction {contradiction_id} is already {}", contradiction.status),
            });
        }
        contradiction.append_resolution(action, actor, at, note);
        Ok(())
    }

    fn has_open_for(&self, memory_id: &MemoryId) -> Result<bool> {
        let by_memory = self.by_memory.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(ids) = by_memory.get(memory_id) else {
            return Ok(false);
        };
        let contradictions = self.contradictions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(ids.iter().any(|id| contradictions.get(id).is_some_and(|c| c.status == ContradictionStatus::Open)))
    }

    fn most_recent_of_kind(&self, thread_id: &str, slot: &str, kind: ContradictionKind) -> Result<Option<Contradiction>> {
        let contradictions = self.contradictions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let by_thread = self.by_thread.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut matching: Vec<Contradiction> = contradictions
            .values()
            .filter(|c| c.kind == kind && c.slot == slot)
            .filter(|c| by_thread.get(&c.contradiction_id).map(String::as_str) == Some(thread_id) || thread_id.is_empty())
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching.into_iter().next())
    }
}

/// `SQLite`-backed ledger, durable across process restarts.
pub struct SqliteContradictionLedger {
    conn: Mutex<Connection>,
}

impl SqliteContradictionLedger {
    /// Opens (creating if necessary) a `SQLite`-backed ledger at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the database cannot be opened or
    /// the schema cannot be initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| Error::OperationFailed {
            operation: "open_sqlite_ledger".to_string(),
            cause: e.to_string(),
        })?;
        let ledger = Self { conn: Mutex::new(conn) };
        ledger.initialize()?;
        Ok(ledger)
    }

    /// Opens an in-memory `SQLite` ledger.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the schema cannot be initialized.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_sqlite_ledger".to_string(),
            cause: e.to_string(),
        })?;
        let ledger = Self { conn: Mutex::new(conn) };
        ledger.initialize()?;
        Ok(ledger)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             CREATE TABLE IF NOT EXISTS contradictions (
                 contradiction_id TEXT PRIMARY KEY,
                 thread_id TEXT NOT NULL,
                 created_at INTEGER NOT NULL,
                 updated_at INTEGER NOT NULL,
                 kind TEXT NOT NULL,
                 involved_memory_ids TEXT NOT NULL,
                 slot TEXT NOT NULL,
                 affected_domains TEXT NOT NULL,
                 severity TEXT NOT NULL,
                 status TEXT NOT NULL,
                 resolution TEXT,
                 resolution_history TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_contradictions_thread ON contradictions(thread_id);
             CREATE INDEX IF NOT EXISTS idx_contradictions_slot ON contradictions(thread_id, slot);",
        )
        .map_err(|e| Error::OperationFailed {
            operation: "init_ledger_schema".to_string(),
            cause: e.to_string(),
        })
    }

    fn row_to_contradiction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Contradiction> {
        let kind: String = row.get("kind")?;
        let severity: String = row.get("severity")?;
        let status: String = row.get("status")?;
        let resolution: Option<String> = row.get("resolution")?;
        let involved: String = row.get("involved_memory_ids")?;
        let domains: String = row.get("affected_domains")?;
        let history: String = row.get("resolution_history")?;
        Ok(Contradiction {
            contradiction_id: ContradictionId::from(row.get::<_, String>("contradiction_id")?),
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            kind: parse_kind(&kind),
            involved_memory_ids: involved.split(',').filter(|s| !s.is_empty()).map(|s| MemoryId::from(s.to_string())).collect(),
            slot: row.get("slot")?,
            affected_domains: domains.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect(),
            severity: parse_severity(&severity),
            status: parse_status(&status),
            resolution: resolution.as_deref().map(parse_resolution),
            resolution_history: serde_json::from_str(&history).unwrap_or_default(),
        })
    }
}

fn parse_kind(s: &str) -> ContradictionKind {
    match s {
        "refinement" => ContradictionKind::Refinement,
        "temporal" => ContradictionKind::Temporal,
        "conflict" => ContradictionKind::Conflict,
        "denial" => ContradictionKind::Denial,
        "numeric_drift" => ContradictionKind::NumericDrift,
        _ => ContradictionKind::Revision,
    }
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "medium" => Severity::Medium,
        "high" => Severity::High,
        _ => Severity::Low,
    }
}

fn parse_status(s: &str) -> ContradictionStatus {
    match s {
        "resolved" => ContradictionStatus::Resolved,
        "dismissed" => ContradictionStatus::Dismissed,
        _ => ContradictionStatus::Open,
    }
}

fn parse_resolution(s: &str) -> Resolution {
    match s {
        "update_to_older" => Resolution::UpdateToOlder,
        "keep_both" => Resolution::KeepBoth,
        "split_by_domain" => Resolution::SplitByDomain,
        "mark_past" => Resolution::MarkPast,
        "dismissed" => Resolution::Dismissed,
        _ => Resolution::UpdateToNewer,
    }
}

impl SqliteContradictionLedger {
    fn write_row(&self, conn: &Connection, c: &Contradiction, thread_id: &str) -> Result<()> {
        let involved = c.involved_memory_ids.iter().map(|m| m.0.clone()).collect::<Vec<_>>().join(",");
        let domains = c.affected_domains.iter().cloned().collect::<Vec<_>>().join(",");
        let history = serde_json::to_string(&c.resolution_history).unwrap_or_default();
        conn.execute(
            "INSERT INTO contradictions (contradiction_id, thread_id, created_at, updated_at, kind,
                involved_memory_ids, slot, affected_domains, severity, status, resolution, resolution_history)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                c.contradiction_id.0,
                thread_id,
                c.created_at,
                c.updated_at,
                c.kind.as_str(),
                involved,
                c.slot,
                domains,
                c.severity.as_str(),
                c.status.as_str(),
                c.resolution.map(Resolution::as_str),
                history,
            ],
        )
        .map_err(|e| Error::OperationFailed {
            operation: "insert_contradiction".to_string(),
            cause: e.to_string(),
        })?;
        Ok(())
    }
}

impl ContradictionLedger for SqliteContradictionLedger {
    fn record(
        &self,
        thread_id: &str,
        kind: ContradictionKind,
        involved_memory_ids: Vec<MemoryId>,
        slot: &str,
        domains: std::collections::BTreeSet<String>,
        severity: Severity,
        created_at: i64,
    ) -> Result<ContradictionId> {
        let contradiction = Contradiction::new(kind, involved_memory_ids, slot, domains, severity, created_at);
        let id = contradiction.contradiction_id.clone();
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.write_row(&conn, &contradiction, thread_id)?;
        Ok(id)
    }

    fn list_open(&self, thread_id: &str) -> Result<Vec<Contradiction>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn
            .prepare("SELECT * FROM contradictions WHERE thread_id = ?1 AND status = 'open' ORDER BY created_at ASC")
            .map_err(|e| Error::OperationFailed {
                operation: "list_open".to_string(),
                cause: e.to_string(),
            })?;
        let rows = stmt
            .query_map(params![thread_id], Self::row_to_contradiction)
            .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
            .map_err(|e| Error::OperationFailed {
                operation: "list_open".to_string(),
                cause: e.to_string(),
            })?;
        Ok(rows)
    }

    fn list_by_memory(&self, memory_id: &MemoryId) -> Result<Vec<Contradiction>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let pattern = format!("%{}%", memory_id.0);
        let mut stmt = conn
            .prepare("SELECT * FROM contradictions WHERE involved_memory_ids LIKE ?1 ORDER BY created_at ASC")
            .map_err(|e| Error::OperationFailed {
                operation: "list_by_memory".to_string(),
                cause: e.to_string(),
            })?;
        let rows = stmt
            .query_map(params![pattern], Self::row_to_contradiction)
            .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
            .map_err(|e| Error::OperationFailed {
                operation: "list_by_memory".to_string(),
                cause: e.to_string(),
            })?;
        Ok(rows.into_iter().filter(|c| c.involves(memory_id)).collect())
    }

    fn get(&self, contradiction_id: &ContradictionId) -> Result<Contradiction> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.query_row(
            "SELECT * FROM contradictions WHERE contradiction_id = ?1",
            params![contradiction_id.0],
            Self::row_to_contradiction,
        )
        .optional()
        .map_err(|e| Error::OperationFailed {
            operation: "get_contradiction".to_string(),
            cause: e.to_string(),
        })?
        .ok_or_else(|| Error::NotFound {
            what: format!("contradiction_id={contradiction_id}"),
        })
    }

    fn append_resolution(
        &self,
        contradiction_id: &ContradictionId,
        action: Resolution,
        actor: Actor,
        at: i64,
        note: Option<String>,
    ) -> Result<()> {
        let mut contradiction = self.get(contradiction_id)?;
        if contradiction.status.is_terminal() {
            return Err(Error::Conflict {
                reason: format!("contradiction {contradiction_id} is already {}", contradiction.status),
            });
        }
        contradiction.append_resolution(action, actor, at, note);
        let history = serde_json::to_string(&contradiction.resolution_history).unwrap_or_default();
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.execute(
            "UPDATE contradictions SET status = ?2, updated_at = ?3, resolution = ?4, resolution_history = ?5 WHERE contradiction_id = ?1",
            params![
                contradiction_id.0,
                contradiction.status.as_str(),
                contradiction.updated_at,
                contradiction.resolution.map(Resolution::as_str),
                history,
            ],
        )
        .map_err(|e| Error::OperationFailed {
            operation: "update_contradiction".to_string(),
            cause: e.to_string(),
        })?;
        Ok(())
    }

    fn has_open_for(&self, memory_id: &MemoryId) -> Result<bool> {
        Ok(self.list_by_memory(memory_id)?.iter().any(|c| c.status == ContradictionStatus::Open))
    }

    fn most_recent_of_kind(&self, thread_id: &str, slot: &str, kind: ContradictionKind) -> Result<Option<Contradiction>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn
            .prepare("SELECT * FROM contradictions WHERE thread_id = ?1 AND slot = ?2 AND kind = ?3 ORDER BY created_at DESC LIMIT 1")
            .map_err(|e| Error::OperationFailed {
                operation: "most_recent_of_kind".to_string(),
                cause: e.to_string(),
            })?;
        stmt.query_row(params![thread_id, slot, kind.as_str()], Self::row_to_contradiction)
            .optional()
            .map_err(|e| Error::OperationFailed {
                operation: "most_recent_of_kind".to_string(),
                cause: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_id(s: &str) -> MemoryId {
        MemoryId::from(s.to_string())
    }

    #[test]
    fn has_open_for_is_true_only_for_involved_memories() {
        let ledger = InMemoryContradictionLedger::new();
        ledger
            .record_for_thread(
                "t1",
                ContradictionKind::Revision,
                vec![mk_id("m1")],
                "employer",
                std::collections::BTreeSet::from(["general".to_string()]),
                Severity::High,
                0,
            )
            .unwrap();
        assert!(ledger.has_open_for(&mk_id("m1")).unwrap());
        assert!(!ledger.has_open_for(&mk_id("m2")).unwrap());
    }

    #[test]
    fn resolving_closes_has_open_for() {
        let ledger = InMemoryContradictionLedger::new();
        let id = ledger
            .record_for_thread(
                "t1",
                ContradictionKind::Revision,
                vec![mk_id("m1")],
                "employer",
                std::collections::BTreeSet::from(["general".to_string()]),
                Severity::High,
                0,
            )
            .unwrap();
        ledger.append_resolution(&id, Resolution::UpdateToNewer, Actor::User, 10, None).unwrap();
        assert!(!ledger.has_open_for(&mk_id("m1")).unwrap());
    }

    #[test]
    fn terminal_states_forbid_further_resolution() {
        let ledger = InMemoryContradictionLedger::new();
        let id = ledger
            .record_for_thread(
                "t1",
                ContradictionKind::Denial,
                vec![mk_id("m1")],
                "has_phd",
                std::collections::BTreeSet::from(["general".to_string()]),
                Severity::Medium,
                0,
            )
            .unwrap();
        ledger.append_resolution(&id, Resolution::UpdateToOlder, Actor::System, 5, None).unwrap();
        let err = ledger.append_resolution(&id, Resolution::Dismissed, Actor::User, 10, None).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn scope_isolation_holds_across_independent_memories() {
        let ledger = InMemoryContradictionLedger::new();
        ledger
            .record_for_thread(
                "t1",
                ContradictionKind::Conflict,
                vec![mk_id("m1"), mk_id("m2")],
                "employer",
                std::collections::BTreeSet::from(["general".to_string()]),
                Severity::High,
                0,
            )
            .unwrap();
        assert!(!ledger.has_open_for(&mk_id("m3")).unwrap());
    }

    #[test]
    fn sqlite_ledger_round_trips_resolution_history() {
        let ledger = SqliteContradictionLedger::open_in_memory().unwrap();
        let id = ledger
            .record(
                "t1",
                ContradictionKind::Revision,
                vec![mk_id("m1")],
                "employer",
                std::collections::BTreeSet::from(["general".to_string()]),
                Severity::High,
                0,
            )
            .unwrap();
        ledger.append_resolution(&id, Resolution::UpdateToNewer, Actor::User, 10, Some("note".to_string())).unwrap();
        let fetched = ledger.get(&id).unwrap();
        assert_eq!(fetched.resolution_history.len(), 1);
        assert_eq!(fetched.status, ContradictionStatus::Resolved);
    }
}
