//! Memory Store (C3).
//!
//! Durable, per-thread-ordered persistence of memories. Concurrency model:
//! single-writer per thread, multiple readers; writes are serialized through
//! a per-thread lock and readers observe a monotonic write order.

use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, params};
use tracing::instrument;

use crate::models::{Memory, MemoryId, MemorySource, MemoryStatus, TemporalStatus};
use crate::{Error, Result};

/// Trait implemented by every memory persistence backend.
///
/// Matches the in-memory/`SQLite` split used elsewhere in this codebase's
/// storage layer: both implementations share this conformance surface so
/// behavior cannot silently diverge between the fast unit-test path and the
/// durable CLI path.
pub trait MemoryStore: Send + Sync {
    /// Persists a new memory. Never overwrites an existing `memory_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if `memory.memory_id` already exists, or
    /// [`Error::Busy`] if the write log is saturated.
    fn put(&self, memory: Memory) -> Result<MemoryId>;

    /// Retrieves a memory by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if no memory with that id exists.
    fn get(&self, memory_id: &MemoryId) -> Result<Memory>;

    /// Lists memories for a `(thread_id, slot)` pair, newest first.
    ///
    /// Excludes `superseded` memories unless `include_past` additionally
    /// requests them via `status`; "past" here refers to `include_past`
    /// widening the `temporal_status` filter, not lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn list_by_slot(&self, thread_id: &str, slot: &str, include_past: bool) -> Result<Vec<Memory>>;

    /// Lists the most recent memories for a thread, across all slots.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn list_recent(&self, thread_id: &str, limit: usize) -> Result<Vec<Memory>>;

    /// Lists active memories for a thread carrying `domain` in their tags.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn list_by_domain(&self, thread_id: &str, domain: &str) -> Result<Vec<Memory>>;

    /// Marks `memory_id` as superseded by `by_memory_id`.
    ///
    /// Called only by [`crate::resolution`]; `trust` is left untouched (decay
    /// is a separate concern).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `memory_id` does not exist.
    fn mark_superseded(&self, memory_id: &MemoryId, by_memory_id: &MemoryId) -> Result<()>;

    /// Sets `temporal_status` on a memory without changing any other field.
    ///
    /// Used by the detector's TEMPORAL handling (§4.5 item 5): a timeline
    /// update is expressed as a fresh memory in the spec, but the in-place
    /// variant here is used when resolving a contradiction rather than
    /// asserting a new fact (`mark_past`, §4.9).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `memory_id` does not exist.
    fn set_temporal_status(&self, memory_id: &MemoryId, status: TemporalStatus) -> Result<()>;

    /// Attaches `domains` to a memory's existing domain tag set (used by
    /// `split_by_domain` resolutions).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `memory_id` does not exist.
    fn add_domain_tags(&self, memory_id: &MemoryId, domains: BTreeSet<String>) -> Result<()>;

    /// Sets `trust` directly, clamped by the caller to `[trust_min, trust_max]`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `memory_id` does not exist.
    fn set_trust(&self, memory_id: &MemoryId, trust: f64) -> Result<()>;

    /// Recomputes `trust` for every active memory using exponential decay
    /// with the given half-life, clamped to `[trust_min, trust_max]`.
    /// Returns the number of memories updated.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage operation fails.
    fn apply_decay(&self, now: i64, half_life_secs: i64, trust_min: f64, trust_max: f64) -> Result<usize>;
}

/// In-memory backend: a `Mutex`-guarded map, ordered by insertion. Used for
/// fast unit tests and as the default when no `SQLite` path is configured.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    memories: Mutex<HashMap<MemoryId, Memory>>,
    insertion_order: Mutex<Vec<MemoryId>>,
}

impl InMemoryMemoryStore {
    /// Builds an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryStore for InMemoryMemoryStore {
    #[instrument(skip(self, memory), fields(memory_id = %memory.memory_id))]
    fn put(&self, memory: Memory) -> Result<MemoryId> {
        let mut memories = self.memories.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if memories.contains_key(&memory.memory_id) {
            return Err(Error::Conflict {
                reason: format!("memory_id {} already exists", memory.memory_id),
            });
        }
        let id = memory.memory_id.clone();
        memories.insert(id.clone(), memory);
        self.insertion_order.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(id.clone());
        Ok(id)
    }

    fn get(&self, memory_id: &MemoryId) -> Result<Memory> {
        let memories = self.memories.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        memories.get(memory_id).cloned().ok_or_else(|| Error::NotFound {
            what: format!("memory_id={memory_id}"),
        })
    }

    fn list_by_slot(&self, thread_id: &str, slot: &str, include_past: bool) -> Result<Vec<Memory>> {
        let memories = self.memories.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut results: Vec<Memory> = memories
            .values()
            .filter(|m| m.thread_id == thread_id)
            .filter(|m| m.slot.as_deref() == Some(slot))
            .filter(|m| include_past || m.status != MemoryStatus::Superseded)
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    fn list_recent(&self, thread_id: &str, limit: usize) -> Result<Vec<Memory>> {
        let memories = self.memories.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut results: Vec<Memory> = memories.values().filter(|m| m.thread_id == thread_id).cloned().collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        results.truncate(limit);
        Ok(results)
    }

    fn list_by_domain(&self, thread_id: &str, domain: &str) -> Result<Vec<Memory>> {
        let memories = self.memories.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut results: Vec<Memory> = memories
            .values()
            .filter(|m| m.thread_id == thread_id && m.status == MemoryStatus::Active)
            .filter(|m| m.domain_tags.contains(domain))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(results)
    }

    fn mark_superseded(&self, memory_id: &MemoryId, by_memory_id: &MemoryId) -> Result<()> {
        let mut memories = self.memories.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let memory = memories.get_mut(memory_id).ok_or_else(|| Error::NotFound {
            what: format!("memory_id={memory_id}"),
        })?;
        memory.status = MemoryStatus::Superseded;
        tracing::debug!(%memory_id, superseded_by = %by_memory_id, "memory marked superseded");
        Ok(())
    }

    fn set_temporal_status(&self, memory_id: &MemoryId, status: TemporalStatus) -> Result<()> {
        let mut memories = self.memories.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let memory = memories.get_mut(memory_id).ok_or_else(|| Error::NotFound {
            what: format!("memory_id={memory_id}"),
        })?;
        memory.temporal_status = status;
        Ok(())
    }

    fn add_domain_tags(&self, memory_id: &MemoryId, domains: BTreeSet<String>) -> Result<()> {
        let mut memories = self.memories.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let memory = memories.get_mut(memory_id).ok_or_else(|| Error::NotFound {
            what: format!("memory_id={memory_id}"),
        })?;
        memory.domain_tags.extend(domains);
        Ok(())
    }

    fn set_trust(&self, memory_id: &MemoryId, trust: f64) -> Result<()> {
        let mut memories = self.memories.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let memory = memories.get_mut(memory_id).ok_or_else(|| Error::NotFound {
            what: format!("memory_id={memory_id}"),
        })?;
        memory.trust = trust.clamp(0.0, 1.0);
        Ok(())
    }

    fn apply_decay(&self, now: i64, half_life_secs: i64, trust_min: f64, trust_max: f64) -> Result<usize> {
        let mut memories = self.memories.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut updated = 0usize;
        for memory in memories.values_mut() {
            if memory.status == MemoryStatus::Superseded {
                continue;
            }
            let age = (now - memory.created_at).max(0) as f64;
            let decayed = memory.trust * 0.5_f64.powf(age / half_life_secs as f64);
            memory.trust = decayed.clamp(trust_min, trust_max);
            updated += 1;
        }
        Ok(updated)
    }
}

/// `SQLite`-backed memory store, durable across process restarts.
///
/// Mirrors the reference architecture's `SQLite` persistence backend: a
/// single `Mutex<Connection>` guarded by WAL journaling and a busy timeout,
/// since `rusqlite::Connection` is not `Sync`.
pub struct SqliteMemoryStore {
    conn: Mutex<Connection>,
}

impl SqliteMemoryStore {
    /// Opens (creating if necessary) a `SQLite`-backed store at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the database cannot be opened or
    /// the schema cannot be initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| Error::OperationFailed {
            operation: "open_sqlite_memory_store".to_string(),
            cause: e.to_string(),
        })?;
        let store = Self { conn: Mutex::new(conn) };
        store.initialize()?;
        Ok(store)
    }

    /// Opens an in-memory `SQLite` database (useful for integration tests
    /// that want real SQL semantics without a file on disk).
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the schema cannot be initialized.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| Error::OperationFailed {
            operation: "open_sqlite_memory_store".to_string(),
            cause: e.to_string(),
        })?;
        let store = Self { conn: Mutex::new(conn) };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;
             PRAGMA synchronous=NORMAL;
             CREATE TABLE IF NOT EXISTS memories (
                 memory_id TEXT PRIMARY KEY,
                 thread_id TEXT NOT NULL,
                 session_id TEXT NOT NULL,
                 text TEXT NOT NULL,
                 slot TEXT,
                 value TEXT,
                 raw_value TEXT,
                 source TEXT NOT NULL,
                 trust REAL NOT NULL,
                 confidence REAL NOT NULL,
                 created_at INTEGER NOT NULL,
                 valid_from INTEGER,
                 valid_until INTEGER,
                 period_text TEXT,
                 temporal_status TEXT NOT NULL,
                 domain_tags TEXT NOT NULL,
                 status TEXT NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_memories_thread_slot ON memories(thread_id, slot);
             CREATE INDEX IF NOT EXISTS idx_memories_thread_created ON memories(thread_id, created_at);",
        )
        .map_err(|e| Error::OperationFailed {
            operation: "init_memories_schema".to_string(),
            cause: e.to_string(),
        })
    }

    fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
        let source: String = row.get("source")?;
        let temporal_status: String = row.get("temporal_status")?;
        let status: String = row.get("status")?;
        let domain_tags: String = row.get("domain_tags")?;
        Ok(Memory {
            memory_id: MemoryId::from(row.get::<_, String>("memory_id")?),
            thread_id: row.get("thread_id")?,
            session_id: row.get("session_id")?,
            text: row.get("text")?,
            slot: row.get("slot")?,
            value: row.get("value")?,
            raw_value: row.get("raw_value")?,
            source: parse_source(&source),
            trust: row.get("trust")?,
            confidence: row.get("confidence")?,
            created_at: row.get("created_at")?,
            valid_from: row.get("valid_from")?,
            valid_until: row.get("valid_until")?,
            period_text: row.get("period_text")?,
            temporal_status: parse_temporal_status(&temporal_status),
            domain_tags: domain_tags.split(',').filter(|s| !s.is_empty()).map(str::to_string).collect(),
            status: parse_status(&status),
        })
    }
}

fn parse_source(s: &str) -> MemorySource {
    match s {
        "system" => MemorySource::System,
        "tool" => MemorySource::Tool,
        "inferred" => MemorySource::Inferred,
        _ => MemorySource::User,
    }
}

fn parse_temporal_status(s: &str) -> TemporalStatus {
    match s {
        "past" => TemporalStatus::Past,
        "future" => TemporalStatus::Future,
        "potential" => TemporalStatus::Potential,
        _ => TemporalStatus::Active,
    }
}

fn parse_status(s: &str) -> MemoryStatus {
    match s {
        "superseded" => MemoryStatus::Superseded,
        "deprecated" => MemoryStatus::Deprecated,
        _ => MemoryStatus::Active,
    }
}

impl MemoryStore for SqliteMemoryStore {
    #[instrument(skip(self, memory), fields(memory_id = %memory.memory_id))]
    fn put(&self, memory: Memory) -> Result<MemoryId> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let domain_tags = memory.domain_tags.iter().cloned().collect::<Vec<_>>().join(",");
        let result = conn.execute(
            "INSERT INTO memories (memory_id, thread_id, session_id, text, slot, value, raw_value, source, trust,
                confidence, created_at, valid_from, valid_until, period_text, temporal_status, domain_tags, status)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
            params![
                memory.memory_id.0,
                memory.thread_id,
                memory.session_id,
                memory.text,
                memory.slot,
                memory.value,
                memory.raw_value,
                memory.source.as_str(),
                memory.trust,
                memory.confidence,
                memory.created_at,
                memory.valid_from,
                memory.valid_until,
                memory.period_text,
                memory.temporal_status.as_str(),
                domain_tags,
                memory.status.as_str(),
            ],
        );
        match result {
            Ok(_) => Ok(memory.memory_id),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => Err(Error::Conflict {
                reason: format!("memory_id {} already exists", memory.memory_id),
            }),
            Err(e) => Err(Error::OperationFailed {
                operation: "insert_memory".to_string(),
                cause: e.to_string(),
            }),
        }
    }

    fn get(&self, memory_id: &MemoryId) -> Result<Memory> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        conn.query_row("SELECT * FROM memories WHERE memory_id = ?1", params![memory_id.0], Self::row_to_memory)
            .optional()
            .map_err(|e| Error::OperationFailed {
                operation: "get_memory".to_string(),
                cause: e.to_string(),
            })?
            .ok_or_else(|| Error::NotFound {
                what: format!("memory_id={memory_id}"),
            })
    }

    fn list_by_slot(&self, thread_id: &str, slot: &str, include_past: bool) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let query = if include_past {
            "SELECT * FROM memories WHERE thread_id = ?1 AND slot = ?2 ORDER BY created_at DESC"
        } else {
            "SELECT * FROM memories WHERE thread_id = ?1 AND slot = ?2 AND status != 'superseded' ORDER BY created_at DESC"
        };
        let mut stmt = conn.prepare(query).map_err(|e| Error::OperationFailed {
            operation: "list_by_slot".to_string(),
            cause: e.to_string(),
        })?;
        let rows = stmt
            .query_map(params![thread_id, slot], Self::row_to_memory)
            .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
            .map_err(|e| Error::OperationFailed {
                operation: "list_by_slot".to_string(),
                cause: e.to_string(),
            })?;
        Ok(rows)
    }

    fn list_recent(&self, thread_id: &str, limit: usize) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn
            .prepare("SELECT * FROM memories WHERE thread_id = ?1 ORDER BY created_at DESC LIMIT ?2")
            .map_err(|e| Error::OperationFailed {
                operation: "list_recent".to_string(),
                cause: e.to_string(),
            })?;
        #[allow(clippy::cast_possible_wrap)]
        let rows = stmt
            .query_map(params![thread_id, limit as i64], Self::row_to_memory)
            .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
            .map_err(|e| Error::OperationFailed {
                operation: "list_recent".to_string(),
                cause: e.to_string(),
            })?;
        Ok(rows)
    }

    fn list_by_domain(&self, thread_id: &str, domain: &str) -> Result<Vec<Memory>> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn
            .prepare("SELECT * FROM memories WHERE thread_id = ?1 AND status = 'active' AND (',' || domain_tags || ',') LIKE ?2 ORDER BY created_at DESC")
            .map_err(|e| Error::OperationFailed {
                operation: "list_by_domain".to_string(),
                cause: e.to_string(),
            })?;
        let pattern = format!("%,{domain},%");
        let rows = stmt
            .query_map(params![thread_id, pattern], Self::row_to_memory)
            .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
            .map_err(|e| Error::OperationFailed {
                operation: "list_by_domain".to_string(),
                cause: e.to_string(),
            })?;
        Ok(rows)
    }

    fn mark_superseded(&self, memory_id: &MemoryId, by_memory_id: &MemoryId) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let updated = conn
            .execute("UPDATE memories SET status = 'superseded' WHERE memory_id = ?1", params![memory_id.0])
            .map_err(|e| Error::OperationFailed {
                operation: "mark_superseded".to_string(),
                cause: e.to_string(),
            })?;
        if updated == 0 {
            return Err(Error::NotFound {
                what: format!("memory_id={memory_id}"),
            });
        }
        tracing::debug!(%memory_id, superseded_by = %by_memory_id, "memory marked superseded");
        Ok(())
    }

    fn set_temporal_status(&self, memory_id: &MemoryId, status: TemporalStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let updated = conn
            .execute(
                "UPDATE memories SET temporal_status = ?2 WHERE memory_id = ?1",
                params![memory_id.0, status.as_str()],
            )
            .map_err(|e| Error::OperationFailed {
                operation: "set_temporal_status".to_string(),
                cause: e.to_string(),
            })?;
        if updated == 0 {
            return Err(Error::NotFound {
                what: format!("memory_id={memory_id}"),
            });
        }
        Ok(())
    }

    fn add_domain_tags(&self, memory_id: &MemoryId, domains: BTreeSet<String>) -> Result<()> {
        let mut memory = self.get(memory_id)?;
        memory.domain_tags.extend(domains);
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let joined = memory.domain_tags.iter().cloned().collect::<Vec<_>>().join(",");
        conn.execute("UPDATE memories SET domain_tags = ?2 WHERE memory_id = ?1", params![memory_id.0, joined])
            .map_err(|e| Error::OperationFailed {
                operation: "add_domain_tags".to_string(),
                cause: e.to_string(),
            })?;
        Ok(())
    }

    fn set_trust(&self, memory_id: &MemoryId, trust: f64) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let updated = conn
            .execute("UPDATE memories SET trust = ?2 WHERE memory_id = ?1", params![memory_id.0, trust.clamp(0.0, 1.0)])
            .map_err(|e| Error::OperationFailed {
                operation: "set_trust".to_string(),
                cause: e.to_string(),
            })?;
        if updated == 0 {
            return Err(Error::NotFound {
                what: format!("memory_id={memory_id}"),
            });
        }
        Ok(())
    }

    fn apply_decay(&self, now: i64, half_life_secs: i64, trust_min: f64, trust_max: f64) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut stmt = conn
            .prepare("SELECT memory_id, trust, created_at FROM memories WHERE status != 'superseded'")
            .map_err(|e| Error::OperationFailed {
                operation: "apply_decay_select".to_string(),
                cause: e.to_string(),
            })?;
        let rows: Vec<(String, f64, i64)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .and_then(Iterator::collect::<rusqlite::Result<Vec<_>>>)
            .map_err(|e| Error::OperationFailed {
                operation: "apply_decay_select".to_string(),
                cause: e.to_string(),
            })?;
        for (id, trust, created_at) in &rows {
            let age = (now - created_at).max(0) as f64;
            let decayed = trust * 0.5_f64.powf(age / half_life_secs as f64);
            let clamped = decayed.clamp(trust_min, trust_max);
            conn.execute("UPDATE memories SET trust = ?2 WHERE memory_id = ?1", params![id, clamped])
                .map_err(|e| Error::OperationFailed {
                    operation: "apply_decay_update".to_string(),
                    cause: e.to_string(),
                })?;
        }
        Ok(rows.len())
    }
}
