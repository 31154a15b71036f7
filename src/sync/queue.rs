//! Durable queue of writes waiting for the origin.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::db::{parse_datetime, Database};

/// Class of pending mutation. Each class is drained by its own sync tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
  HabitCompletion,
  JournalEntry,
}

impl MutationKind {
  pub const ALL: [MutationKind; 2] = [MutationKind::HabitCompletion, MutationKind::JournalEntry];

  /// Sync trigger tag that drains this class
  pub fn tag(&self) -> &'static str {
    match self {
      MutationKind::HabitCompletion => "habit-completion",
      MutationKind::JournalEntry => "journal-entry",
    }
  }

  /// `None` for tags this worker does not handle
  pub fn from_tag(tag: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|k| k.tag() == tag)
  }
}

impl std::fmt::Display for MutationKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.tag())
  }
}

/// A queued write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMutation {
  pub id: Uuid,
  pub kind: MutationKind,
  pub payload: serde_json::Value,
  pub queued_at: DateTime<Utc>,
}

/// Trait for pending-mutation storage backends.
pub trait MutationQueue: Send + Sync {
  /// Append a mutation; the queue assigns its id.
  fn enqueue(&self, kind: MutationKind, payload: serde_json::Value) -> Result<PendingMutation>;

  /// Every pending mutation of a class, oldest first.
  fn pending(&self, kind: MutationKind) -> Result<Vec<PendingMutation>>;

  /// Remove exactly one mutation. Returns whether it was present.
  fn remove(&self, id: &Uuid) -> Result<bool>;
}

/// In-memory queue.
#[derive(Default)]
pub struct MemoryMutationQueue {
  entries: Mutex<Vec<PendingMutation>>,
}

impl MemoryMutationQueue {
  pub fn new() -> Self {
    Self::default()
  }
}

impl MutationQueue for MemoryMutationQueue {
  fn enqueue(&self, kind: MutationKind, payload: serde_json::Value) -> Result<PendingMutation> {
    let mutation = PendingMutation {
      id: Uuid::new_v4(),
      kind,
      payload,
      queued_at: Utc::now(),
    };
    self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?
      .push(mutation.clone());
    Ok(mutation)
  }

  fn pending(&self, kind: MutationKind) -> Result<Vec<PendingMutation>> {
    let entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(entries.iter().filter(|m| m.kind == kind).cloned().collect())
  }

  fn remove(&self, id: &Uuid) -> Result<bool> {
    let mut entries = self
      .entries
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let before = entries.len();
    entries.retain(|m| &m.id != id);
    Ok(entries.len() != before)
  }
}

/// SQLite-backed queue; survives restarts.
pub struct SqliteMutationQueue {
  db: Arc<Database>,
}

impl SqliteMutationQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl MutationQueue for SqliteMutationQueue {
  fn enqueue(&self, kind: MutationKind, payload: serde_json::Value) -> Result<PendingMutation> {
    let conn = self.db.conn()?;
    let id = Uuid::new_v4();
    let data =
      serde_json::to_string(&payload).map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_mutations (id, kind, payload, queued_at)
         VALUES (?, ?, ?, datetime('now'))",
        params![id.to_string(), kind.tag(), data],
      )
      .map_err(|e| eyre!("Failed to queue {} mutation: {}", kind, e))?;

    let queued_at: String = conn
      .query_row(
        "SELECT queued_at FROM pending_mutations WHERE id = ?",
        params![id.to_string()],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read queued mutation {}: {}", id, e))?;

    Ok(PendingMutation {
      id,
      kind,
      payload,
      queued_at: parse_datetime(&queued_at)?,
    })
  }

  fn pending(&self, kind: MutationKind) -> Result<Vec<PendingMutation>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, payload, queued_at FROM pending_mutations
         WHERE kind = ?
         ORDER BY seq",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map(params![kind.tag()], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query pending mutations: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read pending mutation: {}", e))?;

    rows
      .into_iter()
      .map(|(id, payload, queued_at)| {
        Ok(PendingMutation {
          id: Uuid::parse_str(&id).map_err(|e| eyre!("Corrupt mutation id '{}': {}", id, e))?,
          kind,
          payload: serde_json::from_str(&payload)
            .map_err(|e| eyre!("Failed to deserialize payload of {}: {}", id, e))?,
          queued_at: parse_datetime(&queued_at)?,
        })
      })
      .collect()
  }

  fn remove(&self, id: &Uuid) -> Result<bool> {
    let conn = self.db.conn()?;
    let removed = conn
      .execute(
        "DELETE FROM pending_mutations WHERE id = ?",
        params![id.to_string()],
      )
      .map_err(|e| eyre!("Failed to remove mutation {}: {}", id, e))?;
    Ok(removed > 0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn exercise_queue(queue: &dyn MutationQueue) {
    let first = queue
      .enqueue(MutationKind::HabitCompletion, json!({"habit_id": "a"}))
      .unwrap();
    queue
      .enqueue(MutationKind::JournalEntry, json!({"content": "day one"}))
      .unwrap();
    let second = queue
      .enqueue(MutationKind::HabitCompletion, json!({"habit_id": "b"}))
      .unwrap();

    let habits = queue.pending(MutationKind::HabitCompletion).unwrap();
    let ids: Vec<Uuid> = habits.iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![first.id, second.id]);
    assert_eq!(habits[1].payload, json!({"habit_id": "b"}));

    assert!(queue.remove(&first.id).unwrap());
    assert!(!queue.remove(&first.id).unwrap());
    assert_eq!(queue.pending(MutationKind::HabitCompletion).unwrap().len(), 1);
    assert_eq!(queue.pending(MutationKind::JournalEntry).unwrap().len(), 1);
  }

  #[test]
  fn test_memory_queue() {
    exercise_queue(&MemoryMutationQueue::new());
  }

  #[test]
  fn test_sqlite_queue() {
    exercise_queue(&SqliteMutationQueue::new(Arc::new(
      Database::open_in_memory().unwrap(),
    )));
  }

  #[test]
  fn test_pending_mutation_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worker.db");
    let open = || SqliteMutationQueue::new(Arc::new(Database::open(Some(path.as_path())).unwrap()));

    let queued = {
      let queue = open();
      queue
        .enqueue(MutationKind::JournalEntry, json!({"content": "written offline"}))
        .unwrap()
    };

    let queue = open();
    let pending = queue.pending(MutationKind::JournalEntry).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, queued.id);
    assert_eq!(pending[0].payload, json!({"content": "written offline"}));
    assert!(queue.pending(MutationKind::HabitCompletion).unwrap().is_empty());
  }

  #[test]
  fn test_tags() {
    assert_eq!(
      MutationKind::from_tag("habit-completion"),
      Some(MutationKind::HabitCompletion)
    );
    assert_eq!(
      MutationKind::from_tag("journal-entry"),
      Some(MutationKind::JournalEntry)
    );
    assert_eq!(MutationKind::from_tag("periodic-refresh"), None);
  }

  #[test]
  fn test_kind_serializes_as_tag() {
    assert_eq!(
      serde_json::to_value(MutationKind::JournalEntry).unwrap(),
      json!("journal-entry")
    );
  }
}
