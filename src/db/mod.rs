use crate::errors::{AppError, AppResult};
use crate::models::{
    ContainerKind, ContainerRecord, OrderPatch, OrderableEntity, PersistRequest, PushEnvelope, ReorderSettings,
};
use crate::policy::PolicyEngine;
use crate::reorder::{assign_contiguous_orders, reorder_ids};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

const SCHEMA_SQL: &str = include_str!("schema.sql");

/// Result of a persisted move: the renumbered container and the event
/// sequence number that versions it.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub container: ContainerRecord,
    pub version: u64,
    pub patches: Vec<OrderPatch>,
}

#[derive(Debug)]
pub struct Database {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Database {
    pub fn new(path: &Path) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| AppError::Io(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(AppError::from)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)
            .with_context(|| format!("applying schema to {}", path.display()))?;

        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        };
        db.ensure_default_settings()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn conn(&self) -> AppResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }

    // ─── Containers ─────────────────────────────────────────────────────────

    pub fn create_container(&self, id: &str, kind: ContainerKind) -> AppResult<ContainerRecord> {
        let now = Utc::now();
        let conn = self.conn()?;
        if query_container(&conn, id)?.is_some() {
            return Err(AppError::Conflict(format!("Container {} already exists", id)));
        }
        conn.execute(
            "INSERT INTO containers (id, kind, archived, created_at) VALUES (?1, ?2, 0, ?3)",
            params![id, kind.as_str(), now.to_rfc3339()],
        )?;
        Ok(ContainerRecord {
            id: id.to_string(),
            kind,
            archived: false,
            created_at: now,
        })
    }

    pub fn get_container(&self, id: &str) -> AppResult<Option<ContainerRecord>> {
        let conn = self.conn()?;
        query_container(&conn, id)
    }

    pub fn set_container_archived(&self, id: &str, archived: bool) -> AppResult<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE containers SET archived = ?1 WHERE id = ?2",
            params![archived, id],
        )?;
        if updated == 0 {
            return Err(AppError::NotFound(format!("Container {} does not exist", id)));
        }
        Ok(())
    }

    // ─── Entities ───────────────────────────────────────────────────────────

    pub fn list_entities(&self, container_id: &str) -> AppResult<Vec<OrderableEntity>> {
        let conn = self.conn()?;
        query_entities(&conn, container_id)
    }

    /// Appends a new entity after the current last one.
    pub fn insert_entity(&self, policy: &PolicyEngine, container_id: &str, entity_id: &str) -> AppResult<OrderableEntity> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn()?;
        let container = query_container(&conn, container_id)?
            .ok_or_else(|| AppError::NotFound(format!("Container {} does not exist", container_id)))?;
        let existing = query_entities(&conn, container_id)?;
        policy.validate_insert(&container, existing.len())?;
        if existing.iter().any(|entity| entity.id == entity_id) {
            return Err(AppError::Conflict(format!(
                "Entity {} already exists in container {}",
                entity_id, container_id
            )));
        }

        let position = existing
            .iter()
            .map(|entity| entity.order)
            .max()
            .map(|max| max.saturating_add(1))
            .unwrap_or(0);
        conn.execute(
            "INSERT INTO entities (id, container_id, position, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![entity_id, container_id, position, now],
        )?;
        Ok(OrderableEntity::new(entity_id, container_id, position))
    }

    /// Siblings keep their positions; gaps are closed by the next reorder.
    pub fn delete_entity(&self, container_id: &str, entity_id: &str) -> AppResult<bool> {
        let conn = self.conn()?;
        let deleted = conn.execute(
            "DELETE FROM entities WHERE container_id = ?1 AND id = ?2",
            params![container_id, entity_id],
        )?;
        Ok(deleted > 0)
    }

    /// Moves one entity to `new_order`, renumbers the container contiguously
    /// and records the result as the next order event.
    pub fn move_entity(&self, policy: &PolicyEngine, request: &PersistRequest) -> AppResult<MoveOutcome> {
        let now = Utc::now().to_rfc3339();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let container = query_container(&tx, &request.container_id)?.ok_or_else(|| {
            AppError::NotFound(format!("Container {} does not exist", request.container_id))
        })?;
        let ids = query_entities(&tx, &request.container_id)?
            .into_iter()
            .map(|entity| entity.id)
            .collect::<Vec<_>>();
        let source_index = policy.validate_move(&container, &ids, request)?;

        let next = reorder_ids(&ids, source_index, request.new_order as usize);
        let patches = assign_contiguous_orders(&next)
            .into_iter()
            .map(|(entity_id, new_order)| OrderPatch { entity_id, new_order })
            .collect::<Vec<_>>();
        for patch in &patches {
            tx.execute(
                "UPDATE entities SET position = ?1, updated_at = ?2 WHERE container_id = ?3 AND id = ?4",
                params![patch.new_order, now, request.container_id, patch.entity_id],
            )?;
        }

        let seq: i64 = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM order_events WHERE container_id = ?1",
            [&request.container_id],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO order_events (id, container_id, seq, request_id, origin_client, payload_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                Uuid::new_v4().to_string(),
                request.container_id,
                seq,
                request.request_id,
                request.client_id,
                serde_json::to_string(&patches)?,
                now,
            ],
        )?;
        tx.commit()?;

        Ok(MoveOutcome {
            container,
            version: seq as u64,
            patches,
        })
    }

    /// Sequence number of the newest order event, if the container has any.
    pub fn latest_event_seq(&self, container_id: &str) -> AppResult<Option<u64>> {
        let conn = self.conn()?;
        let seq: Option<i64> = conn.query_row(
            "SELECT MAX(seq) FROM order_events WHERE container_id = ?1",
            [container_id],
            |row| row.get(0),
        )?;
        Ok(seq.map(|seq| seq as u64))
    }

    /// Order events newer than `after_seq`, oldest first. Lets a reconnecting
    /// client catch up on pushes it missed.
    pub fn order_events_since(&self, container_id: &str, after_seq: u64) -> AppResult<Vec<PushEnvelope>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT seq, origin_client, payload_json, created_at FROM order_events
             WHERE container_id = ?1 AND seq > ?2
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![container_id, after_seq as i64], |row| {
            let seq: i64 = row.get(0)?;
            let payload: String = row.get(2)?;
            let created_at: String = row.get(3)?;
            Ok((seq, row.get::<_, Option<String>>(1)?, payload, created_at))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (seq, origin_client, payload, created_at) = row?;
            events.push(PushEnvelope {
                container_id: container_id.to_string(),
                version: Some(seq as u64),
                origin_client,
                patches: serde_json::from_str(&payload)?,
                timestamp: parse_time(&created_at)?,
            });
        }
        Ok(events)
    }

    // ─── Settings ───────────────────────────────────────────────────────────

    pub fn get_settings(&self) -> AppResult<ReorderSettings> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                "SELECT value_json FROM settings WHERE key = 'reorder'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;

        match raw {
            Some(raw) => Ok(serde_json::from_str::<ReorderSettings>(&raw).unwrap_or_default()),
            None => Ok(ReorderSettings::default()),
        }
    }

    pub fn update_settings(&self, update: serde_json::Value) -> AppResult<ReorderSettings> {
        let current = self.get_settings()?;
        let mut merged = serde_json::to_value(current)?;
        merge_json(&mut merged, update);
        let settings: ReorderSettings = serde_json::from_value(merged)?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (key, value_json, updated_at)
             VALUES ('reorder', ?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json, updated_at = excluded.updated_at",
            params![serde_json::to_string(&settings)?, Utc::now().to_rfc3339()],
        )?;

        Ok(settings)
    }

    fn ensure_default_settings(&self) -> AppResult<()> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(1) FROM settings WHERE key = 'reorder'", [], |row| row.get(0))?;
        if count == 0 {
            conn.execute(
                "INSERT INTO settings (key, value_json, updated_at) VALUES ('reorder', ?1, ?2)",
                params![
                    serde_json::to_string(&ReorderSettings::default())?,
                    Utc::now().to_rfc3339()
                ],
            )?;
        }
        Ok(())
    }
}

fn query_container(conn: &Connection, id: &str) -> AppResult<Option<ContainerRecord>> {
    let record = conn
        .query_row(
            "SELECT id, kind, archived, created_at FROM containers WHERE id = ?1",
            [id],
            |row| {
                let kind: String = row.get(1)?;
                let created_at: String = row.get(3)?;
                Ok(ContainerRecord {
                    id: row.get(0)?,
                    kind: parse_kind(&kind)?,
                    archived: row.get(2)?,
                    created_at: parse_time(&created_at)?,
                })
            },
        )
        .optional()?;
    Ok(record)
}

fn query_entities(conn: &Connection, container_id: &str) -> AppResult<Vec<OrderableEntity>> {
    let mut stmt = conn.prepare(
        "SELECT id, container_id, position FROM entities WHERE container_id = ?1 ORDER BY position ASC, id ASC",
    )?;
    let rows = stmt.query_map([container_id], |row| {
        Ok(OrderableEntity {
            id: row.get(0)?,
            container_id: row.get(1)?,
            order: row.get(2)?,
        })
    })?;
    let mut entities = Vec::new();
    for row in rows {
        entities.push(row?);
    }
    Ok(entities)
}

fn parse_kind(raw: &str) -> rusqlite::Result<ContainerKind> {
    ContainerKind::parse(raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            1,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Unknown container kind '{}'", raw),
            )),
        )
    })
}

fn parse_time(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())),
            )
        })
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                merge_json(target_map.entry(key).or_insert(serde_json::Value::Null), value);
            }
        }
        (target, update) => {
            *target = update;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::errors::AppError;
    use crate::models::{ContainerKind, PersistRequest};
    use crate::policy::PolicyEngine;

    fn seeded() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Database::new(&dir.path().join("test.db")).expect("db");
        db.create_container("col-1", ContainerKind::Column).expect("container");
        let policy = PolicyEngine::new();
        for id in ["a", "b", "c"] {
            db.insert_entity(&policy, "col-1", id).expect("entity");
        }
        (dir, db)
    }

    fn request(entity_id: &str, new_order: u32) -> PersistRequest {
        PersistRequest {
            request_id: format!("req-{entity_id}-{new_order}"),
            container_id: "col-1".to_string(),
            entity_id: entity_id.to_string(),
            new_order,
            client_id: "client-a".to_string(),
        }
    }

    fn orders(db: &Database) -> Vec<(String, u32)> {
        db.list_entities("col-1")
            .expect("entities")
            .into_iter()
            .map(|entity| (entity.id, entity.order))
            .collect()
    }

    #[test]
    fn inserted_entities_are_appended() {
        let (_dir, db) = seeded();
        assert_eq!(
            orders(&db),
            vec![("a".to_string(), 0), ("b".to_string(), 1), ("c".to_string(), 2)]
        );
    }

    #[test]
    fn move_renumbers_and_versions() {
        let (_dir, db) = seeded();
        let policy = PolicyEngine::new();
        let first = db.move_entity(&policy, &request("a", 2)).expect("move");
        assert_eq!(first.version, 1);
        assert_eq!(
            orders(&db),
            vec![("b".to_string(), 0), ("c".to_string(), 1), ("a".to_string(), 2)]
        );
        assert_eq!(first.patches.len(), 3);

        let second = db.move_entity(&policy, &request("c", 0)).expect("move");
        assert_eq!(second.version, 2);

        let events = db.order_events_since("col-1", 1).expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].version, Some(2));
        assert_eq!(events[0].origin_client.as_deref(), Some("client-a"));
        assert_eq!(events[0].patches, second.patches);
    }

    #[test]
    fn delete_leaves_gap_that_next_move_closes() {
        let (_dir, db) = seeded();
        assert!(db.delete_entity("col-1", "b").expect("delete"));
        assert!(!db.delete_entity("col-1", "b").expect("delete again"));
        assert_eq!(orders(&db), vec![("a".to_string(), 0), ("c".to_string(), 2)]);

        db.move_entity(&PolicyEngine::new(), &request("c", 0)).expect("move");
        assert_eq!(orders(&db), vec![("c".to_string(), 0), ("a".to_string(), 1)]);
    }

    #[test]
    fn rejected_moves_leave_state_untouched() {
        let (_dir, db) = seeded();
        let policy = PolicyEngine::new();
        assert!(matches!(
            db.move_entity(&policy, &request("ghost", 0)),
            Err(AppError::NotFound(_))
        ));
        db.set_container_archived("col-1", true).expect("archive");
        assert!(matches!(
            db.move_entity(&policy, &request("a", 1)),
            Err(AppError::PermissionDenied(_))
        ));
        assert_eq!(orders(&db)[0], ("a".to_string(), 0));
        assert!(db.order_events_since("col-1", 0).expect("events").is_empty());
    }

    #[test]
    fn duplicate_container_and_entity_conflict() {
        let (_dir, db) = seeded();
        assert!(matches!(
            db.create_container("col-1", ContainerKind::Column),
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            db.insert_entity(&PolicyEngine::new(), "col-1", "a"),
            Err(AppError::Conflict(_))
        ));
    }

    #[test]
    fn settings_merge_partial_updates() {
        let (_dir, db) = seeded();
        assert!(!db.get_settings().expect("settings").reject_stale_push);
        let updated = db
            .update_settings(serde_json::json!({ "rejectStalePush": true, "autoScrollTickMs": 8 }))
            .expect("update");
        assert!(updated.reject_stale_push);
        assert_eq!(db.get_settings().expect("settings").auto_scroll_tick_ms, 8);
        assert_eq!(updated.persist_timeout_ms, 10_000);
    }

    #[test]
    fn latest_event_seq_tracks_moves() {
        let (_dir, db) = seeded();
        assert_eq!(db.latest_event_seq("col-1").expect("seq"), None);
        let policy = PolicyEngine::new();
        db.move_entity(&policy, &request("a", 2)).expect("move");
        db.move_entity(&policy, &request("b", 1)).expect("move");
        assert_eq!(db.latest_event_seq("col-1").expect("seq"), Some(2));
        assert_eq!(db.latest_event_seq("col-2").expect("seq"), None);
    }
}
