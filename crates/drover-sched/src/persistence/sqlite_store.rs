//! SQLite-based persistence for production use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_agent::JobRef;
use rusqlite::Connection;
use std::sync::Mutex;

use crate::error::{SchedError, SchedResult};
use crate::history::{
    GroupOperationHistory, HistoryFilter, HistoryId, OperationStatus, ResourceOperationHistory,
};
use crate::persistence::{HistoryStore, ResourceOutcome, ScheduleStore};
use crate::schedule::{ScheduleJobId, ScheduleRecord};

/// SQLite-based store.
///
/// Rows carry the full history as a JSON blob plus indexed columns for
/// the hot filters. All access is serialized through one connection, so
/// the compare-and-set updates read and write under the same lock.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    pub fn new(path: impl AsRef<Path>) -> SchedResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    /// Create a new in-memory SQLite store.
    pub fn in_memory() -> SchedResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema_sync()?;
        Ok(store)
    }

    fn init_schema_sync(&self) -> SchedResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS resource_histories (
                id TEXT PRIMARY KEY,
                job_ref TEXT NOT NULL,
                status TEXT NOT NULL,
                resource_id INTEGER NOT NULL,
                group_history_id TEXT,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_resource_histories_status
                ON resource_histories(status);
            CREATE INDEX IF NOT EXISTS idx_resource_histories_job_ref
                ON resource_histories(job_ref);
            CREATE INDEX IF NOT EXISTS idx_resource_histories_resource
                ON resource_histories(resource_id);

            CREATE TABLE IF NOT EXISTS group_histories (
                id TEXT PRIMARY KEY,
                job_ref TEXT NOT NULL,
                status TEXT NOT NULL,
                group_id INTEGER NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_group_histories_status
                ON group_histories(status);

            CREATE TABLE IF NOT EXISTS schedules (
                job_name TEXT NOT NULL,
                job_group TEXT NOT NULL,
                data TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (job_name, job_group)
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(&self) -> SchedResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| SchedError::DatabaseError(e.to_string()))
    }

    fn save_resource_locked(
        conn: &Connection,
        history: &ResourceOperationHistory,
    ) -> SchedResult<()> {
        let data = serde_json::to_string(history)?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO resource_histories
                (id, job_ref, status, resource_id, group_history_id, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            rusqlite::params![
                history.id.to_string(),
                history.job_ref.to_string(),
                history.status.name(),
                history.resource_id.0 as i64,
                history.group_history_id.map(|id| id.to_string()),
                data,
                history.created_time.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn save_group_locked(conn: &Connection, history: &GroupOperationHistory) -> SchedResult<()> {
        let data = serde_json::to_string(history)?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO group_histories
                (id, job_ref, status, group_id, data, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            rusqlite::params![
                history.id.to_string(),
                history.job_ref.to_string(),
                history.status.name(),
                history.group_id.0 as i64,
                data,
                history.created_time.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_resource_locked(
        conn: &Connection,
        id: HistoryId,
    ) -> SchedResult<Option<ResourceOperationHistory>> {
        let mut stmt = conn.prepare("SELECT data FROM resource_histories WHERE id = ?1")?;
        let mut rows = stmt.query(rusqlite::params![id.to_string()])?;

        if let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&data)?))
        } else {
            Ok(None)
        }
    }

    fn load_group_locked(
        conn: &Connection,
        id: HistoryId,
    ) -> SchedResult<Option<GroupOperationHistory>> {
        let mut stmt = conn.prepare("SELECT data FROM group_histories WHERE id = ?1")?;
        let mut rows = stmt.query(rusqlite::params![id.to_string()])?;

        if let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&data)?))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn insert_resource(&self, history: &ResourceOperationHistory) -> SchedResult<()> {
        let conn = self.lock()?;
        Self::save_resource_locked(&conn, history)
    }

    async fn insert_group(&self, history: &GroupOperationHistory) -> SchedResult<()> {
        let conn = self.lock()?;
        Self::save_group_locked(&conn, history)
    }

    async fn resource(&self, id: HistoryId) -> SchedResult<Option<ResourceOperationHistory>> {
        let conn = self.lock()?;
        Self::load_resource_locked(&conn, id)
    }

    async fn group(&self, id: HistoryId) -> SchedResult<Option<GroupOperationHistory>> {
        let conn = self.lock()?;
        Self::load_group_locked(&conn, id)
    }

    async fn find_resource_by_job_ref(
        &self,
        job_ref: &JobRef,
    ) -> SchedResult<Option<ResourceOperationHistory>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT data FROM resource_histories WHERE job_ref = ?1")?;
        let mut rows = stmt.query(rusqlite::params![job_ref.to_string()])?;

        if let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&data)?))
        } else {
            Ok(None)
        }
    }

    async fn attach_child(&self, group: HistoryId, child: HistoryId) -> SchedResult<()> {
        let conn = self.lock()?;
        let mut history = Self::load_group_locked(&conn, group)?
            .ok_or_else(|| SchedError::HistoryNotFound(group.to_string()))?;
        history.children.push(child);
        Self::save_group_locked(&conn, &history)
    }

    async fn resource_children(
        &self,
        group: HistoryId,
    ) -> SchedResult<Vec<ResourceOperationHistory>> {
        let conn = self.lock()?;
        let history = Self::load_group_locked(&conn, group)?
            .ok_or_else(|| SchedError::HistoryNotFound(group.to_string()))?;

        let mut children = Vec::with_capacity(history.children.len());
        for child_id in &history.children {
            if let Some(child) = Self::load_resource_locked(&conn, *child_id)? {
                children.push(child);
            }
        }
        Ok(children)
    }

    async fn mark_resource_started(
        &self,
        id: HistoryId,
        started_time: DateTime<Utc>,
    ) -> SchedResult<bool> {
        let conn = self.lock()?;
        let Some(mut history) = Self::load_resource_locked(&conn, id)? else {
            return Ok(false);
        };
        if history.status != OperationStatus::InProgress || history.started_time.is_some() {
            return Ok(false);
        }
        history.started_time = Some(started_time);
        Self::save_resource_locked(&conn, &history)?;
        Ok(true)
    }

    async fn complete_resource(
        &self,
        id: HistoryId,
        outcome: &ResourceOutcome,
    ) -> SchedResult<bool> {
        let conn = self.lock()?;
        let Some(mut history) = Self::load_resource_locked(&conn, id)? else {
            return Ok(false);
        };
        if history.status != OperationStatus::InProgress {
            return Ok(false);
        }
        history.status = outcome.status;
        history.error_message = outcome.error_message.clone();
        history.results = outcome.results.clone();
        if history.started_time.is_none() {
            history.started_time = outcome.started_time;
        }
        history.completed_time = Some(outcome.completed_time);
        Self::save_resource_locked(&conn, &history)?;
        Ok(true)
    }

    async fn complete_group(
        &self,
        id: HistoryId,
        status: OperationStatus,
        error_message: Option<String>,
        completed_time: DateTime<Utc>,
    ) -> SchedResult<bool> {
        let conn = self.lock()?;
        let Some(mut history) = Self::load_group_locked(&conn, id)? else {
            return Ok(false);
        };
        if history.status != OperationStatus::InProgress {
            return Ok(false);
        }
        history.status = status;
        if error_message.is_some() {
            history.error_message = error_message;
        }
        history.completed_time = Some(completed_time);
        Self::save_group_locked(&conn, &history)?;
        Ok(true)
    }

    async fn mark_group_fanout_complete(&self, id: HistoryId) -> SchedResult<bool> {
        let conn = self.lock()?;
        let Some(mut history) = Self::load_group_locked(&conn, id)? else {
            return Ok(false);
        };
        if history.status != OperationStatus::InProgress {
            return Ok(false);
        }
        history.fanout_complete = true;
        Self::save_group_locked(&conn, &history)?;
        Ok(true)
    }

    async fn record_group_dispatch_error(
        &self,
        id: HistoryId,
        message: &str,
    ) -> SchedResult<bool> {
        let conn = self.lock()?;
        let Some(mut history) = Self::load_group_locked(&conn, id)? else {
            return Ok(false);
        };
        if history.status != OperationStatus::InProgress {
            return Ok(false);
        }
        match &mut history.error_message {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(message);
            }
            None => history.error_message = Some(message.to_string()),
        }
        Self::save_group_locked(&conn, &history)?;
        Ok(true)
    }

    async fn in_progress_resources(&self) -> SchedResult<Vec<ResourceOperationHistory>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT data FROM resource_histories WHERE status = 'INPROGRESS'")?;
        let mut rows = stmt.query([])?;

        let mut histories = Vec::new();
        while let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            histories.push(serde_json::from_str(&data)?);
        }
        Ok(histories)
    }

    async fn in_progress_groups(&self) -> SchedResult<Vec<GroupOperationHistory>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT data FROM group_histories WHERE status = 'INPROGRESS'")?;
        let mut rows = stmt.query([])?;

        let mut histories = Vec::new();
        while let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            histories.push(serde_json::from_str(&data)?);
        }
        Ok(histories)
    }

    async fn list_resources(
        &self,
        filter: &HistoryFilter,
    ) -> SchedResult<Vec<ResourceOperationHistory>> {
        let conn = self.lock()?;

        let mut sql = String::from("SELECT data FROM resource_histories WHERE 1=1");
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(resource_id) = filter.resource_id {
            let idx = params.len() + 1;
            sql.push_str(&format!(" AND resource_id = ?{idx}"));
            params.push(Box::new(resource_id.0 as i64));
        }

        if filter.pending_only {
            sql.push_str(" AND status = 'INPROGRESS'");
        }
        if filter.completed_only {
            sql.push_str(" AND status != 'INPROGRESS'");
        }

        sql.push_str(" ORDER BY created_at DESC");

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
        let mut rows = stmt.query(params_refs.as_slice())?;

        let mut histories = Vec::new();
        while let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            let history: ResourceOperationHistory = serde_json::from_str(&data)?;

            // Remaining filters apply on the deserialized row.
            if !filter.matches_resource(&history) {
                continue;
            }
            histories.push(history);

            if let Some(limit) = filter.limit {
                if histories.len() >= limit {
                    break;
                }
            }
        }
        Ok(histories)
    }

    async fn list_groups(
        &self,
        filter: &HistoryFilter,
    ) -> SchedResult<Vec<GroupOperationHistory>> {
        let conn = self.lock()?;

        let mut sql = String::from("SELECT data FROM group_histories WHERE 1=1");
        if filter.pending_only {
            sql.push_str(" AND status = 'INPROGRESS'");
        }
        if filter.completed_only {
            sql.push_str(" AND status != 'INPROGRESS'");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut histories = Vec::new();
        while let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            let history: GroupOperationHistory = serde_json::from_str(&data)?;
            if !filter.matches_group(&history) {
                continue;
            }
            histories.push(history);

            if let Some(limit) = filter.limit {
                if histories.len() >= limit {
                    break;
                }
            }
        }
        Ok(histories)
    }

    async fn delete_resource(&self, id: HistoryId) -> SchedResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM resource_histories WHERE id = ?1",
            rusqlite::params![id.to_string()],
        )?;
        Ok(deleted > 0)
    }

    async fn delete_group(&self, id: HistoryId) -> SchedResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM group_histories WHERE id = ?1",
            rusqlite::params![id.to_string()],
        )?;
        Ok(deleted > 0)
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn create_schedule(&self, record: &ScheduleRecord) -> SchedResult<()> {
        let conn = self.lock()?;
        let data = serde_json::to_string(record)?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO schedules (job_name, job_group, data, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            rusqlite::params![
                record.id.job_name,
                record.id.job_group,
                data,
                record.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn delete_schedule(&self, id: &ScheduleJobId) -> SchedResult<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM schedules WHERE job_name = ?1 AND job_group = ?2",
            rusqlite::params![id.job_name, id.job_group],
        )?;
        Ok(deleted > 0)
    }

    async fn update_next_fire_time(
        &self,
        id: &ScheduleJobId,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> SchedResult<bool> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT data FROM schedules WHERE job_name = ?1 AND job_group = ?2")?;
        let mut rows = stmt.query(rusqlite::params![id.job_name, id.job_group])?;

        let Some(row) = rows.next()? else {
            return Ok(false);
        };
        let data: String = row.get(0)?;
        let mut record: ScheduleRecord = serde_json::from_str(&data)?;
        record.next_fire_time = next_fire_time;

        let data = serde_json::to_string(&record)?;
        conn.execute(
            "UPDATE schedules SET data = ?1 WHERE job_name = ?2 AND job_group = ?3",
            rusqlite::params![data, id.job_name, id.job_group],
        )?;
        Ok(true)
    }

    async fn schedule(&self, id: &ScheduleJobId) -> SchedResult<Option<ScheduleRecord>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT data FROM schedules WHERE job_name = ?1 AND job_group = ?2")?;
        let mut rows = stmt.query(rusqlite::params![id.job_name, id.job_group])?;

        if let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            Ok(Some(serde_json::from_str(&data)?))
        } else {
            Ok(None)
        }
    }

    async fn list_schedules(&self) -> SchedResult<Vec<ScheduleRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT data FROM schedules ORDER BY created_at DESC")?;
        let mut rows = stmt.query([])?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let data: String = row.get(0)?;
            records.push(serde_json::from_str(&data)?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::OperationDefinition;
    use crate::trigger::Trigger;
    use drover_agent::ResourceId;

    fn make_history(resource: u32) -> ResourceOperationHistory {
        ResourceOperationHistory::new(
            JobRef::new(format!("op-{resource}"), "test", 0),
            "admin",
            OperationDefinition::new("restart", "web-server"),
            ResourceId(resource),
            format!("web-{resource:02}"),
            serde_json::Map::new(),
        )
    }

    #[tokio::test]
    async fn test_sqlite_resource_history_roundtrip() {
        let store = SqliteStore::in_memory().unwrap();
        let history = make_history(1);
        let id = history.id;

        store.insert_resource(&history).await.unwrap();

        let loaded = store.resource(id).await.unwrap().unwrap();
        assert_eq!(loaded.resource_id, ResourceId(1));
        assert_eq!(loaded.resource_name, "web-01");
        assert_eq!(loaded.status, OperationStatus::InProgress);

        let by_ref = store
            .find_resource_by_job_ref(&history.job_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ref.id, id);
    }

    #[tokio::test]
    async fn test_sqlite_cas_discipline() {
        let store = SqliteStore::in_memory().unwrap();
        let history = make_history(1);
        let id = history.id;
        store.insert_resource(&history).await.unwrap();

        let outcome = ResourceOutcome::failure("agent unreachable", Utc::now());
        assert!(store.complete_resource(id, &outcome).await.unwrap());
        assert!(!store.complete_resource(id, &outcome).await.unwrap());
        assert!(!store
            .mark_resource_started(id, Utc::now())
            .await
            .unwrap());

        let loaded = store.resource(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OperationStatus::Failure);
        assert_eq!(loaded.error_message.as_deref(), Some("agent unreachable"));
    }

    #[tokio::test]
    async fn test_sqlite_in_progress_queries() {
        let store = SqliteStore::in_memory().unwrap();
        store.insert_resource(&make_history(1)).await.unwrap();

        let done = make_history(2);
        let done_id = done.id;
        store.insert_resource(&done).await.unwrap();
        store
            .complete_resource(
                done_id,
                &ResourceOutcome::success(serde_json::json!({}), Utc::now()),
            )
            .await
            .unwrap();

        let pending = store.in_progress_resources().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].resource_id, ResourceId(1));

        let by_filter = store
            .list_resources(&HistoryFilter::pending())
            .await
            .unwrap();
        assert_eq!(by_filter.len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_group_with_children() {
        let store = SqliteStore::in_memory().unwrap();
        let group = GroupOperationHistory::new(
            JobRef::new("op-g", "test", 0),
            "admin",
            OperationDefinition::new("restart", "web-server"),
            crate::definition::GroupId(1),
            "web-tier",
            serde_json::Map::new(),
        );
        let group_id = group.id;
        store.insert_group(&group).await.unwrap();

        for i in 1..=2 {
            let child = make_history(i).with_group(group_id);
            store.insert_resource(&child).await.unwrap();
            store.attach_child(group_id, child.id).await.unwrap();
        }

        let children = store.resource_children(group_id).await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|c| c.group_history_id == Some(group_id)));
    }

    #[tokio::test]
    async fn test_sqlite_schedules() {
        let store = SqliteStore::in_memory().unwrap();
        let record = ScheduleRecord::for_resource(
            ResourceId(5),
            "restart",
            serde_json::Map::new(),
            "admin",
            Trigger::Now,
        );
        let id = record.id.clone();

        store.create_schedule(&record).await.unwrap();

        let when = Utc::now();
        assert!(store.update_next_fire_time(&id, Some(when)).await.unwrap());

        let loaded = store.schedule(&id).await.unwrap().unwrap();
        assert_eq!(loaded.next_fire_time, Some(when));
        assert_eq!(loaded.operation_name, "restart");

        assert_eq!(store.list_schedules().await.unwrap().len(), 1);
        assert!(store.delete_schedule(&id).await.unwrap());
        assert!(store.schedule(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_file_backed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drover.db");

        let history = make_history(9);
        let id = history.id;
        {
            let store = SqliteStore::new(&path).unwrap();
            store.insert_resource(&history).await.unwrap();
        }

        // Reopen and read back.
        let store = SqliteStore::new(&path).unwrap();
        let loaded = store.resource(id).await.unwrap().unwrap();
        assert_eq!(loaded.resource_id, ResourceId(9));
    }
}
