//! In-memory persistence for development and testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_agent::JobRef;
use rustc_hash::FxHashMap;
use tokio::sync::RwLock;

use crate::error::{SchedError, SchedResult};
use crate::history::{
    GroupOperationHistory, HistoryFilter, HistoryId, OperationStatus, ResourceOperationHistory,
};
use crate::persistence::{HistoryStore, ResourceOutcome, ScheduleStore};
use crate::schedule::{ScheduleJobId, ScheduleRecord};

/// In-memory store backed by hash maps.
///
/// All state is lost on drop. Suitable for development and testing, not
/// recommended for production use.
#[derive(Default)]
pub struct MemoryStore {
    resources: RwLock<FxHashMap<HistoryId, ResourceOperationHistory>>,
    groups: RwLock<FxHashMap<HistoryId, GroupOperationHistory>>,
    schedules: RwLock<FxHashMap<ScheduleJobId, ScheduleRecord>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn insert_resource(&self, history: &ResourceOperationHistory) -> SchedResult<()> {
        let mut resources = self.resources.write().await;
        resources.insert(history.id, history.clone());
        Ok(())
    }

    async fn insert_group(&self, history: &GroupOperationHistory) -> SchedResult<()> {
        let mut groups = self.groups.write().await;
        groups.insert(history.id, history.clone());
        Ok(())
    }

    async fn resource(&self, id: HistoryId) -> SchedResult<Option<ResourceOperationHistory>> {
        let resources = self.resources.read().await;
        Ok(resources.get(&id).cloned())
    }

    async fn group(&self, id: HistoryId) -> SchedResult<Option<GroupOperationHistory>> {
        let groups = self.groups.read().await;
        Ok(groups.get(&id).cloned())
    }

    async fn find_resource_by_job_ref(
        &self,
        job_ref: &JobRef,
    ) -> SchedResult<Option<ResourceOperationHistory>> {
        let resources = self.resources.read().await;
        Ok(resources.values().find(|h| &h.job_ref == job_ref).cloned())
    }

    async fn attach_child(&self, group: HistoryId, child: HistoryId) -> SchedResult<()> {
        let mut groups = self.groups.write().await;
        let history = groups
            .get_mut(&group)
            .ok_or_else(|| SchedError::HistoryNotFound(group.to_string()))?;
        history.children.push(child);
        Ok(())
    }

    async fn resource_children(
        &self,
        group: HistoryId,
    ) -> SchedResult<Vec<ResourceOperationHistory>> {
        let child_ids = {
            let groups = self.groups.read().await;
            let history = groups
                .get(&group)
                .ok_or_else(|| SchedError::HistoryNotFound(group.to_string()))?;
            history.children.clone()
        };

        let resources = self.resources.read().await;
        Ok(child_ids
            .iter()
            .filter_map(|id| resources.get(id).cloned())
            .collect())
    }

    async fn mark_resource_started(
        &self,
        id: HistoryId,
        started_time: DateTime<Utc>,
    ) -> SchedResult<bool> {
        let mut resources = self.resources.write().await;
        match resources.get_mut(&id) {
            Some(h) if h.status == OperationStatus::InProgress && h.started_time.is_none() => {
                h.started_time = Some(started_time);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_resource(
        &self,
        id: HistoryId,
        outcome: &ResourceOutcome,
    ) -> SchedResult<bool> {
        let mut resources = self.resources.write().await;
        match resources.get_mut(&id) {
            Some(h) if h.status == OperationStatus::InProgress => {
                h.status = outcome.status;
                h.error_message = outcome.error_message.clone();
                h.results = outcome.results.clone();
                if h.started_time.is_none() {
                    h.started_time = outcome.started_time;
                }
                h.completed_time = Some(outcome.completed_time);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_group(
        &self,
        id: HistoryId,
        status: OperationStatus,
        error_message: Option<String>,
        completed_time: DateTime<Utc>,
    ) -> SchedResult<bool> {
        let mut groups = self.groups.write().await;
        match groups.get_mut(&id) {
            Some(h) if h.status == OperationStatus::InProgress => {
                h.status = status;
                if error_message.is_some() {
                    h.error_message = error_message;
                }
                h.completed_time = Some(completed_time);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_group_fanout_complete(&self, id: HistoryId) -> SchedResult<bool> {
        let mut groups = self.groups.write().await;
        match groups.get_mut(&id) {
            Some(h) if h.status == OperationStatus::InProgress => {
                h.fanout_complete = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_group_dispatch_error(
        &self,
        id: HistoryId,
        message: &str,
    ) -> SchedResult<bool> {
        let mut groups = self.groups.write().await;
        match groups.get_mut(&id) {
            Some(h) if h.status == OperationStatus::InProgress => {
                match &mut h.error_message {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(message);
                    }
                    None => h.error_message = Some(message.to_string()),
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn in_progress_resources(&self) -> SchedResult<Vec<ResourceOperationHistory>> {
        let resources = self.resources.read().await;
        Ok(resources
            .values()
            .filter(|h| h.status == OperationStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn in_progress_groups(&self) -> SchedResult<Vec<GroupOperationHistory>> {
        let groups = self.groups.read().await;
        Ok(groups
            .values()
            .filter(|h| h.status == OperationStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn list_resources(
        &self,
        filter: &HistoryFilter,
    ) -> SchedResult<Vec<ResourceOperationHistory>> {
        let resources = self.resources.read().await;
        let mut matched: Vec<_> = resources
            .values()
            .filter(|h| filter.matches_resource(h))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_time.cmp(&a.created_time));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn list_groups(
        &self,
        filter: &HistoryFilter,
    ) -> SchedResult<Vec<GroupOperationHistory>> {
        let groups = self.groups.read().await;
        let mut matched: Vec<_> = groups
            .values()
            .filter(|h| filter.matches_group(h))
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_time.cmp(&a.created_time));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    async fn delete_resource(&self, id: HistoryId) -> SchedResult<bool> {
        let mut resources = self.resources.write().await;
        Ok(resources.remove(&id).is_some())
    }

    async fn delete_group(&self, id: HistoryId) -> SchedResult<bool> {
        let mut groups = self.groups.write().await;
        Ok(groups.remove(&id).is_some())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn create_schedule(&self, record: &ScheduleRecord) -> SchedResult<()> {
        let mut schedules = self.schedules.write().await;
        schedules.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete_schedule(&self, id: &ScheduleJobId) -> SchedResult<bool> {
        let mut schedules = self.schedules.write().await;
        Ok(schedules.remove(id).is_some())
    }

    async fn update_next_fire_time(
        &self,
        id: &ScheduleJobId,
        next_fire_time: Option<DateTime<Utc>>,
    ) -> SchedResult<bool> {
        let mut schedules = self.schedules.write().await;
        match schedules.get_mut(id) {
            Some(record) => {
                record.next_fire_time = next_fire_time;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn schedule(&self, id: &ScheduleJobId) -> SchedResult<Option<ScheduleRecord>> {
        let schedules = self.schedules.read().await;
        Ok(schedules.get(id).cloned())
    }

    async fn list_schedules(&self) -> SchedResult<Vec<ScheduleRecord>> {
        let schedules = self.schedules.read().await;
        let mut records: Vec<_> = schedules.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::OperationDefinition;
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
    async fn test_resource_history_crud() {
        let store = MemoryStore::new();
        let history = make_history(1);
        let id = history.id;

        store.insert_resource(&history).await.unwrap();

        let loaded = store.resource(id).await.unwrap().unwrap();
        assert_eq!(loaded.resource_id, ResourceId(1));
        assert_eq!(loaded.status, OperationStatus::InProgress);

        let by_ref = store
            .find_resource_by_job_ref(&history.job_ref)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_ref.id, id);

        assert!(store.delete_resource(id).await.unwrap());
        assert!(store.resource(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_resource_cas() {
        let store = MemoryStore::new();
        let history = make_history(1);
        let id = history.id;
        store.insert_resource(&history).await.unwrap();

        let success = ResourceOutcome::success(serde_json::json!({"ok": true}), Utc::now());
        assert!(store.complete_resource(id, &success).await.unwrap());

        // Second writer loses; the row keeps its first outcome.
        let failure = ResourceOutcome::failure("too late", Utc::now());
        assert!(!store.complete_resource(id, &failure).await.unwrap());

        let loaded = store.resource(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OperationStatus::Success);
        assert!(loaded.error_message.is_none());
        assert!(loaded.completed_time.is_some());
    }

    #[tokio::test]
    async fn test_mark_started_only_once() {
        let store = MemoryStore::new();
        let history = make_history(1);
        let id = history.id;
        store.insert_resource(&history).await.unwrap();

        let t1 = Utc::now();
        assert!(store.mark_resource_started(id, t1).await.unwrap());
        assert!(!store.mark_resource_started(id, Utc::now()).await.unwrap());

        let loaded = store.resource(id).await.unwrap().unwrap();
        assert_eq!(loaded.started_time, Some(t1));
    }

    #[tokio::test]
    async fn test_group_children_ordered() {
        let store = MemoryStore::new();
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

        let mut child_ids = Vec::new();
        for i in [3u32, 1, 2] {
            let child = make_history(i).with_group(group_id);
            store.insert_resource(&child).await.unwrap();
            store.attach_child(group_id, child.id).await.unwrap();
            child_ids.push(child.id);
        }

        let children = store.resource_children(group_id).await.unwrap();
        let ids: Vec<_> = children.iter().map(|c| c.id).collect();
        assert_eq!(ids, child_ids);
    }

    #[tokio::test]
    async fn test_dispatch_errors_append_until_terminal() {
        let store = MemoryStore::new();
        let group = GroupOperationHistory::new(
            JobRef::new("op-g", "test", 0),
            "admin",
            OperationDefinition::new("restart", "web-server"),
            crate::definition::GroupId(1),
            "web-tier",
            serde_json::Map::new(),
        );
        let id = group.id;
        store.insert_group(&group).await.unwrap();

        assert!(store.record_group_dispatch_error(id, "first").await.unwrap());
        assert!(store.record_group_dispatch_error(id, "second").await.unwrap());

        assert!(store
            .complete_group(id, OperationStatus::Failure, None, Utc::now())
            .await
            .unwrap());
        assert!(!store.record_group_dispatch_error(id, "late").await.unwrap());

        // Appended notes survive a completion that carries no message of
        // its own.
        let loaded = store.group(id).await.unwrap().unwrap();
        assert_eq!(loaded.status, OperationStatus::Failure);
        assert_eq!(loaded.error_message.as_deref(), Some("first\nsecond"));
    }

    #[tokio::test]
    async fn test_fanout_flag_only_while_in_progress() {
        let store = MemoryStore::new();
        let group = GroupOperationHistory::new(
            JobRef::new("op-g", "test", 0),
            "admin",
            OperationDefinition::new("restart", "web-server"),
            crate::definition::GroupId(1),
            "web-tier",
            serde_json::Map::new(),
        );
        let id = group.id;
        store.insert_group(&group).await.unwrap();
        assert!(!store.group(id).await.unwrap().unwrap().fanout_complete);

        assert!(store.mark_group_fanout_complete(id).await.unwrap());
        assert!(store.group(id).await.unwrap().unwrap().fanout_complete);

        store
            .complete_group(id, OperationStatus::Canceled, None, Utc::now())
            .await
            .unwrap();
        assert!(!store.mark_group_fanout_complete(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let store = MemoryStore::new();
        for i in 1..=3 {
            store.insert_resource(&make_history(i)).await.unwrap();
        }
        let mut done = make_history(4);
        done.status = OperationStatus::Success;
        done.completed_time = Some(Utc::now());
        store.insert_resource(&done).await.unwrap();

        let pending = store
            .list_resources(&HistoryFilter::pending())
            .await
            .unwrap();
        assert_eq!(pending.len(), 3);

        let completed = store
            .list_resources(&HistoryFilter::completed())
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].resource_id, ResourceId(4));

        let limited = store
            .list_resources(&HistoryFilter::default().with_limit(2))
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_schedule_store() {
        let store = MemoryStore::new();
        let record = ScheduleRecord::for_resource(
            ResourceId(1),
            "restart",
            serde_json::Map::new(),
            "admin",
            crate::trigger::Trigger::Now,
        );
        let id = record.id.clone();

        store.create_schedule(&record).await.unwrap();
        assert!(store.schedule(&id).await.unwrap().is_some());

        let when = Utc::now();
        assert!(store
            .update_next_fire_time(&id, Some(when))
            .await
            .unwrap());
        let loaded = store.schedule(&id).await.unwrap().unwrap();
        assert_eq!(loaded.next_fire_time, Some(when));

        assert!(store.delete_schedule(&id).await.unwrap());
        assert!(!store.delete_schedule(&id).await.unwrap());
    }
}
