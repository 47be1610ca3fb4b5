//! Notification hook for history lifecycle events.

use async_trait::async_trait;

use crate::history::OperationHistory;

/// Observer notified when a history row is created or reaches a terminal
/// state.
///
/// Fired after the transition is persisted, outside any lock. Delivery is
/// best-effort; implementations must tolerate duplicate notifications for
/// the same row.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    /// A history row was created or changed status.
    async fn notify(&self, history: &OperationHistory);
}

/// Notifier that logs transitions and nothing else.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl AlertNotifier for LogNotifier {
    async fn notify(&self, history: &OperationHistory) {
        match history {
            OperationHistory::Resource(h) => {
                tracing::debug!(
                    history = %h.id,
                    resource = %h.resource_id,
                    operation = %h.definition.name,
                    status = %h.status,
                    "resource operation transition"
                );
            }
            OperationHistory::Group(h) => {
                tracing::debug!(
                    history = %h.id,
                    group = %h.group_id,
                    operation = %h.definition.name,
                    status = %h.status,
                    "group operation transition"
                );
            }
        }
    }
}
