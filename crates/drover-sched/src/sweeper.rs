//! Timeout sweeper: the safety net for invocations nothing will finish.
//!
//! Agents crash, callbacks get lost, and orchestrator tasks die mid
//! fan-out. The sweeper walks every in-progress history on a fixed
//! cadence and forces an honest terminal state onto anything that has
//! run past its budget:
//!
//! 1. resource operations past their effective timeout,
//! 2. resource operations the agent never started at all,
//! 3. group operations past their timeout that still have running
//!    children (with a best-effort cancel of those children),
//! 4. group operations whose children are all terminal but whose own
//!    row was never finalized, memberless ones included.
//!
//! Pass 4 is what heals the aggregation race: two children finishing
//! together can both observe a sibling in progress and neither
//! finalizes the group. That window is documented behavior; the sweeper
//! closes it on its next run.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;

use crate::cancel::CancellationCoordinator;
use crate::completion::aggregate_group;
use crate::definition::TIMEOUT_PARAM_NAME;
use crate::error::SchedResult;
use crate::history::{GroupOperationHistory, OperationHistory, ResourceOperationHistory};
use crate::manager::SchedContext;
use crate::persistence::ResourceOutcome;

/// Timeout applied when neither the parameters, the definition, nor the
/// configuration specify one.
const FALLBACK_TIMEOUT: Duration = Duration::from_secs(3600);

/// Message recorded on a group that ran past its timeout.
const GROUP_TIMED_OUT: &str =
    "One or more resource operations timed out and/or did not complete";

/// Counters for one sweep, mostly for logs and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Resource operations failed for exceeding their timeout.
    pub resources_timed_out: usize,
    /// Resource operations failed because they never started.
    pub resources_never_started: usize,
    /// Group operations failed for exceeding their timeout.
    pub groups_timed_out: usize,
    /// Group operations finalized from already-terminal children.
    pub groups_finalized: usize,
}

/// Periodically reaps operations that will never complete on their own.
pub struct TimeoutSweeper {
    ctx: Arc<SchedContext>,
}

impl TimeoutSweeper {
    /// Create a sweeper over the given context.
    pub fn new(ctx: Arc<SchedContext>) -> Self {
        Self { ctx }
    }

    /// Spawn the background sweep loop.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let sweeper = self.clone();
        let sweep_interval = self.ctx.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval(sweep_interval);
            loop {
                ticker.tick().await;
                match sweeper.run_once().await {
                    Ok(stats) => {
                        if stats != SweepStats::default() {
                            tracing::info!(?stats, "timeout sweep reaped operations");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "timeout sweep failed"),
                }
            }
        })
    }

    /// Run all four sweep passes once.
    pub async fn run_once(&self) -> SchedResult<SweepStats> {
        let mut stats = SweepStats::default();
        let now = Utc::now();

        // Passes 1 and 2 over resource histories.
        for history in self.ctx.histories.in_progress_resources().await? {
            let elapsed_ms = history.duration_ms(now);

            if history.started_time.is_none() {
                let ceiling_ms = self.ctx.config.never_started_ceiling.as_millis() as i64;
                if elapsed_ms > ceiling_ms {
                    if self
                        .fail_resource(
                            &history,
                            format!(
                                "The agent never started this operation within {ceiling_ms} ms \
                                 of it being scheduled"
                            ),
                        )
                        .await?
                    {
                        stats.resources_never_started += 1;
                    }
                    continue;
                }
            }

            // The timeout clock runs from creation whether or not the
            // agent ever acknowledged the start.
            let timeout_ms = self.effective_timeout_ms(&history);
            if elapsed_ms > timeout_ms {
                if self
                    .fail_resource(
                        &history,
                        format!(
                            "Operation timed out after {elapsed_ms} ms \
                             (timeout was {timeout_ms} ms)"
                        ),
                    )
                    .await?
                {
                    stats.resources_timed_out += 1;
                }
            }
        }

        // Passes 3 and 4 over group histories.
        let guard_ms = self.ctx.config.sweep_interval.as_millis() as i64;
        for group in self.ctx.histories.in_progress_groups().await? {
            let timeout_ms = self.effective_group_timeout_ms(&group);
            if group.duration_ms(now) > timeout_ms {
                // Only a group still waiting on a child gets reaped
                // here. One whose children are all terminal merely lost
                // the aggregation race; the abandoned pass below
                // recomputes its real outcome.
                let children = self.ctx.histories.resource_children(group.id).await?;
                if children.iter().any(|c| !c.status.is_terminal()) {
                    self.fail_group(&group).await?;
                    stats.groups_timed_out += 1;
                    continue;
                }
            }

            // Give the orchestrator and completion callbacks at least
            // one full sweep interval before treating a quiet group as
            // abandoned.
            if group.duration_ms(now) <= guard_ms {
                continue;
            }

            let was_in_progress = group.status;
            // A group this quiet is deemed fully fanned out even if the
            // orchestrator died before saying so.
            self.ctx
                .histories
                .mark_group_fanout_complete(group.id)
                .await?;
            aggregate_group(&self.ctx, group.id).await?;
            if let Some(after) = self.ctx.histories.group(group.id).await? {
                if after.status != was_in_progress {
                    stats.groups_finalized += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Resolve the timeout for a resource history: the `timeout`
    /// invocation parameter (seconds) wins, then the definition, then
    /// the configured default, then the fallback hour.
    fn effective_timeout_ms(&self, history: &ResourceOperationHistory) -> i64 {
        Self::timeout_chain_ms(
            &history.parameters,
            history.definition.timeout_secs,
            self.ctx.config.default_operation_timeout,
        )
    }

    fn effective_group_timeout_ms(&self, group: &GroupOperationHistory) -> i64 {
        Self::timeout_chain_ms(
            &group.parameters,
            group.definition.timeout_secs,
            self.ctx.config.default_operation_timeout,
        )
    }

    fn timeout_chain_ms(
        parameters: &serde_json::Map<String, serde_json::Value>,
        definition_secs: Option<u32>,
        config_default: Option<Duration>,
    ) -> i64 {
        if let Some(secs) = parameters.get(TIMEOUT_PARAM_NAME).and_then(param_secs) {
            return secs.saturating_mul(1000);
        }
        if let Some(secs) = definition_secs {
            return i64::from(secs).saturating_mul(1000);
        }
        config_default.unwrap_or(FALLBACK_TIMEOUT).as_millis() as i64
    }

    async fn fail_resource(
        &self,
        history: &ResourceOperationHistory,
        message: String,
    ) -> SchedResult<bool> {
        tracing::warn!(
            history = %history.id,
            resource = %history.resource_id,
            operation = %history.definition.name,
            "reaping resource operation: {message}"
        );

        let outcome = ResourceOutcome::failure(message, Utc::now());
        if !self
            .ctx
            .histories
            .complete_resource(history.id, &outcome)
            .await?
        {
            return Ok(false);
        }

        if let Some(updated) = self.ctx.histories.resource(history.id).await? {
            self.ctx
                .notifier
                .notify(&OperationHistory::Resource(updated))
                .await;
        }
        if let Some(group) = history.group_history_id {
            aggregate_group(&self.ctx, group).await?;
        }
        Ok(true)
    }

    /// Fail a timed-out group: best-effort cancel of the children still
    /// running, then the group row itself.
    async fn fail_group(&self, group: &GroupOperationHistory) -> SchedResult<()> {
        tracing::warn!(
            history = %group.id,
            group = %group.group_id,
            "reaping timed-out group operation"
        );

        // The group goes terminal before its children are touched, so a
        // child cancel finishing last cannot re-decide the outcome.
        if self
            .ctx
            .histories
            .complete_group(
                group.id,
                crate::history::OperationStatus::Failure,
                Some(GROUP_TIMED_OUT.to_string()),
                Utc::now(),
            )
            .await?
        {
            if let Some(updated) = self.ctx.histories.group(group.id).await? {
                self.ctx
                    .notifier
                    .notify(&OperationHistory::Group(updated))
                    .await;
            }
        }

        let coordinator = CancellationCoordinator::new(self.ctx.clone());
        for child in self.ctx.histories.resource_children(group.id).await? {
            if child.status.is_terminal() {
                continue;
            }
            // Agent errors must not stop the reap.
            if let Err(e) = coordinator.cancel_resource(child.id, true).await {
                tracing::warn!(
                    history = %child.id,
                    error = %e,
                    "failed to cancel child of timed-out group"
                );
            }
        }
        Ok(())
    }
}

/// Interpret a `timeout` parameter value as whole seconds.
fn param_secs(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().filter(|s| *s >= 0),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok().filter(|s| *s >= 0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_timeout_parameter_wins() {
        let p = params(&[(TIMEOUT_PARAM_NAME, json!(90))]);
        assert_eq!(
            TimeoutSweeper::timeout_chain_ms(&p, Some(600), Some(Duration::from_secs(30))),
            90_000
        );
    }

    #[test]
    fn test_timeout_parameter_accepts_strings() {
        let p = params(&[(TIMEOUT_PARAM_NAME, json!("45"))]);
        assert_eq!(TimeoutSweeper::timeout_chain_ms(&p, None, None), 45_000);
    }

    #[test]
    fn test_definition_then_config_then_fallback() {
        let p = serde_json::Map::new();
        assert_eq!(
            TimeoutSweeper::timeout_chain_ms(&p, Some(600), Some(Duration::from_secs(30))),
            600_000
        );
        assert_eq!(
            TimeoutSweeper::timeout_chain_ms(&p, None, Some(Duration::from_secs(30))),
            30_000
        );
        assert_eq!(TimeoutSweeper::timeout_chain_ms(&p, None, None), 3_600_000);
    }

    #[test]
    fn test_unparsable_parameter_falls_through() {
        let p = params(&[(TIMEOUT_PARAM_NAME, json!("soon"))]);
        assert_eq!(TimeoutSweeper::timeout_chain_ms(&p, Some(15), None), 15_000);
    }
}
