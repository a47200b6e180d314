//! Job Scheduler (spec.md §4.I): parses cron rules off container labels and
//! fires a per-entry, reentrancy-guarded Executor (§4.J, in [`executor`]).
//!
//! Grounded in the teacher's `cron/scheduler.rs` `Scheduler`/`Job`/`JobHandle`
//! shape, but the firing mechanism is switched from that file's fixed-
//! `Duration` `tokio::time::interval` to `tokio-cron-scheduler` — already
//! declared in the teacher's `Cargo.toml` but unused there — so real 5-field
//! cron expressions (the `HUMPBACK_JOB_RULES` label) are honored instead of
//! a constant polling period.

pub mod executor;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler as CronEngine};
use tracing::warn;
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::runtime::RuntimeAdapter;
use crate::types::JobTask;

const MANUAL: &str = "Manual";

/// Dependencies every Executor tick needs, cloned cheaply into each cron
/// closure.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub runtime: Arc<dyn RuntimeAdapter>,
    pub request_timeout: Duration,
    pub kill_grace: Duration,
}

/// One `(Job Task, rule)` pair. The reentrancy flag is per-entry, not
/// per-container: two rules on the same container may still fire
/// back-to-back, but never interleave within one rule (spec.md §4.I).
struct SchedulerEntry {
    task: Arc<RwLock<JobTask>>,
    in_flight: Arc<AtomicBool>,
}

/// Owns every live cron registration. Holds only `(containerId,
/// containerName)` by way of `JobTask`; it re-fetches container state via
/// the Runtime Adapter rather than reaching into the Container Cache, so
/// there is no cyclic reference between Scheduler and Cache (SPEC_FULL.md
/// design notes, spec.md §9).
pub struct Scheduler {
    engine: CronEngine,
    entries: DashMap<Uuid, SchedulerEntry>,
    /// containerName -> entry ids, enforcing `admit`'s "one admission per
    /// name" rule and letting `remove` scan by containerId in one pass.
    by_name: RwLock<HashMap<String, Vec<Uuid>>>,
    deps: ExecutorDeps,
}

impl Scheduler {
    pub async fn new(deps: ExecutorDeps) -> Result<Arc<Self>> {
        let engine = CronEngine::new()
            .await
            .map_err(|e| AgentError::Internal(format!("cron engine init: {e}")))?;
        Ok(Arc::new(Self {
            engine,
            entries: DashMap::new(),
            by_name: RwLock::new(HashMap::new()),
            deps,
        }))
    }

    pub async fn start(&self) -> Result<()> {
        self.engine
            .start()
            .await
            .map_err(|e| AgentError::Internal(format!("cron engine start: {e}")))
    }

    /// Admission contract: rejects `AlreadyScheduled` if any existing entry's
    /// `containerName == task.containerName`. Parses `task.rule_string` as a
    /// semicolon-separated list; the literal `"Manual"` is never enrolled.
    pub async fn admit(&self, task: JobTask) -> Result<()> {
        {
            let names = self.by_name.read().await;
            if names.contains_key(&task.container_name) {
                return Err(AgentError::AlreadyScheduled(task.container_name));
            }
        }

        let mut enrolled = Vec::new();
        for raw_rule in task.rule_string.clone().split(';').map(str::to_string).collect::<Vec<_>>() {
            let rule = raw_rule.trim().to_string();
            if rule.is_empty() || rule == MANUAL {
                continue;
            }

            let task_slot = Arc::new(RwLock::new(task.clone()));
            let in_flight = Arc::new(AtomicBool::new(false));

            let uuid = self.add_cron_job(&rule, task_slot.clone(), in_flight.clone()).await?;
            self.entries.insert(uuid, SchedulerEntry { task: task_slot, in_flight });
            enrolled.push(uuid);
        }

        if !enrolled.is_empty() {
            self.by_name.write().await.insert(task.container_name.clone(), enrolled);
        }
        Ok(())
    }

    async fn add_cron_job(
        &self,
        rule: &str,
        task_slot: Arc<RwLock<JobTask>>,
        in_flight: Arc<AtomicBool>,
    ) -> Result<Uuid> {
        let expr = normalize_cron_expr(rule);
        let deps = self.deps.clone();

        let job = CronJob::new_async(expr.as_str(), move |_uuid, _engine| {
            let task_slot = task_slot.clone();
            let in_flight = in_flight.clone();
            let deps = deps.clone();
            Box::pin(async move {
                executor::run_tick(task_slot, in_flight, deps).await;
            })
        })
        .map_err(|e| AgentError::Internal(format!("invalid cron rule '{rule}': {e}")))?;

        self.engine
            .add(job)
            .await
            .map_err(|e| AgentError::Internal(format!("cron add: {e}")))
    }

    /// O(n) scan over entries, idempotent. Only entries whose task still
    /// carries `containerId` are removed — after an always-pull recreate the
    /// surviving entry's id has already moved on to the new container, so a
    /// destroy event for the discarded old id matches nothing here (the
    /// intended behavior: the rule stays bound to the replacement).
    pub async fn remove(&self, container_id: &str) {
        let mut dead = Vec::new();
        for entry in self.entries.iter() {
            if entry.value().task.read().await.container_id == container_id {
                dead.push(*entry.key());
            }
        }
        for uuid in &dead {
            self.entries.remove(uuid);
            if let Err(e) = self.engine.remove(uuid).await {
                warn!(error = %e, "failed to remove cron entry from engine");
            }
        }

        if !dead.is_empty() {
            let mut names = self.by_name.write().await;
            names.retain(|_, ids| {
                ids.retain(|id| !dead.contains(id));
                !ids.is_empty()
            });
        }
    }
}

/// Converts a standard 5-field crontab expression (`min hour dom mon dow`)
/// into the 6-field `sec min hour dom mon dow` form `tokio-cron-scheduler`'s
/// underlying `cron` crate expects. Expressions already carrying a seconds
/// field pass through unchanged.
fn normalize_cron_expr(rule: &str) -> String {
    let field_count = rule.split_whitespace().count();
    if field_count == 5 {
        format!("0 {rule}")
    } else {
        rule.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepends_seconds_field_to_five_field_rule() {
        assert_eq!(normalize_cron_expr("* * * * *"), "0 * * * * *");
    }

    #[test]
    fn leaves_six_field_rule_untouched() {
        assert_eq!(normalize_cron_expr("*/10 * * * * *"), "*/10 * * * * *");
    }
}
