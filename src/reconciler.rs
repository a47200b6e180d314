//! Event Reconciler (spec.md §4.G): consumes the Runtime Adapter's event
//! stream and keeps the Container Cache, Job Scheduler, and Heartbeat in
//! sync with engine-side reality.
//!
//! Grounded in the teacher's `cron/scheduler.rs` reconnect-with-backoff loop
//! (same `backoff` crate, same "treat a dropped stream as a transient error,
//! not a fatal one" posture) and in `server/manager.rs`'s dispatch-by-action
//! shape for turning one raw event into cache/scheduler mutations.

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::ContainerCache;
use crate::heartbeat::HeartbeatTrigger;
use crate::labels::{parse_job_labels, JobLabels};
use crate::runtime::{RuntimeAdapter, RuntimeEvent};
use crate::scheduler::Scheduler;
use crate::types::{JobTask, MappedState};

const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);

pub struct Reconciler {
    runtime: Arc<dyn RuntimeAdapter>,
    cache: Arc<ContainerCache>,
    scheduler: Arc<Scheduler>,
    heartbeat: HeartbeatTrigger,
    request_timeout: Duration,
}

impl Reconciler {
    pub fn new(
        runtime: Arc<dyn RuntimeAdapter>,
        cache: Arc<ContainerCache>,
        scheduler: Arc<Scheduler>,
        heartbeat: HeartbeatTrigger,
        request_timeout: Duration,
    ) -> Self {
        Self { runtime, cache, scheduler, heartbeat, request_timeout }
    }

    /// Subscribes to the event stream and dispatches every event until
    /// `cancel` fires. Reconnects with exponential backoff on disconnect,
    /// per spec.md §4.G's "never terminate the reconciler on a dropped
    /// stream" requirement.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = ExponentialBackoff {
            initial_interval: RECONNECT_INITIAL,
            max_interval: RECONNECT_MAX,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        loop {
            if cancel.is_cancelled() {
                return;
            }

            let mut stream = self.runtime.subscribe_events();
            backoff.reset();
            info!("event reconciler subscribed to runtime event stream");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("event reconciler shutting down");
                        return;
                    }
                    next = stream.next() => {
                        match next {
                            Some(Ok(event)) => self.dispatch(event).await,
                            Some(Err(e)) => {
                                warn!(error = %e, "event stream error, reconnecting");
                                break;
                            }
                            None => {
                                warn!("event stream closed, reconnecting");
                                break;
                            }
                        }
                    }
                }
            }

            let delay = backoff.next_backoff().unwrap_or(RECONNECT_MAX);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Closed dispatch table keyed on the event's action (spec.md §4.G).
    /// Scoped to `type=="container"` events only (spec.md §9): image and
    /// network events reuse action names like `delete`/`create` and must
    /// never be mistaken for container lifecycle transitions.
    async fn dispatch(&self, event: RuntimeEvent) {
        if event.typ != "container" {
            debug!(typ = %event.typ, action = %event.action, "ignoring non-container runtime event");
            return;
        }
        match event.action.as_str() {
            "create" => self.on_create(&event).await,
            "start" | "stop" | "die" | "kill" => self.on_transition(&event).await,
            "health_status: healthy" | "health_status: unhealthy" => self.on_transition(&event).await,
            "destroy" | "remove" | "delete" => self.on_destroy(&event).await,
            other => debug!(action = other, "ignoring unrecognized runtime event action"),
        }
    }

    async fn on_create(&self, event: &RuntimeEvent) {
        let record = match self.runtime.inspect_container(&event.actor_id, self.request_timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!(container = %event.actor_id, error = %e, "inspect after create failed");
                return;
            }
        };

        // A recreate lands under the same name with a new id; purge the
        // stale id first so the cache collapses to exactly one record
        // (spec.md §8 testable property 3).
        self.cache.purge_by_name(&record.name);
        self.cache.upsert_from_inspect(record.clone());

        // Plain `create` is not a state change the control plane needs
        // urgently; only a job container's admission triggers a heartbeat
        // (spec.md §4.G).
        if let Some(labels) = parse_job_labels(&record.labels) {
            self.admit_job(&record, labels).await;
            self.heartbeat.fire();
        }
    }

    async fn on_transition(&self, event: &RuntimeEvent) {
        let previous_state = self.cache.get(&event.actor_id).map(|r| r.state);

        let record = match self.runtime.inspect_container(&event.actor_id, self.request_timeout).await {
            Ok(r) => r,
            Err(e) => {
                warn!(container = %event.actor_id, error = %e, "inspect on transition failed");
                return;
            }
        };
        let new_state = record.state;
        self.cache.upsert_from_inspect(record);

        // Dedup: only fire the heartbeat when the mapped state actually
        // changed, collapsing noisy engine events that don't change the
        // orchestrator-facing picture (spec.md §4.G).
        if previous_state != Some(new_state) {
            self.heartbeat.fire();
        }
    }

    async fn on_destroy(&self, event: &RuntimeEvent) {
        self.cache.mark_removed(&event.actor_id);
        self.heartbeat.fire();
        self.cache.remove(&event.actor_id);
        self.scheduler.remove(&event.actor_id).await;
    }

    async fn admit_job(&self, record: &crate::types::ContainerRecord, labels: JobLabels) {
        if record.state == MappedState::Removed {
            return;
        }
        let task = JobTask {
            container_id: record.id.clone(),
            container_name: record.name.clone(),
            image: record.image.clone(),
            always_pull: labels.always_pull,
            timeout_secs: labels.timeout.as_secs(),
            rule_string: labels.rule_string,
            registry_auth_blob: labels.registry_auth_blob,
        };
        if let Err(e) = self.scheduler.admit(task).await {
            debug!(container = %record.name, error = %e, "job admission skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use crate::scheduler::ExecutorDeps;
    use std::collections::HashMap;

    fn event(action: &str, id: &str) -> RuntimeEvent {
        RuntimeEvent {
            typ: "container".into(),
            action: action.into(),
            actor_id: id.into(),
            actor_attrs: HashMap::new(),
        }
    }

    fn seed_record(id: &str, name: &str, labels: HashMap<String, String>) -> crate::types::ContainerRecord {
        crate::types::ContainerRecord {
            id: id.to_string(),
            name: name.to_string(),
            state: MappedState::Running,
            status: "Up".into(),
            image: "alpine:latest".into(),
            labels,
            env: vec![],
            mounts: vec![],
            command: vec![],
            ports: vec![],
            networks: vec![],
            created_at: None,
            started_at: None,
            finished_at: None,
            error_msg: None,
            restart_count: None,
            network_mode: None,
        }
    }

    async fn fixture() -> (Arc<MockRuntime>, Reconciler, mpsc::Receiver<()>) {
        let runtime = Arc::new(MockRuntime::new());
        let cache = Arc::new(ContainerCache::new());
        let deps = ExecutorDeps {
            runtime: runtime.clone(),
            request_timeout: Duration::from_secs(5),
            kill_grace: Duration::from_secs(5),
        };
        let scheduler = Scheduler::new(deps).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let trigger = HeartbeatTrigger::for_test(tx);
        let reconciler = Reconciler::new(runtime.clone(), cache, scheduler, trigger, Duration::from_secs(5));
        (runtime, reconciler, rx)
    }

    use tokio::sync::mpsc;

    #[tokio::test]
    async fn non_job_create_populates_cache_without_heartbeat() {
        let (runtime, reconciler, mut rx) = fixture().await;
        runtime.seed(seed_record("c1", "web", HashMap::new()));

        reconciler.dispatch(event("create", "c1")).await;

        assert!(reconciler.cache.get("c1").is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn job_create_populates_cache_and_fires_heartbeat() {
        let (runtime, reconciler, mut rx) = fixture().await;
        let mut labels = HashMap::new();
        labels.insert("HUMPBACK_JOB_RULES".to_string(), "* * * * *".to_string());
        runtime.seed(seed_record("c1", "job1", labels));

        reconciler.dispatch(event("create", "c1")).await;

        assert!(reconciler.cache.get("c1").is_some());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn non_container_event_is_ignored() {
        let (runtime, reconciler, mut rx) = fixture().await;
        runtime.seed(seed_record("c1", "web", HashMap::new()));

        let mut image_event = event("delete", "c1");
        image_event.typ = "image".to_string();
        reconciler.dispatch(image_event).await;

        assert!(reconciler.cache.get("c1").is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn destroy_event_purges_cache_and_scheduler() {
        let (runtime, reconciler, _rx) = fixture().await;
        runtime.seed(seed_record("c1", "web", HashMap::new()));
        reconciler.cache.upsert_from_inspect(seed_record("c1", "web", HashMap::new()));

        reconciler.dispatch(event("destroy", "c1")).await;

        assert!(reconciler.cache.get("c1").is_none());
    }

    #[tokio::test]
    async fn unchanged_state_does_not_refire_heartbeat() {
        let (runtime, reconciler, mut rx) = fixture().await;
        runtime.seed(seed_record("c1", "web", HashMap::new()));
        reconciler.cache.upsert_from_inspect(seed_record("c1", "web", HashMap::new()));

        // Drain the cache's initial state, then dispatch an event that
        // re-inspects to the same mapped state.
        reconciler.dispatch(event("start", "c1")).await;
        assert!(rx.try_recv().is_err(), "state unchanged, heartbeat must not fire");
    }
}
