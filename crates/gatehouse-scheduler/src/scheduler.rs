// Scheduler
// Ticks once a second, evaluates interval and cron triggers against the
// in-memory entry cache, and fires event-pattern entries straight off the
// bus subscription. Every firing dispatches on a fresh task tagged with an
// autonomous context so downstream tool wrappers know no human is present.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use gatehouse_core::{EventBus, GatehouseError, Result, TaskContext};
use gatehouse_types::{
    Event, EventPayload, ScheduleCreatedPayload, ScheduleEntry, ScheduleRemovedPayload,
    ScheduleSource, ScheduleTriggerPayload, ScheduledTask, TaskCompletedPayload,
    TaskStartedPayload, TriggerKind,
};

use crate::cron::CronExpr;
use crate::store::ScheduleStore;

pub const TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Floor applied to a zero (unspecified) cooldown so an entry can never
/// fire twice within one tick.
const MIN_COOLDOWN_SECS: i64 = 1;

const EVENT_SOURCE: &str = "scheduler";

/// Seam to whatever runs a materialized task; the engine wires this to the
/// skill runner.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    async fn dispatch(&self, task: ScheduledTask, ctx: TaskContext) -> anyhow::Result<String>;
}

#[derive(Clone)]
pub struct Scheduler {
    store: ScheduleStore,
    bus: EventBus,
    dispatcher: Arc<dyn TaskDispatcher>,
    entries: Arc<RwLock<HashMap<String, ScheduleEntry>>>,
    /// Event type name -> ids of entries subscribed to it.
    event_index: Arc<RwLock<HashMap<String, HashSet<String>>>>,
    running: Arc<Mutex<HashSet<String>>>,
    last_fired: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Scheduler {
    pub fn new(store: ScheduleStore, bus: EventBus, dispatcher: Arc<dyn TaskDispatcher>) -> Self {
        Self {
            store,
            bus,
            dispatcher,
            entries: Arc::new(RwLock::new(HashMap::new())),
            event_index: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(Mutex::new(HashSet::new())),
            last_fired: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Rebuild the in-memory cache from the store.
    pub async fn load_entries(&self) -> Result<usize> {
        let listed = self.store.list()?;
        let mut entries = self.entries.write().await;
        let mut index = self.event_index.write().await;
        entries.clear();
        index.clear();
        for entry in listed {
            if let Some(pattern) = &entry.on_event {
                index
                    .entry(pattern.event.clone())
                    .or_default()
                    .insert(entry.id.clone());
            }
            entries.insert(entry.id.clone(), entry);
        }
        Ok(entries.len())
    }

    /// Validate, persist, and start tracking a new entry.
    pub async fn add_entry(&self, entry: ScheduleEntry) -> Result<ScheduleEntry> {
        if entry.trigger_kind().is_none() {
            return Err(GatehouseError::Validation(
                "schedule entry must set exactly one of cron_spec, interval_sec, on_event"
                    .to_string(),
            ));
        }
        if let Some(spec) = entry.cron_spec.as_deref() {
            CronExpr::parse(spec)?;
        }
        let entry = self.store.create(entry)?;
        self.track(entry.clone()).await;
        self.bus.publish(Event::new(
            EventPayload::ScheduleCreated(ScheduleCreatedPayload {
                entry_id: entry.id.clone(),
                title: entry.title.clone(),
            }),
            EVENT_SOURCE,
            entry.session_id.as_deref(),
        ));
        Ok(entry)
    }

    /// Delete an entry. Skill-sourced entries are read-only here; they are
    /// managed by the skill loader.
    pub async fn remove_entry(&self, id: &str) -> Result<()> {
        let source = match self.entries.read().await.get(id).map(|e| e.source) {
            Some(source) => source,
            None => self.store.get(id)?.source,
        };
        if source == ScheduleSource::Skill {
            return Err(GatehouseError::ReadOnlyEntry(id.to_string()));
        }
        self.store.delete(id)?;
        self.untrack(id).await;
        self.bus.publish(Event::new(
            EventPayload::ScheduleRemoved(ScheduleRemovedPayload {
                entry_id: id.to_string(),
            }),
            EVENT_SOURCE,
            None,
        ));
        Ok(())
    }

    /// Reconcile skill-owned entries with the given desired set. Repeated
    /// calls with the same input are idempotent: run counters and creation
    /// timestamps survive, stale skill entries disappear.
    pub async fn sync_skill_entries(&self, desired: Vec<ScheduleEntry>) -> Result<()> {
        let desired_ids: HashSet<String> = desired.iter().map(|e| e.id.clone()).collect();
        let stale: Vec<String> = self
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.source == ScheduleSource::Skill && !desired_ids.contains(&e.id))
            .map(|e| e.id.clone())
            .collect();
        for id in stale {
            if let Err(err) = self.store.delete(&id) {
                warn!(entry = %id, error = %err, "failed to delete stale skill entry");
            }
            self.untrack(&id).await;
            self.bus.publish(Event::new(
                EventPayload::ScheduleRemoved(ScheduleRemovedPayload {
                    entry_id: id.clone(),
                }),
                EVENT_SOURCE,
                None,
            ));
        }

        for mut entry in desired {
            match self.store.get(&entry.id) {
                Ok(existing) => {
                    entry.run_count = existing.run_count;
                    entry.last_run_at = existing.last_run_at;
                    entry.created_at = existing.created_at;
                    self.store.update(&entry)?;
                }
                Err(GatehouseError::NotFound(_)) => {
                    entry = self.store.create(entry)?;
                    self.bus.publish(Event::new(
                        EventPayload::ScheduleCreated(ScheduleCreatedPayload {
                            entry_id: entry.id.clone(),
                            title: entry.title.clone(),
                        }),
                        EVENT_SOURCE,
                        None,
                    ));
                }
                Err(err) => return Err(err),
            }
            self.track(entry).await;
        }
        Ok(())
    }

    pub async fn entry(&self, id: &str) -> Option<ScheduleEntry> {
        self.entries.read().await.get(id).cloned()
    }

    /// Spawn the tick loop and the event-pattern subscription loop.
    pub fn start(&self) {
        let this = self.clone();
        self.tracker.spawn(async move { this.tick_loop().await });
        let this = self.clone();
        self.tracker.spawn(async move { this.event_loop().await });
    }

    /// Cancel every in-flight dispatch through the root scope and wait up
    /// to the shutdown deadline.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(SHUTDOWN_DEADLINE, self.tracker.wait())
            .await
            .is_err()
        {
            warn!("scheduler stop exceeded shutdown deadline; continuing shutdown");
        }
    }

    async fn track(&self, entry: ScheduleEntry) {
        self.untrack(&entry.id).await;
        if let Some(pattern) = &entry.on_event {
            self.event_index
                .write()
                .await
                .entry(pattern.event.clone())
                .or_default()
                .insert(entry.id.clone());
        }
        self.entries.write().await.insert(entry.id.clone(), entry);
    }

    async fn untrack(&self, id: &str) {
        self.entries.write().await.remove(id);
        let mut index = self.event_index.write().await;
        for ids in index.values_mut() {
            ids.remove(id);
        }
        index.retain(|_, ids| !ids.is_empty());
    }

    async fn tick_loop(&self) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.evaluate_tick(Utc::now()).await;
        }
    }

    async fn evaluate_tick(&self, now: DateTime<Utc>) {
        let snapshot: Vec<ScheduleEntry> = self.entries.read().await.values().cloned().collect();
        for entry in snapshot {
            if !self.may_fire(&entry, now) {
                continue;
            }
            let kind = match entry.trigger_kind() {
                Some(TriggerKind::Interval) => {
                    let due = match entry.last_run_at {
                        None => true,
                        Some(last) => {
                            (now - last).num_seconds() >= entry.interval_sec.unwrap_or(0) as i64
                        }
                    };
                    if due {
                        Some(TriggerKind::Interval)
                    } else {
                        None
                    }
                }
                Some(TriggerKind::Cron) => match entry.cron_spec.as_deref().map(CronExpr::parse) {
                    Some(Ok(expr)) => {
                        if expr.matches(now) && !self.fired_this_minute(&entry.id, now) {
                            Some(TriggerKind::Cron)
                        } else {
                            None
                        }
                    }
                    Some(Err(err)) => {
                        warn!(entry = %entry.id, error = %err, "invalid cron spec; entry skipped");
                        None
                    }
                    None => None,
                },
                // Event triggers fire out-of-band from the bus subscription.
                Some(TriggerKind::Event) | None => None,
            };
            if let Some(kind) = kind {
                self.fire(&entry, kind, now);
            }
        }
    }

    async fn event_loop(&self) {
        let mut sub = self.bus.subscribe(64, &[]);
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => break,
                maybe = sub.recv() => match maybe {
                    Some(event) => event,
                    None => break,
                },
            };
            self.evaluate_event(&event).await;
        }
    }

    async fn evaluate_event(&self, event: &Event) {
        let ids: Vec<String> = {
            let index = self.event_index.read().await;
            match index.get(event.event_type.as_str()) {
                Some(ids) => ids.iter().cloned().collect(),
                None => return,
            }
        };
        let now = Utc::now();
        let candidates: Vec<ScheduleEntry> = {
            let entries = self.entries.read().await;
            ids.iter()
                .filter_map(|id| entries.get(id).cloned())
                .collect()
        };
        for entry in candidates {
            if !self.may_fire(&entry, now) {
                continue;
            }
            let Some(pattern) = &entry.on_event else {
                continue;
            };
            if !pattern.matches_payload(&event.payload) {
                continue;
            }
            self.fire(&entry, TriggerKind::Event, now);
        }
    }

    fn may_fire(&self, entry: &ScheduleEntry, now: DateTime<Utc>) -> bool {
        entry.enabled && !self.is_running(&entry.id) && self.cooldown_elapsed(entry, now)
    }

    fn is_running(&self, id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }

    fn cooldown_elapsed(&self, entry: &ScheduleEntry, now: DateTime<Utc>) -> bool {
        let effective = (entry.cooldown_sec as i64).max(MIN_COOLDOWN_SECS);
        let reference = self
            .last_fired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&entry.id)
            .copied()
            .or(entry.last_run_at);
        match reference {
            None => true,
            Some(t) => (now - t).num_seconds() >= effective,
        }
    }

    fn fired_this_minute(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.last_fired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .is_some_and(|last| last.timestamp() / 60 == now.timestamp() / 60)
    }

    /// Materialize a task from the entry's template and dispatch it on a
    /// fresh tracked task.
    fn fire(&self, entry: &ScheduleEntry, kind: TriggerKind, now: DateTime<Utc>) {
        {
            let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
            if !running.insert(entry.id.clone()) {
                return;
            }
        }
        self.last_fired
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(entry.id.clone(), now);

        let task = ScheduledTask::from_entry(entry);
        self.bus.publish(Event::new(
            EventPayload::ScheduleTrigger(ScheduleTriggerPayload {
                entry_id: entry.id.clone(),
                skill_name: entry.skill_name.clone(),
                trigger: kind,
                task_id: task.task_id.clone(),
            }),
            EVENT_SOURCE,
            entry.session_id.as_deref(),
        ));

        let ctx = TaskContext::autonomous_scoped(entry.session_id.clone(), &self.cancel);
        let this = self.clone();
        let entry_id = entry.id.clone();
        self.tracker.spawn(async move {
            this.run_task(entry_id, task, ctx).await;
        });
    }

    async fn run_task(&self, entry_id: String, task: ScheduledTask, ctx: TaskContext) {
        let started = std::time::Instant::now();
        let session = ctx.session_id().map(ToString::to_string);
        self.bus.publish(Event::new(
            EventPayload::TaskStarted(TaskStartedPayload {
                task_id: task.task_id.clone(),
                entry_id: Some(entry_id.clone()),
                title: task.title.clone(),
            }),
            EVENT_SOURCE,
            session.as_deref(),
        ));

        let result = self.dispatcher.dispatch(task.clone(), ctx).await;
        let error = result.as_ref().err().map(ToString::to_string);
        if let Some(err) = &error {
            warn!(entry = %entry_id, error = %err, "scheduled task failed");
        }

        self.bus.publish(Event::new(
            EventPayload::TaskCompleted(TaskCompletedPayload {
                task_id: task.task_id.clone(),
                entry_id: Some(entry_id.clone()),
                error,
                duration_ns: started.elapsed().as_nanos() as u64,
            }),
            EVENT_SOURCE,
            session.as_deref(),
        ));

        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&entry_id);

        // A failed task counts against max_runs exactly like a success.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&entry_id) {
            entry.run_count += 1;
            entry.last_run_at = Some(Utc::now());
            if entry.max_runs > 0 && entry.run_count >= entry.max_runs {
                entry.enabled = false;
                info!(entry = %entry_id, runs = entry.run_count, "schedule entry reached max runs; disabled");
            }
            if let Err(err) = self.store.update(entry) {
                warn!(entry = %entry_id, error = %err, "failed to persist schedule entry state");
            }
        }
    }
}
