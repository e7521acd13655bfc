// SPDX-License-Identifier: LGPL-2.1-or-later
// Copyright (C) 2025 FlowForge Contributors
//
// This file is part of FlowForge.
//
// FlowForge is free software: you can redistribute it and/or modify
// it under the terms of the GNU Lesser General Public License as published by
// the Free Software Foundation, either version 2.1 of the License, or
// (at your option) any later version.
//
// FlowForge is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public License
// along with FlowForge. If not, see <https://www.gnu.org/licenses/>.

//! The cron scheduler.

use chrono::{DateTime, Utc};
use cron::Schedule;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use flowforge_core::{JsonMap, SchedulerConfig, WorkflowDefinition};
use flowforge_engine::{EngineError, StartRequest, WorkflowEngine};
use flowforge_locks::{LockError, LockManager};
use flowforge_persistence::{DefinitionRepository, PersistenceError};
use flowforge_queue::{Job, JobQueue, QueueError, PRIORITY_MANUAL, PRIORITY_SCHEDULED};

/// Well-known lock key the scheduler singletonizes itself on.
const LEADER_KEY: &str = "scheduler:leader";

/// Scheduler failure.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// No schedule (or definition) under the requested name
    #[error("no schedule for workflow '{0}'")]
    UnknownSchedule(String),

    /// Engine rejected a start
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Queue publish failed
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Definition listing failed
    #[error("storage error: {0}")]
    Storage(#[from] PersistenceError),

    /// Leader lease failure
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// One row of the schedule table.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub workflow_name: String,
    pub workflow_version: i32,
    pub cron_expression: String,
    pub enabled: bool,
    pub input: JsonMap,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Tick-based scheduler over the active `Scheduled` definitions.
pub struct CronScheduler {
    definitions: Arc<dyn DefinitionRepository>,
    engine: WorkflowEngine,
    queue: Arc<dyn JobQueue>,
    leader_locks: Option<LockManager>,
    config: SchedulerConfig,
    schedules: Mutex<HashMap<String, ScheduleEntry>>,
}

impl CronScheduler {
    pub fn new(
        definitions: Arc<dyn DefinitionRepository>,
        engine: WorkflowEngine,
        queue: Arc<dyn JobQueue>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            definitions,
            engine,
            queue,
            leader_locks: None,
            config,
            schedules: Mutex::new(HashMap::new()),
        }
    }

    /// Singletonize the loop across replicas on the `scheduler:leader` key.
    pub fn with_leader_election(mut self, locks: LockManager) -> Self {
        self.leader_locks = Some(locks);
        self
    }

    /// Rebuild the schedule table from the active definitions, preserving
    /// `last_run` for entries that survive. Invalid cron expressions are
    /// logged and skipped.
    pub async fn refresh(&self) -> SchedulerResult<()> {
        let definitions = self.definitions.list(false).await?;
        let now = Utc::now();

        let mut table = self.schedules.lock().await;
        let first_refresh = table.is_empty();
        let previous = std::mem::take(&mut *table);

        for definition in definitions {
            let Some(mut entry) = Self::entry_for(&definition, &previous, now) else {
                continue;
            };
            // Catch-up semantics: by default a window missed while the
            // process was down is skipped; with run_missed_on_startup the
            // schedule fires once immediately on the first refresh.
            if first_refresh && self.config.run_missed_on_startup && entry.last_run.is_none() {
                entry.next_run = Some(now);
            }
            table.insert(definition.name.clone(), entry);
        }

        info!(schedules = table.len(), "schedule table refreshed");
        Ok(())
    }

    fn entry_for(
        definition: &WorkflowDefinition,
        previous: &HashMap<String, ScheduleEntry>,
        now: DateTime<Utc>,
    ) -> Option<ScheduleEntry> {
        if !definition.is_scheduled() {
            return None;
        }
        let trigger = definition.trigger.as_ref()?;
        let expression = trigger.cron_expression.as_deref()?;

        let schedule = match Schedule::from_str(expression) {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(
                    workflow = %definition.name,
                    cron = expression,
                    error = %e,
                    "invalid cron expression; schedule skipped"
                );
                return None;
            }
        };

        let prior = previous.get(&definition.name);
        Some(ScheduleEntry {
            workflow_name: definition.name.clone(),
            workflow_version: definition.version,
            cron_expression: expression.to_string(),
            enabled: prior.map(|p| p.enabled).unwrap_or(true),
            input: trigger.input.clone().unwrap_or_default(),
            last_run: prior.and_then(|p| p.last_run),
            next_run: schedule.after(&now).next(),
        })
    }

    /// Run the tick loop until cancelled. With leader election configured,
    /// blocks until this replica holds the lease.
    pub async fn run(&self, cancel: CancellationToken) -> SchedulerResult<()> {
        if !self.config.enabled {
            info!("scheduler disabled by configuration");
            return Ok(());
        }
        if self.config.timezone != "UTC" {
            warn!(
                timezone = %self.config.timezone,
                "non-UTC scheduler timezone is not supported; evaluating in UTC"
            );
        }

        let lease = match &self.leader_locks {
            Some(locks) => Some(self.acquire_leadership(locks, &cancel).await?),
            None => None,
        };

        self.refresh().await?;
        info!(
            check_interval_ms = self.config.check_interval.as_millis() as u64,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.check_interval) => {}
            }

            if let Some(lease) = &lease {
                match lease.renew().await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("scheduler leader lease lost; stopping loop");
                        return Ok(());
                    }
                    Err(e) => warn!(error = %e, "leader lease renew failed"),
                }
            }

            if let Err(e) = self.tick().await {
                error!(error = %e, "scheduler tick failed");
            }
        }

        if let Some(lease) = lease {
            if let Err(e) = lease.release().await {
                warn!(error = %e, "leader lease release failed");
            }
        }
        info!("scheduler stopped");
        Ok(())
    }

    async fn acquire_leadership(
        &self,
        locks: &LockManager,
        cancel: &CancellationToken,
    ) -> SchedulerResult<flowforge_locks::LockLease> {
        let lease_ttl = self.config.check_interval * 3;
        loop {
            match locks.acquire(LEADER_KEY, lease_ttl, cancel).await? {
                Some(lease) => {
                    info!("scheduler leadership acquired");
                    return Ok(lease);
                }
                None => {
                    debug!("scheduler leadership held elsewhere; retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(SchedulerError::Lock(LockError::Cancelled(
                                LEADER_KEY.to_string(),
                            )));
                        }
                        _ = tokio::time::sleep(self.config.check_interval) => {}
                    }
                }
            }
        }
    }

    /// One pass over the due schedules, capped at `max_starts_per_check`.
    pub async fn tick(&self) -> SchedulerResult<usize> {
        let now = Utc::now();
        let due: Vec<ScheduleEntry> = {
            let table = self.schedules.lock().await;
            table
                .values()
                .filter(|entry| {
                    entry.enabled && entry.next_run.map(|next| next <= now).unwrap_or(false)
                })
                .take(self.config.max_starts_per_check)
                .cloned()
                .collect()
        };

        let mut started = 0usize;
        for entry in due {
            match self.start_scheduled(&entry, PRIORITY_SCHEDULED).await {
                Ok(instance_id) => {
                    started += 1;
                    debug!(
                        workflow = %entry.workflow_name,
                        instance_id = %instance_id,
                        "scheduled start published"
                    );
                }
                Err(e) => {
                    error!(
                        workflow = %entry.workflow_name,
                        error = %e,
                        "scheduled start failed"
                    );
                }
            }

            // Advance the window either way; a broken definition must not
            // hot-loop every tick.
            let mut table = self.schedules.lock().await;
            if let Some(stored) = table.get_mut(&entry.workflow_name) {
                stored.last_run = Some(now);
                stored.next_run = Schedule::from_str(&stored.cron_expression)
                    .ok()
                    .and_then(|schedule| schedule.after(&Utc::now()).next());
            }
        }

        Ok(started)
    }

    /// Force one start at high priority without touching `next_run`.
    pub async fn trigger_now(&self, workflow_name: &str) -> SchedulerResult<String> {
        let entry = {
            let table = self.schedules.lock().await;
            table.get(workflow_name).cloned()
        };
        let entry = entry.ok_or_else(|| SchedulerError::UnknownSchedule(workflow_name.to_string()))?;
        self.start_scheduled(&entry, PRIORITY_MANUAL).await
    }

    async fn start_scheduled(
        &self,
        entry: &ScheduleEntry,
        priority: i32,
    ) -> SchedulerResult<String> {
        // Start first, then publish the resulting instance id; the job
        // always references a real row.
        let instance = self
            .engine
            .start(StartRequest::new(
                &entry.workflow_name,
                entry.input.clone(),
            ))
            .await?;
        self.queue
            .publish(Job::start(&instance.id, priority))
            .await?;
        Ok(instance.id)
    }

    /// Snapshot of the schedule table for external readers.
    pub async fn snapshot(&self) -> Vec<ScheduleEntry> {
        let table = self.schedules.lock().await;
        let mut entries: Vec<ScheduleEntry> = table.values().cloned().collect();
        entries.sort_by(|a, b| a.workflow_name.cmp(&b.workflow_name));
        entries
    }

    /// Enable or disable one schedule without touching the definition.
    pub async fn set_enabled(&self, workflow_name: &str, enabled: bool) -> SchedulerResult<()> {
        let mut table = self.schedules.lock().await;
        let entry = table
            .get_mut(workflow_name)
            .ok_or_else(|| SchedulerError::UnknownSchedule(workflow_name.to_string()))?;
        entry.enabled = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    use flowforge_core::{
        ActivityDefinition, EngineConfig, InstanceStatus, TriggerDefinition, TriggerType,
    };
    use flowforge_locks::{LockManager, MemoryLockBackend};
    use flowforge_persistence::{
        InMemoryDefinitionRepository, InMemoryExecutionRepository, InMemoryInstanceRepository,
        InstanceRepository,
    };
    use flowforge_queue::{JobQueue, JobType, MemoryJobQueue};
    use flowforge_registry::ActivityRegistry;

    struct Rig {
        definitions: Arc<InMemoryDefinitionRepository>,
        instances: Arc<InMemoryInstanceRepository>,
        queue: Arc<MemoryJobQueue>,
        scheduler: CronScheduler,
    }

    fn rig(config: SchedulerConfig) -> Rig {
        let definitions = Arc::new(InMemoryDefinitionRepository::new());
        let instances = Arc::new(InMemoryInstanceRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let queue = Arc::new(MemoryJobQueue::new());

        let engine = WorkflowEngine::new(
            definitions.clone(),
            instances.clone(),
            executions,
            Arc::new(ActivityRegistry::new()),
            LockManager::new(Arc::new(MemoryLockBackend::new()), "test:"),
            EngineConfig::default(),
        );

        let scheduler = CronScheduler::new(
            definitions.clone(),
            engine,
            queue.clone(),
            config,
        );

        Rig {
            definitions,
            instances,
            queue,
            scheduler,
        }
    }

    fn scheduled_definition(name: &str, cron: &str) -> WorkflowDefinition {
        let mut def = WorkflowDefinition::new(name, "report");
        def.activities = vec![ActivityDefinition::new("report", "log")];
        let mut input = JsonMap::new();
        input.insert("source".to_string(), json!("cron"));
        def.trigger = Some(TriggerDefinition {
            trigger_type: TriggerType::Scheduled,
            cron_expression: Some(cron.to_string()),
            input: Some(input),
        });
        def
    }

    #[tokio::test]
    async fn test_refresh_builds_table_from_scheduled_definitions() {
        let rig = rig(SchedulerConfig::default());
        rig.definitions
            .save(scheduled_definition("nightly", "0 0 2 * * *"))
            .await
            .unwrap();

        // Unscheduled definitions never enter the table.
        let mut manual = WorkflowDefinition::new("manual", "a");
        manual.activities = vec![ActivityDefinition::new("a", "log")];
        rig.definitions.save(manual).await.unwrap();

        rig.scheduler.refresh().await.unwrap();
        let snapshot = rig.scheduler.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].workflow_name, "nightly");
        assert!(snapshot[0].enabled);
        assert!(snapshot[0].next_run.is_some());
        assert!(snapshot[0].last_run.is_none());
    }

    #[tokio::test]
    async fn test_tick_starts_due_schedules_and_advances_window() {
        let rig = rig(SchedulerConfig::default());
        rig.definitions
            .save(scheduled_definition("minutely", "0 * * * * *"))
            .await
            .unwrap();
        rig.scheduler.refresh().await.unwrap();

        // Force the entry due.
        {
            let mut table = rig.scheduler.schedules.lock().await;
            table.get_mut("minutely").unwrap().next_run =
                Some(Utc::now() - chrono::Duration::seconds(1));
        }

        let started = rig.scheduler.tick().await.unwrap();
        assert_eq!(started, 1);

        // Instance exists in Pending with the scheduled input.
        let jobs = {
            let job = rig.queue.pop().await.unwrap().unwrap();
            assert_eq!(job.job_type, JobType::Start);
            assert_eq!(job.priority, PRIORITY_SCHEDULED);
            rig.queue.ack(&job.message_id).await.unwrap();
            job
        };
        let instance = rig.instances.get(&jobs.instance_id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Pending);
        assert_eq!(instance.input.get("source"), Some(&json!("cron")));

        // The window advanced.
        let snapshot = rig.scheduler.snapshot().await;
        assert!(snapshot[0].last_run.is_some());
        assert!(snapshot[0].next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_tick_respects_disabled_and_not_due() {
        let rig = rig(SchedulerConfig::default());
        rig.definitions
            .save(scheduled_definition("daily", "0 0 2 * * *"))
            .await
            .unwrap();
        rig.scheduler.refresh().await.unwrap();

        // Not due yet: nothing starts.
        assert_eq!(rig.scheduler.tick().await.unwrap(), 0);

        // Due but disabled: nothing starts.
        {
            let mut table = rig.scheduler.schedules.lock().await;
            table.get_mut("daily").unwrap().next_run =
                Some(Utc::now() - chrono::Duration::seconds(1));
        }
        rig.scheduler.set_enabled("daily", false).await.unwrap();
        assert_eq!(rig.scheduler.tick().await.unwrap(), 0);

        rig.scheduler.set_enabled("daily", true).await.unwrap();
        assert_eq!(rig.scheduler.tick().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_max_starts_per_check() {
        let rig = rig(SchedulerConfig {
            max_starts_per_check: 2,
            ..Default::default()
        });
        for name in ["s1", "s2", "s3"] {
            rig.definitions
                .save(scheduled_definition(name, "0 * * * * *"))
                .await
                .unwrap();
        }
        rig.scheduler.refresh().await.unwrap();
        {
            let mut table = rig.scheduler.schedules.lock().await;
            for entry in table.values_mut() {
                entry.next_run = Some(Utc::now() - chrono::Duration::seconds(1));
            }
        }

        assert_eq!(rig.scheduler.tick().await.unwrap(), 2);
        // The remaining schedule fires on the next tick.
        assert_eq!(rig.scheduler.tick().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_run_missed_on_startup_fires_once_immediately() {
        let rig = rig(SchedulerConfig {
            run_missed_on_startup: true,
            ..Default::default()
        });
        // Not due for hours, but the startup catch-up fires it once.
        rig.definitions
            .save(scheduled_definition("daily", "0 0 2 * * *"))
            .await
            .unwrap();
        rig.scheduler.refresh().await.unwrap();

        assert_eq!(rig.scheduler.tick().await.unwrap(), 1);
        // The window advanced to the real next occurrence.
        assert_eq!(rig.scheduler.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_trigger_now_uses_high_priority_and_keeps_window() {
        let rig = rig(SchedulerConfig::default());
        rig.definitions
            .save(scheduled_definition("daily", "0 0 2 * * *"))
            .await
            .unwrap();
        rig.scheduler.refresh().await.unwrap();
        let before = rig.scheduler.snapshot().await[0].next_run;

        let instance_id = rig.scheduler.trigger_now("daily").await.unwrap();

        let job = rig.queue.pop().await.unwrap().unwrap();
        assert_eq!(job.priority, PRIORITY_MANUAL);
        assert_eq!(job.instance_id, instance_id);

        // next_run untouched, last_run untouched.
        let snapshot = rig.scheduler.snapshot().await;
        assert_eq!(snapshot[0].next_run, before);
        assert!(snapshot[0].last_run.is_none());

        let err = rig.scheduler.trigger_now("unknown").await.unwrap_err();
        assert!(matches!(err, SchedulerError::UnknownSchedule(_)));
    }

    #[tokio::test]
    async fn test_run_loop_emits_due_starts() {
        let rig = rig(SchedulerConfig {
            check_interval: Duration::from_millis(100),
            ..Default::default()
        });
        // Every second, so one boundary falls inside the test window.
        rig.definitions
            .save(scheduled_definition("fast", "* * * * * *"))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let scheduler = Arc::new(rig.scheduler);
        let run = tokio::spawn({
            let scheduler = scheduler.clone();
            let cancel = cancel.clone();
            async move { scheduler.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        assert!(rig.queue.pending_len().await.unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_leader_election_blocks_second_scheduler() {
        let backend = Arc::new(MemoryLockBackend::new());
        let config = SchedulerConfig {
            check_interval: Duration::from_millis(100),
            ..Default::default()
        };

        let rig_a = rig(config.clone());
        let scheduler_a = rig_a
            .scheduler
            .with_leader_election(LockManager::new(backend.clone(), "test:"));

        let cancel = CancellationToken::new();
        let run_a = tokio::spawn({
            let cancel = cancel.clone();
            async move { scheduler_a.run(cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        // The second replica cannot take the lease while A holds it.
        let manager_b = LockManager::new(backend.clone(), "test:");
        let probe = CancellationToken::new();
        let lease = manager_b
            .acquire(LEADER_KEY, Duration::from_millis(150), &probe)
            .await
            .unwrap();
        assert!(lease.is_none());

        cancel.cancel();
        run_a.await.unwrap().unwrap();
    }
}
