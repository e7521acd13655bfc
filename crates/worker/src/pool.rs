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

//! Worker pool: queue consumption bounded by a counting semaphore, plus a
//! heartbeat task.
//!
//! Dispatch by job type: `Start`/`Continue`/`Resume`/`Retry` run
//! `Engine::execute`; `Cancel` runs `Engine::cancel`. Handler errors flow
//! into the consumer's nack path (requeue until the queue-level attempt
//! cap, then dead-letter).

use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowforge_core::WorkerConfig;
use flowforge_engine::WorkflowEngine;
use flowforge_queue::{Job, JobHandler, JobQueue, JobType, QueueConsumer, QueueError};

use crate::heartbeat::HeartbeatStore;

/// Worker failure.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// Queue subscription failure
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Heartbeat store failure
    #[error("heartbeat error: {0}")]
    Heartbeat(String),
}

/// Result alias for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// One worker process's subscription, concurrency bound, and heartbeat.
pub struct WorkerPool {
    worker_id: String,
    engine: WorkflowEngine,
    queue: Arc<dyn JobQueue>,
    heartbeats: Option<Arc<dyn HeartbeatStore>>,
    config: WorkerConfig,
    key_prefix: String,
}

impl WorkerPool {
    /// New pool with a `hostname-pid` worker id.
    pub fn new(
        engine: WorkflowEngine,
        queue: Arc<dyn JobQueue>,
        config: WorkerConfig,
        key_prefix: impl Into<String>,
    ) -> Self {
        let worker_id = default_worker_id();
        Self {
            engine: engine.with_worker_id(worker_id.clone()),
            worker_id,
            queue,
            heartbeats: None,
            config,
            key_prefix: key_prefix.into(),
        }
    }

    /// Post liveness heartbeats to this store.
    pub fn with_heartbeats(mut self, store: Arc<dyn HeartbeatStore>) -> Self {
        self.heartbeats = Some(store);
        self
    }

    /// This worker's id.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Run until cancelled: consume jobs with bounded concurrency while
    /// the heartbeat task keeps the liveness record fresh.
    pub async fn run(&self, cancel: CancellationToken) -> WorkerResult<()> {
        info!(
            worker_id = %self.worker_id,
            max_concurrency = self.config.max_concurrency,
            "worker starting"
        );

        let heartbeat_task = self.heartbeats.as_ref().map(|store| {
            let store = Arc::clone(store);
            let key = format!("{}worker:{}", self.key_prefix, self.worker_id);
            let worker_id = self.worker_id.clone();
            let interval = self.config.heartbeat_interval;
            let token = cancel.clone();
            tokio::spawn(async move {
                let ttl = interval * 3;
                loop {
                    let payload = json!({
                        "workerId": worker_id,
                        "beatAt": chrono::Utc::now(),
                    })
                    .to_string();
                    if let Err(e) = store.beat(&key, &payload, ttl).await {
                        warn!(worker_id = %worker_id, error = %e, "heartbeat write failed");
                    }
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            })
        });

        let engine = self.engine.clone();
        let job_cancel = cancel.clone();
        let handler: JobHandler = Arc::new(move |job: Job| {
            let engine = engine.clone();
            let cancel = job_cancel.clone();
            Box::pin(async move { dispatch(&engine, job, &cancel).await })
        });

        let consumer = QueueConsumer::new(Arc::clone(&self.queue))
            .with_concurrency(self.config.max_concurrency);
        let result = consumer.run(handler, cancel.clone()).await;

        if let Some(task) = heartbeat_task {
            task.abort();
        }
        info!(worker_id = %self.worker_id, "worker stopped");
        result.map_err(WorkerError::from)
    }
}

/// Route one job to the engine.
async fn dispatch(
    engine: &WorkflowEngine,
    job: Job,
    cancel: &CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    debug!(
        message_id = %job.message_id,
        instance_id = %job.instance_id,
        job_type = %job.job_type,
        attempt = job.attempt,
        "dispatching job"
    );
    match job.job_type {
        JobType::Start | JobType::Continue | JobType::Resume | JobType::Retry => {
            engine.execute(&job.instance_id, cancel).await?;
        }
        JobType::Cancel => {
            engine.cancel(&job.instance_id).await?;
        }
    }
    Ok(())
}

fn default_worker_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{}-{}", hostname, std::process::id())
}

#[cfg(all(test, feature = "memory-backend"))]
mod tests {
    use super::*;
    use crate::heartbeat::MemoryHeartbeatStore;
    use async_trait::async_trait;
    use std::time::Duration;

    use flowforge_core::{
        ActivityDefinition, EngineConfig, InstanceStatus, JsonMap, WorkflowDefinition,
    };
    use flowforge_engine::StartRequest;
    use flowforge_locks::{LockManager, MemoryLockBackend};
    use flowforge_persistence::{
        DefinitionRepository, InMemoryDefinitionRepository, InMemoryExecutionRepository,
        InMemoryInstanceRepository, InstanceRepository,
    };
    use flowforge_queue::{MemoryJobQueue, PRIORITY_DEFAULT};
    use flowforge_registry::{
        ActivityContext, ActivityHandler, ActivityOutcome, ActivityRegistry, BoxError,
    };

    struct EchoHandler;

    #[async_trait]
    impl ActivityHandler for EchoHandler {
        async fn execute(&self, ctx: ActivityContext) -> Result<ActivityOutcome, BoxError> {
            let mut output = JsonMap::new();
            output.insert("echo".to_string(), serde_json::json!(ctx.definition.id));
            Ok(ActivityOutcome::ok(output))
        }
    }

    struct TestRig {
        instances: Arc<InMemoryInstanceRepository>,
        queue: Arc<MemoryJobQueue>,
        engine: WorkflowEngine,
    }

    async fn rig() -> TestRig {
        let definitions = Arc::new(InMemoryDefinitionRepository::new());
        let instances = Arc::new(InMemoryInstanceRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let queue = Arc::new(MemoryJobQueue::new());

        let mut registry = ActivityRegistry::new();
        registry.register("echo", Arc::new(EchoHandler));

        let engine = WorkflowEngine::new(
            definitions.clone(),
            instances.clone(),
            executions,
            Arc::new(registry),
            LockManager::new(Arc::new(MemoryLockBackend::new()), "test:"),
            EngineConfig::default(),
        );

        let mut def = WorkflowDefinition::new("echoes", "say");
        def.activities = vec![ActivityDefinition::new("say", "echo")];
        definitions.save(def).await.unwrap();

        TestRig {
            instances,
            queue,
            engine,
        }
    }

    #[tokio::test]
    async fn test_worker_processes_start_jobs() {
        let rig = rig().await;
        let pool = WorkerPool::new(
            rig.engine.clone(),
            rig.queue.clone(),
            WorkerConfig {
                max_concurrency: 4,
                heartbeat_interval: Duration::from_millis(50),
            },
            "flowforge:",
        );

        let mut started = Vec::new();
        for _ in 0..3 {
            let instance = rig
                .engine
                .start(StartRequest::new("echoes", JsonMap::new()))
                .await
                .unwrap();
            rig.queue
                .publish(Job::start(&instance.id, PRIORITY_DEFAULT))
                .await
                .unwrap();
            started.push(instance.id);
        }

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { pool.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(400)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        for id in started {
            let instance = rig.instances.get(&id).await.unwrap().unwrap();
            assert_eq!(instance.status, InstanceStatus::Completed);
            assert!(instance.worker_id.is_some());
        }
        assert_eq!(rig.queue.pending_len().await.unwrap(), 0);
        assert_eq!(rig.queue.in_flight_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_worker_processes_cancel_jobs() {
        let rig = rig().await;
        let pool = WorkerPool::new(
            rig.engine.clone(),
            rig.queue.clone(),
            WorkerConfig {
                max_concurrency: 2,
                heartbeat_interval: Duration::from_secs(30),
            },
            "flowforge:",
        );

        let instance = rig
            .engine
            .start(StartRequest::new("echoes", JsonMap::new()))
            .await
            .unwrap();
        rig.queue.publish(Job::cancel(&instance.id)).await.unwrap();

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { pool.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        let instance = rig.instances.get(&instance.id).await.unwrap().unwrap();
        assert_eq!(instance.status, InstanceStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_heartbeat_record_appears_with_ttl() {
        let rig = rig().await;
        let store = Arc::new(MemoryHeartbeatStore::new());
        let pool = WorkerPool::new(
            rig.engine.clone(),
            rig.queue.clone(),
            WorkerConfig {
                max_concurrency: 1,
                heartbeat_interval: Duration::from_millis(40),
            },
            "flowforge:",
        )
        .with_heartbeats(store.clone());
        let key = format!("flowforge:worker:{}", pool.worker_id());

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { pool.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        let payload = store.get(&key).await.unwrap().expect("heartbeat present");
        assert!(payload.contains("workerId"));

        cancel.cancel();
        run.await.unwrap().unwrap();

        // Without further beats the record expires after 3 intervals.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.get(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_instance_job_dead_letters() {
        let rig = rig().await;
        let pool = WorkerPool::new(
            rig.engine.clone(),
            rig.queue.clone(),
            WorkerConfig {
                max_concurrency: 1,
                heartbeat_interval: Duration::from_secs(30),
            },
            "flowforge:",
        );

        rig.queue
            .publish(Job::start("no-such-instance", PRIORITY_DEFAULT))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { pool.run(cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(800)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        let dead = rig.queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].instance_id, "no-such-instance");
    }
}
