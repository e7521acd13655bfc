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

//! # FlowForge Node
//!
//! ## Purpose
//! Top-level runtime for one FlowForge process: wires configuration to
//! backends, builds the engine, and runs the worker pool and scheduler
//! until shutdown.
//!
//! ## Backend selection
//! In-memory backends by default. With the `redis-backend` feature and a
//! configured `redis_connection`, locks, queue, and heartbeats move to
//! redis; with `postgres-backend` and a `postgres_connection`, the
//! repositories move to Postgres. The control plane (HTTP facade, auth,
//! push) lives outside this crate and drives the node through
//! [`FlowForgeNode::engine`] and [`FlowForgeNode::queue`].

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use flowforge_core::FlowForgeConfig;
use flowforge_engine::WorkflowEngine;
use flowforge_locks::{LockBackend, LockManager, MemoryLockBackend};
use flowforge_persistence::{
    DefinitionRepository, ExecutionRepository, InMemoryDefinitionRepository,
    InMemoryExecutionRepository, InMemoryInstanceRepository, InstanceRepository,
};
use flowforge_queue::{JobQueue, MemoryJobQueue};
use flowforge_registry::{ActivityRegistry, ServiceLocator};
use flowforge_scheduler::CronScheduler;
use flowforge_worker::{HeartbeatStore, MemoryHeartbeatStore, WorkerPool};

/// Node lifecycle failure.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Starting from an invalid state
    #[error("invalid node state: {0}")]
    InvalidState(String),

    /// Backend construction failed
    #[error("failed to build node: {0}")]
    BuildFailed(String),

    /// Worker error surfaced during shutdown
    #[error("worker error: {0}")]
    Worker(#[from] flowforge_worker::WorkerError),

    /// Scheduler error surfaced during shutdown
    #[error("scheduler error: {0}")]
    Scheduler(#[from] flowforge_scheduler::SchedulerError),
}

/// Node lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Built but not started
    Created,
    /// Worker (and scheduler, when enabled) running
    Running,
    /// Stopped after shutdown
    Stopped,
}

/// Builder collecting the registry, services, and backend overrides.
pub struct NodeBuilder {
    config: FlowForgeConfig,
    registry: ActivityRegistry,
    services: ServiceLocator,
    definitions: Option<Arc<dyn DefinitionRepository>>,
    instances: Option<Arc<dyn InstanceRepository>>,
    executions: Option<Arc<dyn ExecutionRepository>>,
    lock_backend: Option<Arc<dyn LockBackend>>,
    queue: Option<Arc<dyn JobQueue>>,
    heartbeats: Option<Arc<dyn HeartbeatStore>>,
}

impl NodeBuilder {
    pub fn new(config: FlowForgeConfig) -> Self {
        Self {
            config,
            registry: ActivityRegistry::new(),
            services: ServiceLocator::default(),
            definitions: None,
            instances: None,
            executions: None,
            lock_backend: None,
            queue: None,
            heartbeats: None,
        }
    }

    /// Register an activity handler.
    pub fn register_activity(
        mut self,
        activity_type: impl Into<String>,
        handler: Arc<dyn flowforge_registry::ActivityHandler>,
    ) -> Self {
        self.registry.register(activity_type, handler);
        self
    }

    /// Service locator handed to every handler call.
    pub fn with_services(mut self, services: ServiceLocator) -> Self {
        self.services = services;
        self
    }

    /// Override the repositories (e.g. Postgres-backed).
    pub fn with_repositories(
        mut self,
        definitions: Arc<dyn DefinitionRepository>,
        instances: Arc<dyn InstanceRepository>,
        executions: Arc<dyn ExecutionRepository>,
    ) -> Self {
        self.definitions = Some(definitions);
        self.instances = Some(instances);
        self.executions = Some(executions);
        self
    }

    /// Override the lock backend.
    pub fn with_lock_backend(mut self, backend: Arc<dyn LockBackend>) -> Self {
        self.lock_backend = Some(backend);
        self
    }

    /// Override the job queue.
    pub fn with_queue(mut self, queue: Arc<dyn JobQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Override the heartbeat store.
    pub fn with_heartbeats(mut self, heartbeats: Arc<dyn HeartbeatStore>) -> Self {
        self.heartbeats = Some(heartbeats);
        self
    }

    /// Assemble the node. Backends not injected (or not configured via
    /// connection strings and features) fall back to in-memory.
    pub async fn build(self) -> Result<FlowForgeNode, NodeError> {
        let config = self.config;

        #[cfg(feature = "postgres-backend")]
        let (definitions, instances, executions) = match (
            self.definitions,
            self.instances,
            self.executions,
            &config.postgres_connection,
        ) {
            (Some(d), Some(i), Some(e), _) => (d, i, e),
            (None, None, None, Some(url)) => {
                let repos = flowforge_persistence::PostgresRepositories::connect(url)
                    .await
                    .map_err(|e| NodeError::BuildFailed(e.to_string()))?;
                let repos = Arc::new(repos);
                (
                    repos.clone() as Arc<dyn DefinitionRepository>,
                    repos.clone() as Arc<dyn InstanceRepository>,
                    repos as Arc<dyn ExecutionRepository>,
                )
            }
            _ => in_memory_repositories(),
        };
        #[cfg(not(feature = "postgres-backend"))]
        let (definitions, instances, executions) =
            match (self.definitions, self.instances, self.executions) {
                (Some(d), Some(i), Some(e)) => (d, i, e),
                _ => in_memory_repositories(),
            };

        #[cfg(feature = "redis-backend")]
        let (lock_backend, queue, heartbeats) = {
            let lock_backend: Arc<dyn LockBackend> = match (self.lock_backend, &config.redis_connection) {
                (Some(backend), _) => backend,
                (None, Some(url)) => Arc::new(
                    flowforge_locks::RedisLockBackend::new(url)
                        .await
                        .map_err(|e| NodeError::BuildFailed(e.to_string()))?,
                ),
                (None, None) => Arc::new(MemoryLockBackend::new()),
            };
            let queue: Arc<dyn JobQueue> = match (self.queue, &config.redis_connection) {
                (Some(queue), _) => queue,
                (None, Some(url)) => Arc::new(
                    flowforge_queue::RedisJobQueue::new(url, config.key_prefix.clone())
                        .await
                        .map_err(|e| NodeError::BuildFailed(e.to_string()))?,
                ),
                (None, None) => Arc::new(MemoryJobQueue::new()),
            };
            let heartbeats: Arc<dyn HeartbeatStore> = match (self.heartbeats, &config.redis_connection) {
                (Some(store), _) => store,
                (None, Some(url)) => Arc::new(
                    flowforge_worker::RedisHeartbeatStore::new(url)
                        .await
                        .map_err(|e| NodeError::BuildFailed(e.to_string()))?,
                ),
                (None, None) => Arc::new(MemoryHeartbeatStore::new()),
            };
            (lock_backend, queue, heartbeats)
        };
        #[cfg(not(feature = "redis-backend"))]
        let (lock_backend, queue, heartbeats) = {
            let lock_backend: Arc<dyn LockBackend> = self
                .lock_backend
                .unwrap_or_else(|| Arc::new(MemoryLockBackend::new()));
            let queue: Arc<dyn JobQueue> = self
                .queue
                .unwrap_or_else(|| Arc::new(MemoryJobQueue::new()));
            let heartbeats: Arc<dyn HeartbeatStore> = self
                .heartbeats
                .unwrap_or_else(|| Arc::new(MemoryHeartbeatStore::new()));
            (lock_backend, queue, heartbeats)
        };

        let locks = LockManager::new(lock_backend, config.key_prefix.clone());
        let engine = WorkflowEngine::new(
            definitions.clone(),
            instances.clone(),
            executions,
            Arc::new(self.registry),
            locks.clone(),
            config.engine.clone(),
        )
        .with_services(self.services);

        let worker = WorkerPool::new(
            engine.clone(),
            Arc::clone(&queue),
            config.worker.clone(),
            config.key_prefix.clone(),
        )
        .with_heartbeats(heartbeats);

        let scheduler = CronScheduler::new(
            definitions.clone(),
            engine.clone(),
            Arc::clone(&queue),
            config.scheduler.clone(),
        )
        .with_leader_election(locks);

        Ok(FlowForgeNode {
            config,
            definitions,
            instances,
            engine,
            queue,
            worker: Arc::new(worker),
            scheduler: Arc::new(scheduler),
            state: Arc::new(RwLock::new(NodeState::Created)),
            cancel: CancellationToken::new(),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        })
    }
}

/// One FlowForge process: engine + worker pool + scheduler.
pub struct FlowForgeNode {
    config: FlowForgeConfig,
    definitions: Arc<dyn DefinitionRepository>,
    instances: Arc<dyn InstanceRepository>,
    engine: WorkflowEngine,
    queue: Arc<dyn JobQueue>,
    worker: Arc<WorkerPool>,
    scheduler: Arc<CronScheduler>,
    state: Arc<RwLock<NodeState>>,
    cancel: CancellationToken,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl FlowForgeNode {
    /// Builder entry point.
    pub fn builder(config: FlowForgeConfig) -> NodeBuilder {
        NodeBuilder::new(config)
    }

    /// The engine, for control-plane callers (start, signal, cancel).
    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// The definition repository, for control-plane definition management.
    pub fn definitions(&self) -> Arc<dyn DefinitionRepository> {
        Arc::clone(&self.definitions)
    }

    /// The instance repository, for control-plane queries.
    pub fn instances(&self) -> Arc<dyn InstanceRepository> {
        Arc::clone(&self.instances)
    }

    /// The queue, for control-plane publishers.
    pub fn queue(&self) -> Arc<dyn JobQueue> {
        Arc::clone(&self.queue)
    }

    /// The scheduler, for `trigger_now` and schedule inspection.
    pub fn scheduler(&self) -> Arc<CronScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    /// Start the worker pool and (when enabled) the scheduler.
    pub async fn start(&self) -> Result<(), NodeError> {
        {
            let mut state = self.state.write().await;
            if *state != NodeState::Created {
                return Err(NodeError::InvalidState(format!("{:?}", *state)));
            }
            *state = NodeState::Running;
        }

        let mut tasks = self.tasks.lock().await;

        let worker = Arc::clone(&self.worker);
        let worker_cancel = self.cancel.child_token();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = worker.run(worker_cancel).await {
                error!(error = %e, "worker pool exited with error");
            }
        }));

        if self.config.scheduler.enabled {
            let scheduler = Arc::clone(&self.scheduler);
            let scheduler_cancel = self.cancel.child_token();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = scheduler.run(scheduler_cancel).await {
                    error!(error = %e, "scheduler exited with error");
                }
            }));
        }

        info!("flowforge node started");
        Ok(())
    }

    /// Stop all background tasks and wait for them.
    pub async fn shutdown(&self) -> Result<(), NodeError> {
        {
            let mut state = self.state.write().await;
            if *state != NodeState::Running {
                return Err(NodeError::InvalidState(format!("{:?}", *state)));
            }
            *state = NodeState::Stopped;
        }

        self.cancel.cancel();
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!("flowforge node stopped");
        Ok(())
    }
}

fn in_memory_repositories() -> (
    Arc<dyn DefinitionRepository>,
    Arc<dyn InstanceRepository>,
    Arc<dyn ExecutionRepository>,
) {
    (
        Arc::new(InMemoryDefinitionRepository::new()),
        Arc::new(InMemoryInstanceRepository::new()),
        Arc::new(InMemoryExecutionRepository::new()),
    )
}
