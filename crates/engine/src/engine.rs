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

//! The workflow engine proper.
//!
//! ## Entry points
//! - `start` - resolve the active definition, validate input, create a
//!   `Pending` instance (does not execute)
//! - `execute` - advance an instance under its lock until it completes,
//!   fails, or suspends
//! - `resume_with_signal` - deliver a signal to a suspended instance and
//!   re-enter `execute`
//! - `cancel` - terminally cancel a non-terminal instance
//!
//! ## Locking discipline
//! Acquire lock, load instance (short storage call), run handler with no
//! transaction held, persist (another short call), release lock. Retry
//! backoff sleeps inline under the held lock; the lock lease bounds the
//! worst-case hold.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use flowforge_core::{
    ActivityDefinition, ActivityExecution, ActivityStatus, EngineConfig, InstanceStatus, JsonMap,
    RetryPolicy, WorkflowDefinition, WorkflowFault, WorkflowInstance, SUSPEND_KEY,
};
use flowforge_expression::{resolve_path, ExprScope};
use flowforge_locks::LockManager;
use flowforge_persistence::{DefinitionRepository, ExecutionRepository, InstanceRepository};
use flowforge_registry::{ActivityContext, ActivityFault, ActivityOutcome, ActivityRegistry, ServiceLocator};

use crate::error::{EngineError, EngineResult};
use crate::transition::choose_transition;
use crate::validate::validate_input;

/// Parameters for starting a new instance.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub workflow_name: String,
    pub input: JsonMap,
    pub correlation_id: Option<String>,
    pub parent_instance_id: Option<String>,
}

impl StartRequest {
    pub fn new(workflow_name: impl Into<String>, input: JsonMap) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            input,
            correlation_id: None,
            parent_instance_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_parent(mut self, parent_instance_id: impl Into<String>) -> Self {
        self.parent_instance_id = Some(parent_instance_id.into());
        self
    }
}

/// The engine. Cheap to clone; all state is shared immutable configuration
/// plus per-call context.
#[derive(Clone)]
pub struct WorkflowEngine {
    definitions: Arc<dyn DefinitionRepository>,
    instances: Arc<dyn InstanceRepository>,
    executions: Arc<dyn ExecutionRepository>,
    registry: Arc<ActivityRegistry>,
    locks: LockManager,
    services: ServiceLocator,
    config: EngineConfig,
    worker_id: Option<String>,
}

impl WorkflowEngine {
    pub fn new(
        definitions: Arc<dyn DefinitionRepository>,
        instances: Arc<dyn InstanceRepository>,
        executions: Arc<dyn ExecutionRepository>,
        registry: Arc<ActivityRegistry>,
        locks: LockManager,
        config: EngineConfig,
    ) -> Self {
        Self {
            definitions,
            instances,
            executions,
            registry,
            locks,
            services: ServiceLocator::default(),
            config,
            worker_id: None,
        }
    }

    /// Service locator handed to every activity handler.
    pub fn with_services(mut self, services: ServiceLocator) -> Self {
        self.services = services;
        self
    }

    /// Stamped onto instances this engine advances.
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = Some(worker_id.into());
        self
    }

    /// Create a `Pending` instance of the active definition. Does not run
    /// anything; publish a start job (or call `execute`) to advance it.
    pub async fn start(&self, request: StartRequest) -> EngineResult<WorkflowInstance> {
        let definition = match self.definitions.get(&request.workflow_name, None).await? {
            Some(definition) => definition,
            None => {
                if self.definitions.exists(&request.workflow_name).await? {
                    return Err(EngineError::WorkflowInactive(request.workflow_name));
                }
                return Err(EngineError::WorkflowNotFound(request.workflow_name));
            }
        };

        if let Some(schema) = &definition.input_schema {
            validate_input(schema, &request.input)?;
        }

        let mut instance = WorkflowInstance::new(
            &definition.name,
            definition.version,
            &definition.start_activity_id,
            request.input,
        );
        instance.correlation_id = request.correlation_id;
        instance.parent_instance_id = request.parent_instance_id;

        self.instances.create(&instance).await?;
        info!(
            instance_id = %instance.id,
            workflow = %definition.name,
            version = definition.version,
            "instance created"
        );
        Ok(instance)
    }

    /// Advance an instance under its lock. Idempotent on terminal
    /// instances: they are returned unchanged.
    pub async fn execute(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<WorkflowInstance> {
        let lease = self
            .locks
            .acquire(
                &format!("instance:{}", instance_id),
                self.config.lock_timeout,
                cancel,
            )
            .await?
            .ok_or_else(|| EngineError::LockFailed(instance_id.to_string()))?;

        let result = self.execute_locked(instance_id, cancel).await;

        if let Err(e) = lease.release().await {
            warn!(instance_id, error = %e, "lock release failed");
        }
        result
    }

    async fn execute_locked(
        &self,
        instance_id: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<WorkflowInstance> {
        let mut instance = self.load_instance(instance_id).await?;
        if instance.is_terminal() {
            debug!(instance_id, status = %instance.status, "execute on terminal instance is a no-op");
            return Ok(instance);
        }

        let definition = self.load_definition(&instance).await?;

        if matches!(
            instance.status,
            InstanceStatus::Pending | InstanceStatus::Scheduled
        ) {
            instance.status = InstanceStatus::Running;
            if instance.started_at.is_none() {
                instance.started_at = Some(Utc::now());
            }
            instance.worker_id = self.worker_id.clone();
            self.persist(&instance).await?;
        }

        if instance.status != InstanceStatus::Running {
            // Suspended: nothing to do until a signal arrives.
            return Ok(instance);
        }

        self.advance(&mut instance, &definition, cancel).await?;
        Ok(instance)
    }

    /// Deliver a signal to a suspended instance, then re-enter `execute`.
    pub async fn resume_with_signal(
        &self,
        instance_id: &str,
        signal_name: &str,
        data: Option<JsonMap>,
        cancel: &CancellationToken,
    ) -> EngineResult<WorkflowInstance> {
        let lease = self
            .locks
            .acquire(
                &format!("instance:{}", instance_id),
                self.config.lock_timeout,
                cancel,
            )
            .await?
            .ok_or_else(|| EngineError::LockFailed(instance_id.to_string()))?;

        let result = self
            .resume_locked(instance_id, signal_name, data)
            .await;

        if let Err(e) = lease.release().await {
            warn!(instance_id, error = %e, "lock release failed");
        }

        let instance = result?;
        if instance.status == InstanceStatus::Running {
            self.execute(instance_id, cancel).await
        } else {
            Ok(instance)
        }
    }

    async fn resume_locked(
        &self,
        instance_id: &str,
        signal_name: &str,
        data: Option<JsonMap>,
    ) -> EngineResult<WorkflowInstance> {
        let mut instance = self.load_instance(instance_id).await?;

        if instance.status != InstanceStatus::Suspended {
            return Err(EngineError::NotSuspended(instance_id.to_string()));
        }
        let expected = instance.suspend_key().unwrap_or_default().to_string();
        if expected != signal_name {
            return Err(EngineError::SignalMismatch {
                expected,
                received: signal_name.to_string(),
            });
        }

        if let Some(data) = data {
            for (key, value) in data {
                instance.state.insert(format!("signal_{}", key), value);
            }
        }
        instance.state.remove(SUSPEND_KEY);

        let definition = self.load_definition(&instance).await?;
        let current = instance.current_activity_id.clone().ok_or_else(|| {
            EngineError::Unexpected(format!(
                "suspended instance '{}' has no current activity",
                instance_id
            ))
        })?;

        // The suspended activity stays "current" from the graph's
        // perspective; transition choice runs now, on resume.
        let next = {
            let scope = ExprScope::from(&instance);
            choose_transition(&definition, &current, &scope)
        };
        info!(instance_id, signal = signal_name, next = ?next, "signal delivered");

        match next {
            Some(next) => {
                instance.status = InstanceStatus::Running;
                instance.current_activity_id = Some(next);
                self.persist(&instance).await?;
            }
            None => {
                self.complete(&mut instance, &definition).await?;
            }
        }
        Ok(instance)
    }

    /// Terminally cancel a non-terminal instance. Idempotent on terminal
    /// instances.
    pub async fn cancel(&self, instance_id: &str) -> EngineResult<WorkflowInstance> {
        let cancel = CancellationToken::new();
        let lease = self
            .locks
            .acquire(
                &format!("instance:{}", instance_id),
                self.config.lock_timeout,
                &cancel,
            )
            .await?
            .ok_or_else(|| EngineError::LockFailed(instance_id.to_string()))?;

        let result = async {
            let mut instance = self.load_instance(instance_id).await?;
            if instance.is_terminal() {
                return Ok(instance);
            }
            self.mark_cancelled(&mut instance).await?;
            Ok(instance)
        }
        .await;

        if let Err(e) = lease.release().await {
            warn!(instance_id, error = %e, "lock release failed");
        }
        result
    }

    /// The advancement loop: one activity at a time, strictly sequential.
    async fn advance(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        cancel: &CancellationToken,
    ) -> EngineResult<()> {
        while instance.status == InstanceStatus::Running {
            let Some(current_id) = instance.current_activity_id.clone() else {
                break;
            };

            if cancel.is_cancelled() {
                self.mark_cancelled(instance).await?;
                return Err(EngineError::Cancelled);
            }

            // A dangling reference is a corrupt definition; fail the
            // instance rather than the call.
            let Some(activity) = definition.activity(&current_id) else {
                let fault = WorkflowFault::new(
                    EngineError::ActivityNotFound(current_id.clone()).code(),
                    format!("activity '{}' not found in definition", current_id),
                );
                self.fail(instance, fault).await?;
                break;
            };

            // Skip check: condition false means the activity never runs.
            if let Some(condition) = &activity.condition {
                let skip = {
                    let scope = ExprScope::from(&*instance);
                    !flowforge_expression::evaluate_predicate(&scope, condition)
                };
                if skip {
                    self.record_skip(instance, activity).await?;
                    if !self.advance_past(instance, definition, &current_id).await? {
                        break;
                    }
                    continue;
                }
            }

            // Input resolution through the path evaluator.
            let resolved_input: JsonMap = {
                let scope = ExprScope::from(&*instance);
                activity
                    .input_mappings
                    .iter()
                    .map(|(name, expr)| (name.clone(), resolve_path(&scope, expr)))
                    .collect()
            };

            let Some(handler) = self.registry.get(&activity.activity_type) else {
                let fault = WorkflowFault::new(
                    EngineError::UnknownActivityType(activity.activity_type.clone()).code(),
                    format!(
                        "no handler registered for activity type '{}'",
                        activity.activity_type
                    ),
                )
                .at_activity(&activity.id);
                self.fail(instance, fault).await?;
                break;
            };

            let timeout = activity
                .timeout
                .or(definition.timeout)
                .unwrap_or(self.config.default_timeout);
            let attempt = instance.retry_count + 1;

            let mut execution = ActivityExecution::begin(
                &instance.id,
                &activity.id,
                &activity.activity_type,
                resolved_input.clone(),
                attempt,
            );
            self.executions.create(&execution).await?;
            debug!(
                instance_id = %instance.id,
                activity = %activity.id,
                attempt,
                "dispatching activity"
            );

            // Linked cancellation: the handler's token fires on outer
            // cancellation or on the activity timeout, whichever first.
            let attempt_cancel = cancel.child_token();
            let ctx = ActivityContext {
                instance: instance.clone(),
                definition: activity.clone(),
                input: resolved_input,
                attempt,
                cancel: attempt_cancel.clone(),
                services: self.services.clone(),
            };

            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    attempt_cancel.cancel();
                    execution.finish(ActivityStatus::Cancelled, None, None);
                    self.executions.update(&execution).await?;
                    self.mark_cancelled(instance).await?;
                    return Err(EngineError::Cancelled);
                }
                result = tokio::time::timeout(timeout, handler.execute(ctx)) => {
                    match result {
                        Ok(Ok(outcome)) => outcome,
                        Ok(Err(err)) => {
                            // A handler that errored because the outer
                            // token fired re-raises as cancellation, never
                            // as a retriable failure.
                            if cancel.is_cancelled() {
                                execution.finish(ActivityStatus::Cancelled, None, None);
                                self.executions.update(&execution).await?;
                                self.mark_cancelled(instance).await?;
                                return Err(EngineError::Cancelled);
                            }
                            ActivityOutcome::Fail(ActivityFault::retriable(
                                "UNHANDLED",
                                err.to_string(),
                            ))
                        }
                        Err(_) => {
                            attempt_cancel.cancel();
                            ActivityOutcome::Fail(ActivityFault::retriable(
                                "TIMEOUT",
                                format!("activity timed out after {:?}", timeout),
                            ))
                        }
                    }
                }
            };

            match outcome {
                ActivityOutcome::Fail(fault) => {
                    execution.finish(
                        ActivityStatus::Failed,
                        None,
                        Some(
                            WorkflowFault::new(&fault.code, &fault.message)
                                .at_activity(&activity.id),
                        ),
                    );
                    self.executions.update(&execution).await?;

                    if !self
                        .retry_or_fail(instance, activity, definition, fault, cancel)
                        .await?
                    {
                        break;
                    }
                }
                ActivityOutcome::Suspend { suspend_key } => {
                    let mut output = JsonMap::new();
                    output.insert("suspendKey".to_string(), json!(suspend_key));
                    execution.finish(ActivityStatus::Completed, Some(output), None);
                    self.executions.update(&execution).await?;

                    // current_activity_id is NOT advanced: transition
                    // choice runs on resume.
                    instance.status = InstanceStatus::Suspended;
                    instance
                        .state
                        .insert(SUSPEND_KEY.to_string(), json!(suspend_key));
                    self.persist(instance).await?;
                    info!(
                        instance_id = %instance.id,
                        activity = %activity.id,
                        suspend_key = %suspend_key,
                        "instance suspended"
                    );
                    break;
                }
                ActivityOutcome::Ok {
                    output,
                    next_activity_id,
                } => {
                    execution.finish(ActivityStatus::Completed, Some(output.clone()), None);
                    self.executions.update(&execution).await?;

                    instance.retry_count = 0;
                    for (state_key, output_name) in &activity.output_mappings {
                        if let Some(value) = output.get(output_name) {
                            instance.state.insert(state_key.clone(), value.clone());
                        }
                    }

                    let next = match next_activity_id {
                        Some(next) => Some(next),
                        None => {
                            let scope = ExprScope::from(&*instance);
                            choose_transition(definition, &activity.id, &scope)
                        }
                    };

                    match next {
                        Some(next) => {
                            instance.current_activity_id = Some(next);
                            self.persist(instance).await?;
                        }
                        None => {
                            self.complete(instance, definition).await?;
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Retry decision. Returns `true` when the loop should re-enter the
    /// same activity, `false` when the workflow was failed.
    async fn retry_or_fail(
        &self,
        instance: &mut WorkflowInstance,
        activity: &ActivityDefinition,
        definition: &WorkflowDefinition,
        fault: ActivityFault,
        cancel: &CancellationToken,
    ) -> EngineResult<bool> {
        let policy: RetryPolicy = activity
            .retry_policy
            .clone()
            .or_else(|| definition.default_retry_policy.clone())
            .unwrap_or_else(|| self.config.default_retry_policy.clone());

        let attempts_used = instance.retry_count + 1;
        let will_retry = fault.retriable
            && policy.code_is_retriable(&fault.code)
            && attempts_used < policy.max_attempts;

        if !will_retry {
            warn!(
                instance_id = %instance.id,
                activity = %activity.id,
                code = %fault.code,
                attempts = attempts_used,
                "activity failed outside retry budget"
            );
            let fault =
                WorkflowFault::new(fault.code, fault.message).at_activity(&activity.id);
            self.fail(instance, fault).await?;
            return Ok(false);
        }

        instance.retry_count += 1;
        self.persist(instance).await?;

        let delay = policy.backoff_delay(instance.retry_count);
        debug!(
            instance_id = %instance.id,
            activity = %activity.id,
            retry = instance.retry_count,
            delay_ms = delay.as_millis() as u64,
            "retrying after backoff"
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                self.mark_cancelled(instance).await?;
                return Err(EngineError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }
        Ok(true)
    }

    /// Move past an activity without executing it (skip path). Returns
    /// `false` when the workflow completed.
    async fn advance_past(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
        from: &str,
    ) -> EngineResult<bool> {
        let next = {
            let scope = ExprScope::from(&*instance);
            choose_transition(definition, from, &scope)
        };
        match next {
            Some(next) => {
                instance.current_activity_id = Some(next);
                self.persist(instance).await?;
                Ok(true)
            }
            None => {
                self.complete(instance, definition).await?;
                Ok(false)
            }
        }
    }

    async fn record_skip(
        &self,
        instance: &WorkflowInstance,
        activity: &ActivityDefinition,
    ) -> EngineResult<()> {
        let mut row = ActivityExecution::begin(
            &instance.id,
            &activity.id,
            &activity.activity_type,
            JsonMap::new(),
            instance.retry_count + 1,
        );
        row.finish(ActivityStatus::Skipped, None, None);
        self.executions.create(&row).await?;
        debug!(instance_id = %instance.id, activity = %activity.id, "activity skipped");
        Ok(())
    }

    async fn complete(
        &self,
        instance: &mut WorkflowInstance,
        definition: &WorkflowDefinition,
    ) -> EngineResult<()> {
        instance.status = InstanceStatus::Completed;
        instance.completed_at = Some(Utc::now());
        instance.current_activity_id = None;
        instance.output = project_output(definition, &instance.state);
        self.persist(instance).await?;
        info!(instance_id = %instance.id, "instance completed");
        Ok(())
    }

    async fn fail(
        &self,
        instance: &mut WorkflowInstance,
        fault: WorkflowFault,
    ) -> EngineResult<()> {
        instance.status = InstanceStatus::Failed;
        instance.error = Some(fault);
        instance.completed_at = Some(Utc::now());
        instance.current_activity_id = None;
        self.persist(instance).await?;
        warn!(instance_id = %instance.id, "instance failed");
        Ok(())
    }

    async fn mark_cancelled(&self, instance: &mut WorkflowInstance) -> EngineResult<()> {
        instance.status = InstanceStatus::Cancelled;
        instance.completed_at = Some(Utc::now());
        instance.current_activity_id = None;
        self.persist(instance).await?;
        info!(instance_id = %instance.id, "instance cancelled");
        Ok(())
    }

    async fn persist(&self, instance: &WorkflowInstance) -> EngineResult<()> {
        self.instances.update(instance).await?;
        Ok(())
    }

    async fn load_instance(&self, instance_id: &str) -> EngineResult<WorkflowInstance> {
        self.instances
            .get(instance_id)
            .await?
            .ok_or_else(|| EngineError::InstanceNotFound(instance_id.to_string()))
    }

    async fn load_definition(
        &self,
        instance: &WorkflowInstance,
    ) -> EngineResult<WorkflowDefinition> {
        self.definitions
            .get(&instance.workflow_name, Some(instance.workflow_version))
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound(instance.id.clone()))
    }
}

/// Final workflow output: the subset of state named by the output schema,
/// or all of state when no schema is declared.
fn project_output(definition: &WorkflowDefinition, state: &JsonMap) -> JsonMap {
    match &definition.output_schema {
        Some(schema) => state
            .iter()
            .filter(|(key, _)| schema.properties.contains_key(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
        None => state.clone(),
    }
}
