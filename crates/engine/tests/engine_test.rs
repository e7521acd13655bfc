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

//! End-to-end engine tests: linear runs, branching, retries, suspension,
//! timeouts, and per-instance mutual exclusion.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use flowforge_core::{
    ActivityDefinition, ActivityStatus, EngineConfig, InstanceStatus, JsonMap, RetryPolicy,
    TransitionDefinition, WorkflowDefinition,
};
use flowforge_engine::{EngineError, StartRequest, WorkflowEngine};
use flowforge_locks::{LockManager, MemoryLockBackend};
use flowforge_persistence::{
    DefinitionRepository, ExecutionRepository, InMemoryDefinitionRepository,
    InMemoryExecutionRepository, InMemoryInstanceRepository, InstanceRepository,
};
use flowforge_registry::{
    ActivityContext, ActivityFault, ActivityHandler, ActivityOutcome, ActivityRegistry, BoxError,
};

struct LogHandler;

#[async_trait]
impl ActivityHandler for LogHandler {
    async fn execute(&self, ctx: ActivityContext) -> Result<ActivityOutcome, BoxError> {
        let message = ctx
            .property("message")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        tracing::info!(activity = %ctx.definition.id, message, "log activity");
        Ok(ActivityOutcome::ok(JsonMap::new()))
    }
}

struct ConditionHandler;

#[async_trait]
impl ActivityHandler for ConditionHandler {
    async fn execute(&self, _ctx: ActivityContext) -> Result<ActivityOutcome, BoxError> {
        Ok(ActivityOutcome::ok(JsonMap::new()))
    }
}

/// Fails with a retriable fault until the configured attempt succeeds.
struct FlakyHandler {
    succeed_on_attempt: u32,
}

#[async_trait]
impl ActivityHandler for FlakyHandler {
    async fn execute(&self, ctx: ActivityContext) -> Result<ActivityOutcome, BoxError> {
        if ctx.attempt < self.succeed_on_attempt {
            Ok(ActivityOutcome::fail(ActivityFault::retriable(
                "X",
                format!("flaky failure on attempt {}", ctx.attempt),
            )))
        } else {
            let mut output = JsonMap::new();
            output.insert("succeededOnAttempt".to_string(), json!(ctx.attempt));
            Ok(ActivityOutcome::ok(output))
        }
    }
}

struct WaitForSignalHandler;

#[async_trait]
impl ActivityHandler for WaitForSignalHandler {
    async fn execute(&self, ctx: ActivityContext) -> Result<ActivityOutcome, BoxError> {
        let signal = ctx
            .property("signal")
            .and_then(|v| v.as_str())
            .unwrap_or("signal")
            .to_string();
        Ok(ActivityOutcome::suspend(signal))
    }
}

/// Sleeps for a configured duration, honoring cancellation.
struct SleepHandler {
    duration: Duration,
}

#[async_trait]
impl ActivityHandler for SleepHandler {
    async fn execute(&self, ctx: ActivityContext) -> Result<ActivityOutcome, BoxError> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err("cancelled".to_string().into()),
            _ = tokio::time::sleep(self.duration) => Ok(ActivityOutcome::ok(JsonMap::new())),
        }
    }
}

struct Fixture {
    definitions: Arc<InMemoryDefinitionRepository>,
    instances: Arc<InMemoryInstanceRepository>,
    executions: Arc<InMemoryExecutionRepository>,
    lock_backend: Arc<MemoryLockBackend>,
    engine: WorkflowEngine,
}

fn fixture_with_config(config: EngineConfig) -> Fixture {
    let definitions = Arc::new(InMemoryDefinitionRepository::new());
    let instances = Arc::new(InMemoryInstanceRepository::new());
    let executions = Arc::new(InMemoryExecutionRepository::new());
    let lock_backend = Arc::new(MemoryLockBackend::new());

    let mut registry = ActivityRegistry::new();
    registry.register("log", Arc::new(LogHandler));
    registry.register("condition", Arc::new(ConditionHandler));
    registry.register("flaky", Arc::new(FlakyHandler { succeed_on_attempt: 3 }));
    registry.register("waitForSignal", Arc::new(WaitForSignalHandler));
    registry.register(
        "slowTask",
        Arc::new(SleepHandler {
            duration: Duration::from_millis(500),
        }),
    );
    registry.register(
        "shortTask",
        Arc::new(SleepHandler {
            duration: Duration::from_millis(100),
        }),
    );

    let engine = WorkflowEngine::new(
        definitions.clone(),
        instances.clone(),
        executions.clone(),
        Arc::new(registry),
        LockManager::new(lock_backend.clone(), "test:"),
        config,
    );

    Fixture {
        definitions,
        instances,
        executions,
        lock_backend,
        engine,
    }
}

fn fixture() -> Fixture {
    fixture_with_config(EngineConfig {
        lock_timeout: Duration::from_secs(5),
        ..Default::default()
    })
}

fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(1),
        backoff_multiplier: 2.0,
        ..Default::default()
    }
}

async fn save(fixture: &Fixture, definition: WorkflowDefinition) -> WorkflowDefinition {
    fixture.definitions.save(definition).await.unwrap()
}

#[tokio::test]
async fn test_linear_workflow_completes() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("hello", "a");
    let mut log = ActivityDefinition::new("a", "log");
    log.properties.insert("message".to_string(), json!("hi"));
    def.activities = vec![log];
    save(&fx, def).await;

    let instance = fx
        .engine
        .start(StartRequest::new("hello", JsonMap::new()))
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::Pending);
    assert_eq!(instance.current_activity_id.as_deref(), Some("a"));

    let cancel = CancellationToken::new();
    let done = fx.engine.execute(&instance.id, &cancel).await.unwrap();

    assert_eq!(done.status, InstanceStatus::Completed);
    assert!(done.completed_at.is_some());
    assert!(done.started_at.is_some());
    assert!(done.current_activity_id.is_none());
    assert!(done.output.is_empty());
    assert!(done.state.is_empty());

    let history = fx.executions.get_by_instance(&instance.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].activity_id, "a");
    assert_eq!(history[0].attempt, 1);
    assert_eq!(history[0].status, ActivityStatus::Completed);
}

#[tokio::test]
async fn test_branch_on_input() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("branch", "check");
    def.activities = vec![
        ActivityDefinition::new("check", "condition"),
        ActivityDefinition::new("high", "log"),
        ActivityDefinition::new("low", "log"),
    ];
    def.transitions = vec![
        TransitionDefinition {
            priority: 10,
            ..TransitionDefinition::when("check", "high", "input.n > 10")
        },
        TransitionDefinition::fallback("check", "low"),
    ];
    save(&fx, def).await;

    let cancel = CancellationToken::new();

    // n = 5 -> default path: check, low
    let mut input = JsonMap::new();
    input.insert("n".to_string(), json!(5));
    let low = fx.engine.start(StartRequest::new("branch", input)).await.unwrap();
    let low = fx.engine.execute(&low.id, &cancel).await.unwrap();
    assert_eq!(low.status, InstanceStatus::Completed);
    let path: Vec<String> = fx
        .executions
        .get_by_instance(&low.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.activity_id)
        .collect();
    assert_eq!(path, vec!["check", "low"]);

    // n = 42 -> guarded path: check, high
    let mut input = JsonMap::new();
    input.insert("n".to_string(), json!(42));
    let high = fx.engine.start(StartRequest::new("branch", input)).await.unwrap();
    let high = fx.engine.execute(&high.id, &cancel).await.unwrap();
    assert_eq!(high.status, InstanceStatus::Completed);
    let path: Vec<String> = fx
        .executions
        .get_by_instance(&high.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.activity_id)
        .collect();
    assert_eq!(path, vec!["check", "high"]);
}

#[tokio::test]
async fn test_retry_then_succeed() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("retrying", "flaky");
    let mut flaky = ActivityDefinition::new("flaky", "flaky");
    flaky.retry_policy = Some(fast_retry_policy());
    def.activities = vec![flaky];
    save(&fx, def).await;

    let cancel = CancellationToken::new();
    let instance = fx
        .engine
        .start(StartRequest::new("retrying", JsonMap::new()))
        .await
        .unwrap();
    let done = fx.engine.execute(&instance.id, &cancel).await.unwrap();

    assert_eq!(done.status, InstanceStatus::Completed);
    assert_eq!(done.retry_count, 0);

    let history = fx.executions.get_by_instance(&instance.id).await.unwrap();
    assert_eq!(history.len(), 3);
    // Attempts are strictly monotonic from 1 and totally ordered in time.
    for (index, row) in history.iter().enumerate() {
        assert_eq!(row.attempt as usize, index + 1);
        assert!(row.completed_at.is_some());
        let duration = row.duration_ms.unwrap();
        let span = (row.completed_at.unwrap() - row.started_at).num_milliseconds();
        assert_eq!(duration, span);
    }
    assert!(history.windows(2).all(|w| w[0].started_at <= w[1].started_at));
    assert_eq!(history[0].status, ActivityStatus::Failed);
    assert_eq!(history[1].status, ActivityStatus::Failed);
    assert_eq!(history[2].status, ActivityStatus::Completed);
    // Retry budget: failed attempts stay within max_attempts - 1.
    let failed = history
        .iter()
        .filter(|e| e.status == ActivityStatus::Failed)
        .count();
    assert!(failed <= 2);
}

#[tokio::test]
async fn test_retry_budget_exhausted_fails_instance() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("doomed", "flaky");
    let mut flaky = ActivityDefinition::new("flaky", "flaky");
    flaky.retry_policy = Some(RetryPolicy {
        max_attempts: 2,
        initial_delay: Duration::from_millis(5),
        ..fast_retry_policy()
    });
    def.activities = vec![flaky];
    save(&fx, def).await;

    let cancel = CancellationToken::new();
    let instance = fx
        .engine
        .start(StartRequest::new("doomed", JsonMap::new()))
        .await
        .unwrap();
    let done = fx.engine.execute(&instance.id, &cancel).await.unwrap();

    assert_eq!(done.status, InstanceStatus::Failed);
    let fault = done.error.unwrap();
    assert_eq!(fault.code, "X");
    assert_eq!(fault.activity_id.as_deref(), Some("flaky"));
    assert!(done.completed_at.is_some());
    assert!(done.current_activity_id.is_none());

    let history = fx.executions.get_by_instance(&instance.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|e| e.status == ActivityStatus::Failed));
}

#[tokio::test]
async fn test_suspend_and_resume() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("approval", "wait");
    let mut wait = ActivityDefinition::new("wait", "waitForSignal");
    wait.properties.insert("signal".to_string(), json!("approve"));
    def.activities = vec![wait, ActivityDefinition::new("done", "log")];
    def.transitions = vec![TransitionDefinition::new("wait", "done")];
    save(&fx, def).await;

    let cancel = CancellationToken::new();
    let instance = fx
        .engine
        .start(StartRequest::new("approval", JsonMap::new()))
        .await
        .unwrap();
    let suspended = fx.engine.execute(&instance.id, &cancel).await.unwrap();

    assert_eq!(suspended.status, InstanceStatus::Suspended);
    assert_eq!(suspended.suspend_key(), Some("approve"));
    // The suspended activity is still "current".
    assert_eq!(suspended.current_activity_id.as_deref(), Some("wait"));

    // Wrong signal name: SIGNAL_MISMATCH, state untouched.
    let err = fx
        .engine
        .resume_with_signal(&instance.id, "nope", None, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SIGNAL_MISMATCH");
    let unchanged = fx.instances.get(&instance.id).await.unwrap().unwrap();
    assert_eq!(unchanged.status, InstanceStatus::Suspended);
    assert_eq!(unchanged.suspend_key(), Some("approve"));

    // Matching signal with payload: signal_<k> entries land in state.
    let mut data = JsonMap::new();
    data.insert("ok".to_string(), json!(true));
    let done = fx
        .engine
        .resume_with_signal(&instance.id, "approve", Some(data), &cancel)
        .await
        .unwrap();

    assert_eq!(done.status, InstanceStatus::Completed);
    assert_eq!(done.state.get("signal_ok"), Some(&json!(true)));
    assert!(done.state.get("_suspend_key").is_none());

    // Resuming a non-suspended instance is NOT_SUSPENDED.
    let err = fx
        .engine
        .resume_with_signal(&instance.id, "approve", None, &cancel)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_SUSPENDED");
}

#[tokio::test]
async fn test_activity_timeout_fails_with_timeout_code() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("slow", "nap");
    let mut nap = ActivityDefinition::new("nap", "slowTask");
    nap.timeout = Some(Duration::from_millis(50));
    nap.retry_policy = Some(fast_retry_policy());
    def.activities = vec![nap];
    save(&fx, def).await;

    let cancel = CancellationToken::new();
    let instance = fx
        .engine
        .start(StartRequest::new("slow", JsonMap::new()))
        .await
        .unwrap();
    let done = fx.engine.execute(&instance.id, &cancel).await.unwrap();

    assert_eq!(done.status, InstanceStatus::Failed);
    assert_eq!(done.error.as_ref().unwrap().code, "TIMEOUT");

    let history = fx.executions.get_by_instance(&instance.id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|e| e.status == ActivityStatus::Failed));
    assert_eq!(history[0].error.as_ref().unwrap().code, "TIMEOUT");
}

#[tokio::test]
async fn test_skip_condition_records_skipped_row() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("skippy", "first");
    let mut first = ActivityDefinition::new("first", "log");
    first.condition = Some("input.enabled == true".to_string());
    def.activities = vec![first, ActivityDefinition::new("second", "log")];
    def.transitions = vec![TransitionDefinition::new("first", "second")];
    save(&fx, def).await;

    let cancel = CancellationToken::new();
    let mut input = JsonMap::new();
    input.insert("enabled".to_string(), json!(false));
    let instance = fx.engine.start(StartRequest::new("skippy", input)).await.unwrap();
    let done = fx.engine.execute(&instance.id, &cancel).await.unwrap();

    assert_eq!(done.status, InstanceStatus::Completed);
    let history = fx.executions.get_by_instance(&instance.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].activity_id, "first");
    assert_eq!(history[0].status, ActivityStatus::Skipped);
    assert_eq!(history[1].activity_id, "second");
    assert_eq!(history[1].status, ActivityStatus::Completed);
}

#[tokio::test]
async fn test_input_validation() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("strict", "a");
    def.activities = vec![ActivityDefinition::new("a", "log")];
    let mut schema = flowforge_core::DataSchema::default();
    schema.required = vec!["n".to_string()];
    schema.properties.insert(
        "n".to_string(),
        flowforge_core::FieldSchema {
            field_type: Some(flowforge_core::FieldType::Integer),
        },
    );
    def.input_schema = Some(schema);
    save(&fx, def).await;

    let err = fx
        .engine
        .start(StartRequest::new("strict", JsonMap::new()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    let mut input = JsonMap::new();
    input.insert("n".to_string(), json!("not-an-int"));
    let err = fx
        .engine
        .start(StartRequest::new("strict", input))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_INPUT");

    let mut input = JsonMap::new();
    input.insert("n".to_string(), json!(7));
    assert!(fx.engine.start(StartRequest::new("strict", input)).await.is_ok());
}

#[tokio::test]
async fn test_start_errors() {
    let fx = fixture();
    let err = fx
        .engine
        .start(StartRequest::new("ghost", JsonMap::new()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "WORKFLOW_NOT_FOUND");

    let mut def = WorkflowDefinition::new("dormant", "a");
    def.activities = vec![ActivityDefinition::new("a", "log")];
    let saved = save(&fx, def).await;
    fx.definitions
        .set_active("dormant", saved.version, false)
        .await
        .unwrap();

    let err = fx
        .engine
        .start(StartRequest::new("dormant", JsonMap::new()))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "WORKFLOW_INACTIVE");
}

#[tokio::test]
async fn test_unknown_activity_type_fails_instance() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("mystery", "a");
    def.activities = vec![ActivityDefinition::new("a", "noSuchHandler")];
    save(&fx, def).await;

    let cancel = CancellationToken::new();
    let instance = fx
        .engine
        .start(StartRequest::new("mystery", JsonMap::new()))
        .await
        .unwrap();
    let done = fx.engine.execute(&instance.id, &cancel).await.unwrap();

    assert_eq!(done.status, InstanceStatus::Failed);
    assert_eq!(done.error.unwrap().code, "UNKNOWN_ACTIVITY_TYPE");
}

#[tokio::test]
async fn test_execute_terminal_is_noop() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("oneshot", "a");
    def.activities = vec![ActivityDefinition::new("a", "log")];
    save(&fx, def).await;

    let cancel = CancellationToken::new();
    let instance = fx
        .engine
        .start(StartRequest::new("oneshot", JsonMap::new()))
        .await
        .unwrap();
    let first = fx.engine.execute(&instance.id, &cancel).await.unwrap();
    assert_eq!(first.status, InstanceStatus::Completed);

    let again = fx.engine.execute(&instance.id, &cancel).await.unwrap();
    assert_eq!(again.status, InstanceStatus::Completed);
    assert_eq!(again.completed_at, first.completed_at);

    // History did not grow.
    let history = fx.executions.get_by_instance(&instance.id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_cancel_terminal_is_noop_and_cancel_pending_terminates() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("cancellable", "a");
    def.activities = vec![ActivityDefinition::new("a", "log")];
    save(&fx, def).await;

    let instance = fx
        .engine
        .start(StartRequest::new("cancellable", JsonMap::new()))
        .await
        .unwrap();

    let cancelled = fx.engine.cancel(&instance.id).await.unwrap();
    assert_eq!(cancelled.status, InstanceStatus::Cancelled);
    assert!(cancelled.completed_at.is_some());
    assert!(cancelled.current_activity_id.is_none());

    let again = fx.engine.cancel(&instance.id).await.unwrap();
    assert_eq!(again.status, InstanceStatus::Cancelled);
    assert_eq!(again.completed_at, cancelled.completed_at);

    // Executing a cancelled instance is a no-op too.
    let cancel = CancellationToken::new();
    let unchanged = fx.engine.execute(&instance.id, &cancel).await.unwrap();
    assert_eq!(unchanged.status, InstanceStatus::Cancelled);
}

#[tokio::test]
async fn test_output_mappings_flow_into_state_and_projection() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("mapped", "flaky");
    let mut flaky = ActivityDefinition::new("flaky", "flaky");
    flaky.retry_policy = Some(fast_retry_policy());
    flaky
        .output_mappings
        .insert("attempts".to_string(), "succeededOnAttempt".to_string());
    def.activities = vec![flaky];

    let mut schema = flowforge_core::DataSchema::default();
    schema
        .properties
        .insert("attempts".to_string(), flowforge_core::FieldSchema::default());
    def.output_schema = Some(schema);
    save(&fx, def).await;

    let cancel = CancellationToken::new();
    let instance = fx
        .engine
        .start(StartRequest::new("mapped", JsonMap::new()))
        .await
        .unwrap();
    let done = fx.engine.execute(&instance.id, &cancel).await.unwrap();

    assert_eq!(done.status, InstanceStatus::Completed);
    assert_eq!(done.state.get("attempts"), Some(&json!(3)));
    assert_eq!(done.output.get("attempts"), Some(&json!(3)));
    assert_eq!(done.output.len(), 1);
}

#[tokio::test]
async fn test_concurrent_execute_mutual_exclusion() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("exclusive", "nap");
    def.activities = vec![ActivityDefinition::new("nap", "shortTask")];
    save(&fx, def).await;

    let instance = fx
        .engine
        .start(StartRequest::new("exclusive", JsonMap::new()))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let first = fx.engine.clone();
    let second = fx.engine.clone();
    let id_a = instance.id.clone();
    let id_b = instance.id.clone();
    let cancel_a = cancel.clone();
    let cancel_b = cancel.clone();

    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.execute(&id_a, &cancel_a).await }),
        tokio::spawn(async move { second.execute(&id_b, &cancel_b).await }),
    );
    let a = a.unwrap().unwrap();
    let b = b.unwrap().unwrap();

    assert_eq!(a.status, InstanceStatus::Completed);
    assert_eq!(b.status, InstanceStatus::Completed);

    // Exactly one call advanced the instance: a single execution row.
    let history = fx.executions.get_by_instance(&instance.id).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_lock_failed_with_small_wait_budget() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("contended", "nap");
    def.activities = vec![ActivityDefinition::new("nap", "slowTask")];
    save(&fx, def).await;

    let instance = fx
        .engine
        .start(StartRequest::new("contended", JsonMap::new()))
        .await
        .unwrap();

    // A second engine over the same backends but with a tiny lock budget.
    let mut registry = ActivityRegistry::new();
    registry.register(
        "slowTask",
        Arc::new(SleepHandler {
            duration: Duration::from_millis(500),
        }),
    );
    let impatient = WorkflowEngine::new(
        fx.definitions.clone(),
        fx.instances.clone(),
        fx.executions.clone(),
        Arc::new(registry),
        LockManager::new(fx.lock_backend.clone(), "test:"),
        EngineConfig {
            lock_timeout: Duration::from_millis(80),
            ..Default::default()
        },
    );

    let cancel = CancellationToken::new();
    let holder = fx.engine.clone();
    let id = instance.id.clone();
    let holder_cancel = cancel.clone();
    let running = tokio::spawn(async move { holder.execute(&id, &holder_cancel).await });

    // Give the holder time to take the lock and enter the handler.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let err = impatient.execute(&instance.id, &cancel).await.unwrap_err();
    assert!(matches!(err, EngineError::LockFailed(_)));
    assert_eq!(err.code(), "LOCK_FAILED");

    let done = running.await.unwrap().unwrap();
    assert_eq!(done.status, InstanceStatus::Completed);
}

#[tokio::test]
async fn test_cancellation_during_activity() {
    let fx = fixture();
    let mut def = WorkflowDefinition::new("abortable", "nap");
    def.activities = vec![ActivityDefinition::new("nap", "slowTask")];
    save(&fx, def).await;

    let instance = fx
        .engine
        .start(StartRequest::new("abortable", JsonMap::new()))
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let engine = fx.engine.clone();
    let id = instance.id.clone();
    let token = cancel.clone();
    let running = tokio::spawn(async move { engine.execute(&id, &token).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let result = running.await.unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled)));

    let stored = fx.instances.get(&instance.id).await.unwrap().unwrap();
    assert_eq!(stored.status, InstanceStatus::Cancelled);
    assert!(stored.completed_at.is_some());
    assert!(stored.current_activity_id.is_none());

    let history = fx.executions.get_by_instance(&instance.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, ActivityStatus::Cancelled);
}

#[tokio::test]
async fn test_handler_override_of_next_activity() {
    struct JumpHandler;

    #[async_trait]
    impl ActivityHandler for JumpHandler {
        async fn execute(&self, _ctx: ActivityContext) -> Result<ActivityOutcome, BoxError> {
            Ok(ActivityOutcome::ok_with_next(JsonMap::new(), "finish"))
        }
    }

    let fx = fixture();
    let definitions = fx.definitions.clone();
    let mut registry = ActivityRegistry::new();
    registry.register("jump", Arc::new(JumpHandler));
    registry.register("log", Arc::new(LogHandler));
    let engine = WorkflowEngine::new(
        definitions.clone(),
        fx.instances.clone(),
        fx.executions.clone(),
        Arc::new(registry),
        LockManager::new(fx.lock_backend.clone(), "test:"),
        EngineConfig::default(),
    );

    let mut def = WorkflowDefinition::new("jumpy", "start");
    def.activities = vec![
        ActivityDefinition::new("start", "jump"),
        ActivityDefinition::new("detour", "log"),
        ActivityDefinition::new("finish", "log"),
    ];
    // Transition points at the detour; the handler overrides it.
    def.transitions = vec![TransitionDefinition::new("start", "detour")];
    definitions.save(def).await.unwrap();

    let cancel = CancellationToken::new();
    let instance = engine
        .start(StartRequest::new("jumpy", JsonMap::new()))
        .await
        .unwrap();
    let done = engine.execute(&instance.id, &cancel).await.unwrap();

    assert_eq!(done.status, InstanceStatus::Completed);
    let path: Vec<String> = fx
        .executions
        .get_by_instance(&instance.id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.activity_id)
        .collect();
    assert_eq!(path, vec!["start", "finish"]);
}
