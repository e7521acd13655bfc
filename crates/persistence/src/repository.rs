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

//! Repository ports.
//!
//! Every operation is expected to be wall-clock bounded; none of them hold
//! transactions open across calls (the engine never runs a handler while a
//! transaction is open).

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use flowforge_core::{ActivityExecution, InstanceStatus, WorkflowDefinition, WorkflowInstance};

use crate::error::PersistenceResult;

/// Definitions: versioned, immutable after save except `is_active`.
#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    /// `version = None` returns the active latest version.
    async fn get(&self, name: &str, version: Option<i32>)
        -> PersistenceResult<Option<WorkflowDefinition>>;

    /// All versions of a name, ascending.
    async fn get_all_versions(&self, name: &str) -> PersistenceResult<Vec<WorkflowDefinition>>;

    /// Latest version per name; inactive names included on request.
    async fn list(&self, include_inactive: bool) -> PersistenceResult<Vec<WorkflowDefinition>>;

    /// Validate, assign `version = max(existing) + 1`, deactivate prior
    /// versions atomically, and store. Returns the saved definition.
    async fn save(&self, definition: WorkflowDefinition)
        -> PersistenceResult<WorkflowDefinition>;

    /// Flip `is_active` for one version.
    async fn set_active(&self, name: &str, version: i32, active: bool) -> PersistenceResult<()>;

    /// Remove one version. Returns whether a row was removed.
    async fn delete(&self, name: &str, version: i32) -> PersistenceResult<bool>;

    /// Whether any version of the name exists.
    async fn exists(&self, name: &str) -> PersistenceResult<bool>;
}

/// Filter for instance queries; all criteria are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub workflow_name: Option<String>,
    pub status: Option<InstanceStatus>,
    pub correlation_id: Option<String>,
    /// Exact tag match `(key, value)`
    pub tag: Option<(String, String)>,
}

/// Sort order for instance queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InstanceSort {
    #[default]
    CreatedAtDesc,
    CreatedAtAsc,
    UpdatedAtDesc,
}

/// Offset/limit page.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// One page of query results plus the unpaged match count.
#[derive(Debug, Clone)]
pub struct InstancePage {
    pub items: Vec<WorkflowInstance>,
    pub total: usize,
}

/// Aggregate instance counts.
#[derive(Debug, Clone, Default)]
pub struct InstanceStats {
    pub total: usize,
    pub by_status: HashMap<InstanceStatus, usize>,
}

/// Instances: the mutable execution records.
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn get(&self, id: &str) -> PersistenceResult<Option<WorkflowInstance>>;

    async fn get_by_correlation(
        &self,
        correlation_id: &str,
    ) -> PersistenceResult<Vec<WorkflowInstance>>;

    async fn query(
        &self,
        filter: InstanceFilter,
        sort: InstanceSort,
        page: Page,
    ) -> PersistenceResult<InstancePage>;

    async fn get_by_status(
        &self,
        status: InstanceStatus,
        limit: usize,
    ) -> PersistenceResult<Vec<WorkflowInstance>>;

    /// Insert a fresh instance; duplicate ids are a conflict.
    async fn create(&self, instance: &WorkflowInstance) -> PersistenceResult<()>;

    /// Overwrite an existing instance, stamping `updated_at`.
    async fn update(&self, instance: &WorkflowInstance) -> PersistenceResult<()>;

    /// Remove an instance. Returns whether a row was removed.
    async fn delete(&self, id: &str) -> PersistenceResult<bool>;

    /// Running instances whose `updated_at` is older than `now - older_than`.
    async fn get_timed_out(&self, older_than: Duration)
        -> PersistenceResult<Vec<WorkflowInstance>>;

    async fn stats(&self) -> PersistenceResult<InstanceStats>;
}

/// Activity-execution history: append-only, one row per attempt.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// All rows for an instance, ordered by `started_at` ascending.
    async fn get_by_instance(
        &self,
        instance_id: &str,
    ) -> PersistenceResult<Vec<ActivityExecution>>;

    async fn get(&self, id: &str) -> PersistenceResult<Option<ActivityExecution>>;

    async fn create(&self, execution: &ActivityExecution) -> PersistenceResult<()>;

    /// Update a row in place (used to finish the attempt it records).
    async fn update(&self, execution: &ActivityExecution) -> PersistenceResult<()>;

    /// The highest-attempt row for `(instance, activity)`.
    async fn get_latest(
        &self,
        instance_id: &str,
        activity_id: &str,
    ) -> PersistenceResult<Option<ActivityExecution>>;
}
