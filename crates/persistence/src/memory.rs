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

//! In-memory repositories (testing and single-process deployments).
//!
//! Semantics match the Postgres backend, including version assignment and
//! atomic deactivation on save.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use flowforge_core::{ActivityExecution, InstanceStatus, WorkflowDefinition, WorkflowInstance};

use crate::error::{PersistenceError, PersistenceResult};
use crate::repository::{
    DefinitionRepository, ExecutionRepository, InstanceFilter, InstancePage, InstanceRepository,
    InstanceSort, InstanceStats, Page,
};

/// Definitions keyed by name, each holding its version list.
#[derive(Clone, Default)]
pub struct InMemoryDefinitionRepository {
    // name -> versions ascending
    definitions: Arc<RwLock<HashMap<String, Vec<WorkflowDefinition>>>>,
}

impl InMemoryDefinitionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionRepository for InMemoryDefinitionRepository {
    async fn get(
        &self,
        name: &str,
        version: Option<i32>,
    ) -> PersistenceResult<Option<WorkflowDefinition>> {
        let definitions = self.definitions.read().await;
        let Some(versions) = definitions.get(name) else {
            return Ok(None);
        };
        let found = match version {
            Some(version) => versions.iter().find(|d| d.version == version),
            None => versions.iter().rev().find(|d| d.is_active),
        };
        Ok(found.cloned())
    }

    async fn get_all_versions(&self, name: &str) -> PersistenceResult<Vec<WorkflowDefinition>> {
        let definitions = self.definitions.read().await;
        Ok(definitions.get(name).cloned().unwrap_or_default())
    }

    async fn list(&self, include_inactive: bool) -> PersistenceResult<Vec<WorkflowDefinition>> {
        let definitions = self.definitions.read().await;
        let mut result: Vec<WorkflowDefinition> = definitions
            .values()
            .filter_map(|versions| versions.last())
            .filter(|d| include_inactive || d.is_active)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(result)
    }

    async fn save(
        &self,
        mut definition: WorkflowDefinition,
    ) -> PersistenceResult<WorkflowDefinition> {
        definition.validate()?;

        let mut definitions = self.definitions.write().await;
        let versions = definitions.entry(definition.name.clone()).or_default();

        let next_version = versions.iter().map(|d| d.version).max().unwrap_or(0) + 1;
        for prior in versions.iter_mut() {
            prior.is_active = false;
            prior.updated_at = Utc::now();
        }

        definition.version = next_version;
        definition.is_active = true;
        definition.created_at = Utc::now();
        definition.updated_at = definition.created_at;
        versions.push(definition.clone());
        Ok(definition)
    }

    async fn set_active(&self, name: &str, version: i32, active: bool) -> PersistenceResult<()> {
        let mut definitions = self.definitions.write().await;
        let versions = definitions
            .get_mut(name)
            .ok_or_else(|| PersistenceError::NotFound(format!("definition '{}'", name)))?;
        let definition = versions
            .iter_mut()
            .find(|d| d.version == version)
            .ok_or_else(|| {
                PersistenceError::NotFound(format!("definition '{}' v{}", name, version))
            })?;
        definition.is_active = active;
        definition.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, name: &str, version: i32) -> PersistenceResult<bool> {
        let mut definitions = self.definitions.write().await;
        let Some(versions) = definitions.get_mut(name) else {
            return Ok(false);
        };
        let before = versions.len();
        versions.retain(|d| d.version != version);
        let removed = versions.len() < before;
        if versions.is_empty() {
            definitions.remove(name);
        }
        Ok(removed)
    }

    async fn exists(&self, name: &str) -> PersistenceResult<bool> {
        let definitions = self.definitions.read().await;
        Ok(definitions.contains_key(name))
    }
}

/// Instances keyed by id.
#[derive(Clone, Default)]
pub struct InMemoryInstanceRepository {
    instances: Arc<RwLock<HashMap<String, WorkflowInstance>>>,
}

impl InMemoryInstanceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(filter: &InstanceFilter, instance: &WorkflowInstance) -> bool {
        if let Some(name) = &filter.workflow_name {
            if &instance.workflow_name != name {
                return false;
            }
        }
        if let Some(status) = filter.status {
            if instance.status != status {
                return false;
            }
        }
        if let Some(correlation) = &filter.correlation_id {
            if instance.correlation_id.as_ref() != Some(correlation) {
                return false;
            }
        }
        if let Some((key, value)) = &filter.tag {
            if instance.tags.get(key) != Some(value) {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn get(&self, id: &str) -> PersistenceResult<Option<WorkflowInstance>> {
        Ok(self.instances.read().await.get(id).cloned())
    }

    async fn get_by_correlation(
        &self,
        correlation_id: &str,
    ) -> PersistenceResult<Vec<WorkflowInstance>> {
        let instances = self.instances.read().await;
        let mut result: Vec<WorkflowInstance> = instances
            .values()
            .filter(|i| i.correlation_id.as_deref() == Some(correlation_id))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }

    async fn query(
        &self,
        filter: InstanceFilter,
        sort: InstanceSort,
        page: Page,
    ) -> PersistenceResult<InstancePage> {
        let instances = self.instances.read().await;
        let mut matched: Vec<WorkflowInstance> = instances
            .values()
            .filter(|i| Self::matches(&filter, i))
            .cloned()
            .collect();

        match sort {
            InstanceSort::CreatedAtAsc => matched.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            InstanceSort::CreatedAtDesc => matched.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            InstanceSort::UpdatedAtDesc => matched.sort_by(|a, b| b.updated_at.cmp(&a.updated_at)),
        }

        let total = matched.len();
        let items = matched
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .collect();
        Ok(InstancePage { items, total })
    }

    async fn get_by_status(
        &self,
        status: InstanceStatus,
        limit: usize,
    ) -> PersistenceResult<Vec<WorkflowInstance>> {
        let instances = self.instances.read().await;
        let mut matched: Vec<WorkflowInstance> = instances
            .values()
            .filter(|i| i.status == status)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matched.truncate(limit);
        Ok(matched)
    }

    async fn create(&self, instance: &WorkflowInstance) -> PersistenceResult<()> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(PersistenceError::Conflict(format!(
                "instance '{}' already exists",
                instance.id
            )));
        }
        instances.insert(instance.id.clone(), instance.clone());
        Ok(())
    }

    async fn update(&self, instance: &WorkflowInstance) -> PersistenceResult<()> {
        let mut instances = self.instances.write().await;
        if !instances.contains_key(&instance.id) {
            return Err(PersistenceError::NotFound(format!(
                "instance '{}'",
                instance.id
            )));
        }
        let mut updated = instance.clone();
        updated.updated_at = Utc::now();
        instances.insert(updated.id.clone(), updated);
        Ok(())
    }

    async fn delete(&self, id: &str) -> PersistenceResult<bool> {
        Ok(self.instances.write().await.remove(id).is_some())
    }

    async fn get_timed_out(
        &self,
        older_than: Duration,
    ) -> PersistenceResult<Vec<WorkflowInstance>> {
        let cutoff = Utc::now() - chrono::Duration::milliseconds(older_than.as_millis() as i64);
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|i| i.status == InstanceStatus::Running && i.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn stats(&self) -> PersistenceResult<InstanceStats> {
        let instances = self.instances.read().await;
        let mut stats = InstanceStats {
            total: instances.len(),
            ..Default::default()
        };
        for instance in instances.values() {
            *stats.by_status.entry(instance.status).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

/// Execution history keyed by row id, indexed per instance.
#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    executions: Arc<RwLock<HashMap<String, ActivityExecution>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn get_by_instance(
        &self,
        instance_id: &str,
    ) -> PersistenceResult<Vec<ActivityExecution>> {
        let executions = self.executions.read().await;
        let mut result: Vec<ActivityExecution> = executions
            .values()
            .filter(|e| e.workflow_instance_id == instance_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.attempt.cmp(&b.attempt))
        });
        Ok(result)
    }

    async fn get(&self, id: &str) -> PersistenceResult<Option<ActivityExecution>> {
        Ok(self.executions.read().await.get(id).cloned())
    }

    async fn create(&self, execution: &ActivityExecution) -> PersistenceResult<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(PersistenceError::Conflict(format!(
                "execution '{}' already exists",
                execution.id
            )));
        }
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn update(&self, execution: &ActivityExecution) -> PersistenceResult<()> {
        let mut executions = self.executions.write().await;
        if !executions.contains_key(&execution.id) {
            return Err(PersistenceError::NotFound(format!(
                "execution '{}'",
                execution.id
            )));
        }
        executions.insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_latest(
        &self,
        instance_id: &str,
        activity_id: &str,
    ) -> PersistenceResult<Option<ActivityExecution>> {
        let executions = self.executions.read().await;
        Ok(executions
            .values()
            .filter(|e| e.workflow_instance_id == instance_id && e.activity_id == activity_id)
            .max_by_key(|e| e.attempt)
            .cloned())
    }
}
