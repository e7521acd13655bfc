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

//! PostgreSQL repositories (sqlx).
//!
//! ## Layout
//! Each aggregate stores its full camelCase JSON document in a JSONB column
//! next to the columns queries filter on (status ordinals, names,
//! timestamps). `ensure_schema` creates the tables idempotently.
//!
//! ## Transactions
//! Only `save` (version assignment + deactivation) and `set_active` open a
//! transaction; every other operation is a single short statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::time::Duration;

use flowforge_core::{ActivityExecution, InstanceStatus, WorkflowDefinition, WorkflowInstance};

use crate::error::{PersistenceError, PersistenceResult};
use crate::repository::{
    DefinitionRepository, ExecutionRepository, InstanceFilter, InstancePage, InstanceRepository,
    InstanceSort, InstanceStats, Page,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ff_definitions (
    name        TEXT        NOT NULL,
    version     INT         NOT NULL,
    is_active   BOOLEAN     NOT NULL,
    document    JSONB       NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (name, version)
);

CREATE TABLE IF NOT EXISTS ff_instances (
    id              TEXT        PRIMARY KEY,
    workflow_name   TEXT        NOT NULL,
    status          INT         NOT NULL,
    correlation_id  TEXT,
    document        JSONB       NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS ff_instances_status_idx
    ON ff_instances (status, updated_at);
CREATE INDEX IF NOT EXISTS ff_instances_correlation_idx
    ON ff_instances (correlation_id);

CREATE TABLE IF NOT EXISTS ff_executions (
    id          TEXT        PRIMARY KEY,
    instance_id TEXT        NOT NULL,
    activity_id TEXT        NOT NULL,
    attempt     INT         NOT NULL,
    started_at  TIMESTAMPTZ NOT NULL,
    document    JSONB       NOT NULL
);
CREATE INDEX IF NOT EXISTS ff_executions_instance_idx
    ON ff_executions (instance_id, started_at);
"#;

fn backend(e: sqlx::Error) -> PersistenceError {
    PersistenceError::Backend(e.to_string())
}

fn decode<T: serde::de::DeserializeOwned>(document: serde_json::Value) -> PersistenceResult<T> {
    serde_json::from_value(document).map_err(|e| PersistenceError::Serialization(e.to_string()))
}

fn encode<T: serde::Serialize>(value: &T) -> PersistenceResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| PersistenceError::Serialization(e.to_string()))
}

/// Shared pool implementing all three repository ports.
#[derive(Clone)]
pub struct PostgresRepositories {
    pool: PgPool,
}

impl PostgresRepositories {
    /// Connect and create the schema.
    pub async fn connect(connection_string: &str) -> PersistenceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(connection_string)
            .await
            .map_err(backend)?;
        let repos = Self { pool };
        repos.ensure_schema().await?;
        Ok(repos)
    }

    /// Wrap an existing pool (schema assumed present or created here).
    pub async fn with_pool(pool: PgPool) -> PersistenceResult<Self> {
        let repos = Self { pool };
        repos.ensure_schema().await?;
        Ok(repos)
    }

    async fn ensure_schema(&self) -> PersistenceResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl DefinitionRepository for PostgresRepositories {
    async fn get(
        &self,
        name: &str,
        version: Option<i32>,
    ) -> PersistenceResult<Option<WorkflowDefinition>> {
        let row = match version {
            Some(version) => {
                sqlx::query("SELECT document FROM ff_definitions WHERE name = $1 AND version = $2")
                    .bind(name)
                    .bind(version)
                    .fetch_optional(&self.pool)
                    .await
            }
            None => {
                sqlx::query(
                    "SELECT document FROM ff_definitions \
                     WHERE name = $1 AND is_active ORDER BY version DESC LIMIT 1",
                )
                .bind(name)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .map_err(backend)?;

        row.map(|r| decode(r.get::<serde_json::Value, _>("document")))
            .transpose()
    }

    async fn get_all_versions(&self, name: &str) -> PersistenceResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query(
            "SELECT document FROM ff_definitions WHERE name = $1 ORDER BY version ASC",
        )
        .bind(name)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter()
            .map(|r| decode(r.get::<serde_json::Value, _>("document")))
            .collect()
    }

    async fn list(&self, include_inactive: bool) -> PersistenceResult<Vec<WorkflowDefinition>> {
        let rows = sqlx::query(
            "SELECT DISTINCT ON (name) document, is_active FROM ff_definitions \
             ORDER BY name, version DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            if include_inactive || row.get::<bool, _>("is_active") {
                result.push(decode(row.get::<serde_json::Value, _>("document"))?);
            }
        }
        Ok(result)
    }

    async fn save(
        &self,
        mut definition: WorkflowDefinition,
    ) -> PersistenceResult<WorkflowDefinition> {
        definition.validate()?;

        let mut tx = self.pool.begin().await.map_err(backend)?;

        let max_version: Option<i32> = sqlx::query(
            "SELECT MAX(version) AS max_version FROM ff_definitions WHERE name = $1",
        )
        .bind(&definition.name)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?
        .get("max_version");

        sqlx::query(
            "UPDATE ff_definitions \
             SET is_active = FALSE, document = jsonb_set(document, '{isActive}', 'false') \
             WHERE name = $1 AND is_active",
        )
        .bind(&definition.name)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        definition.version = max_version.unwrap_or(0) + 1;
        definition.is_active = true;
        definition.created_at = Utc::now();
        definition.updated_at = definition.created_at;

        sqlx::query(
            "INSERT INTO ff_definitions (name, version, is_active, document, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&definition.name)
        .bind(definition.version)
        .bind(definition.is_active)
        .bind(encode(&definition)?)
        .bind(definition.created_at)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(definition)
    }

    async fn set_active(&self, name: &str, version: i32, active: bool) -> PersistenceResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let row = sqlx::query(
            "SELECT document FROM ff_definitions WHERE name = $1 AND version = $2 FOR UPDATE",
        )
        .bind(name)
        .bind(version)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?
        .ok_or_else(|| PersistenceError::NotFound(format!("definition '{}' v{}", name, version)))?;

        let mut definition: WorkflowDefinition =
            decode(row.get::<serde_json::Value, _>("document"))?;
        definition.is_active = active;
        definition.updated_at = Utc::now();

        sqlx::query(
            "UPDATE ff_definitions SET is_active = $3, document = $4 \
             WHERE name = $1 AND version = $2",
        )
        .bind(name)
        .bind(version)
        .bind(active)
        .bind(encode(&definition)?)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn delete(&self, name: &str, version: i32) -> PersistenceResult<bool> {
        let result = sqlx::query("DELETE FROM ff_definitions WHERE name = $1 AND version = $2")
            .bind(name)
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, name: &str) -> PersistenceResult<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM ff_definitions WHERE name = $1 LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl InstanceRepository for PostgresRepositories {
    async fn get(&self, id: &str) -> PersistenceResult<Option<WorkflowInstance>> {
        let row = sqlx::query("SELECT document FROM ff_instances WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| decode(r.get::<serde_json::Value, _>("document")))
            .transpose()
    }

    async fn get_by_correlation(
        &self,
        correlation_id: &str,
    ) -> PersistenceResult<Vec<WorkflowInstance>> {
        let rows = sqlx::query(
            "SELECT document FROM ff_instances WHERE correlation_id = $1 ORDER BY created_at ASC",
        )
        .bind(correlation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter()
            .map(|r| decode(r.get::<serde_json::Value, _>("document")))
            .collect()
    }

    async fn query(
        &self,
        filter: InstanceFilter,
        sort: InstanceSort,
        page: Page,
    ) -> PersistenceResult<InstancePage> {
        let mut clauses: Vec<String> = Vec::new();
        let mut next_bind = 0usize;

        if filter.workflow_name.is_some() {
            next_bind += 1;
            clauses.push(format!("workflow_name = ${}", next_bind));
        }
        if filter.status.is_some() {
            next_bind += 1;
            clauses.push(format!("status = ${}", next_bind));
        }
        if filter.correlation_id.is_some() {
            next_bind += 1;
            clauses.push(format!("correlation_id = ${}", next_bind));
        }
        if filter.tag.is_some() {
            clauses.push(format!(
                "document->'tags'->>(${}::text) = ${}",
                next_bind + 1,
                next_bind + 2
            ));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        let order_clause = match sort {
            InstanceSort::CreatedAtAsc => "created_at ASC",
            InstanceSort::CreatedAtDesc => "created_at DESC",
            InstanceSort::UpdatedAtDesc => "updated_at DESC",
        };
        let sql = format!(
            "SELECT document, COUNT(*) OVER () AS total FROM ff_instances{} \
             ORDER BY {} OFFSET {} LIMIT {}",
            where_clause, order_clause, page.offset, page.limit
        );

        let mut query = sqlx::query(&sql);
        if let Some(name) = &filter.workflow_name {
            query = query.bind(name);
        }
        if let Some(status) = filter.status {
            query = query.bind(status.as_i32());
        }
        if let Some(correlation) = &filter.correlation_id {
            query = query.bind(correlation);
        }
        if let Some((key, value)) = &filter.tag {
            query = query.bind(key).bind(value);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(backend)?;
        let total = rows
            .first()
            .map(|r| r.get::<i64, _>("total") as usize)
            .unwrap_or(0);
        let items = rows
            .into_iter()
            .map(|r| decode(r.get::<serde_json::Value, _>("document")))
            .collect::<PersistenceResult<Vec<_>>>()?;
        Ok(InstancePage { items, total })
    }

    async fn get_by_status(
        &self,
        status: InstanceStatus,
        limit: usize,
    ) -> PersistenceResult<Vec<WorkflowInstance>> {
        let rows = sqlx::query(
            "SELECT document FROM ff_instances WHERE status = $1 \
             ORDER BY created_at ASC LIMIT $2",
        )
        .bind(status.as_i32())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter()
            .map(|r| decode(r.get::<serde_json::Value, _>("document")))
            .collect()
    }

    async fn create(&self, instance: &WorkflowInstance) -> PersistenceResult<()> {
        let result = sqlx::query(
            "INSERT INTO ff_instances \
             (id, workflow_name, status, correlation_id, document, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&instance.id)
        .bind(&instance.workflow_name)
        .bind(instance.status.as_i32())
        .bind(&instance.correlation_id)
        .bind(encode(instance)?)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::Conflict(format!(
                "instance '{}' already exists",
                instance.id
            )));
        }
        Ok(())
    }

    async fn update(&self, instance: &WorkflowInstance) -> PersistenceResult<()> {
        let mut updated = instance.clone();
        updated.updated_at = Utc::now();

        let result = sqlx::query(
            "UPDATE ff_instances \
             SET workflow_name = $2, status = $3, correlation_id = $4, \
                 document = $5, updated_at = $6 \
             WHERE id = $1",
        )
        .bind(&updated.id)
        .bind(&updated.workflow_name)
        .bind(updated.status.as_i32())
        .bind(&updated.correlation_id)
        .bind(encode(&updated)?)
        .bind(updated.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(format!(
                "instance '{}'",
                updated.id
            )));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> PersistenceResult<bool> {
        let result = sqlx::query("DELETE FROM ff_instances WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_timed_out(
        &self,
        older_than: Duration,
    ) -> PersistenceResult<Vec<WorkflowInstance>> {
        let cutoff: DateTime<Utc> =
            Utc::now() - chrono::Duration::milliseconds(older_than.as_millis() as i64);
        let rows = sqlx::query(
            "SELECT document FROM ff_instances WHERE status = $1 AND updated_at < $2",
        )
        .bind(InstanceStatus::Running.as_i32())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter()
            .map(|r| decode(r.get::<serde_json::Value, _>("document")))
            .collect()
    }

    async fn stats(&self) -> PersistenceResult<InstanceStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM ff_instances GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut stats = InstanceStats::default();
        for row in rows {
            let count = row.get::<i64, _>("count") as usize;
            stats.total += count;
            if let Some(status) = InstanceStatus::from_i32(row.get::<i32, _>("status")) {
                stats.by_status.insert(status, count);
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl ExecutionRepository for PostgresRepositories {
    async fn get_by_instance(
        &self,
        instance_id: &str,
    ) -> PersistenceResult<Vec<ActivityExecution>> {
        let rows = sqlx::query(
            "SELECT document FROM ff_executions WHERE instance_id = $1 \
             ORDER BY started_at ASC, attempt ASC",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter()
            .map(|r| decode(r.get::<serde_json::Value, _>("document")))
            .collect()
    }

    async fn get(&self, id: &str) -> PersistenceResult<Option<ActivityExecution>> {
        let row = sqlx::query("SELECT document FROM ff_executions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(|r| decode(r.get::<serde_json::Value, _>("document")))
            .transpose()
    }

    async fn create(&self, execution: &ActivityExecution) -> PersistenceResult<()> {
        let result = sqlx::query(
            "INSERT INTO ff_executions \
             (id, instance_id, activity_id, attempt, started_at, document) \
             VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
        )
        .bind(&execution.id)
        .bind(&execution.workflow_instance_id)
        .bind(&execution.activity_id)
        .bind(execution.attempt as i32)
        .bind(execution.started_at)
        .bind(encode(execution)?)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::Conflict(format!(
                "execution '{}' already exists",
                execution.id
            )));
        }
        Ok(())
    }

    async fn update(&self, execution: &ActivityExecution) -> PersistenceResult<()> {
        let result = sqlx::query("UPDATE ff_executions SET document = $2 WHERE id = $1")
            .bind(&execution.id)
            .bind(encode(execution)?)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(PersistenceError::NotFound(format!(
                "execution '{}'",
                execution.id
            )));
        }
        Ok(())
    }

    async fn get_latest(
        &self,
        instance_id: &str,
        activity_id: &str,
    ) -> PersistenceResult<Option<ActivityExecution>> {
        let row = sqlx::query(
            "SELECT document FROM ff_executions \
             WHERE instance_id = $1 AND activity_id = $2 \
             ORDER BY attempt DESC LIMIT 1",
        )
        .bind(instance_id)
        .bind(activity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.map(|r| decode(r.get::<serde_json::Value, _>("document")))
            .transpose()
    }
}
