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

//! # FlowForge Persistence
//!
//! ## Purpose
//! Repository ports for the three persisted aggregates - workflow
//! definitions, workflow instances, and activity-execution history - plus
//! the backends implementing them.
//!
//! ## Backends
//! - In-memory (always available): full semantics including version
//!   auto-increment and atomic deactivation, used by tests and single-node
//!   deployments
//! - PostgreSQL via sqlx (`postgres-backend`): JSONB documents with
//!   camelCase keys and ordinal status columns

pub mod error;
pub mod repository;

#[cfg(feature = "memory-backend")]
pub mod memory;

#[cfg(feature = "postgres-backend")]
pub mod postgres;

pub use error::{PersistenceError, PersistenceResult};
pub use repository::{
    DefinitionRepository, ExecutionRepository, InstanceFilter, InstancePage, InstanceRepository,
    InstanceSort, InstanceStats, Page,
};

#[cfg(feature = "memory-backend")]
pub use memory::{InMemoryDefinitionRepository, InMemoryExecutionRepository, InMemoryInstanceRepository};

#[cfg(feature = "postgres-backend")]
pub use postgres::PostgresRepositories;
