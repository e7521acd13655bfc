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

//! # FlowForge Core
//!
//! ## Purpose
//! Domain model shared by every FlowForge subsystem: workflow definitions,
//! instances, activity-execution history, retry policies, and engine
//! configuration.
//!
//! ## Architecture Context
//! This crate sits at the bottom of the dependency graph. The expression
//! evaluator, persistence port, execution engine, worker pool, and scheduler
//! all consume these types; none of them redefine domain models.
//!
//! ## Wire Contract
//! Structured fields serialize as camelCase JSON documents. Status and
//! trigger enums serialize as their ordinal integers (`Pending = 0`, ...),
//! which is the persisted and queued representation.

pub mod config;
pub mod definition;
pub mod execution;
pub mod instance;
pub mod retry;

pub use config::{EngineConfig, FlowForgeConfig, SchedulerConfig, WorkerConfig};
pub use definition::{
    ActivityDefinition, DataSchema, DefinitionError, FieldSchema, FieldType, TransitionDefinition,
    TriggerDefinition, TriggerType, WorkflowDefinition,
};
pub use execution::{ActivityExecution, ActivityStatus};
pub use instance::{InstanceStatus, WorkflowFault, WorkflowInstance, SUSPEND_KEY};
pub use retry::RetryPolicy;

/// JSON-shaped key/value map used for instance `input`, `state`, `output`,
/// activity properties, and metadata.
pub type JsonMap = std::collections::HashMap<String, serde_json::Value>;
