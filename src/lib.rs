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

//! # FlowForge
//!
//! Distributed workflow engine: users describe a directed graph of named
//! activities and guarded transitions; the engine durably executes many
//! instances of those graphs across worker processes, surviving restarts,
//! retrying failed steps, suspending on external signals, and dispatching
//! on cron schedules.
//!
//! ## Crates
//! - [`flowforge_core`] - domain model and configuration
//! - [`flowforge_expression`] - path/predicate/interpolation evaluators
//! - [`flowforge_locks`] - distributed per-key leases
//! - [`flowforge_queue`] - durable priority job queue
//! - [`flowforge_persistence`] - repository ports and backends
//! - [`flowforge_registry`] - activity handler dispatch table
//! - [`flowforge_engine`] - the execution engine
//! - [`flowforge_worker`] - bounded-concurrency queue worker
//! - [`flowforge_scheduler`] - cron scheduler
//!
//! This crate wires them into a runnable node; see [`FlowForgeNode`].

pub mod node;

pub use node::{FlowForgeNode, NodeBuilder, NodeError, NodeState};

pub use flowforge_core as core;
pub use flowforge_engine as engine;
pub use flowforge_expression as expression;
pub use flowforge_locks as locks;
pub use flowforge_persistence as persistence;
pub use flowforge_queue as queue;
pub use flowforge_registry as registry;
pub use flowforge_scheduler as scheduler;
pub use flowforge_worker as worker;
