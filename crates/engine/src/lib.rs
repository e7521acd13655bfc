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

//! # FlowForge Execution Engine
//!
//! ## Purpose
//! The state machine advancing a single workflow instance: activity
//! dispatch, input/output data flow, retry and timeout control, suspension
//! on signals, and cancellation.
//!
//! ## Concurrency model
//! The advancement loop for one instance is strictly sequential, run by one
//! task under that instance's distributed lock. The engine never calls a
//! handler while holding a storage transaction: it acquires the lock, loads
//! the instance, runs the handler, persists, and releases.
//!
//! ## Delivery semantics
//! At-least-once end to end. Re-delivered jobs are harmless: `execute`
//! re-loads the instance inside the lock and short-circuits on terminal
//! status.

pub mod engine;
pub mod error;
pub mod transition;
pub mod validate;

pub use engine::{StartRequest, WorkflowEngine};
pub use error::{EngineError, EngineResult};
pub use transition::choose_transition;
pub use validate::validate_input;
