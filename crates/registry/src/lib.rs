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

//! # FlowForge Activity Registry
//!
//! ## Purpose
//! Open-world activity dispatch: handlers register under a case-insensitive
//! `type` string at startup; the engine looks them up per activity and calls
//! `execute(context)`. New activity kinds are added by inserting into the
//! table, never by modifying the engine.
//!
//! ## Handler contract
//! `execute` receives a read-only instance snapshot, the activity
//! definition, the resolved input, the 1-based attempt number, a
//! cancellation token, and a service locator. It returns an
//! [`ActivityOutcome`]: success with output (and optional next-activity
//! override), a suspend request, or a typed failure. A plain `Err` from the
//! handler is converted by the engine into a retriable failure - unless the
//! cancellation token fired, which always surfaces as cancellation.

pub mod context;
pub mod handler;
pub mod registry;
pub mod services;

pub use context::ActivityContext;
pub use handler::{ActivityFault, ActivityHandler, ActivityOutcome, BoxError};
pub use registry::ActivityRegistry;
pub use services::ServiceLocator;
