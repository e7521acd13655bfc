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

//! # FlowForge Cron Scheduler
//!
//! ## Purpose
//! Tick-based emission of scheduled workflow starts: a schedule table is
//! refreshed from the active definitions with a `Scheduled` trigger, and
//! every check interval the due entries start an instance (via the engine)
//! and publish its start job.
//!
//! ## Design
//! - The schedule table has a single owner task behind a mutex; external
//!   readers get snapshot copies
//! - Invalid cron expressions are logged and skipped, never fatal
//! - Missed windows are skipped, not replayed (`run_missed_on_startup`
//!   stays false by default)
//! - With multiple replicas the loop singletonizes itself on a well-known
//!   lock key

pub mod scheduler;

pub use scheduler::{CronScheduler, ScheduleEntry, SchedulerError, SchedulerResult};
