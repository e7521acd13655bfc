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

//! # FlowForge Worker
//!
//! ## Purpose
//! A worker process runs one queue subscription with bounded concurrency,
//! dispatches each job to the engine by type, and posts liveness
//! heartbeats keyed by its worker id (`hostname-pid`) with a TTL of three
//! heartbeat intervals.

pub mod heartbeat;
pub mod pool;

#[cfg(feature = "redis-backend")]
pub mod redis_heartbeat;

pub use heartbeat::{HeartbeatStore, MemoryHeartbeatStore};
pub use pool::{WorkerError, WorkerPool, WorkerResult};

#[cfg(feature = "redis-backend")]
pub use redis_heartbeat::RedisHeartbeatStore;
