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

//! Job queue port.

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::job::Job;

/// Durable priority queue port.
///
/// ## Contract
/// - `publish` assigns a fresh message id and stamps `queued_at`
/// - `pop` must be atomic against concurrent consumers: the entry moves
///   from pending into the in-flight set in one indivisible operation, and
///   losing a pop race is recoverable (skip, pop again)
/// - `nack` with `requeue = true` increments the attempt counter and
///   re-publishes at the same priority; with `requeue = false` the job is
///   routed to the dead-letter collection
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a job; returns the assigned message id.
    async fn publish(&self, job: Job) -> QueueResult<String>;

    /// Claim the lowest-scored pending job, moving it in flight.
    async fn pop(&self) -> QueueResult<Option<Job>>;

    /// Positive acknowledgement: drop the in-flight entry.
    async fn ack(&self, message_id: &str) -> QueueResult<()>;

    /// Negative acknowledgement: requeue or dead-letter.
    async fn nack(&self, message_id: &str, requeue: bool) -> QueueResult<()>;

    /// Number of pending (claimable) jobs.
    async fn pending_len(&self) -> QueueResult<usize>;

    /// Number of claimed but unacknowledged jobs.
    async fn in_flight_len(&self) -> QueueResult<usize>;

    /// Jobs dropped after exhausting their redelivery budget.
    async fn dead_letters(&self) -> QueueResult<Vec<Job>>;
}
