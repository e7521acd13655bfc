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

//! # FlowForge Distributed Locks
//!
//! ## Purpose
//! Per-key advisory leases for mutual exclusion across worker processes:
//! the engine holds an instance lock while advancing it, and the scheduler
//! singletonizes itself on a well-known key.
//!
//! ## Design
//! - **Acquire** is compare-and-set-if-absent with a TTL; contention is
//!   retried on a bounded backoff (50 ms, x1.5, cap 500 ms) until the wait
//!   timeout elapses or the caller cancels.
//! - **Release** deletes the key only when it still carries this locker's
//!   id (atomic check-then-delete; a Lua script on the redis backend).
//!   Releasing after lease expiry is a logged no-op, never an error.
//! - Backends are feature-gated: in-memory (always, tests and single-node)
//!   and redis (`redis-backend`).
//!
//! ## Invariant
//! Between an acquire and its lease expiry, at most one lease's `release`
//! succeeds for a key. Holders must bound critical sections to the lease
//! or renew.

pub mod error;
pub mod manager;

#[cfg(feature = "memory-backend")]
pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use error::{LockError, LockResult};
pub use manager::{LockBackend, LockLease, LockManager};

#[cfg(feature = "memory-backend")]
pub use memory::MemoryLockBackend;

#[cfg(feature = "redis-backend")]
pub use redis::RedisLockBackend;
