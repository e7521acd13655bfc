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

//! Lock backend port and the lease-granting manager.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use ulid::Ulid;

use crate::error::{LockError, LockResult};

const BACKOFF_START: Duration = Duration::from_millis(50);
const BACKOFF_FACTOR: f64 = 1.5;
const BACKOFF_CAP: Duration = Duration::from_millis(500);

/// Storage port for lock state.
///
/// ## Contract
/// - `try_acquire` is a single atomic compare-and-set-if-absent with TTL;
///   it returns `false` when the key is held (and unexpired) by another
///   owner, and `true` when this owner now holds it (re-entry by the same
///   owner refreshes the lease and returns `true`).
/// - `release_if_owner` deletes the key only when its value equals `owner`
///   and reports whether a deletion happened; it must be a single
///   indivisible operation, never a `get` followed by a `del`.
#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Atomic set-if-absent with expiry.
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> LockResult<bool>;

    /// Atomic ownership-checked delete. `Ok(false)` means the key was
    /// absent or held by someone else (a lost/expired lease).
    async fn release_if_owner(&self, key: &str, owner: &str) -> LockResult<bool>;

    /// Extend the lease when still owned. `Ok(false)` when ownership was lost.
    async fn renew_if_owner(&self, key: &str, owner: &str, ttl: Duration) -> LockResult<bool>;

    /// Whether an unexpired entry exists for the key.
    async fn is_locked(&self, key: &str) -> LockResult<bool>;
}

/// Handle for one held lease. Release it explicitly; dropping without
/// release leaves the lease to expire on its own TTL.
pub struct LockLease {
    backend: Arc<dyn LockBackend>,
    key: String,
    owner: String,
    ttl: Duration,
}

impl LockLease {
    /// Full (prefixed) key this lease holds.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Ownership-checked release. Expired or stolen leases log a warning
    /// and return `Ok(())`.
    pub async fn release(self) -> LockResult<()> {
        let released = self
            .backend
            .release_if_owner(&self.key, &self.owner)
            .await?;
        if !released {
            warn!(key = %self.key, "lease already expired at release; ignoring");
        }
        Ok(())
    }

    /// Heartbeat: extend the lease by its original TTL.
    pub async fn renew(&self) -> LockResult<bool> {
        self.backend
            .renew_if_owner(&self.key, &self.owner, self.ttl)
            .await
    }
}

impl std::fmt::Debug for LockLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockLease")
            .field("key", &self.key)
            .field("owner", &self.owner)
            .finish()
    }
}

/// Lease-granting lock manager over a backend.
///
/// Each manager instance has a unique locker id; that id is the stored
/// lock value, which is what makes release ownership-checked.
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn LockBackend>,
    locker_id: String,
    prefix: String,
}

impl LockManager {
    /// New manager over a backend. `prefix` namespaces every key
    /// (`<prefix>lock:<key>`).
    pub fn new(backend: Arc<dyn LockBackend>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            locker_id: Ulid::new().to_string(),
            prefix: prefix.into(),
        }
    }

    /// This manager's unique owner id.
    pub fn locker_id(&self) -> &str {
        &self.locker_id
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}lock:{}", self.prefix, key)
    }

    /// Acquire the lock for `key`, waiting at most `wait_timeout`.
    ///
    /// The initial lease TTL equals `wait_timeout`. Returns `Ok(None)` when
    /// the wait budget is exhausted, `Err(Cancelled)` when the caller's
    /// token fires first.
    pub async fn acquire(
        &self,
        key: &str,
        wait_timeout: Duration,
        cancel: &CancellationToken,
    ) -> LockResult<Option<LockLease>> {
        let full_key = self.full_key(key);
        // One owner id per lease, not per manager: concurrent acquires
        // from the same process must still exclude each other.
        let owner = format!("{}:{}", self.locker_id, Ulid::new());
        let deadline = tokio::time::Instant::now() + wait_timeout;
        let mut backoff = BACKOFF_START;

        loop {
            if self
                .backend
                .try_acquire(&full_key, &owner, wait_timeout)
                .await?
            {
                debug!(key = %full_key, owner = %owner, "lock acquired");
                return Ok(Some(LockLease {
                    backend: Arc::clone(&self.backend),
                    key: full_key,
                    owner,
                    ttl: wait_timeout,
                }));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                debug!(key = %full_key, "lock wait timeout elapsed");
                return Ok(None);
            }

            let sleep_for = backoff.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(LockError::Cancelled(full_key));
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
            backoff = Duration::from_millis(
                ((backoff.as_millis() as f64 * BACKOFF_FACTOR) as u64)
                    .min(BACKOFF_CAP.as_millis() as u64),
            );
        }
    }

    /// Whether `key` is currently held by anyone.
    pub async fn is_locked(&self, key: &str) -> LockResult<bool> {
        self.backend.is_locked(&self.full_key(key)).await
    }
}
