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

//! In-memory lock backend (testing and single-process deployments).
//!
//! ## Limitations
//! - Not persistent (locks lost on restart)
//! - Not distributed (single process only)
//! - Expired entries linger until the key is touched again

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::error::LockResult;
use crate::manager::LockBackend;

#[derive(Debug, Clone)]
struct Entry {
    owner: String,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// HashMap-backed lock store guarded by one RwLock; every mutation takes
/// the write half, which is what makes each operation atomic.
#[derive(Clone, Default)]
pub struct MemoryLockBackend {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for MemoryLockBackend {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> LockResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        let expires_at = now + chrono::Duration::milliseconds(ttl.as_millis() as i64);

        match entries.get(key) {
            Some(existing) if !existing.expired(now) && existing.owner != owner => Ok(false),
            _ => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        owner: owner.to_string(),
                        expires_at,
                    },
                );
                Ok(true)
            }
        }
    }

    async fn release_if_owner(&self, key: &str, owner: &str) -> LockResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        match entries.get(key) {
            Some(existing) if existing.owner == owner && !existing.expired(now) => {
                entries.remove(key);
                Ok(true)
            }
            Some(existing) if existing.expired(now) => {
                entries.remove(key);
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    async fn renew_if_owner(&self, key: &str, owner: &str, ttl: Duration) -> LockResult<bool> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();
        match entries.get_mut(key) {
            Some(existing) if existing.owner == owner && !existing.expired(now) => {
                existing.expires_at = now + chrono::Duration::milliseconds(ttl.as_millis() as i64);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_locked(&self, key: &str) -> LockResult<bool> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .map(|e| !e.expired(Utc::now()))
            .unwrap_or(false))
    }
}
