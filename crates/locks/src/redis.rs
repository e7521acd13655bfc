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

//! Redis lock backend.
//!
//! ## Design
//! - Acquire is `SET key owner NX PX ttl` (native TTL, single round trip)
//! - Release and renew are Lua scripts so the ownership check and the
//!   mutation are one indivisible server-side operation; a `GET` followed
//!   by a `DEL` would lose the lease race
//! - Re-entry by the current owner refreshes the lease

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;

use crate::error::{LockError, LockResult};
use crate::manager::LockBackend;

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

const RENEW_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
else
    return 0
end
"#;

const ACQUIRE_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if current == false then
    redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
    return 1
elseif current == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#;

/// Redis-backed lock store using native key TTLs.
#[derive(Clone)]
pub struct RedisLockBackend {
    conn: ConnectionManager,
}

impl RedisLockBackend {
    /// Connect to redis (e.g. `redis://127.0.0.1:6379`).
    pub async fn new(redis_url: &str) -> LockResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| LockError::Backend(format!("redis client: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| LockError::Backend(format!("redis connect: {}", e)))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> LockResult<bool> {
        let mut conn = self.conn.clone();
        let granted: i64 = Script::new(ACQUIRE_SCRIPT)
            .key(key)
            .arg(owner)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("redis acquire: {}", e)))?;
        Ok(granted == 1)
    }

    async fn release_if_owner(&self, key: &str, owner: &str) -> LockResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = Script::new(RELEASE_SCRIPT)
            .key(key)
            .arg(owner)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("redis release: {}", e)))?;
        Ok(deleted == 1)
    }

    async fn renew_if_owner(&self, key: &str, owner: &str, ttl: Duration) -> LockResult<bool> {
        let mut conn = self.conn.clone();
        let renewed: i64 = Script::new(RENEW_SCRIPT)
            .key(key)
            .arg(owner)
            .arg(ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("redis renew: {}", e)))?;
        Ok(renewed == 1)
    }

    async fn is_locked(&self, key: &str) -> LockResult<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| LockError::Backend(format!("redis exists: {}", e)))?;
        Ok(exists)
    }
}
