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

//! Redis heartbeat store: `SET key payload PX ttl` with native expiry.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;

use crate::heartbeat::HeartbeatStore;
use crate::pool::{WorkerError, WorkerResult};

/// Redis-backed heartbeat store.
#[derive(Clone)]
pub struct RedisHeartbeatStore {
    conn: ConnectionManager,
}

impl RedisHeartbeatStore {
    pub async fn new(redis_url: &str) -> WorkerResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| WorkerError::Heartbeat(format!("redis client: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| WorkerError::Heartbeat(format!("redis connect: {}", e)))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl HeartbeatStore for RedisHeartbeatStore {
    async fn beat(&self, key: &str, payload: &str, ttl: Duration) -> WorkerResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| WorkerError::Heartbeat(format!("redis set: {}", e)))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> WorkerResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| WorkerError::Heartbeat(format!("redis get: {}", e)))
    }

    async fn live_keys(&self, prefix: &str) -> WorkerResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}*", prefix);
        let mut cursor = 0u64;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .map_err(|e| WorkerError::Heartbeat(format!("redis scan: {}", e)))?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        keys.sort();
        Ok(keys)
    }
}
