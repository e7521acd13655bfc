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

//! Redis job queue backend.
//!
//! ## Keys
//! - `<prefix>queue:pending` - sorted set of message ids, scored by
//!   `priority * 2^41 + queued_at_ms`
//! - `<prefix>queue:payload` - hash message id -> job JSON
//! - `<prefix>queue:inflight` - hash message id -> job JSON
//! - `<prefix>queue:dead` - list of dead-lettered job JSON
//!
//! ## Atomicity
//! The pending-to-in-flight move runs as one Lua script (ZPOPMIN + hash
//! move); two consumers can never claim the same message.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use ulid::Ulid;

use crate::error::{QueueError, QueueResult};
use crate::job::Job;
use crate::queue::JobQueue;

// priority dominates the composite score; 2^41 ms of headroom keeps
// queued_at timestamps below the priority stride through year ~2039
// while the sum stays inside f64's exact integer range for priorities
// up to the low thousands.
const PRIORITY_STRIDE: f64 = (1u64 << 41) as f64;

const POP_SCRIPT: &str = r#"
local popped = redis.call('ZPOPMIN', KEYS[1], 1)
if #popped == 0 then
    return false
end
local id = popped[1]
local body = redis.call('HGET', KEYS[2], id)
redis.call('HDEL', KEYS[2], id)
if body then
    redis.call('HSET', KEYS[3], id, body)
end
return body
"#;

/// Redis-backed durable queue.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisJobQueue {
    /// Connect to redis with a key prefix (e.g. `flowforge:`).
    pub async fn new(redis_url: &str, prefix: impl Into<String>) -> QueueResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| QueueError::Backend(format!("redis client: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::Backend(format!("redis connect: {}", e)))?;
        Ok(Self {
            conn,
            prefix: prefix.into(),
        })
    }

    fn pending_key(&self) -> String {
        format!("{}queue:pending", self.prefix)
    }

    fn payload_key(&self) -> String {
        format!("{}queue:payload", self.prefix)
    }

    fn inflight_key(&self) -> String {
        format!("{}queue:inflight", self.prefix)
    }

    fn dead_key(&self) -> String {
        format!("{}queue:dead", self.prefix)
    }

    fn score(job: &Job) -> f64 {
        job.priority as f64 * PRIORITY_STRIDE + job.queued_at.timestamp_millis() as f64
    }

    async fn store_pending(&self, job: &Job) -> QueueResult<()> {
        let body = serde_json::to_string(job)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .hset(self.payload_key(), &job.message_id, body)
            .zadd(self.pending_key(), &job.message_id, Self::score(job))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(format!("redis publish: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn publish(&self, mut job: Job) -> QueueResult<String> {
        job.message_id = Ulid::new().to_string();
        job.queued_at = Utc::now();
        self.store_pending(&job).await?;
        Ok(job.message_id)
    }

    async fn pop(&self) -> QueueResult<Option<Job>> {
        let mut conn = self.conn.clone();
        let body: Option<String> = Script::new(POP_SCRIPT)
            .key(self.pending_key())
            .key(self.payload_key())
            .key(self.inflight_key())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| QueueError::Backend(format!("redis pop: {}", e)))?;

        match body {
            Some(body) => {
                let job: Job = serde_json::from_str(&body)
                    .map_err(|e| QueueError::Serialization(e.to_string()))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .hdel(self.inflight_key(), message_id)
            .await
            .map_err(|e| QueueError::Backend(format!("redis ack: {}", e)))?;
        if removed == 0 {
            return Err(QueueError::NotInFlight(message_id.to_string()));
        }
        Ok(())
    }

    async fn nack(&self, message_id: &str, requeue: bool) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        let body: Option<String> = conn
            .hget(self.inflight_key(), message_id)
            .await
            .map_err(|e| QueueError::Backend(format!("redis nack: {}", e)))?;
        let body = body.ok_or_else(|| QueueError::NotInFlight(message_id.to_string()))?;

        let mut job: Job = serde_json::from_str(&body)
            .map_err(|e| QueueError::Serialization(e.to_string()))?;

        if requeue {
            job.attempt += 1;
            job.queued_at = Utc::now();
            let requeued = serde_json::to_string(&job)
                .map_err(|e| QueueError::Serialization(e.to_string()))?;
            redis::pipe()
                .atomic()
                .hdel(self.inflight_key(), message_id)
                .hset(self.payload_key(), &job.message_id, requeued)
                .zadd(self.pending_key(), &job.message_id, Self::score(&job))
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| QueueError::Backend(format!("redis requeue: {}", e)))?;
        } else {
            redis::pipe()
                .atomic()
                .hdel(self.inflight_key(), message_id)
                .rpush(self.dead_key(), body)
                .query_async::<()>(&mut conn)
                .await
                .map_err(|e| QueueError::Backend(format!("redis dead-letter: {}", e)))?;
        }
        Ok(())
    }

    async fn pending_len(&self) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn
            .zcard(self.pending_key())
            .await
            .map_err(|e| QueueError::Backend(format!("redis zcard: {}", e)))?;
        Ok(len)
    }

    async fn in_flight_len(&self) -> QueueResult<usize> {
        let mut conn = self.conn.clone();
        let len: usize = conn
            .hlen(self.inflight_key())
            .await
            .map_err(|e| QueueError::Backend(format!("redis hlen: {}", e)))?;
        Ok(len)
    }

    async fn dead_letters(&self) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn.clone();
        let bodies: Vec<String> = conn
            .lrange(self.dead_key(), 0, -1)
            .await
            .map_err(|e| QueueError::Backend(format!("redis lrange: {}", e)))?;
        bodies
            .into_iter()
            .map(|b| serde_json::from_str(&b).map_err(|e| QueueError::Serialization(e.to_string())))
            .collect()
    }
}
