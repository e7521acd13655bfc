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

//! Worker liveness heartbeats.
//!
//! One record per worker under `<prefix>worker:<worker_id>`, refreshed
//! every heartbeat interval with a TTL of three intervals; a worker that
//! stops beating disappears on its own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::pool::WorkerResult;

/// TTL'd key-value store for heartbeat records.
#[async_trait]
pub trait HeartbeatStore: Send + Sync {
    /// Write (or refresh) a heartbeat record with a TTL.
    async fn beat(&self, key: &str, payload: &str, ttl: Duration) -> WorkerResult<()>;

    /// Fetch an unexpired heartbeat record.
    async fn get(&self, key: &str) -> WorkerResult<Option<String>>;

    /// Keys of all unexpired records under a prefix.
    async fn live_keys(&self, prefix: &str) -> WorkerResult<Vec<String>>;
}

#[derive(Debug, Clone)]
struct Entry {
    payload: String,
    expires_at: DateTime<Utc>,
}

/// In-memory heartbeat store (testing and single-process deployments).
#[derive(Clone, Default)]
pub struct MemoryHeartbeatStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl MemoryHeartbeatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HeartbeatStore for MemoryHeartbeatStore {
    async fn beat(&self, key: &str, payload: &str, ttl: Duration) -> WorkerResult<()> {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                payload: payload.to_string(),
                expires_at: Utc::now() + chrono::Duration::milliseconds(ttl.as_millis() as i64),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> WorkerResult<Option<String>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| e.expires_at > Utc::now())
            .map(|e| e.payload.clone()))
    }

    async fn live_keys(&self, prefix: &str) -> WorkerResult<Vec<String>> {
        let entries = self.entries.read().await;
        let now = Utc::now();
        let mut keys: Vec<String> = entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && entry.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
