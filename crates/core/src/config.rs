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

//! Runtime configuration.
//!
//! ## Sources
//! Defaults cover a single-node in-memory deployment; `from_env()` overlays
//! `FLOWFORGE_*` environment variables. Unparseable values are logged and
//! ignored, keeping the default.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::retry::RetryPolicy;

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    /// Maximum jobs processed concurrently by one worker process
    pub max_concurrency: usize,

    /// Heartbeat cadence; heartbeat records live for three intervals
    pub heartbeat_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// Cron scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Whether the scheduler loop runs at all
    pub enabled: bool,

    /// Tick cadence for due-schedule checks
    pub check_interval: Duration,

    /// Cap on instances started per tick
    pub max_starts_per_check: usize,

    /// Timezone name; only "UTC" is evaluated natively
    pub timezone: String,

    /// Replay windows missed while the process was down
    pub run_missed_on_startup: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: Duration::from_secs(10),
            max_starts_per_check: 100,
            timezone: "UTC".to_string(),
            run_missed_on_startup: false,
        }
    }
}

/// Execution engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Activity timeout when neither the activity nor the definition sets one
    pub default_timeout: Duration,

    /// Retry policy when neither the activity nor the definition sets one
    pub default_retry_policy: RetryPolicy,

    /// Per-instance lock lease; also the longest an `execute` call waits
    /// for the lock before reporting LOCK_FAILED
    pub lock_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(3600),
            default_retry_policy: RetryPolicy::default(),
            lock_timeout: Duration::from_secs(300),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowForgeConfig {
    /// Postgres connection string; `None` keeps the in-memory repositories
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgres_connection: Option<String>,

    /// Redis connection string; `None` keeps the in-memory queue and locks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis_connection: Option<String>,

    /// Prefix for every cache/lock/heartbeat key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

fn default_key_prefix() -> String {
    "flowforge:".to_string()
}

impl Default for FlowForgeConfig {
    fn default() -> Self {
        Self {
            postgres_connection: None,
            redis_connection: None,
            key_prefix: default_key_prefix(),
            worker: WorkerConfig::default(),
            scheduler: SchedulerConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl FlowForgeConfig {
    /// Defaults overlaid with `FLOWFORGE_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("FLOWFORGE_POSTGRES_CONNECTION") {
            config.postgres_connection = Some(value);
        }
        if let Ok(value) = std::env::var("FLOWFORGE_REDIS_CONNECTION") {
            config.redis_connection = Some(value);
        }
        if let Ok(value) = std::env::var("FLOWFORGE_KEY_PREFIX") {
            config.key_prefix = value;
        }
        if let Some(value) = env_parse::<usize>("FLOWFORGE_WORKER_MAX_CONCURRENCY") {
            config.worker.max_concurrency = value;
        }
        if let Some(value) = env_parse::<u64>("FLOWFORGE_WORKER_HEARTBEAT_INTERVAL_SECS") {
            config.worker.heartbeat_interval = Duration::from_secs(value);
        }
        if let Some(value) = env_parse::<bool>("FLOWFORGE_SCHEDULER_ENABLED") {
            config.scheduler.enabled = value;
        }
        if let Some(value) = env_parse::<u64>("FLOWFORGE_SCHEDULER_CHECK_INTERVAL_SECS") {
            config.scheduler.check_interval = Duration::from_secs(value);
        }
        if let Some(value) = env_parse::<usize>("FLOWFORGE_SCHEDULER_MAX_STARTS_PER_CHECK") {
            config.scheduler.max_starts_per_check = value;
        }
        if let Ok(value) = std::env::var("FLOWFORGE_SCHEDULER_TIMEZONE") {
            config.scheduler.timezone = value;
        }
        if let Some(value) = env_parse::<u64>("FLOWFORGE_ENGINE_DEFAULT_TIMEOUT_SECS") {
            config.engine.default_timeout = Duration::from_secs(value);
        }
        if let Some(value) = env_parse::<u64>("FLOWFORGE_ENGINE_LOCK_TIMEOUT_SECS") {
            config.engine.lock_timeout = Duration::from_secs(value);
        }
        if let Some(value) = env_parse::<u32>("FLOWFORGE_ENGINE_RETRY_MAX_ATTEMPTS") {
            config.engine.default_retry_policy.max_attempts = value;
        }
        if let Some(value) = env_parse::<u64>("FLOWFORGE_ENGINE_RETRY_INITIAL_DELAY_MS") {
            config.engine.default_retry_policy.initial_delay = Duration::from_millis(value);
        }
        if let Some(value) = env_parse::<u64>("FLOWFORGE_ENGINE_RETRY_MAX_DELAY_MS") {
            config.engine.default_retry_policy.max_delay = Duration::from_millis(value);
        }
        if let Some(value) = env_parse::<f64>("FLOWFORGE_ENGINE_RETRY_BACKOFF_MULTIPLIER") {
            config.engine.default_retry_policy.backoff_multiplier = value;
        }

        config
    }

    /// Default key prefix used across locks, queue, and heartbeats.
    pub fn default_prefix() -> String {
        default_key_prefix()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(var = name, value = %raw, "ignoring unparseable environment value");
                None
            }
        },
        Err(_) => None,
    }
}
