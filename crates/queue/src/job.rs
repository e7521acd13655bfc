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

//! Queue message - a request for the engine to act on one instance.
//!
//! Wire form is camelCase JSON with `type` as the ordinal integer:
//! `{messageId, instanceId, activityId?, type, queuedAt, priority, attempt}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Priority for manually triggered starts (`trigger_now`).
pub const PRIORITY_MANUAL: i32 = 10;

/// Priority for scheduler-emitted starts.
pub const PRIORITY_SCHEDULED: i32 = 50;

/// Priority when the publisher has no opinion.
pub const PRIORITY_DEFAULT: i32 = 100;

/// What the worker should do with the instance.
///
/// Serialized as its ordinal integer (`Start = 0` ... `Cancel = 4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobType {
    /// First engine pass for a fresh instance
    Start,
    /// Continue an already running instance
    Continue,
    /// Re-enter after a signal delivery
    Resume,
    /// Re-enter after a deferred retry
    Retry,
    /// Cancel the instance
    Cancel,
}

impl JobType {
    /// Ordinal wire form.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Start => 0,
            Self::Continue => 1,
            Self::Resume => 2,
            Self::Retry => 3,
            Self::Cancel => 4,
        }
    }

    /// Parse the ordinal wire form.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Start),
            1 => Some(Self::Continue),
            2 => Some(Self::Resume),
            3 => Some(Self::Retry),
            4 => Some(Self::Cancel),
            _ => None,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Start => "START",
            Self::Continue => "CONTINUE",
            Self::Resume => "RESUME",
            Self::Retry => "RETRY",
            Self::Cancel => "CANCEL",
        };
        write!(f, "{}", s)
    }
}

impl Serialize for JobType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for JobType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i32::deserialize(deserializer)?;
        Self::from_i32(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown job type ordinal {}", value)))
    }
}

/// One queued work request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Assigned by `publish`; identifies the entry through redeliveries
    pub message_id: String,

    /// Instance the engine should act on
    pub instance_id: String,

    /// Optional activity hint (deferred retries)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,

    /// What to do
    #[serde(rename = "type")]
    pub job_type: JobType,

    /// Stamped by `publish`
    pub queued_at: DateTime<Utc>,

    /// Lower fires first
    pub priority: i32,

    /// Delivery attempt counter, incremented on requeue
    pub attempt: u32,
}

impl Job {
    /// New unpublished job; `publish` assigns `message_id` and `queued_at`.
    pub fn new(job_type: JobType, instance_id: impl Into<String>, priority: i32) -> Self {
        Self {
            message_id: String::new(),
            instance_id: instance_id.into(),
            activity_id: None,
            job_type,
            queued_at: Utc::now(),
            priority,
            attempt: 1,
        }
    }

    /// Start job at the given priority.
    pub fn start(instance_id: impl Into<String>, priority: i32) -> Self {
        Self::new(JobType::Start, instance_id, priority)
    }

    /// Resume job at default priority.
    pub fn resume(instance_id: impl Into<String>) -> Self {
        Self::new(JobType::Resume, instance_id, PRIORITY_DEFAULT)
    }

    /// Cancel job at manual priority (cancellations should not queue behind
    /// bulk work).
    pub fn cancel(instance_id: impl Into<String>) -> Self {
        Self::new(JobType::Cancel, instance_id, PRIORITY_MANUAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_type_ordinals() {
        for ordinal in 0..5 {
            let job_type = JobType::from_i32(ordinal).unwrap();
            assert_eq!(job_type.as_i32(), ordinal);
        }
        assert_eq!(JobType::from_i32(5), None);
    }

    #[test]
    fn test_wire_form() {
        let mut job = Job::start("inst-1", PRIORITY_SCHEDULED);
        job.message_id = "msg-1".to_string();
        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value.get("messageId"), Some(&json!("msg-1")));
        assert_eq!(value.get("instanceId"), Some(&json!("inst-1")));
        assert_eq!(value.get("type"), Some(&json!(0)));
        assert_eq!(value.get("priority"), Some(&json!(50)));
        assert_eq!(value.get("attempt"), Some(&json!(1)));
        assert!(value.get("activityId").is_none());

        let back: Job = serde_json::from_value(value).unwrap();
        assert_eq!(back.job_type, JobType::Start);
    }
}
