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

//! Activity execution history - one append-only row per attempt.
//!
//! Rows are keyed by `(instance, activity_id, attempt)` and never updated
//! after terminal completion of that attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

use crate::instance::WorkflowFault;
use crate::JsonMap;

/// Per-attempt activity status.
///
/// Serialized as its ordinal integer (`Pending = 0` ... `Cancelled = 6`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityStatus {
    /// Recorded but not yet running
    Pending,
    /// Handler in flight
    Running,
    /// Attempt succeeded
    Completed,
    /// Attempt failed
    Failed,
    /// Pre-execution condition was false; handler never ran
    Skipped,
    /// Failed attempt with a retry scheduled
    Retrying,
    /// Attempt aborted by cancellation
    Cancelled,
}

impl ActivityStatus {
    /// Ordinal wire form.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Failed => 3,
            Self::Skipped => 4,
            Self::Retrying => 5,
            Self::Cancelled => 6,
        }
    }

    /// Parse the ordinal wire form.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Running),
            2 => Some(Self::Completed),
            3 => Some(Self::Failed),
            4 => Some(Self::Skipped),
            5 => Some(Self::Retrying),
            6 => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Retrying => "RETRYING",
            Self::Cancelled => "CANCELLED",
        };
        write!(f, "{}", s)
    }
}

impl Serialize for ActivityStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for ActivityStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i32::deserialize(deserializer)?;
        Self::from_i32(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown activity status ordinal {}", value)))
    }
}

/// History row for one attempt of one activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityExecution {
    /// Row id (ULID)
    pub id: String,

    /// Instance this attempt belongs to
    pub workflow_instance_id: String,

    /// Activity id from the definition
    pub activity_id: String,

    /// Handler type key
    pub activity_type: String,

    /// Attempt status
    pub status: ActivityStatus,

    /// Resolved input handed to the handler
    #[serde(default)]
    pub input: JsonMap,

    /// Handler output, when the attempt completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonMap>,

    /// Fault, when the attempt failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowFault>,

    /// 1-based attempt counter
    pub attempt: u32,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// `completed_at - started_at` in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl ActivityExecution {
    /// New `Running` row for an attempt about to execute.
    pub fn begin(
        workflow_instance_id: impl Into<String>,
        activity_id: impl Into<String>,
        activity_type: impl Into<String>,
        input: JsonMap,
        attempt: u32,
    ) -> Self {
        Self {
            id: Ulid::new().to_string(),
            workflow_instance_id: workflow_instance_id.into(),
            activity_id: activity_id.into(),
            activity_type: activity_type.into(),
            status: ActivityStatus::Running,
            input,
            output: None,
            error: None,
            attempt,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Finish the attempt: stamps `completed_at` and `duration_ms`.
    pub fn finish(
        &mut self,
        status: ActivityStatus,
        output: Option<JsonMap>,
        error: Option<WorkflowFault>,
    ) {
        let now = Utc::now();
        self.status = status;
        self.output = output;
        self.error = error;
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_status_ordinals() {
        for ordinal in 0..7 {
            let status = ActivityStatus::from_i32(ordinal).unwrap();
            assert_eq!(status.as_i32(), ordinal);
        }
        assert_eq!(ActivityStatus::from_i32(7), None);
        assert_eq!(serde_json::to_string(&ActivityStatus::Skipped).unwrap(), "4");
    }

    #[test]
    fn test_begin_and_finish() {
        let mut row = ActivityExecution::begin("inst-1", "a", "log", JsonMap::new(), 1);
        assert_eq!(row.status, ActivityStatus::Running);
        assert_eq!(row.attempt, 1);
        assert!(row.completed_at.is_none());

        row.finish(ActivityStatus::Completed, Some(JsonMap::new()), None);
        assert_eq!(row.status, ActivityStatus::Completed);
        let completed = row.completed_at.expect("completed_at set");
        assert_eq!(
            row.duration_ms.unwrap(),
            (completed - row.started_at).num_milliseconds()
        );
    }

    #[test]
    fn test_execution_serialization_camel_case() {
        let row = ActivityExecution::begin("inst-1", "a", "log", JsonMap::new(), 2);
        let value = serde_json::to_value(&row).unwrap();
        assert!(value.get("workflowInstanceId").is_some());
        assert!(value.get("activityType").is_some());
        assert_eq!(value.get("attempt"), Some(&serde_json::json!(2)));
    }
}
