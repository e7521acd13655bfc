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

//! Workflow instance - the mutable execution record of one definition run.
//!
//! ## Lifecycle
//! Created `Pending` by the control plane (or scheduler), moved to `Running`
//! on the first engine pass, possibly `Suspended` at a signal wait, and
//! finally one of the terminal statuses. Terminal statuses are absorbing:
//! no further writes to `status`, `current_activity_id`, or `output`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use ulid::Ulid;

use crate::JsonMap;

/// Reserved state key holding the suspend key while an instance is suspended.
pub const SUSPEND_KEY: &str = "_suspend_key";

/// Instance lifecycle status.
///
/// Serialized as its ordinal integer (`Pending = 0` ... `TimedOut = 7`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstanceStatus {
    /// Created, not yet picked up by the engine
    Pending,
    /// Created by the scheduler, waiting for its start job
    Scheduled,
    /// Being advanced by a worker
    Running,
    /// Parked waiting for an external signal
    Suspended,
    /// Finished successfully
    Completed,
    /// Finished with an error outside the retry budget
    Failed,
    /// Cancelled by request
    Cancelled,
    /// Workflow-level timeout
    TimedOut,
}

impl InstanceStatus {
    /// Ordinal wire form.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::Scheduled => 1,
            Self::Running => 2,
            Self::Suspended => 3,
            Self::Completed => 4,
            Self::Failed => 5,
            Self::Cancelled => 6,
            Self::TimedOut => 7,
        }
    }

    /// Parse the ordinal wire form.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Scheduled),
            2 => Some(Self::Running),
            3 => Some(Self::Suspended),
            4 => Some(Self::Completed),
            5 => Some(Self::Failed),
            6 => Some(Self::Cancelled),
            7 => Some(Self::TimedOut),
            _ => None,
        }
    }

    /// Terminal statuses are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Suspended => "SUSPENDED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::TimedOut => "TIMED_OUT",
        };
        write!(f, "{}", s)
    }
}

impl Serialize for InstanceStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for InstanceStatus {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i32::deserialize(deserializer)?;
        Self::from_i32(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown instance status ordinal {}", value)))
    }
}

/// Error document attached to a `Failed` instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowFault {
    /// Machine-readable code (engine taxonomy or activity-provided, verbatim)
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Activity that produced the fault, when one did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,

    /// When the fault was recorded
    pub occurred_at: DateTime<Utc>,
}

impl WorkflowFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            activity_id: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn at_activity(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }
}

/// Mutable execution record for one run of a definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    /// Opaque unique id (ULID, sortable by creation time)
    pub id: String,

    /// Definition name this instance executes
    pub workflow_name: String,

    /// Definition version this instance executes
    pub workflow_version: i32,

    /// Lifecycle status
    pub status: InstanceStatus,

    /// Start input, immutable after creation
    #[serde(default)]
    pub input: JsonMap,

    /// Final output; written once on completion
    #[serde(default)]
    pub output: JsonMap,

    /// Engine scratchpad; holds `_suspend_key` while suspended and
    /// `signal_<k>` entries delivered with a resume
    #[serde(default)]
    pub state: JsonMap,

    /// Next activity to attempt; null exactly when terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_activity_id: Option<String>,

    /// Populated only when `status == Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowFault>,

    /// Attempts spent on the current activity; reset on any success
    pub retry_count: u32,

    /// Parent instance when started by another workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_instance_id: Option<String>,

    /// Caller-supplied correlation key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Worker currently (or last) advancing this instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,

    pub created_at: DateTime<Utc>,

    /// Set on the first transition out of `Pending`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Set on the first entry to a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Touched on every persist; drives timed-out reaping
    pub updated_at: DateTime<Utc>,

    /// Free-form labels
    #[serde(default)]
    pub tags: HashMap<String, String>,

    /// Caller-supplied metadata, not interpreted by the engine
    #[serde(default)]
    pub metadata: JsonMap,
}

impl WorkflowInstance {
    /// New `Pending` instance for a definition.
    pub fn new(
        workflow_name: impl Into<String>,
        workflow_version: i32,
        start_activity_id: impl Into<String>,
        input: JsonMap,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Ulid::new().to_string(),
            workflow_name: workflow_name.into(),
            workflow_version,
            status: InstanceStatus::Pending,
            input,
            output: JsonMap::new(),
            state: JsonMap::new(),
            current_activity_id: Some(start_activity_id.into()),
            error: None,
            retry_count: 0,
            parent_instance_id: None,
            correlation_id: None,
            worker_id: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            tags: HashMap::new(),
            metadata: JsonMap::new(),
        }
    }

    /// True when the status is absorbing.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Suspend key recorded in state, when suspended.
    pub fn suspend_key(&self) -> Option<&str> {
        self.state.get(SUSPEND_KEY).and_then(|v| v.as_str())
    }
}
