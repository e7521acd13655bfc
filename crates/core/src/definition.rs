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

//! Workflow definition types
//!
//! ## Purpose
//! A definition is the versioned blueprint a workflow instance executes:
//! named activities, guarded transitions between them, optional input/output
//! schemas, and an optional trigger.
//!
//! ## Invariants
//! - `start_activity_id` names an activity in `activities`
//! - every transition endpoint names an activity in `activities`
//! - activity ids are unique within one definition
//! - a `Scheduled` trigger carries a parseable cron expression
//!
//! `validate()` enforces all of the above and is called on save and on start.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::JsonMap;

/// Definition validation error
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    /// Start activity does not exist in the activity list
    #[error("start activity '{0}' is not defined")]
    UnknownStartActivity(String),

    /// A transition references an activity id that does not exist
    #[error("transition endpoint '{0}' is not a defined activity")]
    UnknownTransitionEndpoint(String),

    /// Two activities share the same id
    #[error("duplicate activity id '{0}'")]
    DuplicateActivityId(String),

    /// A scheduled trigger has a missing or unparseable cron expression
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
}

/// How a workflow gets started.
///
/// Serialized as its ordinal integer (`Manual = 0` ... `Workflow = 4`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerType {
    /// Started explicitly through the control plane
    Manual,
    /// Started by the cron scheduler
    Scheduled,
    /// Started by an external event
    Event,
    /// Started by an API call with a payload
    Api,
    /// Started by another workflow
    Workflow,
}

impl TriggerType {
    /// Ordinal wire form.
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Manual => 0,
            Self::Scheduled => 1,
            Self::Event => 2,
            Self::Api => 3,
            Self::Workflow => 4,
        }
    }

    /// Parse the ordinal wire form.
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Manual),
            1 => Some(Self::Scheduled),
            2 => Some(Self::Event),
            3 => Some(Self::Api),
            4 => Some(Self::Workflow),
            _ => None,
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Manual => "MANUAL",
            Self::Scheduled => "SCHEDULED",
            Self::Event => "EVENT",
            Self::Api => "API",
            Self::Workflow => "WORKFLOW",
        };
        write!(f, "{}", s)
    }
}

impl Serialize for TriggerType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.as_i32())
    }
}

impl<'de> Deserialize<'de> for TriggerType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i32::deserialize(deserializer)?;
        Self::from_i32(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown trigger type ordinal {}", value)))
    }
}

/// Trigger attached to a definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerDefinition {
    /// Trigger kind
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,

    /// Six-field cron expression (seconds included); required for `Scheduled`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,

    /// Input handed to instances started by this trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<JsonMap>,
}

/// Primitive type expected for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    /// Runtime type test against a JSON value.
    pub fn matches(self, value: &serde_json::Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        write!(f, "{}", s)
    }
}

/// One field of a data schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSchema {
    /// Expected runtime type; `None` accepts any value
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub field_type: Option<FieldType>,
}

/// Shape declaration for workflow input or output.
///
/// Input schemas gate `start` (see the engine's input validation); output
/// schemas select which state keys become the final workflow output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSchema {
    /// Declared fields, keyed by name
    #[serde(default)]
    pub properties: HashMap<String, FieldSchema>,

    /// Field names that must be present and non-null
    #[serde(default)]
    pub required: Vec<String>,
}

/// A single named step of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityDefinition {
    /// Activity id, unique within the definition
    pub id: String,

    /// Handler type key (case-insensitive lookup in the activity registry)
    #[serde(rename = "type")]
    pub activity_type: String,

    /// Static handler configuration
    #[serde(default)]
    pub properties: JsonMap,

    /// activity-input-name -> expression over instance input/state/output
    #[serde(default)]
    pub input_mappings: HashMap<String, String>,

    /// state-key -> activity-output-name copied into instance state on success
    #[serde(default)]
    pub output_mappings: HashMap<String, String>,

    /// Pre-execution skip predicate; activity is skipped when it evaluates false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Per-activity timeout; overrides the definition and engine defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Per-activity retry policy; overrides the definition and engine defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl ActivityDefinition {
    /// Minimal activity with an id and a handler type.
    pub fn new(id: impl Into<String>, activity_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            activity_type: activity_type.into(),
            properties: JsonMap::new(),
            input_mappings: HashMap::new(),
            output_mappings: HashMap::new(),
            condition: None,
            timeout: None,
            retry_policy: None,
        }
    }
}

fn default_priority() -> i32 {
    100
}

/// Directed, optionally guarded edge between two activities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionDefinition {
    /// Source activity id
    pub from: String,

    /// Target activity id
    pub to: String,

    /// Predicate (`LHS OP RHS`); empty or absent means unconditional
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Lower fires first
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// Fallback edge, consulted only when no non-default transition matched
    #[serde(default)]
    pub is_default: bool,
}

impl TransitionDefinition {
    /// Unconditional transition at default priority.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
            priority: default_priority(),
            is_default: false,
        }
    }

    /// Guarded transition.
    pub fn when(from: impl Into<String>, to: impl Into<String>, condition: impl Into<String>) -> Self {
        Self {
            condition: Some(condition.into()),
            ..Self::new(from, to)
        }
    }

    /// Fallback transition used when nothing else matched.
    pub fn fallback(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            is_default: true,
            ..Self::new(from, to)
        }
    }
}

/// Versioned workflow blueprint; immutable once saved except for `is_active`.
///
/// Primary key is `(name, version)`. Saving under an existing name creates
/// `version = max + 1` and deactivates prior versions (see the definition
/// repository).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Workflow name (version-independent identity)
    pub name: String,

    /// Version assigned by the repository on save
    pub version: i32,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Entry activity id
    pub start_activity_id: String,

    /// Ordered activity list; ids unique
    pub activities: Vec<ActivityDefinition>,

    /// Guarded edges between activities
    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,

    /// Input shape; gates `start`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<DataSchema>,

    /// Output shape; projects final state into workflow output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<DataSchema>,

    /// How instances of this definition get started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerDefinition>,

    /// Fallback retry policy for activities without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_retry_policy: Option<RetryPolicy>,

    /// Fallback activity timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    /// Free-form labels
    #[serde(default)]
    pub tags: Vec<String>,

    /// Only the active version of a name is started by `Engine::start`
    pub is_active: bool,

    /// Set on first save
    pub created_at: DateTime<Utc>,

    /// Touched by `set_active`
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// New unsaved definition (version 0 until the repository assigns one).
    pub fn new(name: impl Into<String>, start_activity_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            version: 0,
            description: None,
            start_activity_id: start_activity_id.into(),
            activities: Vec::new(),
            transitions: Vec::new(),
            input_schema: None,
            output_schema: None,
            trigger: None,
            default_retry_policy: None,
            timeout: None,
            tags: Vec::new(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up an activity by id.
    pub fn activity(&self, id: &str) -> Option<&ActivityDefinition> {
        self.activities.iter().find(|a| a.id == id)
    }

    /// True when the trigger is `Scheduled`.
    pub fn is_scheduled(&self) -> bool {
        self.trigger
            .as_ref()
            .map(|t| t.trigger_type == TriggerType::Scheduled)
            .unwrap_or(false)
    }

    /// Enforce the structural invariants.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut ids: HashSet<&str> = HashSet::with_capacity(self.activities.len());
        for activity in &self.activities {
            if !ids.insert(activity.id.as_str()) {
                return Err(DefinitionError::DuplicateActivityId(activity.id.clone()));
            }
        }

        if !ids.contains(self.start_activity_id.as_str()) {
            return Err(DefinitionError::UnknownStartActivity(
                self.start_activity_id.clone(),
            ));
        }

        for transition in &self.transitions {
            if !ids.contains(transition.from.as_str()) {
                return Err(DefinitionError::UnknownTransitionEndpoint(
                    transition.from.clone(),
                ));
            }
            if !ids.contains(transition.to.as_str()) {
                return Err(DefinitionError::UnknownTransitionEndpoint(
                    transition.to.clone(),
                ));
            }
        }

        if let Some(trigger) = &self.trigger {
            if trigger.trigger_type == TriggerType::Scheduled {
                let expr = trigger
                    .cron_expression
                    .as_deref()
                    .ok_or_else(|| DefinitionError::InvalidCron("missing expression".into()))?;
                cron::Schedule::from_str(expr)
                    .map_err(|e| DefinitionError::InvalidCron(format!("{}: {}", expr, e)))?;
            }
        }

        Ok(())
    }
}
