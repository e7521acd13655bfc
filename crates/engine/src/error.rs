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

//! Engine error taxonomy.
//!
//! Every engine entry point returns `Result<_, EngineError>`; the `code()`
//! accessor yields the stable machine-readable code the control plane
//! forwards to callers. Activity-provided codes are not represented here -
//! they flow through the instance's error document verbatim.

use flowforge_locks::LockError;
use flowforge_persistence::PersistenceError;

/// Engine entry-point failure.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No definition exists under the requested name
    #[error("workflow '{0}' not found")]
    WorkflowNotFound(String),

    /// The name exists but no version is active
    #[error("workflow '{0}' has no active version")]
    WorkflowInactive(String),

    /// Start input failed schema validation
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No instance with the given id
    #[error("instance '{0}' not found")]
    InstanceNotFound(String),

    /// The instance references a definition version that no longer exists
    #[error("definition for instance '{0}' not found")]
    DefinitionNotFound(String),

    /// The per-instance lock could not be acquired within the wait budget
    #[error("could not acquire lock for instance '{0}'")]
    LockFailed(String),

    /// Signal delivery on an instance that is not suspended
    #[error("instance '{0}' is not suspended")]
    NotSuspended(String),

    /// Signal name does not match the recorded suspend key
    #[error("signal mismatch: expected '{expected}', received '{received}'")]
    SignalMismatch { expected: String, received: String },

    /// `current_activity_id` names an activity missing from the definition
    #[error("activity '{0}' not found in definition")]
    ActivityNotFound(String),

    /// No handler registered for the activity's type
    #[error("no handler registered for activity type '{0}'")]
    UnknownActivityType(String),

    /// Cancellation propagated out of an engine call
    #[error("operation cancelled")]
    Cancelled,

    /// Persistence failure
    #[error("storage error: {0}")]
    Storage(#[from] PersistenceError),

    /// Anything else
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::WorkflowNotFound(_) => "WORKFLOW_NOT_FOUND",
            Self::WorkflowInactive(_) => "WORKFLOW_INACTIVE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            Self::DefinitionNotFound(_) => "DEFINITION_NOT_FOUND",
            Self::LockFailed(_) => "LOCK_FAILED",
            Self::NotSuspended(_) => "NOT_SUSPENDED",
            Self::SignalMismatch { .. } => "SIGNAL_MISMATCH",
            Self::ActivityNotFound(_) => "ACTIVITY_NOT_FOUND",
            Self::UnknownActivityType(_) => "UNKNOWN_ACTIVITY_TYPE",
            Self::Cancelled => "CANCELLED",
            Self::Storage(_) | Self::Unexpected(_) => "UNEXPECTED_ERROR",
        }
    }
}

impl From<LockError> for EngineError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Cancelled(_) => Self::Cancelled,
            LockError::Backend(message) => Self::Unexpected(message),
        }
    }
}

/// Result alias for engine entry points.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(EngineError::WorkflowNotFound("x".into()).code(), "WORKFLOW_NOT_FOUND");
        assert_eq!(EngineError::LockFailed("x".into()).code(), "LOCK_FAILED");
        assert_eq!(
            EngineError::SignalMismatch {
                expected: "a".into(),
                received: "b".into()
            }
            .code(),
            "SIGNAL_MISMATCH"
        );
        assert_eq!(EngineError::Cancelled.code(), "CANCELLED");
        assert_eq!(EngineError::Unexpected("x".into()).code(), "UNEXPECTED_ERROR");
    }

    #[test]
    fn test_lock_error_conversion() {
        let cancelled: EngineError = LockError::Cancelled("k".into()).into();
        assert!(matches!(cancelled, EngineError::Cancelled));
        let backend: EngineError = LockError::Backend("down".into()).into();
        assert!(matches!(backend, EngineError::Unexpected(_)));
    }
}
