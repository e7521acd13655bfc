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

//! Activity handler contract.

use async_trait::async_trait;

use flowforge_core::JsonMap;

use crate::context::ActivityContext;

/// Boxed error type handlers may bubble up; the engine converts it to a
/// retriable [`ActivityFault`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Typed activity failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityFault {
    /// Machine-readable code; forwarded verbatim into the instance error
    pub code: String,

    /// Human-readable message
    pub message: String,

    /// Whether the retry policy may re-attempt this failure
    pub retriable: bool,
}

impl ActivityFault {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retriable: bool) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            retriable,
        }
    }

    /// Retriable fault.
    pub fn retriable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, true)
    }

    /// Permanent fault; skips the retry budget.
    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(code, message, false)
    }
}

impl std::fmt::Display for ActivityFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// What one activity attempt produced.
#[derive(Debug, Clone)]
pub enum ActivityOutcome {
    /// Success: output map, optionally overriding the transition choice
    Ok {
        output: JsonMap,
        next_activity_id: Option<String>,
    },

    /// Park the instance until a matching signal arrives
    Suspend { suspend_key: String },

    /// Typed failure, subject to the retry policy
    Fail(ActivityFault),
}

impl ActivityOutcome {
    /// Success with output, transition choice left to the engine.
    pub fn ok(output: JsonMap) -> Self {
        Self::Ok {
            output,
            next_activity_id: None,
        }
    }

    /// Success with an explicit next activity.
    pub fn ok_with_next(output: JsonMap, next_activity_id: impl Into<String>) -> Self {
        Self::Ok {
            output,
            next_activity_id: Some(next_activity_id.into()),
        }
    }

    /// Suspend on a named signal.
    pub fn suspend(suspend_key: impl Into<String>) -> Self {
        Self::Suspend {
            suspend_key: suspend_key.into(),
        }
    }

    /// Typed failure.
    pub fn fail(fault: ActivityFault) -> Self {
        Self::Fail(fault)
    }
}

/// One registered activity kind.
///
/// Implementations must be idempotent or replay-tolerant: delivery is
/// at-least-once, serialized only by the per-instance lock. A handler that
/// observes `ctx.cancel` firing must return promptly and must not swallow
/// the cancellation into a success.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    /// Run one attempt.
    async fn execute(&self, ctx: ActivityContext) -> Result<ActivityOutcome, BoxError>;
}
