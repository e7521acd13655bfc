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

//! Expression evaluation errors.
//!
//! Only the scripted surface produces errors; the simple surface resolves
//! missing paths to null and malformed predicates to `true`/`false`.

/// Scripted-expression failure.
#[derive(Debug, thiserror::Error)]
pub enum ExpressionError {
    /// The script did not parse
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The script raised at runtime
    #[error("evaluation error: {0}")]
    Evaluation(String),

    /// Wall-clock, operation, or depth limit exhausted
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),
}

/// Result alias for expression evaluation.
pub type ExpressionResult<T> = Result<T, ExpressionError>;
