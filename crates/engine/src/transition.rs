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

//! Transition choice: which activity follows the current one.

use flowforge_core::WorkflowDefinition;
use flowforge_expression::{evaluate_predicate, ExprScope};

/// Pick the next activity after `from`.
///
/// Transitions out of `from` are considered in ascending priority.
/// Non-default transitions match on an empty condition or a true predicate;
/// if none match, the first default transition (still in priority order)
/// wins. `None` terminates the workflow.
pub fn choose_transition(
    definition: &WorkflowDefinition,
    from: &str,
    scope: &ExprScope<'_>,
) -> Option<String> {
    let mut candidates: Vec<_> = definition
        .transitions
        .iter()
        .filter(|t| t.from == from)
        .collect();
    candidates.sort_by_key(|t| t.priority);

    for transition in candidates.iter().filter(|t| !t.is_default) {
        match transition.condition.as_deref() {
            None | Some("") => return Some(transition.to.clone()),
            Some(condition) => {
                if evaluate_predicate(scope, condition) {
                    return Some(transition.to.clone());
                }
            }
        }
    }

    candidates
        .iter()
        .find(|t| t.is_default)
        .map(|t| t.to.clone())
}
