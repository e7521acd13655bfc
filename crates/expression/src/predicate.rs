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

//! Three-token predicate evaluation: `LHS OP RHS`.
//!
//! Both sides resolve through the path evaluator. Fewer than three tokens
//! evaluates to true (unconditional). Numeric operators return false when
//! either side does not parse as a number.

use tracing::warn;

use crate::path::{resolve_path, value_to_display_string, ExprScope};

/// Evaluate a transition/skip predicate against the scope.
pub fn evaluate_predicate(scope: &ExprScope<'_>, expression: &str) -> bool {
    let tokens: Vec<&str> = expression.split_whitespace().collect();
    if tokens.len() < 3 {
        return true;
    }

    let lhs = value_to_display_string(&resolve_path(scope, tokens[0]));
    let op = tokens[1];
    // Everything after the operator is the RHS, so quoted strings keep
    // their inner spaces.
    let rhs_token = tokens[2..].join(" ");
    let rhs = value_to_display_string(&resolve_path(scope, &rhs_token));

    match op {
        "==" => lhs == rhs,
        "!=" => lhs != rhs,
        "<" | "<=" | ">" | ">=" => numeric_compare(&lhs, op, &rhs),
        "contains" => lhs.contains(&rhs),
        "startsWith" => lhs.starts_with(&rhs),
        "endsWith" => lhs.ends_with(&rhs),
        other => {
            warn!(operator = other, "unknown predicate operator");
            false
        }
    }
}

fn numeric_compare(lhs: &str, op: &str, rhs: &str) -> bool {
    let (Ok(l), Ok(r)) = (lhs.parse::<f64>(), rhs.parse::<f64>()) else {
        return false;
    };
    match op {
        "<" => l < r,
        "<=" => l <= r,
        ">" => l > r,
        ">=" => l >= r,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::JsonMap;
    use serde_json::json;

    fn scope_fixture() -> (JsonMap, JsonMap, JsonMap) {
        let mut input = JsonMap::new();
        input.insert("n".to_string(), json!(42));
        input.insert("name".to_string(), json!("Ada Lovelace"));
        let mut state = JsonMap::new();
        state.insert("phase".to_string(), json!("review"));
        (input, state, JsonMap::new())
    }

    #[test]
    fn test_fewer_tokens_is_unconditional() {
        let (input, state, output) = scope_fixture();
        let scope = ExprScope::new(&input, &state, &output);
        assert!(evaluate_predicate(&scope, ""));
        assert!(evaluate_predicate(&scope, "input.n"));
        assert!(evaluate_predicate(&scope, "input.n =="));
    }

    #[test]
    fn test_equality_is_stringwise() {
        let (input, state, output) = scope_fixture();
        let scope = ExprScope::new(&input, &state, &output);
        assert!(evaluate_predicate(&scope, "input.n == 42"));
        assert!(evaluate_predicate(&scope, "state.phase == review"));
        assert!(evaluate_predicate(&scope, "state.phase != done"));
        assert!(!evaluate_predicate(&scope, "input.n == 41"));
    }

    #[test]
    fn test_numeric_comparisons() {
        let (input, state, output) = scope_fixture();
        let scope = ExprScope::new(&input, &state, &output);
        assert!(evaluate_predicate(&scope, "input.n > 10"));
        assert!(evaluate_predicate(&scope, "input.n >= 42"));
        assert!(evaluate_predicate(&scope, "input.n < 100"));
        assert!(!evaluate_predicate(&scope, "input.n <= 10"));
        // Non-numeric side: numeric operators return false
        assert!(!evaluate_predicate(&scope, "state.phase > 10"));
    }

    #[test]
    fn test_string_operators() {
        let (input, state, output) = scope_fixture();
        let scope = ExprScope::new(&input, &state, &output);
        assert!(evaluate_predicate(&scope, "input.name contains Love"));
        assert!(evaluate_predicate(&scope, "input.name startsWith Ada"));
        assert!(evaluate_predicate(&scope, "input.name endsWith lace"));
        assert!(!evaluate_predicate(&scope, "input.name contains Bob"));
    }

    #[test]
    fn test_quoted_rhs_keeps_spaces() {
        let (input, state, output) = scope_fixture();
        let scope = ExprScope::new(&input, &state, &output);
        assert!(evaluate_predicate(&scope, "input.name == \"Ada Lovelace\""));
    }

    #[test]
    fn test_unknown_operator_is_false() {
        let (input, state, output) = scope_fixture();
        let scope = ExprScope::new(&input, &state, &output);
        assert!(!evaluate_predicate(&scope, "input.n ~= 42"));
    }

    #[test]
    fn test_null_sides_compare_as_empty() {
        let (input, state, output) = scope_fixture();
        let scope = ExprScope::new(&input, &state, &output);
        assert!(evaluate_predicate(&scope, "input.missing == \"\""));
        assert!(!evaluate_predicate(&scope, "input.missing > 1"));
    }
}
