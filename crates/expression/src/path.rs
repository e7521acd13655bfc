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

//! Dotted-path resolution and `${path}` interpolation.
//!
//! ## Resolution rules
//! - `input.X[.Y...]`, `state.X[.Y...]`, `output.X[.Y...]` walk the maps;
//!   missing intermediate or leaf keys yield null, never an error
//! - `"..."` is the literal string, unquoted
//! - otherwise the token parses as a number, then a boolean, else it is
//!   returned unchanged as a string

use flowforge_core::{JsonMap, WorkflowInstance};
use serde_json::Value;

/// Read-only view of an instance's three expression roots.
#[derive(Debug, Clone, Copy)]
pub struct ExprScope<'a> {
    pub input: &'a JsonMap,
    pub state: &'a JsonMap,
    pub output: &'a JsonMap,
}

impl<'a> ExprScope<'a> {
    pub fn new(input: &'a JsonMap, state: &'a JsonMap, output: &'a JsonMap) -> Self {
        Self {
            input,
            state,
            output,
        }
    }
}

impl<'a> From<&'a WorkflowInstance> for ExprScope<'a> {
    fn from(instance: &'a WorkflowInstance) -> Self {
        Self {
            input: &instance.input,
            state: &instance.state,
            output: &instance.output,
        }
    }
}

/// Resolve one token against the scope.
pub fn resolve_path(scope: &ExprScope<'_>, token: &str) -> Value {
    let token = token.trim();
    if token.is_empty() {
        return Value::Null;
    }

    if let Some(literal) = token.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        return Value::String(literal.to_string());
    }

    let mut segments = token.split('.');
    let root = segments.next().unwrap_or_default();
    let map = match root {
        "input" => Some(scope.input),
        "state" => Some(scope.state),
        "output" => Some(scope.output),
        _ => None,
    };

    if let Some(map) = map {
        let Some(first) = segments.next() else {
            // Bare root: expose the whole map
            return Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
        };
        let mut current = match map.get(first) {
            Some(value) => value.clone(),
            None => return Value::Null,
        };
        for segment in segments {
            current = match current.get(segment) {
                Some(value) => value.clone(),
                None => return Value::Null,
            };
        }
        return current;
    }

    if let Ok(int) = token.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = token.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    match token {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(token.to_string()),
    }
}

/// String form used by predicate comparison and interpolation:
/// null is empty, strings are unquoted, everything else is compact JSON.
pub fn value_to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Rewrite a template, substituting every `${path}` placeholder.
///
/// Null resolves to the empty string. An unmatched `${` terminates
/// scanning; the remainder is copied through verbatim.
pub fn interpolate(scope: &ExprScope<'_>, template: &str) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let value = resolve_path(scope, &after[..end]);
                result.push_str(&value_to_display_string(&value));
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                return result;
            }
        }
    }

    result.push_str(rest);
    result
}
