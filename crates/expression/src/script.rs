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

//! Scripted expression evaluator (rhai-backed).
//!
//! ## Purpose
//! Rich JS-like expressions for activity handlers: arithmetic, array and
//! string methods, and utility callables (`now()`, `uuid()`, `coalesce`,
//! `parse_json`, ...). The engine's own control flow never runs scripts.
//!
//! ## Bounds
//! Every evaluation is capped by a wall-clock deadline (default 5 s), an
//! operation budget, and expression-depth/call-level limits. Exhausting any
//! bound fails with [`ExpressionError::LimitExceeded`].

use chrono::Utc;
use rhai::{Array, Dynamic, Engine, EvalAltResult, Map, Scope};
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::error::{ExpressionError, ExpressionResult};
use crate::path::ExprScope;

const DEFAULT_WALL_CLOCK: Duration = Duration::from_secs(5);
const DEFAULT_MAX_OPERATIONS: u64 = 1_000_000;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_CALL_LEVELS: usize = 32;

/// Bounded rhai evaluator exposed to activity handlers.
#[derive(Debug, Clone)]
pub struct ScriptEvaluator {
    max_duration: Duration,
    max_operations: u64,
}

impl Default for ScriptEvaluator {
    fn default() -> Self {
        Self {
            max_duration: DEFAULT_WALL_CLOCK,
            max_operations: DEFAULT_MAX_OPERATIONS,
        }
    }
}

impl ScriptEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluator with explicit bounds (tests, constrained handlers).
    pub fn with_limits(max_duration: Duration, max_operations: u64) -> Self {
        Self {
            max_duration,
            max_operations,
        }
    }

    /// Evaluate a script with `input`, `state`, and `output` in scope.
    pub fn eval(&self, scope: &ExprScope<'_>, source: &str) -> ExpressionResult<Value> {
        let engine = self.build_engine();

        let mut rhai_scope = Scope::new();
        rhai_scope.push_dynamic("input", json_map_to_dynamic(scope.input));
        rhai_scope.push_dynamic("state", json_map_to_dynamic(scope.state));
        rhai_scope.push_dynamic("output", json_map_to_dynamic(scope.output));

        match engine.eval_with_scope::<Dynamic>(&mut rhai_scope, source) {
            Ok(result) => Ok(dynamic_to_json_value(&result)),
            Err(err) => Err(classify_error(*err)),
        }
    }

    fn build_engine(&self) -> Engine {
        let mut engine = Engine::new();
        engine.set_max_expr_depths(MAX_EXPR_DEPTH, MAX_EXPR_DEPTH);
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        engine.set_max_operations(self.max_operations);

        let deadline = Instant::now() + self.max_duration;
        engine.on_progress(move |_| {
            if Instant::now() >= deadline {
                Some("wall-clock limit exceeded".into())
            } else {
                None
            }
        });

        engine.register_fn("now", || Utc::now().to_rfc3339());
        engine.register_fn("uuid", || uuid::Uuid::new_v4().to_string());

        engine.register_fn("round", |x: f64| x.round());
        engine.register_fn("floor", |x: f64| x.floor());
        engine.register_fn("ceil", |x: f64| x.ceil());
        engine.register_fn("abs", |x: f64| x.abs());
        engine.register_fn("abs", |x: i64| x.abs());
        engine.register_fn("min", |a: i64, b: i64| a.min(b));
        engine.register_fn("max", |a: i64, b: i64| a.max(b));
        engine.register_fn("min", |a: f64, b: f64| a.min(b));
        engine.register_fn("max", |a: f64, b: f64| a.max(b));

        engine.register_fn("length", |a: Array| a.len() as i64);
        engine.register_fn("length", |m: Map| m.len() as i64);
        engine.register_fn("length", |s: &str| s.chars().count() as i64);
        engine.register_fn("first", |a: Array| {
            a.first().cloned().unwrap_or(Dynamic::UNIT)
        });
        engine.register_fn("last", |a: Array| {
            a.last().cloned().unwrap_or(Dynamic::UNIT)
        });

        engine.register_fn("coalesce", |a: Dynamic, b: Dynamic| {
            if a.is_unit() {
                b
            } else {
                a
            }
        });
        engine.register_fn("is_empty", |v: Dynamic| dynamic_is_empty(&v));

        engine.register_fn(
            "parse_json",
            |s: &str| -> Result<Dynamic, Box<EvalAltResult>> {
                serde_json::from_str::<Value>(s)
                    .map(|v| json_value_to_dynamic(&v))
                    .map_err(|e| format!("parse_json: {}", e).into())
            },
        );
        engine.register_fn("to_json", |v: Dynamic| {
            serde_json::to_string(&dynamic_to_json_value(&v)).unwrap_or_default()
        });

        engine
    }
}

fn classify_error(err: EvalAltResult) -> ExpressionError {
    match err {
        EvalAltResult::ErrorParsing(e, pos) => {
            ExpressionError::Syntax(format!("{} @ {}", e, pos))
        }
        EvalAltResult::ErrorTerminated(_, _) => {
            ExpressionError::LimitExceeded("wall-clock limit exceeded".to_string())
        }
        EvalAltResult::ErrorTooManyOperations(_) => {
            ExpressionError::LimitExceeded("operation limit exceeded".to_string())
        }
        EvalAltResult::ErrorStackOverflow(_) => {
            ExpressionError::LimitExceeded("call depth limit exceeded".to_string())
        }
        other => ExpressionError::Evaluation(other.to_string()),
    }
}

fn dynamic_is_empty(value: &Dynamic) -> bool {
    if value.is_unit() {
        return true;
    }
    if let Some(s) = value.read_lock::<rhai::ImmutableString>() {
        return s.is_empty();
    }
    if let Some(a) = value.read_lock::<Array>() {
        return a.is_empty();
    }
    if let Some(m) = value.read_lock::<Map>() {
        return m.is_empty();
    }
    false
}

/// serde_json -> rhai bridging.
pub(crate) fn json_value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(items) => {
            Dynamic::from(items.iter().map(json_value_to_dynamic).collect::<Array>())
        }
        Value::Object(fields) => {
            let mut map = Map::new();
            for (key, field) in fields {
                map.insert(key.as_str().into(), json_value_to_dynamic(field));
            }
            Dynamic::from(map)
        }
    }
}

fn json_map_to_dynamic(map: &flowforge_core::JsonMap) -> Dynamic {
    let mut rhai_map = Map::new();
    for (key, value) in map {
        rhai_map.insert(key.as_str().into(), json_value_to_dynamic(value));
    }
    Dynamic::from(rhai_map)
}

/// rhai -> serde_json bridging.
pub(crate) fn dynamic_to_json_value(value: &Dynamic) -> Value {
    if value.is_unit() {
        return Value::Null;
    }
    if let Ok(b) = value.as_bool() {
        return Value::Bool(b);
    }
    if let Ok(i) = value.as_int() {
        return Value::from(i);
    }
    if let Ok(f) = value.as_float() {
        return serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Some(s) = value.read_lock::<rhai::ImmutableString>() {
        return Value::String(s.to_string());
    }
    if let Some(array) = value.read_lock::<Array>() {
        return Value::Array(array.iter().map(dynamic_to_json_value).collect());
    }
    if let Some(map) = value.read_lock::<Map>() {
        return Value::Object(
            map.iter()
                .map(|(k, v)| (k.to_string(), dynamic_to_json_value(v)))
                .collect(),
        );
    }
    Value::String(value.to_string())
}
