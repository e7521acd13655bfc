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

//! # FlowForge Expressions
//!
//! ## Purpose
//! Two evaluator surfaces over an instance's `input`/`state`/`output` maps:
//!
//! - the **simple** surface (`path`, `predicate`, `interpolate`) used by the
//!   engine for transition guards, activity skip conditions, and input
//!   mappings;
//! - the **scripted** surface ([`ScriptEvaluator`]) with richer JS-like
//!   semantics, exposed to activity handlers only, bounded in wall-clock
//!   time and operation count.
//!
//! The engine itself never evaluates scripts; only the simple surface feeds
//! control flow.

pub mod error;
pub mod path;
pub mod predicate;
pub mod script;

pub use error::{ExpressionError, ExpressionResult};
pub use path::{interpolate, resolve_path, value_to_display_string, ExprScope};
pub use predicate::evaluate_predicate;
pub use script::ScriptEvaluator;
