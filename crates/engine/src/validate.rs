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

//! Start-input validation against a definition's input schema.

use serde_json::Value;

use flowforge_core::{DataSchema, JsonMap};

use crate::error::{EngineError, EngineResult};

/// Validate start input: every required key present and non-null, every
/// provided value conforming to its declared type. The first violation
/// fails with `INVALID_INPUT`, naming the field and the expected type.
pub fn validate_input(schema: &DataSchema, input: &JsonMap) -> EngineResult<()> {
    for required in &schema.required {
        match input.get(required) {
            None | Some(Value::Null) => {
                return Err(EngineError::InvalidInput(format!(
                    "missing required field '{}'",
                    required
                )));
            }
            Some(_) => {}
        }
    }

    for (key, value) in input {
        if value.is_null() {
            continue;
        }
        let Some(field) = schema.properties.get(key) else {
            continue;
        };
        if let Some(expected) = field.field_type {
            if !expected.matches(value) {
                return Err(EngineError::InvalidInput(format!(
                    "field '{}' must be of type {}",
                    key, expected
                )));
            }
        }
    }

    Ok(())
}
