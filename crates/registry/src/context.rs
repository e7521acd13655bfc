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

//! Per-call activity context.

use tokio_util::sync::CancellationToken;

use flowforge_core::{ActivityDefinition, JsonMap, WorkflowInstance};

use crate::services::ServiceLocator;

/// Everything one handler invocation sees. Each call receives a fresh
/// context; nothing here is shared mutable state.
#[derive(Clone)]
pub struct ActivityContext {
    /// Read-only snapshot of the instance at dispatch time
    pub instance: WorkflowInstance,

    /// The activity being executed (properties included)
    pub definition: ActivityDefinition,

    /// Input resolved from the activity's input mappings
    pub input: JsonMap,

    /// 1-based attempt number
    pub attempt: u32,

    /// Fires on outer cancellation or activity timeout, whichever first
    pub cancel: CancellationToken,

    /// Handler-internal dependencies, declared at registration
    pub services: ServiceLocator,
}

impl ActivityContext {
    /// Convenience: a property from the activity definition.
    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.definition.properties.get(key)
    }

    /// Convenience: a resolved input value.
    pub fn input_value(&self, key: &str) -> Option<&serde_json::Value> {
        self.input.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_accessors() {
        let mut definition = ActivityDefinition::new("notify", "http");
        definition
            .properties
            .insert("url".to_string(), json!("https://example.test"));

        let mut input = JsonMap::new();
        input.insert("body".to_string(), json!({"ok": true}));

        let ctx = ActivityContext {
            instance: WorkflowInstance::new("order", 1, "notify", JsonMap::new()),
            definition,
            input,
            attempt: 1,
            cancel: CancellationToken::new(),
            services: ServiceLocator::default(),
        };

        assert_eq!(ctx.property("url"), Some(&json!("https://example.test")));
        assert_eq!(ctx.input_value("body"), Some(&json!({"ok": true})));
        assert_eq!(ctx.property("missing"), None);
    }
}
