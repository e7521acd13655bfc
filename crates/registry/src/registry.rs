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

//! Name-to-handler dispatch table.
//!
//! Populated at startup, read-only afterwards; lookups are
//! case-insensitive (keys are lowercased on insert and lookup).

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::handler::ActivityHandler;

/// Case-insensitive activity dispatch table.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    handlers: HashMap<String, Arc<dyn ActivityHandler>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under a type key. Re-registering a key replaces
    /// the previous handler (latest wins).
    pub fn register(
        &mut self,
        activity_type: impl Into<String>,
        handler: Arc<dyn ActivityHandler>,
    ) {
        let key = activity_type.into().to_lowercase();
        debug!(activity_type = %key, "registering activity handler");
        self.handlers.insert(key, handler);
    }

    /// Case-insensitive lookup.
    pub fn get(&self, activity_type: &str) -> Option<Arc<dyn ActivityHandler>> {
        self.handlers.get(&activity_type.to_lowercase()).cloned()
    }

    /// Whether a handler is registered for the type.
    pub fn contains(&self, activity_type: &str) -> bool {
        self.handlers.contains_key(&activity_type.to_lowercase())
    }

    /// Registered type keys (lowercased), sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActivityContext;
    use crate::handler::{ActivityOutcome, BoxError};
    use async_trait::async_trait;
    use flowforge_core::JsonMap;

    struct NoopHandler;

    #[async_trait]
    impl ActivityHandler for NoopHandler {
        async fn execute(&self, _ctx: ActivityContext) -> Result<ActivityOutcome, BoxError> {
            Ok(ActivityOutcome::ok(JsonMap::new()))
        }
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut registry = ActivityRegistry::new();
        registry.register("HttpRequest", Arc::new(NoopHandler));

        assert!(registry.get("httprequest").is_some());
        assert!(registry.get("HTTPREQUEST").is_some());
        assert!(registry.get("HttpRequest").is_some());
        assert!(registry.get("other").is_none());
        assert!(registry.contains("hTTPrEQUEST"));
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = ActivityRegistry::new();
        registry.register("log", Arc::new(NoopHandler));
        registry.register("Delay", Arc::new(NoopHandler));
        assert_eq!(registry.names(), vec!["delay".to_string(), "log".to_string()]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_latest_registration_wins() {
        let mut registry = ActivityRegistry::new();
        registry.register("log", Arc::new(NoopHandler));
        registry.register("LOG", Arc::new(NoopHandler));
        assert_eq!(registry.len(), 1);
    }
}
