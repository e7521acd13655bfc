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

//! Narrow service locator for handler-internal dependencies.
//!
//! Handlers declare what they need when their owner wires the locator;
//! there is no ambient or global resolution. The locator is populated once
//! at startup and snapshot-shared read-only into every context.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-keyed read-only dependency map.
#[derive(Clone, Default)]
pub struct ServiceLocator {
    services: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

/// Builder collecting services before the locator is frozen.
#[derive(Default)]
pub struct ServiceLocatorBuilder {
    services: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl ServiceLocatorBuilder {
    /// Register a service instance under its concrete type.
    pub fn provide<T: Any + Send + Sync>(mut self, service: Arc<T>) -> Self {
        self.services.insert(TypeId::of::<T>(), service);
        self
    }

    /// Freeze into a shareable locator.
    pub fn build(self) -> ServiceLocator {
        ServiceLocator {
            services: Arc::new(self.services),
        }
    }
}

impl ServiceLocator {
    pub fn builder() -> ServiceLocatorBuilder {
        ServiceLocatorBuilder::default()
    }

    /// Look up a service by type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeMailer {
        from: String,
    }

    #[test]
    fn test_provide_and_get() {
        let locator = ServiceLocator::builder()
            .provide(Arc::new(FakeMailer {
                from: "noreply@example.test".to_string(),
            }))
            .build();

        let mailer = locator.get::<FakeMailer>().expect("registered service");
        assert_eq!(mailer.from, "noreply@example.test");
        assert_eq!(locator.len(), 1);
    }

    #[test]
    fn test_missing_service() {
        let locator = ServiceLocator::default();
        assert!(locator.get::<FakeMailer>().is_none());
        assert!(locator.is_empty());
    }
}
