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

//! Retry policy with exponential backoff and error-code filters.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry policy for activities.
///
/// Resolution order at execution time: activity policy, then definition
/// default, then engine default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempt budget for one activity traversal (first try included)
    pub max_attempts: u32,

    /// Backoff before the first retry
    pub initial_delay: Duration,

    /// Cap for exponential growth
    pub max_delay: Duration,

    /// Backoff multiplier per retry (2.0 doubles)
    pub backoff_multiplier: f64,

    /// When non-empty, only these error codes are retried
    #[serde(default)]
    pub retry_on: Vec<String>,

    /// Error codes never retried; takes precedence over `retry_on`
    #[serde(default)]
    pub do_not_retry_on: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            retry_on: Vec::new(),
            do_not_retry_on: Vec::new(),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry_count` (1-based):
    /// `min(initial_delay * multiplier^(retry_count - 1), max_delay)`.
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        let exponent = retry_count.saturating_sub(1).min(63);
        let factor = self.backoff_multiplier.powi(exponent as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Whether an error with `code` passes the retry filters.
    ///
    /// `do_not_retry_on` wins; otherwise a non-empty `retry_on` must contain
    /// the code.
    pub fn code_is_retriable(&self, code: &str) -> bool {
        if self.do_not_retry_on.iter().any(|c| c == code) {
            return false;
        }
        if !self.retry_on.is_empty() {
            return self.retry_on.iter().any(|c| c == code);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(300));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(policy.backoff_delay(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_backoff_delay_capped() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(policy.backoff_delay(10), Duration::from_secs(5));
    }

    #[test]
    fn test_code_filters() {
        let policy = RetryPolicy {
            retry_on: vec!["NET".to_string()],
            do_not_retry_on: vec!["FATAL".to_string()],
            ..Default::default()
        };
        assert!(policy.code_is_retriable("NET"));
        assert!(!policy.code_is_retriable("OTHER"));
        assert!(!policy.code_is_retriable("FATAL"));

        let open = RetryPolicy::default();
        assert!(open.code_is_retriable("ANYTHING"));
    }

    #[test]
    fn test_do_not_retry_wins_over_retry_on() {
        let policy = RetryPolicy {
            retry_on: vec!["X".to_string()],
            do_not_retry_on: vec!["X".to_string()],
            ..Default::default()
        };
        assert!(!policy.code_is_retriable("X"));
    }
}
