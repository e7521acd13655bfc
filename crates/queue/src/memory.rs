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

//! In-memory job queue (testing and single-process deployments).
//!
//! Ordering comes from the `BTreeMap` key `(priority, queued_at_ms,
//! message_id)`; all three sets live behind one mutex, so pop's
//! pending-to-in-flight move is atomic.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::error::{QueueError, QueueResult};
use crate::job::Job;
use crate::queue::JobQueue;

type ScoreKey = (i32, i64, String);

#[derive(Default)]
struct Inner {
    pending: BTreeMap<ScoreKey, Job>,
    in_flight: HashMap<String, Job>,
    dead: Vec<Job>,
}

/// Mutex-guarded in-memory queue.
#[derive(Clone, Default)]
pub struct MemoryJobQueue {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn score_key(job: &Job) -> ScoreKey {
        (
            job.priority,
            job.queued_at.timestamp_millis(),
            job.message_id.clone(),
        )
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn publish(&self, mut job: Job) -> QueueResult<String> {
        job.message_id = Ulid::new().to_string();
        job.queued_at = chrono::Utc::now();
        let message_id = job.message_id.clone();

        let mut inner = self.inner.lock().await;
        inner.pending.insert(Self::score_key(&job), job);
        Ok(message_id)
    }

    async fn pop(&self) -> QueueResult<Option<Job>> {
        let mut inner = self.inner.lock().await;
        match inner.pending.pop_first() {
            Some((_, job)) => {
                inner.in_flight.insert(job.message_id.clone(), job.clone());
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn ack(&self, message_id: &str) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .in_flight
            .remove(message_id)
            .map(|_| ())
            .ok_or_else(|| QueueError::NotInFlight(message_id.to_string()))
    }

    async fn nack(&self, message_id: &str, requeue: bool) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        let mut job = inner
            .in_flight
            .remove(message_id)
            .ok_or_else(|| QueueError::NotInFlight(message_id.to_string()))?;

        if requeue {
            job.attempt += 1;
            job.queued_at = chrono::Utc::now();
            inner.pending.insert(Self::score_key(&job), job);
        } else {
            inner.dead.push(job);
        }
        Ok(())
    }

    async fn pending_len(&self) -> QueueResult<usize> {
        Ok(self.inner.lock().await.pending.len())
    }

    async fn in_flight_len(&self) -> QueueResult<usize> {
        Ok(self.inner.lock().await.in_flight.len())
    }

    async fn dead_letters(&self) -> QueueResult<Vec<Job>> {
        Ok(self.inner.lock().await.dead.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobType, PRIORITY_DEFAULT, PRIORITY_MANUAL, PRIORITY_SCHEDULED};

    #[tokio::test]
    async fn test_publish_assigns_identity() {
        let queue = MemoryJobQueue::new();
        let id = queue.publish(Job::start("inst", PRIORITY_DEFAULT)).await.unwrap();
        assert!(!id.is_empty());
        assert_eq!(queue.pending_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_pop_respects_priority_then_fifo() {
        let queue = MemoryJobQueue::new();
        queue.publish(Job::start("low-a", PRIORITY_DEFAULT)).await.unwrap();
        queue.publish(Job::start("urgent", PRIORITY_MANUAL)).await.unwrap();
        queue.publish(Job::start("scheduled", PRIORITY_SCHEDULED)).await.unwrap();
        queue.publish(Job::start("low-b", PRIORITY_DEFAULT)).await.unwrap();

        let order: Vec<String> = {
            let mut ids = Vec::new();
            while let Some(job) = queue.pop().await.unwrap() {
                ids.push(job.instance_id.clone());
                queue.ack(&job.message_id).await.unwrap();
            }
            ids
        };
        assert_eq!(order, vec!["urgent", "scheduled", "low-a", "low-b"]);
    }

    #[tokio::test]
    async fn test_pop_moves_in_flight_and_ack_clears() {
        let queue = MemoryJobQueue::new();
        queue.publish(Job::start("inst", PRIORITY_DEFAULT)).await.unwrap();

        let job = queue.pop().await.unwrap().unwrap();
        assert_eq!(queue.pending_len().await.unwrap(), 0);
        assert_eq!(queue.in_flight_len().await.unwrap(), 1);

        queue.ack(&job.message_id).await.unwrap();
        assert_eq!(queue.in_flight_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_nack_requeues_with_bumped_attempt() {
        let queue = MemoryJobQueue::new();
        queue.publish(Job::start("inst", PRIORITY_DEFAULT)).await.unwrap();

        let job = queue.pop().await.unwrap().unwrap();
        queue.nack(&job.message_id, true).await.unwrap();

        let redelivered = queue.pop().await.unwrap().unwrap();
        assert_eq!(redelivered.message_id, job.message_id);
        assert_eq!(redelivered.attempt, 2);
        assert_eq!(redelivered.priority, job.priority);
    }

    #[tokio::test]
    async fn test_nack_without_requeue_dead_letters() {
        let queue = MemoryJobQueue::new();
        queue.publish(Job::start("inst", PRIORITY_DEFAULT)).await.unwrap();

        let job = queue.pop().await.unwrap().unwrap();
        queue.nack(&job.message_id, false).await.unwrap();

        assert_eq!(queue.pending_len().await.unwrap(), 0);
        assert_eq!(queue.in_flight_len().await.unwrap(), 0);
        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].instance_id, "inst");
    }

    #[tokio::test]
    async fn test_ack_unknown_message_errors() {
        let queue = MemoryJobQueue::new();
        let result = queue.ack("nope").await;
        assert!(matches!(result, Err(QueueError::NotInFlight(_))));
    }

    #[tokio::test]
    async fn test_concurrent_pop_no_double_delivery() {
        let queue = Arc::new(MemoryJobQueue::new());
        for i in 0..20 {
            queue
                .publish(Job::new(JobType::Start, format!("inst-{}", i), PRIORITY_DEFAULT))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(job) = queue.pop().await.unwrap() {
                    seen.push(job.instance_id.clone());
                    queue.ack(&job.message_id).await.unwrap();
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 20);
    }
}
