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

//! Long-running queue consumer loop.
//!
//! Pops jobs and hands them to a handler, acking on success and nacking on
//! failure; redelivery stops at [`MAX_QUEUE_ATTEMPTS`] and the job is
//! dead-lettered. An optional semaphore bounds handler concurrency; with a
//! bound, handlers run on spawned tasks and the ack/nack follows the
//! handler's actual outcome.

use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::QueueResult;
use crate::job::Job;
use crate::queue::JobQueue;

/// Queue-level redelivery cap; beyond this a nacked job is dead-lettered.
pub const MAX_QUEUE_ATTEMPTS: u32 = 5;

/// Idle poll backoff when the pending set is empty.
const IDLE_BACKOFF: Duration = Duration::from_millis(100);

/// Boxed job handler: `Ok` acks, `Err` nacks.
pub type JobHandler = Arc<
    dyn Fn(Job) -> BoxFuture<'static, Result<(), Box<dyn std::error::Error + Send + Sync>>>
        + Send
        + Sync,
>;

/// Consumer driving one subscription over a [`JobQueue`].
pub struct QueueConsumer {
    queue: Arc<dyn JobQueue>,
    concurrency: Option<usize>,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self {
            queue,
            concurrency: None,
        }
    }

    /// Bound concurrent handler invocations with a counting semaphore.
    pub fn with_concurrency(mut self, max_concurrency: usize) -> Self {
        self.concurrency = Some(max_concurrency.max(1));
        self
    }

    /// Run until cancelled. In-flight handlers are awaited on shutdown.
    pub async fn run(&self, handler: JobHandler, cancel: CancellationToken) -> QueueResult<()> {
        let semaphore = self
            .concurrency
            .map(|n| Arc::new(Semaphore::new(n)));
        let mut tasks: JoinSet<()> = JoinSet::new();

        loop {
            // Reap finished handler tasks without blocking.
            while tasks.try_join_next().is_some() {}

            if cancel.is_cancelled() {
                break;
            }

            // Claim a concurrency slot before popping so a full pool does
            // not strand claimed jobs in flight.
            let permit = match &semaphore {
                Some(semaphore) => {
                    let acquired = tokio::select! {
                        _ = cancel.cancelled() => break,
                        permit = semaphore.clone().acquire_owned() => permit,
                    };
                    match acquired {
                        Ok(permit) => Some(permit),
                        Err(_) => break,
                    }
                }
                None => None,
            };

            let job = match self.queue.pop().await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(IDLE_BACKOFF) => continue,
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "queue pop failed");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(IDLE_BACKOFF) => continue,
                    }
                }
            };

            let queue = Arc::clone(&self.queue);
            let handler = Arc::clone(&handler);

            match permit {
                Some(permit) => {
                    tasks.spawn(async move {
                        handle_one(queue, handler, job).await;
                        drop(permit);
                    });
                }
                None => handle_one(queue, handler, job).await,
            }
        }

        while tasks.join_next().await.is_some() {}
        debug!("queue consumer stopped");
        Ok(())
    }
}

async fn handle_one(queue: Arc<dyn JobQueue>, handler: JobHandler, job: Job) {
    let message_id = job.message_id.clone();
    let attempt = job.attempt;

    match handler(job).await {
        Ok(()) => {
            if let Err(e) = queue.ack(&message_id).await {
                error!(message_id = %message_id, error = %e, "ack failed");
            }
        }
        Err(e) => {
            let requeue = attempt < MAX_QUEUE_ATTEMPTS;
            warn!(
                message_id = %message_id,
                attempt,
                requeue,
                error = %e,
                "job handler failed"
            );
            if let Err(e) = queue.nack(&message_id, requeue).await {
                error!(message_id = %message_id, error = %e, "nack failed");
            }
        }
    }
}

#[cfg(all(test, feature = "memory-backend"))]
mod tests {
    use super::*;
    use crate::job::{JobType, PRIORITY_DEFAULT};
    use crate::memory::MemoryJobQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: Arc<AtomicUsize>) -> JobHandler {
        Arc::new(move |_job| {
            let counter = counter.clone();
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test]
    async fn test_consumer_drains_queue() {
        let queue = Arc::new(MemoryJobQueue::new());
        for i in 0..5 {
            queue
                .publish(Job::new(JobType::Start, format!("inst-{}", i), PRIORITY_DEFAULT))
                .await
                .unwrap();
        }

        let handled = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let consumer = QueueConsumer::new(queue.clone());

        let run = tokio::spawn({
            let handler = counting_handler(handled.clone());
            let cancel = cancel.clone();
            async move { consumer.run(handler, cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(handled.load(Ordering::SeqCst), 5);
        assert_eq!(queue.pending_len().await.unwrap(), 0);
        assert_eq!(queue.in_flight_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failing_handler_dead_letters_after_cap() {
        let queue = Arc::new(MemoryJobQueue::new());
        queue
            .publish(Job::new(JobType::Start, "doomed", PRIORITY_DEFAULT))
            .await
            .unwrap();

        let handler: JobHandler =
            Arc::new(|_job| Box::pin(async { Err("boom".to_string().into()) }));
        let cancel = CancellationToken::new();
        let consumer = QueueConsumer::new(queue.clone());

        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { consumer.run(handler, cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(500)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        let dead = queue.dead_letters().await.unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempt, MAX_QUEUE_ATTEMPTS);
        assert_eq!(queue.pending_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let queue = Arc::new(MemoryJobQueue::new());
        for i in 0..6 {
            queue
                .publish(Job::new(JobType::Start, format!("inst-{}", i), PRIORITY_DEFAULT))
                .await
                .unwrap();
        }

        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let handler: JobHandler = Arc::new({
            let live = live.clone();
            let peak = peak.clone();
            move |_job| {
                let live = live.clone();
                let peak = peak.clone();
                Box::pin(async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            }
        });

        let cancel = CancellationToken::new();
        let consumer = QueueConsumer::new(queue.clone()).with_concurrency(2);
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { consumer.run(handler, cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(600)).await;
        cancel.cancel();
        run.await.unwrap().unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(queue.pending_len().await.unwrap(), 0);
    }
}
