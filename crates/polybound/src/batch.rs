// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded-concurrency fan-out.
//!
//! At most `max` scheduled tasks run at once; the rest queue on a
//! semaphore. Results are keyed by tag, unordered. Cancellation is the
//! caller's business: tasks observe their own cancellation token and
//! return early, and their result (usually [`crate::Error::Canceled`])
//! lands in the result map like any other.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::Result;

pub struct Batch<T> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<(String, Result<T>)>,
}

impl<T: Send + 'static> Batch<T> {
    /// A group that runs at most `max` tasks concurrently.
    pub fn new(max: usize) -> Self {
        Batch {
            semaphore: Arc::new(Semaphore::new(max.max(1))),
            tasks: JoinSet::new(),
        }
    }

    /// Schedules a task. `tag` disambiguates its result; scheduling two
    /// tasks under one tag keeps only one of their results.
    pub fn go<F>(&mut self, tag: impl Into<String>, fut: F)
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let tag = tag.into();
        self.tasks.spawn(async move {
            // the semaphore is never closed, so acquire cannot fail
            let _permit = semaphore.acquire_owned().await.ok();
            (tag, fut.await)
        });
    }

    /// Blocks until every scheduled task finished.
    pub async fn wait_and_get_result(mut self) -> HashMap<String, Result<T>> {
        let mut results = HashMap::new();
        while let Some(joined) = self.tasks.join_next().await {
            if let Ok((tag, result)) = joined {
                results.insert(tag, result);
            }
        }
        results
    }
}
