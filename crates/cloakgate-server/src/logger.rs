//! Write-Behind Logger (spec.md §4.7): three bounded in-memory queues
//! drained by one background task on a fixed tick, generalizing the
//! teacher's `state.rs::run_buffer_flush_loop` (one queue, flush-at-max-size)
//! to three queues with an immediate-flush-at-2x-batch trigger per queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use cloakgate_core::entities::{CapturedEmail, RealtimeEvent, VisitorLog};
use cloakgate_store::RedirectStore;

struct Queues {
    visitor_logs: Mutex<Vec<VisitorLog>>,
    realtime_events: Mutex<Vec<RealtimeEvent>>,
    captured_emails: Mutex<Vec<CapturedEmail>>,
}

pub struct WriteBehindLogger {
    store: Arc<dyn RedirectStore>,
    queues: Queues,
    batch_size: usize,
    immediate_flush_threshold: usize,
    requeue_max: usize,
    realtime_cap: usize,
}

impl WriteBehindLogger {
    pub fn new(
        store: Arc<dyn RedirectStore>,
        batch_size: usize,
        immediate_flush_threshold: usize,
        requeue_max: usize,
        realtime_cap: usize,
    ) -> Self {
        Self {
            store,
            queues: Queues {
                visitor_logs: Mutex::new(Vec::new()),
                realtime_events: Mutex::new(Vec::new()),
                captured_emails: Mutex::new(Vec::new()),
            },
            batch_size,
            immediate_flush_threshold,
            requeue_max,
            realtime_cap,
        }
    }

    /// Non-blocking enqueue from the handler's perspective: append and
    /// return. If any queue has grown to `immediate_flush_threshold` the
    /// caller should trigger an out-of-band flush rather than wait for the
    /// next tick (spec.md §4.7) — callers do this by spawning
    /// `flush_all` when this returns `true`.
    pub async fn enqueue(
        &self,
        visitor_log: VisitorLog,
        realtime_event: RealtimeEvent,
        captured_email: Option<CapturedEmail>,
    ) -> bool {
        let mut should_flush = false;
        {
            let mut q = self.queues.visitor_logs.lock().await;
            q.push(visitor_log);
            should_flush |= q.len() >= self.immediate_flush_threshold;
        }
        {
            let mut q = self.queues.realtime_events.lock().await;
            q.push(realtime_event);
            should_flush |= q.len() >= self.immediate_flush_threshold;
        }
        if let Some(email) = captured_email {
            let mut q = self.queues.captured_emails.lock().await;
            q.push(email);
            should_flush |= q.len() >= self.immediate_flush_threshold;
        }
        should_flush
    }

    /// Drain up to `batch_size` rows from each queue and write them through
    /// to the store. A failed batch of `requeue_max` rows or fewer is
    /// requeued at the head; larger batches are dropped (spec.md §4.7: "log
    /// loss is acceptable — correctness of the redirect is not").
    pub async fn flush_all(&self) {
        self.flush_visitor_logs().await;
        self.flush_realtime_events().await;
        self.flush_captured_emails().await;
    }

    async fn flush_visitor_logs(&self) {
        let batch = {
            let mut q = self.queues.visitor_logs.lock().await;
            take_batch(&mut q, self.batch_size)
        };
        if batch.is_empty() {
            return;
        }
        match self.store.insert_visitor_logs(&batch).await {
            Ok(inserted) => info!(inserted, requested = batch.len(), "visitor log batch flushed"),
            Err(e) => {
                warn!(error = %e, rows = batch.len(), "visitor log batch flush failed");
                self.requeue_or_drop(&self.queues.visitor_logs, batch).await;
            }
        }
    }

    async fn flush_realtime_events(&self) {
        let batch = {
            let mut q = self.queues.realtime_events.lock().await;
            take_batch(&mut q, self.batch_size)
        };
        if !batch.is_empty() {
            match self.store.insert_realtime_events(&batch).await {
                Ok(inserted) => info!(inserted, requested = batch.len(), "realtime event batch flushed"),
                Err(e) => {
                    warn!(error = %e, rows = batch.len(), "realtime event batch flush failed");
                    self.requeue_or_drop(&self.queues.realtime_events, batch).await;
                }
            }
        }

        if let Err(e) = self.store.truncate_realtime_events(self.realtime_cap).await {
            warn!(error = %e, "realtime event truncation failed");
        }
    }

    async fn flush_captured_emails(&self) {
        let batch = {
            let mut q = self.queues.captured_emails.lock().await;
            take_batch(&mut q, self.batch_size)
        };
        if batch.is_empty() {
            return;
        }
        match self.store.insert_captured_emails(&batch).await {
            Ok(inserted) => info!(inserted, requested = batch.len(), "captured email batch flushed"),
            Err(e) => {
                warn!(error = %e, rows = batch.len(), "captured email batch flush failed");
                self.requeue_or_drop(&self.queues.captured_emails, batch).await;
            }
        }
    }

    async fn requeue_or_drop<T>(&self, queue: &Mutex<Vec<T>>, mut batch: Vec<T>) {
        if batch.len() <= self.requeue_max {
            let mut q = queue.lock().await;
            batch.append(&mut std::mem::take(&mut *q));
            *q = batch;
        } else {
            error!(rows = batch.len(), "batch exceeds requeue threshold, dropping");
        }
    }

    /// Background task: one tick every `interval`, flushing all three
    /// queues (spec.md §4.7: "A single background task wakes every 2s").
    pub async fn run_flush_loop(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            self.flush_all().await;
        }
    }

    #[cfg(test)]
    pub async fn visitor_log_queue_len(&self) -> usize {
        self.queues.visitor_logs.lock().await.len()
    }
}

/// Remove and return up to `n` rows from the front of `queue`, preserving
/// the remaining order.
fn take_batch<T>(queue: &mut Vec<T>, n: usize) -> Vec<T> {
    let drain_to = n.min(queue.len());
    queue.drain(0..drain_to).collect()
}
