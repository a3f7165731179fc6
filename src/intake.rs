//! Event intake pipeline
//!
//! Receives event records from the collector and runs each one through
//! filter → throttle → dispatch as its own task. Failures are contained to the
//! event that caused them; the intake loop only ends on shutdown or when the
//! event source goes away.

use crate::alerts::{Admission, NotificationDispatcher, RejectReason, ThrottleLedger};
use crate::clock::Clock;
use crate::error::IntakeError;
use crate::events::EventRecord;
use crate::provider::SendReceipt;
use chrono::Local;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;

/// What happened to a single event
#[derive(Debug)]
pub enum IntakeOutcome {
    /// Not an error-class event
    Ignored,
    /// Throttled by the ledger
    Suppressed(RejectReason),
    /// Notification accepted by the provider
    Delivered(SendReceipt),
    /// Admitted or not, handling failed
    Failed(IntakeError),
}

/// Counters of intake outcomes since startup
#[derive(Debug, Default)]
pub struct IntakeStats {
    received: AtomicU64,
    ignored: AtomicU64,
    suppressed: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of `IntakeStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeSnapshot {
    pub received: u64,
    pub ignored: u64,
    pub suppressed: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl IntakeStats {
    fn record(&self, outcome: &IntakeOutcome) {
        self.received.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            IntakeOutcome::Ignored => &self.ignored,
            IntakeOutcome::Suppressed(_) => &self.suppressed,
            IntakeOutcome::Delivered(_) => &self.delivered,
            IntakeOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IntakeSnapshot {
        IntakeSnapshot {
            received: self.received.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            suppressed: self.suppressed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Filters events and drives the throttle and dispatch steps
pub struct EventIntake {
    ledger: Arc<ThrottleLedger>,
    dispatcher: Arc<NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    permits: Arc<Semaphore>,
    stats: IntakeStats,
}

impl EventIntake {
    /// Create an intake
    ///
    /// # Arguments
    ///
    /// * `ledger` - Throttle ledger consulted for every error event
    /// * `dispatcher` - Dispatcher used for admitted events
    /// * `clock` - Source of admission timestamps
    /// * `max_concurrent_events` - Upper bound on events handled at once
    pub fn new(
        ledger: Arc<ThrottleLedger>,
        dispatcher: Arc<NotificationDispatcher>,
        clock: Arc<dyn Clock>,
        max_concurrent_events: usize,
    ) -> Self {
        Self {
            ledger,
            dispatcher,
            clock,
            permits: Arc::new(Semaphore::new(max_concurrent_events)),
            stats: IntakeStats::default(),
        }
    }

    pub fn stats(&self) -> IntakeSnapshot {
        self.stats.snapshot()
    }

    /// Run one event through the pipeline
    pub async fn handle(&self, record: EventRecord) -> IntakeOutcome {
        let outcome = self.process(record).await;
        self.stats.record(&outcome);
        outcome
    }

    async fn process(&self, record: EventRecord) -> IntakeOutcome {
        debug!(
            "Event received: time={}, id={}, provider={}, log={}, level={:?}, task={}, opcode={}, machine={}",
            record.timestamp,
            record.id,
            record.provider_name,
            record.log_name,
            record.severity(),
            record.task_name,
            record.op_code,
            record.machine_name
        );

        if !record.is_error() {
            return IntakeOutcome::Ignored;
        }

        let now = self.clock.now();
        let ledger = Arc::clone(&self.ledger);
        let admission = match tokio::task::spawn_blocking(move || ledger.try_admit(now)).await {
            Ok(Ok(admission)) => admission,
            Ok(Err(e)) => {
                error!("Dropping event {} from {}: {}", record.id, record.provider_name, e);
                return IntakeOutcome::Failed(e.into());
            }
            Err(e) => {
                error!("Admission task failed: {}", e);
                return IntakeOutcome::Failed(IntakeError::Task(e.to_string()));
            }
        };

        if let Admission::Rejected(reason) = admission {
            let policy = self.ledger.policy();
            info!(
                "Notification for {} suppressed: {} (at most {} per {}h, {}s apart)",
                record.provider_name,
                reason,
                policy.max_per_window,
                policy.retention_window.num_hours(),
                policy.min_interval.num_seconds()
            );
            return IntakeOutcome::Suppressed(reason);
        }

        let detail = record
            .timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        match self.dispatcher.send(&record.provider_name, &detail).await {
            Ok(receipt) => {
                info!("Notification sent for {} at {}", record.provider_name, detail);
                IntakeOutcome::Delivered(receipt)
            }
            Err(e) => {
                error!("Failed to send notification for {}: {}", record.provider_name, e);
                IntakeOutcome::Failed(e.into())
            }
        }
    }

    /// Consume events until shutdown is signalled or the source closes
    ///
    /// Each event is handled on its own task, bounded by the concurrency
    /// limit. On exit, in-flight events are allowed to finish.
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<EventRecord>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Event intake started");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Event intake received shutdown signal");
                    break;
                }
                received = events.recv() => {
                    let Some(record) = received else {
                        warn!("Event source closed, stopping intake");
                        break;
                    };

                    let permit = match Arc::clone(&self.permits).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let intake = Arc::clone(&self);
                    tasks.spawn(async move {
                        let _permit = permit;
                        intake.handle(record).await;
                    });
                }
            }

            // Reap finished tasks so the set does not grow unbounded
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    error!("Event task panicked: {}", e);
                }
            }
        }

        if !tasks.is_empty() {
            info!("Waiting for {} in-flight events", tasks.len());
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Event task panicked: {}", e);
            }
        }

        let stats = self.stats();
        info!(
            "Event intake stopped: {} received, {} ignored, {} suppressed, {} delivered, {} failed",
            stats.received, stats.ignored, stats.suppressed, stats.delivered, stats.failed
        );
    }
}
