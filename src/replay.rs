use crate::readings::Reading;
use crate::signer::Signer;
use crate::transport::{BatchOutcome, BatchSender, SignedRequest};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_SPEED: f64 = 1.0;

const ERROR_PREVIEW_LIMIT: usize = 3;

/// Suspends the run between batches. Swapped for a recorder in tests.
pub trait Pacer {
    fn pause(&self, delay: Duration) -> impl Future<Output = ()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioPacer;

impl Pacer for TokioPacer {
    async fn pause(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStatistics {
    pub attempted: u64,
    pub processed: u64,
    pub errors: u64,
    pub batches_sent: u64,
}

impl RunStatistics {
    /// Accepted batches contribute what the server says it processed plus its per-reading
    /// errors; any other outcome fails the whole batch.
    pub fn fold(self, batch_len: usize, outcome: &BatchOutcome) -> Self {
        let batch_len = batch_len as u64;
        let (processed, errors) = match outcome {
            BatchOutcome::Accepted { response, .. } => (
                response.processed,
                response.errors.as_ref().map_or(0, |errors| errors.len() as u64),
            ),
            BatchOutcome::Rejected { .. } | BatchOutcome::TransportFailure { .. } => {
                (0, batch_len)
            }
        };
        Self {
            attempted: self.attempted + batch_len,
            processed: self.processed + processed,
            errors: self.errors + errors,
            batches_sent: self.batches_sent + 1,
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 0.0;
        }
        self.processed as f64 / self.attempted as f64 * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunReport {
    pub stats: RunStatistics,
    pub total_batches: usize,
    pub interrupted: bool,
}

/// Stable ascending sort by parsed instant.
pub fn sort_readings(mut readings: Vec<Reading>) -> Vec<Reading> {
    readings.sort_by_key(|reading| reading.timestamp);
    readings
}

pub fn partition(readings: &[Reading], batch_size: NonZeroUsize) -> std::slice::Chunks<'_, Reading> {
    readings.chunks(batch_size.get())
}

/// Wait before a batch whose first reading is at `next`, given the previous batch ended at
/// `previous`. `None` means send immediately: non-positive or non-finite speed, or a gap that
/// is zero or negative. A scaled wait too large for `Duration` saturates at `Duration::MAX`.
pub fn compute_delay(previous: DateTime<Utc>, next: DateTime<Utc>, speed: f64) -> Option<Duration> {
    if !speed.is_finite() || speed <= 0.0 {
        return None;
    }
    let gap = (next - previous).to_std().ok()?;
    let delay = Duration::try_from_secs_f64(gap.as_secs_f64() / speed).unwrap_or(Duration::MAX);
    (!delay.is_zero()).then_some(delay)
}

pub struct Replayer {
    signer: Signer,
    device_id: String,
    batch_size: NonZeroUsize,
    speed: f64,
}

impl Replayer {
    pub fn new(signer: Signer, device_id: String, batch_size: NonZeroUsize, speed: f64) -> Self {
        Self {
            signer,
            device_id,
            batch_size,
            speed,
        }
    }

    /// Replays `readings` one batch at a time in timestamp order. Cancellation is honored
    /// before each batch and while pacing; an in-flight request always runs to completion.
    pub async fn run<S, P>(
        &self,
        readings: Vec<Reading>,
        sender: &S,
        pacer: &P,
        cancel: &CancellationToken,
    ) -> RunReport
    where
        S: BatchSender,
        P: Pacer,
    {
        let readings = sort_readings(readings);
        let total_batches = readings.len().div_ceil(self.batch_size.get());
        let mut stats = RunStatistics::default();
        let mut interrupted = false;
        let mut previous_end: Option<DateTime<Utc>> = None;

        for (index, batch) in partition(&readings, self.batch_size).enumerate() {
            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }

            if let (Some(previous), Some(first)) = (previous_end, batch.first()) {
                if let Some(delay) = compute_delay(previous, first.timestamp, self.speed) {
                    tracing::info!(
                        delay_secs = delay.as_secs_f64(),
                        "waiting {:.1}s",
                        delay.as_secs_f64()
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            interrupted = true;
                            break;
                        }
                        _ = pacer.pause(delay) => {}
                    }
                }
            }

            tracing::info!(
                batch = index + 1,
                total = total_batches,
                len = batch.len(),
                "sending batch"
            );
            let outcome = match SignedRequest::build(&self.signer, &self.device_id, batch) {
                Ok(request) => sender.send(&request).await,
                Err(err) => BatchOutcome::TransportFailure {
                    cause: format!("failed to serialize batch: {err}"),
                },
            };
            log_outcome(&outcome);

            stats = stats.fold(batch.len(), &outcome);
            previous_end = batch.last().map(|reading| reading.timestamp);
        }

        if interrupted {
            tracing::warn!(
                sent = stats.batches_sent,
                total = total_batches,
                "replay interrupted; no further batches will be sent"
            );
        }
        tracing::info!(
            attempted = stats.attempted,
            processed = stats.processed,
            errors = stats.errors,
            interrupted,
            "replay complete: success rate {:.1}%",
            stats.success_rate()
        );

        RunReport {
            stats,
            total_batches,
            interrupted,
        }
    }
}

fn log_outcome(outcome: &BatchOutcome) {
    match outcome {
        BatchOutcome::Accepted { response, .. } => {
            tracing::info!(processed = response.processed, "batch accepted");
            if let Some(errors) = &response.errors {
                tracing::warn!(count = errors.len(), "server reported errors in batch");
                for error in errors.iter().take(ERROR_PREVIEW_LIMIT) {
                    match error.as_str() {
                        Some(text) => tracing::warn!("  - {text}"),
                        None => tracing::warn!("  - {error}"),
                    }
                }
                if errors.len() > ERROR_PREVIEW_LIMIT {
                    tracing::warn!("  ... and {} more errors", errors.len() - ERROR_PREVIEW_LIMIT);
                }
            }
        }
        BatchOutcome::Rejected { status, error, .. } => {
            let message = error
                .as_ref()
                .and_then(|detail| detail.message.as_deref())
                .unwrap_or("Unknown error");
            tracing::warn!(status = status.as_u16(), error = message, "batch rejected");
        }
        BatchOutcome::TransportFailure { cause } => {
            tracing::warn!(cause = %cause, "batch failed before a response was received");
        }
    }

    if let Some(remaining) = outcome.rate_limit_remaining() {
        tracing::info!(remaining, "rate limit remaining");
    }
}
