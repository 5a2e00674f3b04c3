//! Bounded-batch pass runner shared by fetch and broadcast.
//!
//! A pass walks its relay list in fixed-size batches. Batches run strictly
//! one after another; inside a batch every relay operation is a future
//! polled together on the calling task. Batch N+1 only starts after every
//! operation in batch N settled, so at most `batch_size` connections are
//! ever open.
//!
//! Each relay operation yields exactly one outcome, which is merged into the
//! status tracker: `Ok` becomes `Done`, any error becomes `Error` with the
//! error text as detail. Per-relay failures never fail the pass; only
//! cancellation does.

use crate::error::{Error, Result};
use crate::session::SessionLimits;
use crate::status::{Phase, RelayStatusEntry, StatusTracker};
use crate::transport::RelayConnector;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Default number of relays contacted concurrently.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Which pass is running; used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Fetch,
    Broadcast,
}

impl Pass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Broadcast => "broadcast",
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared collaborators for one pass.
#[derive(Clone, Copy)]
pub struct PassContext<'a> {
    pub connector: &'a dyn RelayConnector,
    pub status: &'a StatusTracker,
    pub cancel: &'a CancellationToken,
    pub limits: SessionLimits,
    pub batch_size: usize,
}

/// A relay that failed during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFailure {
    pub url: String,
    pub reason: String,
}

/// Outcome of a completed pass.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub pass: Pass,
    /// Final status of every relay in the pass, sorted by address.
    pub statuses: Vec<RelayStatusEntry>,
    /// Relays that reached `Done`, in pass order.
    pub succeeded: Vec<String>,
    /// Relays that reached `Error`, in pass order.
    pub failed: Vec<RelayFailure>,
    pub duration: Duration,
}

impl PassReport {
    /// Records transferred across every relay (first-seen for fetch,
    /// accepted acknowledgments for broadcast).
    pub fn total_count(&self) -> usize {
        self.statuses.iter().map(|s| s.count).sum()
    }

    /// Final status of one relay.
    pub fn status(&self, url: &str) -> Option<&RelayStatusEntry> {
        self.statuses.iter().find(|s| s.address == url)
    }
}

/// Run `op` against every relay, `batch_size` at a time.
///
/// `op` receives the relay address and is expected to advance the relay's
/// status to `InProgress` and add to its count as it goes; settling the
/// relay is done here.
pub async fn run_pass<F, Fut>(
    ctx: &PassContext<'_>,
    pass: Pass,
    relays: &[String],
    op: F,
) -> Result<PassReport>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let started = Instant::now();
    let relays = unique_in_order(relays);
    let batch_size = ctx.batch_size.max(1);

    ctx.status.begin_pass(relays.iter().map(String::as_str));

    tracing::info!(
        "Starting {} pass: {} relays in {} batches of up to {}",
        pass,
        relays.len(),
        relays.len().div_ceil(batch_size),
        batch_size
    );

    let mut succeeded = Vec::new();
    let mut failed = Vec::new();

    for (index, batch) in relays.chunks(batch_size).enumerate() {
        if ctx.cancel.is_cancelled() {
            abandon(ctx.status, &relays[index * batch_size..]);
            return Err(Error::Cancelled);
        }

        tracing::debug!("{} batch {}: {} relays", pass, index + 1, batch.len());

        let outcomes = join_all(batch.iter().map(|url| {
            let fut = op(url.clone());
            async move {
                ctx.status.update(url, Some(Phase::Connecting), 0);
                metrics::gauge!("relays_in_flight").increment(1.0);
                let outcome = fut.await;
                metrics::gauge!("relays_in_flight").decrement(1.0);
                (url, outcome)
            }
        }))
        .await;

        for (url, outcome) in outcomes {
            match outcome {
                Ok(()) => {
                    ctx.status.update(url, Some(Phase::Done), 0);
                    metrics::counter!("relay_sessions_total", "pass" => pass.as_str(), "outcome" => "done")
                        .increment(1);
                    succeeded.push(url.clone());
                }
                Err(e) => {
                    if matches!(e, Error::Cancelled) {
                        tracing::debug!("{} {}: cancelled", pass, url);
                    } else {
                        tracing::warn!("{} {} failed: {}", pass, url, e);
                    }
                    ctx.status.fail(url, e.to_string());
                    metrics::counter!("relay_sessions_total", "pass" => pass.as_str(), "outcome" => "error")
                        .increment(1);
                    metrics::counter!("relay_failures_total", "reason" => e.reason()).increment(1);
                    failed.push(RelayFailure {
                        url: url.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if ctx.cancel.is_cancelled() {
            abandon(ctx.status, &relays[((index + 1) * batch_size).min(relays.len())..]);
            return Err(Error::Cancelled);
        }
    }

    let duration = started.elapsed();
    metrics::histogram!("pass_duration_seconds", "pass" => pass.as_str())
        .record(duration.as_secs_f64());

    let report = PassReport {
        pass,
        statuses: ctx.status.render(),
        succeeded,
        failed,
        duration,
    };

    tracing::info!(
        "{} pass finished in {:.1}s: {} done, {} failed, {} records",
        pass,
        duration.as_secs_f64(),
        report.succeeded.len(),
        report.failed.len(),
        report.total_count()
    );

    Ok(report)
}

/// Mark relays that will never be contacted.
fn abandon(status: &StatusTracker, relays: &[String]) {
    for url in relays {
        status.fail(url, Error::Cancelled.to_string());
    }
}

fn unique_in_order(relays: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    relays
        .iter()
        .filter(|url| seen.insert(url.as_str()))
        .cloned()
        .collect()
}
