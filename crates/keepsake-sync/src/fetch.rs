//! Fetch pass: gather an identity's records from a working set of relays.
//!
//! Every relay receives one `REQ` carrying all filters and streams matching
//! records until it signals end-of-stored-events. Records land in a shared
//! [`DedupStore`]; a relay's count only grows for records it delivered
//! first, so summed counts equal the number of unique records.
//!
//! Contact lists (`kind == 3`) written by anyone other than the identity are
//! dropped before they reach the store: the `#p` filter pulls in other
//! people's contact lists that merely mention the identity, and those must
//! never be mistaken for the identity's own relay set.

use crate::batch::{Pass, PassContext, PassReport, run_pass};
use crate::dedupe::DedupStore;
use crate::error::{Error, Result};
use crate::session::RelaySession;
use crate::status::Phase;
use keepsake_core::{ClientMessage, Filter, Record, RelayMessage};

/// Subscription id used for every fetch `REQ`.
pub const SUBSCRIPTION_ID: &str = "keepsake-backup";

/// Records gathered by one fetch pass plus per-relay results.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    /// Unique records in first-seen order.
    pub records: Vec<Record>,
    pub report: PassReport,
}

/// Runs fetch passes.
pub struct FetchCoordinator<'a> {
    ctx: PassContext<'a>,
}

impl<'a> FetchCoordinator<'a> {
    pub fn new(ctx: PassContext<'a>) -> Self {
        Self { ctx }
    }

    /// Query every relay in `working_set` with `filters`.
    ///
    /// `identity` must be normalized hex. Per-relay failures are recorded in
    /// the report; only cancellation fails the pass.
    pub async fn fetch(
        &self,
        filters: &[Filter],
        identity: &str,
        working_set: &[String],
    ) -> Result<FetchOutcome> {
        let store = DedupStore::new();
        let ctx = self.ctx;

        let report = run_pass(&ctx, Pass::Fetch, working_set, |url| {
            fetch_from_relay(ctx, url, filters, identity, &store)
        })
        .await?;

        let records = store.into_records();
        tracing::info!(
            "Fetched {} unique records from {} relays",
            records.len(),
            report.succeeded.len()
        );

        Ok(FetchOutcome { records, report })
    }
}

async fn fetch_from_relay(
    ctx: PassContext<'_>,
    url: String,
    filters: &[Filter],
    identity: &str,
    store: &DedupStore,
) -> Result<()> {
    let mut session = RelaySession::open(ctx.connector, &url, ctx.limits, ctx.cancel).await?;

    session
        .send(&ClientMessage::Req {
            subscription_id: SUBSCRIPTION_ID,
            filters,
        })
        .await?;
    ctx.status.update(&url, Some(Phase::InProgress), 0);

    loop {
        let Some(message) = session.next_message().await? else {
            // Closed before EOSE: keep whatever arrived.
            tracing::debug!("{} closed before end of stored events", url);
            return Ok(());
        };

        match message {
            RelayMessage::Event {
                subscription_id,
                record,
            } if subscription_id == SUBSCRIPTION_ID => {
                metrics::counter!("fetch_records_received_total").increment(1);

                if record.is_membership() && !record.is_membership_for(identity) {
                    metrics::counter!("fetch_records_filtered_total").increment(1);
                    continue;
                }

                if store.insert(*record) {
                    metrics::counter!("fetch_records_accepted_total").increment(1);
                    ctx.status.update(&url, None, 1);
                }
            }
            RelayMessage::EndOfStoredEvents(subscription_id)
                if subscription_id == SUBSCRIPTION_ID =>
            {
                // Best effort: the relay may already be gone.
                if let Err(e) = session.send(&ClientMessage::Close(SUBSCRIPTION_ID)).await {
                    tracing::trace!("{}: CLOSE not sent: {}", url, e);
                }
                session.close().await;
                return Ok(());
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } if subscription_id == SUBSCRIPTION_ID => {
                return Err(Error::ConnectionFailure(format!(
                    "subscription closed by relay: {message}"
                )));
            }
            RelayMessage::Notice(notice) => {
                tracing::debug!("{} notice: {}", url, notice);
            }
            other => {
                tracing::trace!("{} ignored message: {:?}", url, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionLimits;
    use keepsake_core::backup_filters;
    use crate::status::StatusTracker;
    use crate::transport::{MockConnector, MockRelay};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    const ME: &str = "82341f882b6eabcd2ba7f1ef90aad961cf074af15b9ef44a09f9d2a8fbfbe6a2";
    const OTHER: &str = "3bf0c63fcb93463407af97a5e5ee64fa883d107ef9e558472c4eb9aaaefa459d";

    /// Short test ids padded to a full 32-byte hex id.
    fn id(short: &str) -> String {
        format!("{short:0>64}")
    }

    fn backup() -> Vec<Filter> {
        backup_filters(ME).unwrap()
    }

    fn record(short: &str, pubkey: &str, kind: u64, created_at: u64) -> Record {
        Record {
            id: id(short),
            pubkey: pubkey.to_string(),
            created_at,
            kind,
            tags: vec![],
            content: String::new(),
            sig: "00".repeat(64),
        }
    }

    fn note(short: &str) -> Record {
        record(short, ME, 1, 100)
    }

    fn context<'a>(
        connector: &'a MockConnector,
        status: &'a StatusTracker,
        cancel: &'a CancellationToken,
    ) -> PassContext<'a> {
        PassContext {
            connector,
            status,
            cancel,
            limits: SessionLimits {
                idle_timeout: Duration::from_secs(10),
                session_deadline: Duration::from_secs(120),
            },
            batch_size: 10,
        }
    }

    fn relays(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    // =========================================================================
    // Deduplication and counting
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_relays_count_first_seen() {
        let (a, b, c) = (note("0a"), note("0b"), note("0c"));
        let connector = MockConnector::new()
            .with_relay(
                "ws://r1",
                MockRelay::new().event(&a).event(&b).event(&c).eose(),
            )
            .with_relay(
                "ws://r2",
                MockRelay::new()
                    .delay(Duration::from_secs(1))
                    .event(&c)
                    .event(&a)
                    .event(&b)
                    .eose(),
            );
        let status = StatusTracker::new();
        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(context(&connector, &status, &cancel));

        let outcome = coordinator
            .fetch(&backup(), ME, &relays(&["ws://r1", "ws://r2"]))
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 3);
        let r1 = outcome.report.status("ws://r1").unwrap();
        let r2 = outcome.report.status("ws://r2").unwrap();
        assert_eq!((r1.phase, r1.count), (Phase::Done, 3));
        assert_eq!((r2.phase, r2.count), (Phase::Done, 0));
        assert_eq!(outcome.report.total_count(), outcome.records.len());
    }

    #[tokio::test]
    async fn test_req_carries_all_filters() {
        let connector = MockConnector::new().with_relay("ws://r1", MockRelay::new().eose());
        let status = StatusTracker::new();
        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(context(&connector, &status, &cancel));

        coordinator
            .fetch(&backup(), ME, &relays(&["ws://r1"]))
            .await
            .unwrap();

        let sent = connector.sent_frames("ws://r1");
        assert_eq!(sent.len(), 2);
        let req: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(req[0], "REQ");
        assert_eq!(req[1], SUBSCRIPTION_ID);
        assert_eq!(req[2]["authors"][0], ME);
        assert_eq!(req[3]["#p"][0], ME);
        assert_eq!(sent[1], format!("[\"CLOSE\",\"{SUBSCRIPTION_ID}\"]"));
    }

    #[tokio::test]
    async fn test_foreign_contact_lists_are_dropped() {
        let mine = record("01", ME, 3, 200);
        let theirs = record("02", OTHER, 3, 300);
        let mention = record("03", OTHER, 1, 300);
        let connector = MockConnector::new().with_relay(
            "ws://r1",
            MockRelay::new()
                .event(&mine)
                .event(&theirs)
                .event(&mention)
                .eose(),
        );
        let status = StatusTracker::new();
        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(context(&connector, &status, &cancel));

        let outcome = coordinator
            .fetch(&backup(), ME, &relays(&["ws://r1"]))
            .await
            .unwrap();

        let ids: Vec<_> = outcome.records.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec![id("01"), id("03")]);
        assert_eq!(outcome.report.status("ws://r1").unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_other_subscriptions_are_ignored() {
        let stray = serde_json::json!(["EVENT", "someone-else", note("ff")]).to_string();
        let connector = MockConnector::new().with_relay(
            "ws://r1",
            MockRelay::new()
                .frame(stray)
                .frame(r#"["NOTICE","slow down"]"#)
                .frame(r#"["AUTH","challenge"]"#)
                .event(&note("01"))
                .eose(),
        );
        let status = StatusTracker::new();
        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(context(&connector, &status, &cancel));

        let outcome = coordinator
            .fetch(&backup(), ME, &relays(&["ws://r1"]))
            .await
            .unwrap();

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].id, id("01"));
    }

    // =========================================================================
    // Relay failures
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_one_refusing_relay_does_not_block_others() {
        let names: Vec<String> = (0..10).map(|i| format!("ws://r{i}")).collect();
        let mut connector = MockConnector::new();
        for (i, url) in names.iter().enumerate() {
            let relay = if i == 4 {
                MockRelay::refusing()
            } else {
                MockRelay::new().event(&note(&format!("{i:02}"))).eose()
            };
            connector = connector.with_relay(url.clone(), relay);
        }
        let status = StatusTracker::new();
        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(context(&connector, &status, &cancel));

        let outcome = coordinator.fetch(&backup(), ME, &names).await.unwrap();

        assert_eq!(outcome.report.succeeded.len(), 9);
        assert_eq!(outcome.report.failed.len(), 1);
        assert_eq!(outcome.report.failed[0].url, "ws://r4");
        assert_eq!(outcome.records.len(), 9);
    }

    #[tokio::test]
    async fn test_malformed_frame_fails_that_relay() {
        let connector = MockConnector::new()
            .with_relay("ws://bad", MockRelay::new().frame("not json"))
            .with_relay("ws://good", MockRelay::new().event(&note("01")).eose());
        let status = StatusTracker::new();
        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(context(&connector, &status, &cancel));

        let outcome = coordinator
            .fetch(&backup(), ME, &relays(&["ws://bad", "ws://good"]))
            .await
            .unwrap();

        assert_eq!(outcome.report.status("ws://bad").unwrap().phase, Phase::Error);
        assert_eq!(outcome.report.status("ws://good").unwrap().phase, Phase::Done);
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test]
    async fn test_closed_subscription_is_an_error() {
        let closed = format!(r#"["CLOSED","{SUBSCRIPTION_ID}","auth-required: sign in"]"#);
        let connector =
            MockConnector::new().with_relay("ws://r1", MockRelay::new().frame(closed));
        let status = StatusTracker::new();
        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(context(&connector, &status, &cancel));

        let outcome = coordinator
            .fetch(&backup(), ME, &relays(&["ws://r1"]))
            .await
            .unwrap();

        let entry = outcome.report.status("ws://r1").unwrap();
        assert_eq!(entry.phase, Phase::Error);
        assert!(entry.detail.as_deref().unwrap().contains("auth-required"));
    }

    #[tokio::test]
    async fn test_close_before_eose_keeps_records() {
        let connector = MockConnector::new().with_relay(
            "ws://r1",
            MockRelay::new().event(&note("01")).event(&note("02")).close(),
        );
        let status = StatusTracker::new();
        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(context(&connector, &status, &cancel));

        let outcome = coordinator
            .fetch(&backup(), ME, &relays(&["ws://r1"]))
            .await
            .unwrap();

        let entry = outcome.report.status("ws://r1").unwrap();
        assert_eq!((entry.phase, entry.count), (Phase::Done, 2));
    }

    // =========================================================================
    // Timing
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_silent_relays_terminate_within_batch_bound() {
        let names: Vec<String> = (0..25).map(|i| format!("ws://silent{i:02}")).collect();
        let mut connector = MockConnector::new();
        for url in &names {
            connector = connector.with_relay(url.clone(), MockRelay::silent());
        }
        let status = StatusTracker::new();
        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(context(&connector, &status, &cancel));

        let started = Instant::now();
        let outcome = coordinator.fetch(&backup(), ME, &names).await.unwrap();
        let elapsed = started.elapsed();

        // ceil(25 / 10) batches, each bounded by one idle window
        assert!(elapsed <= Duration::from_secs(30), "took {elapsed:?}");
        assert!(connector.peak_connections() <= 10);
        assert_eq!(outcome.report.failed.len(), 25);
        assert!(
            outcome
                .report
                .statuses
                .iter()
                .all(|s| s.detail.as_deref() == Some("timeout"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_keeps_partial_progress_on_status() {
        let connector = MockConnector::new().with_relay(
            "ws://stall",
            MockRelay::new().event(&note("01")).delay(Duration::from_secs(60)).eose(),
        );
        let status = StatusTracker::new();
        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(context(&connector, &status, &cancel));

        let outcome = coordinator
            .fetch(&backup(), ME, &relays(&["ws://stall"]))
            .await
            .unwrap();

        let entry = outcome.report.status("ws://stall").unwrap();
        assert_eq!(entry.phase, Phase::Error);
        assert_eq!(entry.count, 1);
        assert_eq!(outcome.records.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_pass() {
        let names: Vec<String> = (0..15).map(|i| format!("ws://r{i:02}")).collect();
        let mut connector = MockConnector::new();
        for url in &names {
            connector = connector.with_relay(url.clone(), MockRelay::silent());
        }
        let status = StatusTracker::new();
        let cancel = CancellationToken::new();
        let coordinator = FetchCoordinator::new(context(&connector, &status, &cancel));

        let filters = backup();
        let canceller = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(
            coordinator.fetch(&filters, ME, &names),
            canceller
        );

        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(connector.total_connects(), 10);
        assert_eq!(connector.open_connections(), 0);
    }
}
