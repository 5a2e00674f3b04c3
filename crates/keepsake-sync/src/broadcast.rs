//! Broadcast pass: republish records to the identity's relay set.
//!
//! Each relay receives every record as `["EVENT", record]`. Publishes are
//! windowed: at most `max_in_flight` records await their `OK` at once, and a
//! new record goes out as each acknowledgment comes back. A relay's count is
//! the number of records it accepted; rejections are logged but not counted.
//!
//! A relay is done once every record has been acknowledged, or when it
//! closes the connection. Going silent for an idle window is a timeout.

use crate::batch::{Pass, PassContext, PassReport, run_pass};
use crate::error::Result;
use crate::membership::RelaySet;
use crate::session::RelaySession;
use crate::status::Phase;
use keepsake_core::{ClientMessage, Event, Record, RelayMessage};
use std::collections::HashSet;

/// Default number of unacknowledged publishes per relay.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Runs broadcast passes.
pub struct BroadcastCoordinator<'a> {
    ctx: PassContext<'a>,
    max_in_flight: usize,
}

impl<'a> BroadcastCoordinator<'a> {
    pub fn new(ctx: PassContext<'a>, max_in_flight: usize) -> Self {
        Self {
            ctx,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Publish `records` to every relay in `relay_set`.
    ///
    /// Records that cannot be expressed as NIP-01 events are skipped with a
    /// warning; they would be rejected by every relay.
    pub async fn broadcast(&self, records: &[Record], relay_set: &RelaySet) -> Result<PassReport> {
        let events = publishable(records);

        tracing::info!(
            "Broadcasting {} records to {} relays",
            events.len(),
            relay_set.len()
        );

        let ctx = self.ctx;
        let window = self.max_in_flight;
        let events = events.as_slice();
        run_pass(&ctx, Pass::Broadcast, &relay_set.to_vec(), |url| {
            publish_to_relay(ctx, url, events, window)
        })
        .await
    }
}

/// Unique records converted to wire events, in input order.
fn publishable(records: &[Record]) -> Vec<Event> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.id.as_str()))
        .filter_map(|r| match r.to_event() {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("Not publishing {}: {}", r.id, e);
                None
            }
        })
        .collect()
}

async fn publish_to_relay(
    ctx: PassContext<'_>,
    url: String,
    events: &[Event],
    window: usize,
) -> Result<()> {
    let mut session = RelaySession::open(ctx.connector, &url, ctx.limits, ctx.cancel).await?;
    ctx.status.update(&url, Some(Phase::InProgress), 0);

    let mut queue = events.iter();
    let mut outstanding: HashSet<String> = HashSet::new();

    loop {
        while outstanding.len() < window {
            let Some(event) = queue.next() else { break };
            session.send(&ClientMessage::Event(event)).await?;
            outstanding.insert(event.id.to_hex());
            metrics::counter!("broadcast_records_sent_total").increment(1);
        }

        if outstanding.is_empty() {
            session.close().await;
            return Ok(());
        }

        let Some(message) = session.next_message().await? else {
            tracing::debug!(
                "{} closed with {} publishes unacknowledged",
                url,
                outstanding.len()
            );
            return Ok(());
        };

        match message {
            RelayMessage::Ok {
                record_id,
                accepted,
                message,
            } => {
                if !outstanding.remove(&record_id) {
                    tracing::trace!("{} acknowledged unknown record {}", url, record_id);
                    continue;
                }
                let label = if accepted { "true" } else { "false" };
                metrics::counter!("broadcast_acks_total", "accepted" => label).increment(1);
                if accepted {
                    ctx.status.update(&url, None, 1);
                } else {
                    tracing::debug!("{} rejected {}: {}", url, record_id, message);
                }
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
