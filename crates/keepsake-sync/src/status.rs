//! Per-relay progress accounting.
//!
//! The [`StatusTracker`] is the one piece of shared mutable state that every
//! concurrently running relay session writes to. All writes are single merge
//! operations under one lock; readers only ever see cloned snapshots, either
//! on demand through [`StatusTracker::render`] or pushed through the watch
//! channel returned by [`StatusTracker::subscribe`].
//!
//! Entries are created when a pass begins and dropped when the next pass
//! begins; nothing is persisted.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use tokio::sync::watch;

/// Lifecycle phase of one relay within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Queued in a later batch.
    Pending,
    /// Opening the connection.
    Connecting,
    /// Streaming records (fetch) or publishing them (broadcast).
    InProgress,
    /// Finished successfully.
    Done,
    /// Failed; see the entry's `detail`.
    Error,
}

impl Phase {
    /// Whether the relay has reached a terminal phase for this pass.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Lowercase label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Connecting => "connecting",
            Self::InProgress => "in progress",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation-ready snapshot of one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStatusEntry {
    /// Relay address.
    pub address: String,
    /// Current phase.
    pub phase: Phase,
    /// Records transferred through this relay in the current pass.
    pub count: usize,
    /// Failure reason when `phase` is [`Phase::Error`].
    pub detail: Option<String>,
}

impl fmt::Display for RelayStatusEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let host = self
            .address
            .trim_start_matches("wss://")
            .trim_start_matches("ws://");
        write!(f, "{}: {} ({})", host, self.phase, self.count)?;
        if let Some(detail) = &self.detail {
            write!(f, " - {detail}")?;
        }
        Ok(())
    }
}

/// Count of relays per phase, plus the summed transfer count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub pending: usize,
    pub connecting: usize,
    pub in_progress: usize,
    pub done: usize,
    pub error: usize,
    pub transferred: usize,
}

impl StatusSummary {
    /// Relays that have reached a terminal phase.
    pub fn settled(&self) -> usize {
        self.done + self.error
    }

    /// Every relay tracked in the pass.
    pub fn total(&self) -> usize {
        self.pending + self.connecting + self.in_progress + self.settled()
    }
}

#[derive(Debug, Clone)]
struct EntryState {
    phase: Phase,
    count: usize,
    detail: Option<String>,
}

/// Shared relay status table.
pub struct StatusTracker {
    entries: Mutex<BTreeMap<String, EntryState>>,
    updates: watch::Sender<Vec<RelayStatusEntry>>,
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        let (updates, _) = watch::channel(Vec::new());
        Self {
            entries: Mutex::new(BTreeMap::new()),
            updates,
        }
    }

    /// Start a new pass: drop every entry and mark `addresses` as pending.
    pub fn begin_pass<'a, I>(&self, addresses: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut entries = self.entries.lock();
        entries.clear();
        for address in addresses {
            entries.insert(
                address.to_string(),
                EntryState {
                    phase: Phase::Pending,
                    count: 0,
                    detail: None,
                },
            );
        }
        self.publish(&entries);
    }

    /// Merge a phase change and/or a count increment for one relay.
    ///
    /// A relay that already settled keeps its terminal phase; late count
    /// increments are still applied.
    pub fn update(&self, address: &str, phase: Option<Phase>, delta_count: usize) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(address.to_string())
            .or_insert_with(|| EntryState {
                phase: Phase::Pending,
                count: 0,
                detail: None,
            });

        if let Some(phase) = phase {
            if entry.phase.is_settled() {
                tracing::debug!(
                    "Ignoring {} -> {} for settled relay {}",
                    entry.phase,
                    phase,
                    address
                );
            } else if entry.phase != phase {
                tracing::debug!("Relay {}: {} -> {}", address, entry.phase, phase);
                entry.phase = phase;
            }
        }
        entry.count += delta_count;

        self.publish(&entries);
    }

    /// Mark a relay as failed with a reason.
    pub fn fail(&self, address: &str, detail: impl Into<String>) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry(address.to_string())
            .or_insert_with(|| EntryState {
                phase: Phase::Pending,
                count: 0,
                detail: None,
            });
        if entry.phase.is_settled() {
            return;
        }
        entry.phase = Phase::Error;
        entry.detail = Some(detail.into());
        self.publish(&entries);
    }

    /// Snapshot sorted by address.
    pub fn render(&self) -> Vec<RelayStatusEntry> {
        snapshot(&self.entries.lock())
    }

    /// Snapshot of a single relay.
    pub fn get(&self, address: &str) -> Option<RelayStatusEntry> {
        self.entries.lock().get(address).map(|state| RelayStatusEntry {
            address: address.to_string(),
            phase: state.phase,
            count: state.count,
            detail: state.detail.clone(),
        })
    }

    /// Per-phase counts.
    pub fn summary(&self) -> StatusSummary {
        let entries = self.entries.lock();
        let mut summary = StatusSummary::default();
        for state in entries.values() {
            match state.phase {
                Phase::Pending => summary.pending += 1,
                Phase::Connecting => summary.connecting += 1,
                Phase::InProgress => summary.in_progress += 1,
                Phase::Done => summary.done += 1,
                Phase::Error => summary.error += 1,
            }
            summary.transferred += state.count;
        }
        summary
    }

    /// Receive a fresh snapshot after every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<RelayStatusEntry>> {
        self.updates.subscribe()
    }

    fn publish(&self, entries: &BTreeMap<String, EntryState>) {
        // Snapshots are only built when someone is listening.
        if self.updates.receiver_count() > 0 {
            self.updates.send_replace(snapshot(entries));
        }
    }
}

fn snapshot(entries: &BTreeMap<String, EntryState>) -> Vec<RelayStatusEntry> {
    entries
        .iter()
        .map(|(address, state)| RelayStatusEntry {
            address: address.clone(),
            phase: state.phase,
            count: state.count,
            detail: state.detail.clone(),
        })
        .collect()
}
