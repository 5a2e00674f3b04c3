//! Scripted relays for testing.
//!
//! Each [`MockRelay`] describes how one address behaves: refuse the
//! connection, stay silent, replay a script of frames and delays, and
//! optionally acknowledge published records. [`MockConnector`] maps
//! addresses to scripts and records what happened: connections opened,
//! peak concurrency and frames sent.

use super::{RelayConnection, RelayConnector};
use crate::error::{Error, Result};
use crate::fetch::SUBSCRIPTION_ID;
use async_trait::async_trait;
use keepsake_core::Record;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
enum Step {
    Frame(String),
    Delay(Duration),
}

/// Script for one mock relay.
#[derive(Debug, Clone, Default)]
pub struct MockRelay {
    refuse: bool,
    connect_delay: Option<Duration>,
    steps: Vec<Step>,
    close_when_done: bool,
    ack: Option<bool>,
    rejected: HashSet<String>,
}

impl MockRelay {
    /// A relay that accepts the connection and then follows its script.
    pub fn new() -> Self {
        Self::default()
    }

    /// A relay whose connection attempt fails.
    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Self::default()
        }
    }

    /// A relay that accepts the connection and never sends anything.
    pub fn silent() -> Self {
        Self::default()
    }

    /// Delay the connection handshake.
    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    /// Send a raw text frame.
    pub fn frame(mut self, frame: impl Into<String>) -> Self {
        self.steps.push(Step::Frame(frame.into()));
        self
    }

    /// Send `["EVENT", <fetch subscription>, record]`.
    pub fn event(self, record: &Record) -> Self {
        self.frame(json!(["EVENT", SUBSCRIPTION_ID, record]).to_string())
    }

    /// Send `["EOSE", <fetch subscription>]`.
    pub fn eose(self) -> Self {
        self.frame(json!(["EOSE", SUBSCRIPTION_ID]).to_string())
    }

    /// Pause before the next scripted step.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.steps.push(Step::Delay(delay));
        self
    }

    /// Close the connection once the script is exhausted instead of hanging.
    pub fn close(mut self) -> Self {
        self.close_when_done = true;
        self
    }

    /// Answer every published record with `["OK", id, accepted, ""]`.
    pub fn acknowledging(mut self, accepted: bool) -> Self {
        self.ack = Some(accepted);
        self
    }

    /// Acknowledge `id` with `accepted = false`; implies acknowledging others.
    pub fn rejecting(mut self, id: impl Into<String>) -> Self {
        self.ack.get_or_insert(true);
        self.rejected.insert(id.into());
        self
    }
}

#[derive(Debug, Default)]
struct Stats {
    open: AtomicUsize,
    peak: AtomicUsize,
    connects: Mutex<HashMap<String, usize>>,
    sent: Mutex<HashMap<String, Vec<String>>>,
}

/// Connector serving [`MockRelay`] scripts. Unknown addresses are refused.
#[derive(Debug, Default)]
pub struct MockConnector {
    relays: HashMap<String, MockRelay>,
    stats: Arc<Stats>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a script for `url`.
    pub fn with_relay(mut self, url: impl Into<String>, relay: MockRelay) -> Self {
        self.relays.insert(url.into(), relay);
        self
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.stats.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections.
    pub fn peak_connections(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }

    /// Connection attempts made to `url`, refused ones included.
    pub fn connect_count(&self, url: &str) -> usize {
        self.stats.connects.lock().get(url).copied().unwrap_or(0)
    }

    /// Connection attempts across every address.
    pub fn total_connects(&self) -> usize {
        self.stats.connects.lock().values().sum()
    }

    /// Frames sent to `url`, in order.
    pub fn sent_frames(&self, url: &str) -> Vec<String> {
        self.stats.sent.lock().get(url).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl RelayConnector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn RelayConnection>> {
        *self.stats.connects.lock().entry(url.to_string()).or_insert(0) += 1;

        let relay = self
            .relays
            .get(url)
            .ok_or_else(|| Error::ConnectionFailure(format!("unknown relay {url}")))?;

        if let Some(delay) = relay.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if relay.refuse {
            return Err(Error::ConnectionFailure("connection refused".to_string()));
        }

        let open = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(MockConnection {
            url: url.to_string(),
            script: relay.clone(),
            cursor: 0,
            resume_at: None,
            acks: VecDeque::new(),
            closed: false,
            stats: Arc::clone(&self.stats),
        }))
    }
}

struct MockConnection {
    url: String,
    script: MockRelay,
    cursor: usize,
    resume_at: Option<Instant>,
    acks: VecDeque<String>,
    closed: bool,
    stats: Arc<Stats>,
}

impl MockConnection {
    fn queue_ack(&mut self, frame: &str) {
        let Some(default_accept) = self.script.ack else {
            return;
        };
        let Ok(Value::Array(items)) = serde_json::from_str::<Value>(frame) else {
            return;
        };
        if items.first().and_then(Value::as_str) != Some("EVENT") {
            return;
        }
        let Some(id) = items.get(1).and_then(|r| r.get("id")).and_then(Value::as_str) else {
            return;
        };
        let accepted = default_accept && !self.script.rejected.contains(id);
        let reason = if accepted { "" } else { "blocked: test" };
        self.acks
            .push_back(json!(["OK", id, accepted, reason]).to_string());
    }
}

#[async_trait]
impl RelayConnection for MockConnection {
    async fn send(&mut self, frame: String) -> Result<()> {
        if self.closed {
            return Err(Error::ConnectionFailure("connection closed".to_string()));
        }
        self.queue_ack(&frame);
        self.stats
            .sent
            .lock()
            .entry(self.url.clone())
            .or_default()
            .push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        if self.closed {
            return None;
        }
        loop {
            // An interrupted delay resumes where it left off.
            if let Some(resume_at) = self.resume_at {
                tokio::time::sleep_until(resume_at).await;
                self.resume_at = None;
            }

            if let Some(ack) = self.acks.pop_front() {
                return Some(Ok(ack));
            }

            match self.script.steps.get(self.cursor).cloned() {
                Some(Step::Frame(frame)) => {
                    self.cursor += 1;
                    return Some(Ok(frame));
                }
                Some(Step::Delay(delay)) => {
                    self.cursor += 1;
                    self.resume_at = Some(Instant::now() + delay);
                }
                None if self.script.close_when_done => {
                    self.closed = true;
                    return None;
                }
                None => std::future::pending::<()>().await,
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.stats.open.fetch_sub(1, Ordering::SeqCst);
    }
}
