//! One bounded conversation with one relay.
//!
//! A [`RelaySession`] owns the connection for the lifetime of a relay
//! operation and enforces its time limits:
//!
//! - every suspension (connect, send, receive) is bounded by the idle
//!   window, which restarts after each inbound frame
//! - the whole session is bounded by a hard deadline so a relay that
//!   trickles frames just inside the idle window still finishes
//! - the engine's cancellation token aborts any suspension immediately
//!
//! ```text
//! Connecting ──► Streaming ──► Closing ──► Settled
//!      │             │
//!      └──── error / timeout / cancel ───► Settled
//! ```

use crate::error::{Error, Result};
use crate::transport::{RelayConnection, RelayConnector};
use keepsake_core::{ClientMessage, RelayMessage};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;

/// How long a graceful close may take before the socket is simply dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Default idle window.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default hard cap on one session.
pub const DEFAULT_SESSION_DEADLINE: Duration = Duration::from_secs(120);

/// Lifecycle of a [`RelaySession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Streaming,
    Closing,
    Settled,
}

/// Time limits applied to every relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Maximum silence between inbound frames, also bounding connect.
    pub idle_timeout: Duration,
    /// Maximum total session duration.
    pub session_deadline: Duration,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            session_deadline: DEFAULT_SESSION_DEADLINE,
        }
    }
}

/// An open, time-bounded relay connection.
pub struct RelaySession {
    url: String,
    connection: Box<dyn RelayConnection>,
    limits: SessionLimits,
    deadline: Instant,
    cancel: CancellationToken,
    state: SessionState,
}

impl RelaySession {
    /// Connect to `url` within the idle window.
    pub async fn open(
        connector: &dyn RelayConnector,
        url: &str,
        limits: SessionLimits,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let deadline = Instant::now() + limits.session_deadline;
        let connection = bounded(
            cancel,
            window(limits.idle_timeout, deadline),
            connector.connect(url),
        )
        .await??;

        tracing::trace!("Session {}: connecting -> streaming", url);

        Ok(Self {
            url: url.to_string(),
            connection,
            limits,
            deadline,
            cancel: cancel.clone(),
            state: SessionState::Streaming,
        })
    }

    /// Relay address.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Encode and send one client message.
    pub async fn send(&mut self, message: &ClientMessage<'_>) -> Result<()> {
        let frame = message.to_json()?;
        let until = self.window();
        let result = bounded(&self.cancel, until, self.connection.send(frame)).await;
        self.settle_on_error(result.and_then(|sent| sent))
    }

    /// Wait for the next relay message.
    ///
    /// Returns `Ok(None)` once the relay closed the connection. Frames that
    /// do not decode are [`Error::MalformedMessage`].
    pub async fn next_message(&mut self) -> Result<Option<RelayMessage>> {
        let until = self.window();
        let received = bounded(&self.cancel, until, self.connection.recv()).await;

        let result = match received {
            Err(e) => Err(e),
            Ok(None) => {
                tracing::trace!("Session {}: closed by relay", self.url);
                self.state = SessionState::Closing;
                Ok(None)
            }
            Ok(Some(Err(e))) => Err(e),
            Ok(Some(Ok(text))) => RelayMessage::from_json(&text)
                .map(Some)
                .map_err(Error::from_wire),
        };
        self.settle_on_error(result)
    }

    /// Close gracefully, giving the relay a short grace period.
    pub async fn close(mut self) {
        if self.state == SessionState::Streaming {
            self.state = SessionState::Closing;
            if timeout(CLOSE_GRACE, self.connection.close()).await.is_err() {
                tracing::trace!("Session {}: close timed out", self.url);
            }
        }
        self.state = SessionState::Settled;
    }

    fn window(&self) -> Instant {
        window(self.limits.idle_timeout, self.deadline)
    }

    fn settle_on_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.state = SessionState::Settled;
        }
        result
    }
}

/// End of the current idle window, capped by the session deadline.
fn window(idle: Duration, deadline: Instant) -> Instant {
    (Instant::now() + idle).min(deadline)
}

/// Run `fut` until `until`, or until `cancel` fires.
async fn bounded<F: Future>(
    cancel: &CancellationToken,
    until: Instant,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = timeout_at(until, fut) => result.map_err(|_| Error::Timeout),
    }
}
