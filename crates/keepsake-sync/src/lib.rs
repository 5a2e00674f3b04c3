//! Keepsake relay synchronization engine.
//!
//! Backs up everything an identity has published (and everything that
//! mentions it) from a working set of relays, then republishes the backup
//! to the relays the identity's newest contact list marks as writable.
//!
//! # Modules
//!
//! - [`fetch`] - Fetch pass: query relays, deduplicate, filter foreign contact lists
//! - [`membership`] - Relay set resolution from the newest contact list
//! - [`broadcast`] - Broadcast pass: windowed publish with `OK` accounting
//! - [`engine`] - Facade chaining the passes
//! - [`transport`] - Connector seam (WebSocket in production, scripted mocks in tests)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │   Working set   │  (configured relays)
//! └────────┬────────┘
//!          │ fetch pass, batches of 10
//!          ▼
//! ┌─────────────────┐
//! │   DedupStore    │  first-seen record per id
//! └────────┬────────┘
//!          │ newest first
//!          ▼
//! ┌─────────────────┐
//! │MembershipResolver│ newest kind-3 → write relays
//! └────────┬────────┘
//!          │ broadcast pass, batches of 10
//!          ▼
//! ┌─────────────────┐
//! │    Relay set    │  publish + count accepted OKs
//! └─────────────────┘
//! ```
//!
//! Every relay session reports into one [`StatusTracker`]; callers render
//! or subscribe to it for progress.

pub mod batch;
pub mod broadcast;
pub mod config;
pub mod dedupe;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod membership;
pub mod relay;
pub mod session;
pub mod status;
pub mod transport;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use batch::{Pass, PassReport, RelayFailure};
pub use config::SyncConfig;
pub use dedupe::DedupStore;
pub use engine::{CycleReport, Gathered, SyncEngine};
pub use membership::{MembershipResolver, RelaySet, infer_identity};
pub use session::SessionLimits;
pub use status::{Phase, RelayStatusEntry, StatusSummary, StatusTracker};
pub use transport::{MockConnector, MockRelay, RelayConnection, RelayConnector, WebSocketConnector};
