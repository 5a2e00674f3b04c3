//! Engine facade: gather, resolve, publish.
//!
//! [`SyncEngine`] owns the collaborators every pass needs (connector,
//! status tracker, cancellation token, configuration) and exposes the
//! backup cycle as separate steps so callers can stop after any of them:
//!
//! ```text
//! gather(identity, working set) ──► records (newest first)
//!        │
//! resolve(records, identity) ─────► relay set
//!        │
//! publish(records, relay set) ────► per-relay report
//! ```
//!
//! Relay lists are passed explicitly between steps; the engine keeps no
//! relay state of its own beyond the live status table.

use crate::batch::{PassContext, PassReport};
use crate::broadcast::BroadcastCoordinator;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::fetch::FetchCoordinator;
use crate::membership::{MembershipResolver, RelaySet, infer_identity};
use crate::status::StatusTracker;
use crate::transport::{RelayConnector, WebSocketConnector};
use keepsake_core::{Record, backup_filters, normalize_identity, sort_newest_first};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Records gathered for one identity.
#[derive(Debug, Clone)]
pub struct Gathered {
    /// Normalized hex identity.
    pub identity: String,
    /// Unique records, newest first.
    pub records: Vec<Record>,
    pub report: PassReport,
}

/// Result of a full gather → resolve → publish cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub gathered: Gathered,
    pub relay_set: RelaySet,
    pub broadcast: PassReport,
}

/// Relay synchronization engine.
pub struct SyncEngine {
    connector: Arc<dyn RelayConnector>,
    config: SyncConfig,
    status: Arc<StatusTracker>,
    cancel: CancellationToken,
}

impl SyncEngine {
    /// Engine dialing real relays over WebSocket.
    pub fn new(config: SyncConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WebSocketConnector::new()))
    }

    /// Engine using a custom connector.
    pub fn with_connector(config: SyncConfig, connector: Arc<dyn RelayConnector>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            config,
            status: Arc::new(StatusTracker::new()),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Live status of the current (or last) pass.
    pub fn status(&self) -> Arc<StatusTracker> {
        Arc::clone(&self.status)
    }

    /// Token that aborts the in-flight pass when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort the in-flight pass. Later passes on this engine fail immediately.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Fetch every record by or mentioning `identity` from `working_set`.
    ///
    /// `identity` may be hex or `npub`.
    pub async fn gather(&self, identity: &str, working_set: &[String]) -> Result<Gathered> {
        let identity = normalize_identity(identity)?;
        let filters = backup_filters(&identity)?;

        let outcome = FetchCoordinator::new(self.context())
            .fetch(&filters, &identity, working_set)
            .await?;

        let mut records = outcome.records;
        sort_newest_first(&mut records);

        Ok(Gathered {
            identity,
            records,
            report: outcome.report,
        })
    }

    /// Write relays from the identity's newest contact list.
    pub fn resolve(&self, records: &[Record], identity: &str) -> Result<RelaySet> {
        let identity = normalize_identity(identity)?;
        MembershipResolver::new(self.config.normalize_options()).resolve(records, &identity)
    }

    /// Publish `records` to every relay in `relay_set`.
    pub async fn publish(&self, records: &[Record], relay_set: &RelaySet) -> Result<PassReport> {
        BroadcastCoordinator::new(self.context(), self.config.max_in_flight)
            .broadcast(records, relay_set)
            .await
    }

    /// Gather, resolve and publish.
    ///
    /// A missing or unusable contact list ends the cycle after gathering;
    /// nothing is published.
    pub async fn run_cycle(&self, identity: &str, working_set: &[String]) -> Result<CycleReport> {
        let gathered = self.gather(identity, working_set).await?;
        let relay_set = self.resolve(&gathered.records, &gathered.identity)?;
        let broadcast = self.publish(&gathered.records, &relay_set).await?;

        Ok(CycleReport {
            gathered,
            relay_set,
            broadcast,
        })
    }

    /// Republish previously exported records to their author's relay set.
    ///
    /// Without `identity`, the author of the newest contact list in
    /// `records` is used.
    pub async fn rebroadcast(
        &self,
        records: &[Record],
        identity: Option<&str>,
    ) -> Result<PassReport> {
        let identity = match identity {
            Some(identity) => normalize_identity(identity)?,
            None => infer_identity(records).ok_or_else(|| Error::MembershipMissing {
                identity: "any author in the export".to_string(),
            })?,
        };

        let relay_set = self.resolve(records, &identity)?;
        self.publish(records, &relay_set).await
    }

    fn context(&self) -> PassContext<'_> {
        PassContext {
            connector: self.connector.as_ref(),
            status: &self.status,
            cancel: &self.cancel,
            limits: self.config.limits(),
            batch_size: self.config.batch_size,
        }
    }
}
