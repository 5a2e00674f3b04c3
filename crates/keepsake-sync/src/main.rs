//! Keepsake command-line tool.
//!
//! Backs up an identity's records from a working set of relays, writes them
//! to an export document, and republishes them to the identity's own write
//! relays.
//!
//! # Usage
//!
//! ```bash
//! # Back up and rebroadcast (hex or npub)
//! keepsake backup npub1...
//!
//! # Back up only, timestamped file name
//! keepsake backup npub1... --no-broadcast --timestamped
//!
//! # Fetch with a custom working set
//! keepsake --relays wss://nos.lol,wss://relay.damus.io fetch <hex>
//!
//! # Rebroadcast a previous export
//! keepsake rebroadcast nostr-backup.js
//!
//! # Convert between hex and npub
//! keepsake identity npub1...
//! ```
//!
//! Ctrl+C cancels the running pass: open connections are dropped and the
//! command exits with whatever it had already written.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use keepsake_core::metrics::{start_metrics_server, try_init_metrics};
use keepsake_core::{
    EXPORT_FILE_NAME, Record, normalize_identity, parse_export_document, to_export_document,
    to_npub,
};
use keepsake_sync::{
    Gathered, PassReport, Phase, RelaySet, RelayStatusEntry, SyncConfig, SyncEngine,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Keepsake relay backup tool.
#[derive(Parser, Debug)]
#[command(name = "keepsake")]
#[command(about = "Back up Nostr records and rebroadcast them to your relays")]
#[command(version)]
struct Args {
    /// Working set relay URLs (comma-separated, overrides KEEPSAKE_RELAYS)
    #[arg(long, global = true, value_delimiter = ',')]
    relays: Option<Vec<String>>,

    /// Relays contacted concurrently
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Per-relay idle timeout in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Accept localhost and private-network relays
    #[arg(long, global = true)]
    allow_private: bool,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, global = true, default_value = "0")]
    metrics_port: u16,

    /// Path to .env file (optional)
    #[arg(long, global = true, env = "DOTENV_PATH", default_value = ".env")]
    dotenv: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch, export, then rebroadcast to the identity's write relays
    Backup {
        /// Identity as hex or npub
        identity: String,

        #[command(flatten)]
        export: ExportArgs,

        /// Stop after writing the export
        #[arg(long)]
        no_broadcast: bool,

        /// Abort instead of falling back to the working set when no contact list is found
        #[arg(long)]
        require_membership: bool,
    },

    /// Fetch and export without rebroadcasting
    Fetch {
        /// Identity as hex or npub
        identity: String,

        #[command(flatten)]
        export: ExportArgs,
    },

    /// Rebroadcast a previously written export
    Rebroadcast {
        /// Export document to read
        file: PathBuf,

        /// Identity whose contact list selects the relays (default: newest contact list author)
        #[arg(long)]
        identity: Option<String>,
    },

    /// Print an identity as hex and npub
    Identity {
        /// Identity as hex or npub
        value: String,
    },
}

#[derive(clap::Args, Debug)]
struct ExportArgs {
    /// Export file path
    #[arg(long, short, default_value = EXPORT_FILE_NAME)]
    output: PathBuf,

    /// Append a local timestamp to the export file name
    #[arg(long)]
    timestamped: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load .env file if it exists
    if Path::new(&args.dotenv).exists() {
        dotenvy::from_path(&args.dotenv)
            .with_context(|| format!("Failed to load {}", args.dotenv))?;
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("keepsake_sync=debug".parse()?),
        )
        .init();

    if let Command::Identity { value } = &args.command {
        return print_identity(value);
    }

    // Install rustls crypto provider (required when both ring and aws-lc-rs are present)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    // Initialize metrics
    if args.metrics_port > 0 {
        let metrics_handle =
            try_init_metrics().context("Prometheus recorder already installed")?;
        start_metrics_server(args.metrics_port, metrics_handle)
            .await
            .context("Failed to start metrics server")?;
    }

    let config = build_config(&args)?;
    let working_set = config.working_set();
    let engine = SyncEngine::new(config).context("Invalid configuration")?;

    // Ctrl+C cancels the running pass
    let token = engine.cancellation_token();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupt received, cancelling...");
        token.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    spawn_progress_logger(&engine);

    match args.command {
        Command::Backup {
            identity,
            export,
            no_broadcast,
            require_membership,
        } => {
            let gathered = gather(&engine, &identity, &working_set).await?;
            let path = write_export(&gathered.records, &export)?;

            let broadcast = if no_broadcast {
                None
            } else {
                let relay_set =
                    resolve_or_fall_back(&engine, &gathered, &working_set, require_membership)?;
                Some(
                    engine
                        .publish(&gathered.records, &relay_set)
                        .await
                        .context("Broadcast pass aborted")?,
                )
            };

            print_summary(&gathered, Some(&path), broadcast.as_ref());
        }
        Command::Fetch { identity, export } => {
            let gathered = gather(&engine, &identity, &working_set).await?;
            let path = write_export(&gathered.records, &export)?;
            print_summary(&gathered, Some(&path), None);
        }
        Command::Rebroadcast { file, identity } => {
            let document = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let records = parse_export_document(&document)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            tracing::info!("Loaded {} records from {}", records.len(), file.display());

            let report = engine
                .rebroadcast(&records, identity.as_deref())
                .await
                .context("Rebroadcast failed")?;
            print_pass("BROADCAST", &report);
        }
        // Answered before any network setup
        Command::Identity { .. } => {}
    }

    Ok(())
}

/// Environment config with CLI overrides applied.
fn build_config(args: &Args) -> Result<SyncConfig> {
    let mut config = SyncConfig::from_env().context("Failed to load configuration")?;

    if let Some(relays) = &args.relays {
        config.relays = relays.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(secs) = args.timeout_secs {
        config.idle_timeout = Duration::from_secs(secs);
        config.session_deadline = config.session_deadline.max(config.idle_timeout);
    }
    if args.allow_private {
        config.allow_private = true;
    }
    config.validate()?;

    tracing::info!(
        "Configuration: {} relays, batch size {}, idle timeout {}s",
        config.relays.len(),
        config.batch_size,
        config.idle_timeout.as_secs()
    );
    Ok(config)
}

async fn gather(engine: &SyncEngine, identity: &str, working_set: &[String]) -> Result<Gathered> {
    if working_set.is_empty() {
        bail!("No usable relays in the working set");
    }
    let gathered = engine
        .gather(identity, working_set)
        .await
        .context("Fetch pass aborted")?;

    if gathered.records.is_empty() {
        tracing::warn!("No records found for {}", gathered.identity);
    }
    Ok(gathered)
}

/// Resolve the identity's write relays, or reuse the working set when the
/// contact list is missing or unusable.
fn resolve_or_fall_back(
    engine: &SyncEngine,
    gathered: &Gathered,
    working_set: &[String],
    require_membership: bool,
) -> Result<RelaySet> {
    match engine.resolve(&gathered.records, &gathered.identity) {
        Ok(set) => Ok(set),
        Err(e) if e.is_membership() && !require_membership => {
            tracing::warn!("{}; broadcasting to the working set instead", e);
            Ok(working_set.iter().cloned().collect())
        }
        Err(e) => Err(e).context("Failed to resolve relay set"),
    }
}

fn write_export(records: &[Record], export: &ExportArgs) -> Result<PathBuf> {
    let path = if export.timestamped {
        timestamped_path(&export.output, &chrono::Local::now().format("%Y%m%d-%H%M%S").to_string())
    } else {
        export.output.clone()
    };

    let document = to_export_document(records).context("Failed to encode export")?;
    std::fs::write(&path, document)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    tracing::info!("Wrote {} records to {}", records.len(), path.display());
    Ok(path)
}

/// `dir/name.ext` -> `dir/name-<stamp>.ext`
fn timestamped_path(path: &Path, stamp: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "nostr-backup".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{stem}-{stamp}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{stamp}"),
    };
    path.with_file_name(name)
}

fn print_identity(value: &str) -> Result<()> {
    let hex = normalize_identity(value).context("Invalid identity")?;
    let npub = to_npub(&hex).context("Identity is not a valid public key")?;
    println!("hex:  {hex}");
    println!("npub: {npub}");
    Ok(())
}

/// Log progress whenever another relay settles.
fn spawn_progress_logger(engine: &SyncEngine) {
    let mut updates = engine.status().subscribe();
    tokio::spawn(async move {
        let mut last_settled = 0;
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            let settled = snapshot.iter().filter(|e| e.phase.is_settled()).count();
            if settled != last_settled {
                let transferred: usize = snapshot.iter().map(|e| e.count).sum();
                tracing::info!(
                    "Progress: {}/{} relays settled, {} records",
                    settled,
                    snapshot.len(),
                    transferred
                );
                last_settled = settled;
            }
        }
    });
}

fn print_summary(gathered: &Gathered, export: Option<&Path>, broadcast: Option<&PassReport>) {
    println!("\n══════════════════════════════════════════════════════════════════");
    println!("SUMMARY");
    println!("══════════════════════════════════════════════════════════════════\n");

    println!("Identity:    {}", gathered.identity);
    if let Ok(npub) = to_npub(&gathered.identity) {
        println!("             {}", npub);
    }
    if let Some(path) = export {
        println!("Export:      {}", path.display());
    }
    println!("Records:     {:>8}", gathered.records.len());
    println!();

    print_pass("FETCH", &gathered.report);
    if let Some(report) = broadcast {
        print_pass("BROADCAST", report);
    }
}

fn print_pass(title: &str, report: &PassReport) {
    println!("{title} ({:.1}s)", report.duration.as_secs_f64());
    println!("  Done:      {:>8}", report.succeeded.len());
    println!("  Failed:    {:>8}", report.failed.len());
    println!("  Count:     {:>8}", report.total_count());
    for entry in &report.statuses {
        println!("    {}", status_line(entry));
    }
    println!();
}

fn status_line(entry: &RelayStatusEntry) -> String {
    let marker = match entry.phase {
        Phase::Done => "✓",
        Phase::Error => "✗",
        _ => "…",
    };
    format!("{marker} {entry}")
}
