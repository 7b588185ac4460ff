//! Turnstile gate scanner.
//!
//! Reads decoded QR text from stdin (pipe `zbarcam --raw` into it) or a capture
//! file, verifies each ticket and redeems it on the configured ledger.

use alloy::signers::local::PrivateKeySigner;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile::config::Config;
use turnstile::decoder::{file_decoder, stdin_decoder};
use turnstile::{
    EvmLedger, QrDecoder, RedemptionSubmitter, ScanEnvironment, ScanSession, issue_claim, parse,
    verify_now,
};
use turnstile_core::environment::SystemClock;

/// Grace period for an in-flight redemption when scanning stops
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "turnstile", version)]
#[command(about = "Scan signed event tickets and redeem them on-chain")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read decoded QR text, one payload per line, and redeem tickets
    Scan {
        /// Replay payloads from this file instead of reading stdin
        #[arg(long)]
        input: Option<PathBuf>,
    },
    /// Parse and verify a payload without redeeming it
    Verify {
        /// QR payload JSON
        payload: String,
    },
    /// Sign a ticket payload with a holder key
    Issue {
        /// Ticket identifier
        #[arg(long)]
        ticket_id: String,
        /// Admissions covered
        #[arg(long, default_value_t = 1)]
        quantity: u64,
        /// Issuance time in milliseconds since the epoch (default: now)
        #[arg(long)]
        date: Option<i64>,
        /// Holder private key (hex)
        #[arg(long, env = "HOLDER_KEY", hide_env_values = true)]
        holder_key: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env is fine; real environment variables still apply.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "turnstile=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan { input } => scan(input).await,
        Commands::Verify { payload } => verify(&payload),
        Commands::Issue {
            ticket_id,
            quantity,
            date,
            holder_key,
        } => issue(&holder_key, ticket_id, quantity, date),
    }
}

async fn scan(input: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting Turnstile scanner");

    let config = Config::from_env()?;
    info!(
        rpc_url = %config.ledger.rpc_url,
        contract = %config.ledger.contract_address,
        redeemer = %config.ledger.redeemer.address(),
        timeout_secs = config.scan.redemption_timeout.as_secs(),
        "Configuration loaded"
    );

    if let Some(addr) = config.observability.metrics_addr {
        turnstile::metrics::install_exporter(addr)?;
    }

    let ledger = Arc::new(EvmLedger::from_config(&config.ledger));
    let submitter = RedemptionSubmitter::new(ledger, config.scan.redemption_timeout);
    let environment = ScanEnvironment::new(Arc::new(SystemClock), submitter);

    match input {
        Some(path) => {
            info!(path = %path.display(), "Replaying capture file");
            run_session(ScanSession::new(environment, file_decoder(&path).await?)).await
        },
        None => run_session(ScanSession::new(environment, stdin_decoder())).await,
    }
}

async fn run_session<D: QrDecoder>(
    session: ScanSession<D>,
) -> Result<(), Box<dyn std::error::Error>> {
    let processed = session
        .run(shutdown_signal(), |outcome| println!("{outcome}\n"))
        .await?;

    session.shutdown(SHUTDOWN_GRACE).await?;

    let history = session.history().await;
    if !history.is_empty() {
        println!("Recent scans:");
        for outcome in &history {
            println!("  {}", outcome.summary());
        }
    }
    info!(processed, "Scanner stopped");
    Ok(())
}

fn verify(payload: &str) -> Result<(), Box<dyn std::error::Error>> {
    let claim = parse(payload)?;
    let verified = verify_now(&claim)?;
    println!(
        "Ticket {} for {} admission(s) is authentic and fresh (holder {})",
        claim.ticket_id,
        claim.quantity,
        verified.holder()
    );
    Ok(())
}

fn issue(
    holder_key: &str,
    ticket_id: String,
    quantity: u64,
    date: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let holder: PrivateKeySigner = holder_key.trim().parse()?;
    let date = date.unwrap_or_else(|| Utc::now().timestamp_millis());
    let claim = issue_claim(&holder, ticket_id, quantity, date)?;
    println!("{}", claim.to_payload()?);
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = signal::ctrl_c().await {
        warn!(error = %error, "Cannot listen for Ctrl+C, scanning until input ends");
        std::future::pending::<()>().await;
    }
}
