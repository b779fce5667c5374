use chrono::{DateTime, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use medibook::application::Clinic;
use medibook::application::payments::PaymentRequest;
use medibook::application::reconciliation::{Cancellation, PollOutcome, StatusPoller, checkout};
use medibook::config::{MpesaConfig, PollConfig};
use medibook::domain::payment::{PaymentFilter, PaymentStatus};
use medibook::infrastructure::Stores;
use medibook::infrastructure::mpesa::MpesaGateway;
use medibook::interfaces::csv::report_writer::ReportWriter;
use medibook::interfaces::csv::seed_reader::{SeedReader, seed_services, seed_slots};
use medibook::interfaces::http::{self, client::ApiClient};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true, env = "MEDIBOOK_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Slots CSV (`id, provider_id, start_time, end_time, notes`) upserted at startup.
    #[arg(long, global = true)]
    slots: Option<PathBuf>,

    /// Services CSV (`id, name, price`) upserted at startup.
    #[arg(long, global = true)]
    services: Option<PathBuf>,

    #[command(flatten)]
    mpesa: MpesaConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Runs the HTTP API.
    Serve {
        #[arg(long, env = "MEDIBOOK_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Seconds between two reconciliation passes over open payments.
        #[arg(long, default_value_t = 60)]
        reconcile_every_secs: u64,

        /// Processing payments idle this long are queried at the gateway.
        #[arg(long, default_value_t = 120)]
        stale_after_secs: i64,
    },
    /// Prints the available slots of a provider as CSV.
    Available { provider_id: u64 },
    /// Prints payments as CSV, newest first.
    Payments {
        #[arg(long)]
        status: Option<PaymentStatus>,
        #[arg(long)]
        patient_id: Option<u64>,
        #[arg(long)]
        appointment_id: Option<u64>,
        /// Earliest creation time, RFC 3339.
        #[arg(long)]
        date_from: Option<DateTime<Utc>>,
        /// Latest creation time, RFC 3339.
        #[arg(long)]
        date_to: Option<DateTime<Utc>>,
    },
    /// Starts a push payment on a running server and waits for its outcome.
    Pay {
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        server: String,
        #[arg(long)]
        service_id: u64,
        #[arg(long)]
        patient_id: u64,
        #[arg(long)]
        phone: String,
        #[arg(long)]
        appointment_id: Option<u64>,
        #[command(flatten)]
        poll: PollConfig,
    },
}

fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    match db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(path) => {
            let store =
                medibook::infrastructure::rocksdb::RocksDBStore::open(&path).into_diagnostic()?;
            info!("Using RocksDB storage at {}", path.display());
            Ok(Stores::rocksdb(store))
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
            );
            Ok(Stores::in_memory())
        }
        None => Ok(Stores::in_memory()),
    }
}

async fn seed(clinic: &Clinic, slots: Option<PathBuf>, services: Option<PathBuf>) -> Result<()> {
    if let Some(path) = services {
        let file = File::open(path).into_diagnostic()?;
        seed_services(clinic, SeedReader::new(file))
            .await
            .into_diagnostic()?;
    }
    if let Some(path) = slots {
        let file = File::open(path).into_diagnostic()?;
        seed_slots(clinic, SeedReader::new(file))
            .await
            .into_diagnostic()?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let gateway = Arc::new(MpesaGateway::new(cli.mpesa).into_diagnostic()?);
    let clinic = Clinic::new(open_stores(cli.db_path)?, gateway);
    seed(&clinic, cli.slots, cli.services).await?;

    match cli.command {
        Command::Serve {
            bind,
            reconcile_every_secs,
            stale_after_secs,
        } => {
            let payments = clinic.payments.clone();
            let stale_after = TimeDelta::seconds(stale_after_secs);
            tokio::spawn(async move {
                let mut ticker =
                    tokio::time::interval(Duration::from_secs(reconcile_every_secs.max(1)));
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(e) = payments.reconcile(stale_after).await {
                        warn!("Reconciliation pass failed: {e}");
                    }
                }
            });

            let listener = tokio::net::TcpListener::bind(bind).await.into_diagnostic()?;
            info!("Listening on {}", listener.local_addr().into_diagnostic()?);
            axum::serve(listener, http::router(clinic))
                .with_graceful_shutdown(shutdown_signal())
                .await
                .into_diagnostic()?;
        }
        Command::Available { provider_id } => {
            let slots = clinic
                .schedule
                .list_available_slots(provider_id)
                .await
                .into_diagnostic()?;
            let stdout = io::stdout();
            ReportWriter::new(stdout.lock())
                .write_slots(&slots)
                .into_diagnostic()?;
        }
        Command::Payments {
            status,
            patient_id,
            appointment_id,
            date_from,
            date_to,
        } => {
            let filter = PaymentFilter {
                status,
                patient_id,
                appointment_id,
                date_from,
                date_to,
            };
            let payments = clinic
                .payments
                .list_payments(&filter)
                .await
                .into_diagnostic()?;
            let stdout = io::stdout();
            ReportWriter::new(stdout.lock())
                .write_payments(&payments)
                .into_diagnostic()?;
        }
        Command::Pay {
            server,
            service_id,
            patient_id,
            phone,
            appointment_id,
            poll,
        } => {
            let api = ApiClient::new(server, Duration::from_secs(30)).into_diagnostic()?;
            let (trigger, cancel) = Cancellation::new();
            tokio::spawn(async move {
                shutdown_signal().await;
                let _ = trigger.send(true);
            });

            let request = PaymentRequest {
                service_id,
                patient_id,
                phone_number: phone,
                appointment_id,
            };
            let result = checkout(&api, &StatusPoller::new(poll), request, cancel)
                .await
                .into_diagnostic()?;
            match result.outcome {
                PollOutcome::Completed(report) => {
                    println!("payment {}: {}", result.payment_id, report.status);
                    if result.appointment_marked_paid {
                        println!("appointment marked paid");
                    }
                }
                PollOutcome::Failed(report) => println!(
                    "payment {}: {} ({})",
                    result.payment_id,
                    report.status,
                    report.description.unwrap_or_default()
                ),
                PollOutcome::TimedOut { attempts, .. } => println!(
                    "payment {}: still open after {attempts} checks, check its status later",
                    result.payment_id
                ),
                PollOutcome::Cancelled => println!("payment {}: polling cancelled", result.payment_id),
            }
        }
    }

    Ok(())
}
