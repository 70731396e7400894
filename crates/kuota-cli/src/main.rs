//! kuota - command line front end for reselling data packages.
//!
//! One-shot subcommands cover the read-only vendor endpoints and the local
//! transaction ledger; `kuota shell` keeps one authenticated session open for
//! the OTP → purchase flow, and `kuota serve` exposes the same flow over HTTP.

mod app;
mod server;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kuota_core::api::Method;
use kuota_core::auth::Keychain;
use chrono::NaiveDate;
use kuota_core::models::{PackageSearch, TransactionFilter, TransactionStatus};
use kuota_core::utils::{format_rupiah, truncate_string};
use kuota_core::{Config, TransactionLedger};
use serde_json::Value;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use app::App;

/// Log file prefix inside the data directory
const LOG_FILE_PREFIX: &str = "kuota.log";

/// Widest package name shown in the package table
const PACKAGE_NAME_WIDTH: usize = 40;

#[derive(Parser, Debug)]
#[command(name = "kuota", version, about = "Resell mobile data packages through the vendor API")]
struct Cli {
    /// Also write logs to a daily rolling file in the data directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in if needed and show the cached bearer token
    Token,

    /// Send a raw vendor request, retrying on stale tokens
    Call {
        /// HTTP method (GET, POST, ...)
        method: String,
        /// Path under the vendor base URL
        path: String,
        /// JSON request body
        #[arg(long)]
        body: Option<String>,
    },

    /// List every package the vendor sells
    Packages,

    /// Show the reseller wallet balance
    Balance,

    /// List the wallet payment methods
    PaymentMethods,

    /// Show package stock
    Stock,

    /// Find packages by name, payment method or price
    Search {
        /// Case-insensitive text matched against name and description
        query: Option<String>,
        #[arg(long)]
        payment_method: Option<String>,
        #[arg(long)]
        min_price: Option<i64>,
        #[arg(long)]
        max_price: Option<i64>,
    },

    /// Inspect the local transaction ledger
    Ledger {
        #[command(subcommand)]
        action: LedgerCommand,
    },

    /// Manage the SSO password stored in the OS keychain
    Keychain {
        #[command(subcommand)]
        action: KeychainCommand,
    },

    /// Interactive session for OTP requests and purchases
    Shell,

    /// Serve the HTTP API
    Serve {
        /// Listen address, overriding the configured one
        #[arg(long)]
        bind: Option<String>,
    },
}

/// Filters shared by `ledger list` and `ledger export`
#[derive(clap::Args, Debug, Clone, Default)]
struct FilterArgs {
    /// PENDING, SUCCESS or FAILED
    #[arg(long)]
    status: Option<TransactionStatus>,
    #[arg(long)]
    source: Option<String>,
    /// First day included (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day included (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
}

impl FilterArgs {
    fn into_filter(self, limit: Option<usize>) -> TransactionFilter {
        TransactionFilter {
            status: self.status,
            source: self.source,
            from: self.from,
            to: self.to,
            limit,
        }
    }
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// Transactions newest first, optionally filtered
    #[command(alias = "recent")]
    List {
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Totals and per-source breakdown
    Stats,
    /// Per-day totals for the last N days
    Daily {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Matching transactions as CSV
    Export {
        #[command(flatten)]
        filter: FilterArgs,
        /// Write to this file instead of stdout
        #[arg(long, short)]
        out: Option<PathBuf>,
    },
    /// One transaction as JSON
    Show { id: String },
}

#[derive(Subcommand, Debug)]
enum KeychainCommand {
    /// Prompt for the SSO password and store it
    Set,
    /// Remove the stored SSO password
    Delete,
}

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // RUST_LOG controls the level (e.g. RUST_LOG=kuota_core=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = Config::load()?;

    let log_dir = if cli.log_file {
        let dir = config.data_dir()?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        Some(dir)
    } else {
        None
    };
    let _guard = init_tracing(log_dir.as_deref());
    info!(command = ?cli.command, "kuota starting");

    match cli.command {
        Commands::Ledger { action } => run_ledger(&config, action),
        Commands::Keychain { action } => run_keychain(&config, action),
        Commands::Token => App::new(config)?.print_token().await,
        Commands::Call { method, path, body } => run_call(&App::new(config)?, &method, &path, body).await,
        Commands::Packages => print_packages(&App::new(config)?).await,
        Commands::Balance => print_json(&App::new(config)?.service().vendor().balance().await?),
        Commands::PaymentMethods => {
            print_json(&App::new(config)?.service().vendor().payment_methods().await?)
        }
        Commands::Stock => print_json(&App::new(config)?.service().vendor().stock().await?),
        Commands::Search {
            query,
            payment_method,
            min_price,
            max_price,
        } => {
            let search = PackageSearch {
                query: query.unwrap_or_default(),
                payment_method: payment_method.unwrap_or_default(),
                min_price: min_price.unwrap_or_default(),
                max_price: max_price.unwrap_or_default(),
            };
            run_search(&App::new(config)?, &search).await
        }
        Commands::Shell => App::new(config)?.run_shell().await,
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            config.validate_server()?;
            let bind_address = config.bind_address.clone();
            let api_key = config.api_key.clone().unwrap_or_default();
            server::serve(App::new(config)?, &bind_address, api_key).await
        }
    }
}

async fn run_call(app: &App, method: &str, path: &str, body: Option<String>) -> Result<()> {
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let body: Option<Value> = body
        .map(|b| serde_json::from_str(&b).context("--body is not valid JSON"))
        .transpose()?;

    let response = app.service().vendor().call(method, path, body.as_ref()).await?;
    let status = response.status();
    let text = response.text().await?;
    println!("{}", status);
    print_body(&text);
    Ok(())
}

async fn print_packages(app: &App) -> Result<()> {
    let packages = app
        .service()
        .vendor()
        .package_list()
        .await?
        .into_result()
        .map_err(anyhow::Error::msg)?;
    print_package_table(&packages);
    Ok(())
}

async fn run_search(app: &App, search: &PackageSearch) -> Result<()> {
    let packages = app
        .service()
        .search_packages(search)
        .await?
        .into_result()
        .map_err(anyhow::Error::msg)?;
    print_package_table(&packages);
    Ok(())
}

fn print_package_table(packages: &[kuota_core::models::Package]) {
    for package in packages {
        let methods: Vec<&str> = package
            .available_payment_methods
            .iter()
            .map(|m| m.payment_method.as_str())
            .collect();
        println!(
            "{:<20} {:<width$} {:>14}  {}",
            package.package_code,
            truncate_string(&package.package_name, PACKAGE_NAME_WIDTH),
            format_rupiah(package.price),
            methods.join(","),
            width = PACKAGE_NAME_WIDTH,
        );
    }
    eprintln!("{} packages", packages.len());
}

fn run_ledger(config: &Config, action: LedgerCommand) -> Result<()> {
    let ledger = TransactionLedger::open(&config.data_dir()?)?;
    match action {
        LedgerCommand::List { filter, limit } => {
            for tx in ledger.list(&filter.into_filter(Some(limit))) {
                println!(
                    "{}  {}  {:<8} {:<14} {:<16} {:>14}  {}",
                    tx.created_at.format("%Y-%m-%d %H:%M:%S"),
                    tx.id,
                    tx.status.as_str(),
                    tx.phone_number,
                    tx.package_code,
                    format_rupiah(tx.amount),
                    tx.source,
                );
            }
            Ok(())
        }
        LedgerCommand::Stats => {
            let stats = ledger.system_stats();
            println!("Transactions: {}", stats.total_transactions);
            println!("  successful: {}", stats.successful_transactions);
            println!("  failed:     {}", stats.failed_transactions);
            println!("Revenue:      {}", format_rupiah(stats.total_revenue));
            println!("Success rate: {:.1}%", stats.success_rate);
            for source in ledger.source_stats() {
                println!(
                    "  {:<16} {:>6} tx  {:>14}  {:.1}%",
                    source.source,
                    source.count,
                    format_rupiah(source.revenue),
                    source.success_rate,
                );
            }
            Ok(())
        }
        LedgerCommand::Daily { days } => {
            for day in ledger.daily_stats(days) {
                println!(
                    "{}  {:>5} tx  {:>5} ok  {:>5} failed  {:>14}",
                    day.date,
                    day.total,
                    day.successful,
                    day.failed,
                    format_rupiah(day.revenue),
                );
            }
            Ok(())
        }
        LedgerCommand::Export { filter, out } => {
            let filter = filter.into_filter(None);
            let rows = match out {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("Failed to create {}", path.display()))?;
                    let rows = ledger.export_csv(&filter, file)?;
                    eprintln!("Wrote {} transactions to {}", rows, path.display());
                    rows
                }
                None => ledger.export_csv(&filter, io::stdout().lock())?,
            };
            info!(rows = rows, "Ledger exported");
            Ok(())
        }
        LedgerCommand::Show { id } => match ledger.get(&id) {
            Some(tx) => print_json(&tx),
            None => bail!("No transaction with id {}", id),
        },
    }
}

fn run_keychain(config: &Config, action: KeychainCommand) -> Result<()> {
    if config.username.is_empty() {
        bail!("No SSO username configured (set KUOTA_USERNAME)");
    }
    match action {
        KeychainCommand::Set => {
            let password = rpassword::prompt_password(format!("SSO password for {}: ", config.username))
                .context("Failed to read password")?;
            if password.is_empty() {
                bail!("Password must not be empty");
            }
            Keychain::store(&config.username, &password)?;
            println!("Password stored for {}", config.username);
        }
        KeychainCommand::Delete => {
            Keychain::delete(&config.username)?;
            println!("Password removed for {}", config.username);
        }
    }
    Ok(())
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Pretty-print a body if it is JSON, otherwise print it as-is.
fn print_body(text: &str) {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{}", pretty),
            Err(_) => println!("{}", text),
        },
        Err(_) => println!("{}", text),
    }
}
