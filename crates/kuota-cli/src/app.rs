//! Long-lived session state for the interactive shell and the HTTP server.
//!
//! `App` wires the core pieces together once: the credential manager, the
//! vendor client with its request sampler, the OTP store and the ledger.
//! Every shell command runs against that one set, so the bearer token and
//! OTP sessions survive from one command to the next. The bearer token is
//! also saved in the data directory, so one-shot commands reuse it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use kuota_core::auth::Keychain;
use kuota_core::service::PurchaseOrder;
use kuota_core::utils::{format_rupiah, mask_token, normalize_phone};
use kuota_core::{
    Config, CredentialManager, OtpSessionStore, PurchaseService, RequestSampler, SessionFile,
    SsoClient, TransactionLedger, VendorClient,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::print_json;

/// How often expired OTP sessions are swept
pub(crate) const OTP_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Window used for the "last minute" request count
const REALTIME_WINDOW_SECS: i64 = 60;

const DEFAULT_PAYMENT_METHOD: &str = "BALANCE";

/// Source label for purchases made from the shell
const SHELL_SOURCE: &str = "cli";

const PROMPT: &str = "kuota> ";

const HELP: &str = "\
Commands:
  otp request <phone>                 send an OTP to the subscriber
  otp verify <phone> <otp>            exchange the OTP for an access token
  buy <phone> <package> [method]      buy a package (default method BALANCE)
  card <phone> <otp>                  card status for the subscriber
  active <phone> <otp>                packages active on the subscriber's card
  check <trx_id>                      vendor status of a transaction
  packages                            package count and cheapest offer
  balance                             wallet balance
  token                               cached bearer token and expiry
  stats                               ledger dashboard
  metrics                             request monitoring snapshot
  help                                this text
  quit                                leave the shell";

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    OtpRequest { phone: String },
    OtpVerify { phone: String, otp: String },
    Buy { phone: String, package_code: String, payment_method: String },
    Card { phone: String, otp: String },
    Active { phone: String, otp: String },
    Check { trx_id: String },
    Packages,
    Balance,
    Token,
    Stats,
    Metrics,
    Help,
    Quit,
}

impl ShellCommand {
    /// Parse one input line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let command = match words.as_slice() {
            [] => return Ok(None),
            ["otp", "request", phone] => Self::OtpRequest { phone: phone.to_string() },
            ["otp", "verify", phone, otp] => Self::OtpVerify {
                phone: phone.to_string(),
                otp: otp.to_string(),
            },
            ["buy", phone, package_code] => Self::Buy {
                phone: phone.to_string(),
                package_code: package_code.to_string(),
                payment_method: DEFAULT_PAYMENT_METHOD.to_string(),
            },
            ["buy", phone, package_code, method] => Self::Buy {
                phone: phone.to_string(),
                package_code: package_code.to_string(),
                payment_method: method.to_ascii_uppercase(),
            },
            ["card", phone, otp] => Self::Card {
                phone: phone.to_string(),
                otp: otp.to_string(),
            },
            ["active", phone, otp] => Self::Active {
                phone: phone.to_string(),
                otp: otp.to_string(),
            },
            ["check", trx_id] => Self::Check { trx_id: trx_id.to_string() },
            ["packages"] => Self::Packages,
            ["balance"] => Self::Balance,
            ["token"] => Self::Token,
            ["stats"] | ["dashboard"] => Self::Stats,
            ["metrics"] => Self::Metrics,
            ["help"] | ["?"] => Self::Help,
            ["quit"] | ["exit"] => Self::Quit,
            _ => bail!("Unrecognized command: {} (try `help`)", line.trim()),
        };
        Ok(Some(command))
    }
}

pub struct App {
    service: PurchaseService,
    sampler: Arc<RequestSampler>,
    /// Subscriber access tokens from `otp verify`, keyed by normalized phone
    access_tokens: HashMap<String, String>,
}

impl App {
    /// Build the full client stack from configuration. Fails if the config
    /// is incomplete or no SSO password can be found.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let password = Keychain::resolve_password(&config.username, config.password.as_deref())?;

        let sso = SsoClient::new(
            &config.sso_base_url,
            &config.sso_static_key,
            &config.username,
            password,
            config.request_timeout(),
        );
        let data_dir = config.data_dir()?;
        let session = SessionFile::new(&data_dir, &config.username);
        let credentials = Arc::new(CredentialManager::with_session(sso, config.token_ttl(), session));
        let sampler = Arc::new(RequestSampler::new());
        let vendor = VendorClient::from_config(&config, credentials)
            .context("Failed to build vendor client")?
            .with_sampler(Arc::clone(&sampler));

        let ledger = Arc::new(TransactionLedger::open(&data_dir)?);
        let otp = Arc::new(OtpSessionStore::new(config.otp_ttl()));

        debug!(vendor = %config.vendor_base_url, username = %config.username, "Client stack ready");
        Ok(Self {
            service: PurchaseService::new(vendor, otp, ledger),
            sampler,
            access_tokens: HashMap::new(),
        })
    }

    pub fn service(&self) -> &PurchaseService {
        &self.service
    }

    /// Hand the stack over to the HTTP server.
    pub fn into_parts(self) -> (PurchaseService, Arc<RequestSampler>) {
        (self.service, self.sampler)
    }

    pub async fn print_token(&self) -> Result<()> {
        let credentials = self.service.vendor().credentials();
        credentials.acquire().await?;
        match credentials.snapshot().await {
            Some(cred) => {
                println!("Token:   {}", mask_token(&cred.token));
                println!(
                    "Expires: {} ({} min left)",
                    cred.expires_at.format("%Y-%m-%d %H:%M:%S UTC"),
                    cred.minutes_until_expiry()
                );
                println!("Logins:  {}", credentials.refresh_count());
            }
            None => println!("No token cached"),
        }
        Ok(())
    }

    /// Read commands from stdin until `quit` or end of input.
    pub async fn run_shell(mut self) -> Result<()> {
        let sweeper = Arc::clone(self.service.otp_sessions()).spawn_sweeper(OTP_SWEEP_INTERVAL);
        info!("Shell started");

        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        println!("Type `help` for commands.");

        loop {
            stdout.write_all(PROMPT.as_bytes()).await?;
            stdout.flush().await?;

            let Some(line) = lines.next_line().await? else {
                break;
            };

            let command = match ShellCommand::parse(&line) {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(e) => {
                    eprintln!("{}", e);
                    continue;
                }
            };
            if command == ShellCommand::Quit {
                break;
            }
            if let Err(e) = self.execute(command).await {
                warn!(error = %e, "Shell command failed");
                eprintln!("error: {:#}", e);
            }
        }

        sweeper.abort();
        info!("Shell closed");
        Ok(())
    }

    async fn execute(&mut self, command: ShellCommand) -> Result<()> {
        match command {
            ShellCommand::OtpRequest { phone } => {
                let envelope = self.service.request_otp(&phone).await?;
                if envelope.success {
                    println!("OTP sent to {}", phone);
                } else {
                    println!("Vendor refused: {}", envelope.message);
                }
            }
            ShellCommand::OtpVerify { phone, otp } => {
                let envelope = self.service.verify_otp(&phone, &otp).await?;
                match envelope.into_result() {
                    Ok(data) => {
                        self.access_tokens
                            .insert(normalize_phone(&phone), data.access_token);
                        println!("Verified {}; ready to buy", phone);
                    }
                    Err(message) => println!("Verification failed: {}", message),
                }
            }
            ShellCommand::Buy { phone, package_code, payment_method } => {
                let Some(access_token) = self.access_tokens.get(&normalize_phone(&phone)).cloned() else {
                    bail!("No verified OTP for {}; run `otp request` and `otp verify` first", phone);
                };
                let outcome = self
                    .service
                    .purchase(PurchaseOrder {
                        phone: phone.clone(),
                        package_code,
                        payment_method,
                        access_token,
                        source: Some(SHELL_SOURCE.to_string()),
                    })
                    .await?;

                let tx = &outcome.record;
                if outcome.envelope.success {
                    self.access_tokens.remove(&normalize_phone(&phone));
                    println!(
                        "{} {} {} trx {} ({})",
                        tx.status.as_str(),
                        tx.package_name,
                        format_rupiah(tx.amount),
                        tx.trx_id,
                        tx.id
                    );
                } else {
                    println!("{} {}: {}", tx.status.as_str(), tx.id, tx.error_message);
                }
            }
            ShellCommand::Card { phone, otp } => {
                print_json(&self.service.card_status(&phone, &otp).await?)?;
            }
            ShellCommand::Active { phone, otp } => {
                print_json(&self.service.active_packages(&phone, &otp).await?)?;
            }
            ShellCommand::Check { trx_id } => {
                print_json(&self.service.vendor().check_transaction(&trx_id).await?)?;
            }
            ShellCommand::Packages => {
                let packages = self
                    .service
                    .vendor()
                    .package_list()
                    .await?
                    .into_result()
                    .map_err(anyhow::Error::msg)?;
                println!("{} packages", packages.len());
                if let Some(cheapest) = packages.iter().filter(|p| p.price > 0).min_by_key(|p| p.price) {
                    println!(
                        "Cheapest: {} {} {}",
                        cheapest.package_code,
                        cheapest.package_name,
                        format_rupiah(cheapest.price)
                    );
                }
            }
            ShellCommand::Balance => print_json(&self.service.vendor().balance().await?)?,
            ShellCommand::Token => self.print_token().await?,
            ShellCommand::Stats => print_json(&self.service.dashboard())?,
            ShellCommand::Metrics => {
                print_json(&self.sampler.snapshot())?;
                let recent = self
                    .sampler
                    .realtime(chrono::Duration::seconds(REALTIME_WINDOW_SECS));
                println!("Requests in the last minute: {}", recent.len());
            }
            ShellCommand::Help => println!("{}", HELP),
            ShellCommand::Quit => {}
        }
        Ok(())
    }
}
