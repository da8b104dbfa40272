//! Operator CLI for the keywarden API.
//!
//! Talks to the running service over HTTP with the same API key the
//! platform adapter uses.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use keywarden_types::{
    AccountInfo, ApiResponse, CreateCredentialRequest, CredentialInfo,
    RenewCredentialRequest, SweepReport, SystemInfo,
};
use reqwest::Client;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "keywarden-admin")]
#[command(about = "Operate a keywarden installation over its HTTP API")]
struct Cli {
    /// Base URL of the keywarden API
    #[arg(long, env = "KEYWARDEN_URL", default_value = "http://127.0.0.1:8686")]
    url: String,

    /// API key (X-API-Key header)
    #[arg(long, env = "KEYWARDEN_API_KEY")]
    api_key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all credentials with their derived status
    List,
    /// Create a credential
    Create {
        credential: String,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Extend a credential
    Renew {
        credential: String,
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Delete a credential
    Delete { credential: String },
    /// Run one expiry sweep
    Sweep,
    /// Show system info
    Info,
    /// Download a backup archive
    Backup {
        /// Where to write the archive
        #[arg(long, default_value = "keywarden-backup.zip")]
        output: PathBuf,
    },
    /// Upload a backup archive and restore it
    Restore { input: PathBuf },
}

struct Api {
    http: Client,
    base: String,
    api_key: String,
}

impl Api {
    fn new(base: &str, api_key: &str) -> Self {
        Self {
            http: Client::new(),
            base: base.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base, path))
            .header("X-API-Key", &self.api_key)
    }

    async fn expect_ok<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> anyhow::Result<ApiResponse<T>> {
        let status = response.status();
        let body: ApiResponse<T> = response
            .json()
            .await
            .with_context(|| format!("unreadable response (HTTP {})", status))?;
        if !body.success {
            bail!("request failed (HTTP {}): {}", status, body.message);
        }
        Ok(body)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let api = Api::new(&cli.url, &cli.api_key);

    match cli.command {
        Commands::List => {
            let response = api.request(reqwest::Method::GET, "/api/credentials").send().await?;
            let body: ApiResponse<Vec<CredentialInfo>> = Api::expect_ok(response).await?;
            let listing = body.data.unwrap_or_default();
            if listing.is_empty() {
                println!("no credentials");
                return Ok(());
            }
            for info in listing {
                println!(
                    "{:<24} {:<8} expires {}",
                    info.credential,
                    info.status.as_str(),
                    info.expires_on
                );
            }
        }

        Commands::Create { credential, days } => {
            let response = api
                .request(reqwest::Method::POST, "/api/credentials")
                .json(&CreateCredentialRequest { credential, days })
                .send()
                .await?;
            let body: ApiResponse<AccountInfo> = Api::expect_ok(response).await?;
            if let Some(account) = body.data {
                println!(
                    "created {} (expires {}{})",
                    account.credential,
                    account.expires_on,
                    account
                        .domain
                        .map(|d| format!(", domain {}", d))
                        .unwrap_or_default()
                );
            }
        }

        Commands::Renew { credential, days } => {
            let response = api
                .request(
                    reqwest::Method::POST,
                    &format!("/api/credentials/{}/renew", credential),
                )
                .json(&RenewCredentialRequest { days })
                .send()
                .await?;
            let body: ApiResponse<AccountInfo> = Api::expect_ok(response).await?;
            if let Some(account) = body.data {
                println!("renewed {} until {}", account.credential, account.expires_on);
            }
        }

        Commands::Delete { credential } => {
            let response = api
                .request(
                    reqwest::Method::DELETE,
                    &format!("/api/credentials/{}", credential),
                )
                .send()
                .await?;
            let body: ApiResponse<()> = Api::expect_ok(response).await?;
            println!("{}", body.message);
        }

        Commands::Sweep => {
            let response = api.request(reqwest::Method::POST, "/api/sweep").send().await?;
            let body: ApiResponse<SweepReport> = Api::expect_ok(response).await?;
            println!("{}", body.message);
            if let Some(report) = body.data {
                for credential in report.revoked {
                    println!("revoked {}", credential);
                }
            }
        }

        Commands::Info => {
            let response = api.request(reqwest::Method::GET, "/api/info").send().await?;
            let body: ApiResponse<SystemInfo> = Api::expect_ok(response).await?;
            if let Some(info) = body.data {
                println!("service : {}", info.service);
                println!("domain  : {}", info.domain.as_deref().unwrap_or("(not configured)"));
                println!("ip      : {}", info.public_ip);
                println!("port    : {}", info.port);
                println!("city    : {}", info.city);
                println!("isp     : {}", info.isp);
            }
        }

        Commands::Backup { output } => {
            let response = api.request(reqwest::Method::GET, "/api/backup").send().await?;
            if !response.status().is_success() {
                bail!("backup failed (HTTP {})", response.status());
            }
            let bytes = response.bytes().await?;
            std::fs::write(&output, &bytes)
                .with_context(|| format!("writing {}", output.display()))?;
            println!("wrote {} ({} bytes)", output.display(), bytes.len());
        }

        Commands::Restore { input } => {
            let bytes = std::fs::read(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let response = api
                .request(reqwest::Method::POST, "/api/restore")
                .body(bytes)
                .send()
                .await?;
            let body: ApiResponse<Vec<String>> = Api::expect_ok(response).await?;
            println!("{}", body.message);
            for name in body.data.unwrap_or_default() {
                println!("applied {}", name);
            }
        }
    }

    Ok(())
}
